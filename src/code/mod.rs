//! # Code
//!
//! Instruction encoders for the architectures we can patch

pub mod arm;
