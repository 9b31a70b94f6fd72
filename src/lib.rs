#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod code;
pub mod engine;
pub mod hook;
pub mod overlay;
pub mod patcher;
pub mod runtime;
pub mod segment;
pub mod table;

#[cfg(test)]
mod testing;
