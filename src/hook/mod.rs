//! # Hook
//!
//! This module covers hooks, which redirect execution from one location to another

pub mod branch;

use crate::code::arm::BranchKind;

/// Trait for hooks
///
/// # Safety
///
/// Hooks are inherently unsafe; the implementor must only write to `source`
pub unsafe trait Hook {
    /// Errors that could happen during a hook
    type Error;

    /// Creates a hook which redirects `source` to `destination`, returning the instruction word
    /// that used to be at `source`.
    ///
    /// # Safety
    ///
    /// - `source` must be a valid, aligned instruction address for the underlying patcher
    /// - `destination` must be valid executable code, reachable from `source`
    unsafe fn hook(
        &self,
        source: usize,
        destination: usize,
        kind: BranchKind,
    ) -> Result<u32, Self::Error>;
}
