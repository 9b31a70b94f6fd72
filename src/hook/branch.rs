//! # Branch Hook
//!
//! This hook type uses a single relative `b`/`bl` instruction to redirect execution

use crate::{
    code::arm::{encode_branch, BranchKind},
    patcher::Patcher,
};

use super::Hook;

/// Simple branch hook
#[derive(Debug, Default, Clone, Copy)]
pub struct BranchHook<P> {
    /// Underlying patcher to be used to hook
    patcher: P,
}
impl<P: Patcher> BranchHook<P> {
    /// Creates a new branch hook
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }

    /// Get the underlying patcher for reads and other writes
    pub fn patcher(&self) -> &P {
        &self.patcher
    }
}
unsafe impl<P: Patcher> Hook for BranchHook<P> {
    type Error = P::Error;

    /// # Panics
    ///
    /// If `destination` is out of reach of `source`, see [`encode_branch`]
    unsafe fn hook(
        &self,
        source: usize,
        destination: usize,
        kind: BranchKind,
    ) -> Result<u32, Self::Error> {
        // patch with a relative branch to the destination
        let word = encode_branch(source, destination, kind);
        self.patcher.patch(source as *mut u32, word)
    }
}
