//! This module contains a word patcher

use std::ptr;

use super::Patcher;

/// Patcher for overwriting single instruction words in writable memory.
/// This patcher never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordPatcher;
impl WordPatcher {
    /// Creates a new [`WordPatcher`]
    pub fn new() -> Self {
        Self::default()
    }
}
unsafe impl Patcher for WordPatcher {
    type Error = ();

    unsafe fn read(&self, location: *const u32) -> u32 {
        // Safety: caller must pass in an aligned `location` that is valid for reads.
        // Volatile because the loader wrote this memory behind the compiler's back.
        ptr::read_volatile(location)
    }

    unsafe fn patch(&self, location: *mut u32, word: u32) -> Result<u32, Self::Error> {
        // Safety: caller must ensure that `location` is aligned and writable
        let original = ptr::read_volatile(location);
        ptr::write_volatile(location, word);
        Ok(original)
    }
}
