//! # Patcher
//!
//! This module covers patchers, which read and overwrite instruction words in memory.
//!
//! Unlike a general purpose hook, an overlay patch is never undone by us: the segment it lives in
//! gets replaced wholesale by the loader. Patchers therefore hand back the word they replaced
//! instead of a guard that restores it on drop.

pub mod mem;
pub mod word;

/// Reads and writes aligned 32-bit words at arbitrary addresses
///
/// # Safety
///
/// Patchers are inherently unsafe. The implementor must ensure that `patch` writes exactly the
/// one word at `location` and nothing else, since callers rely on it to reason about what memory
/// was touched.
pub unsafe trait Patcher {
    /// Error type that can occur when patching. If patching always succeeds, use `()`.
    type Error;

    /// Reads the word at `location`.
    ///
    /// # Safety
    ///
    /// `location` must be aligned and [valid](https://doc.rust-lang.org/stable/std/ptr/index.html#safety) for reads
    unsafe fn read(&self, location: *const u32) -> u32;

    /// Replaces the word at `location` with `word`, returning the word that was there before.
    ///
    /// # Safety
    ///
    /// `location` must be aligned and valid for the patcher: plain patchers need it writable,
    /// wrappers may make it writable themselves.
    unsafe fn patch(&self, location: *mut u32, word: u32) -> Result<u32, Self::Error>;
}

unsafe impl<P: Patcher> Patcher for &P {
    type Error = P::Error;

    unsafe fn read(&self, location: *const u32) -> u32 {
        (**self).read(location)
    }

    unsafe fn patch(&self, location: *mut u32, word: u32) -> Result<u32, Self::Error> {
        (**self).patch(location, word)
    }
}
