//! This module contains a patcher which adjusts memory permissions to patch read-only code

use std::mem;

use region::Protection;
use thiserror::Error;

use super::Patcher;

/// Errors when using permission patching
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// Error when setting memory protections
    #[error("Error setting memory protections")]
    ProtectionError(#[from] region::Error),
    /// Custom error type from the underlying patcher
    #[error("{0}")]
    CustomError(E),
}
impl From<()> for PermissionError<()> {
    fn from(e: ()) -> Self {
        Self::CustomError(e)
    }
}

/// This struct wraps patchers to allow them to write to memory that's normally unwritable, such as
/// the text of a freshly loaded overlay.
/// It achieves this result by changing the memory permissions of the target word, triggering the patch, and then reverting the permissions.
///
/// Reads go straight to the wrapped patcher, since code is always readable.
///
/// # Safety
///
/// As always, casting a `&T` or `&mut T` to a `*mut u32` for use with `PermissionWrapper` can result in undefined behavior because rust assumes `&T` will never change and `&mut T` will only be changed via that reference.
/// The `*mut u32` **MUST** be memory not tracked by Rust, or ensured that reading from and writing to data tracked by Rust will not trigger undefined behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionWrapper<P: Patcher> {
    /// Underlying patcher.
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Creates a new PermissionWrapper
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

/// Converts a const pointer to a mutable pointer to be passed into our [`Patcher::patch`] implementation.
///
/// # Safety
///
/// **THIS FUNCTION DOES NOT CHANGE MEMORY PERMISSIONS.**
///
/// It is **NOT** safe to treat the returned value as mutable, as this function does not change memory permissions.
///
/// This function should **ONLY** be called in conjunction with our [`Patcher::patch`] implementation, which properly changes the memory permissions.
pub unsafe fn to_mut<T>(ptr: *const T) -> *mut T {
    ptr as _
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    PermissionError<P::Error>: From<P::Error>,
{
    type Error = PermissionError<P::Error>;

    unsafe fn read(&self, location: *const u32) -> u32 {
        self.patcher.read(location)
    }

    unsafe fn patch(&self, location: *mut u32, word: u32) -> Result<u32, Self::Error> {
        // the handle puts the original protection back when it goes out of scope
        let _guard =
            region::protect_with_handle(location, mem::size_of::<u32>(), Protection::all())?;
        self.patcher.patch(location, word).map_err(Into::into)
    }
}
