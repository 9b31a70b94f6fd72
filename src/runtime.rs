//! # Runtime
//!
//! Process-wide home for the [`OverlayTracker`], for hook facilities that call plain functions
//! without any user data.
//!
//! The facility should route the loader's calls as follows:
//! - start of the overlay load routine: [`ovpatch_load_begin`]
//! - every return path of the overlay load routine: [`ovpatch_load_complete`]
//! - start of the overlay unload routine: [`ovpatch_unload`]
//!
//! The loader passes the overlay id as its second argument, so the entry points take the first
//! argument only to line up with it.

use std::sync::Mutex;

use lazy_static::lazy_static;
use log::info;
use thiserror::Error;

use crate::{
    overlay::OverlayTracker,
    patcher::{mem::PermissionWrapper, word::WordPatcher},
    table::{PatchTable, TableError},
};

/// Patcher used by the installed tracker: overlay text may be mapped read-only
pub type DefaultPatcher = PermissionWrapper<WordPatcher>;

/// The installed tracker
pub type Tracker = OverlayTracker<'static, DefaultPatcher>;

/// Errors when setting up or reaching the installed tracker
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// [`install`] was called twice
    #[error("overlay patcher is already installed")]
    AlreadyInstalled,
    /// An event arrived before [`install`]
    #[error("overlay patcher is not installed")]
    NotInstalled,
    /// A previous event panicked while holding the tracker
    #[error("overlay patcher state is poisoned")]
    Poisoned,
    /// The patch table is unusable
    #[error("invalid patch table: {0}")]
    Table(#[from] TableError),
}

lazy_static! {
    static ref TRACKER: Mutex<Option<Tracker>> = Mutex::new(None);
}

/// Validates `table` and installs a tracker for it
pub fn install(table: PatchTable<'static>) -> Result<(), RuntimeError> {
    let mut slot = TRACKER.lock().map_err(|_| RuntimeError::Poisoned)?;
    if slot.is_some() {
        return Err(RuntimeError::AlreadyInstalled);
    }

    let tracker = OverlayTracker::new(table, PermissionWrapper::new(WordPatcher::new()))?;
    info!("Overlay patcher installed with {} patch records", table.len());
    *slot = Some(tracker);
    Ok(())
}

/// Removes the installed tracker, if any
pub fn uninstall() -> Result<Option<Tracker>, RuntimeError> {
    let mut slot = TRACKER.lock().map_err(|_| RuntimeError::Poisoned)?;
    Ok(slot.take())
}

/// Runs `f` with the installed tracker
pub fn with_tracker<R>(f: impl FnOnce(&mut Tracker) -> R) -> Result<R, RuntimeError> {
    let mut slot = TRACKER.lock().map_err(|_| RuntimeError::Poisoned)?;
    slot.as_mut().map(f).ok_or(RuntimeError::NotInstalled)
}

#[cfg(feature = "linker-table")]
extern "C" {
    /// First byte of the patch table, placed by the linker script
    static __ovpt_start: u8;
    /// One past the last byte of the patch table, placed by the linker script
    static __ovpt_end: u8;
}

/// Installs a tracker for the table between the `__ovpt_start` and `__ovpt_end` linker symbols
#[cfg(feature = "linker-table")]
pub fn install_from_linker() -> Result<(), RuntimeError> {
    // Safety: the linker script places the symbols around the table, which is never written
    let table = unsafe {
        PatchTable::from_bounds(
            std::ptr::addr_of!(__ovpt_start).cast(),
            std::ptr::addr_of!(__ovpt_end).cast(),
        )?
    };
    install(table)
}

/// Unwraps the result of an entry point. There's no caller to report to, so failures are fatal.
fn fatal<T, E: std::fmt::Debug>(event: &str, result: Result<Result<T, E>, RuntimeError>) -> T {
    match result {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => panic!("overlay {} failed: {:?}", event, e),
        Err(e) => panic!("overlay {} failed: {}", event, e),
    }
}

/// Hook for the start of an overlay load.
///
/// # Panics
///
/// If no tracker is installed, `segment` is out of range, or another load is in flight.
#[no_mangle]
pub extern "C" fn ovpatch_load_begin(_param1: u32, segment: u32) {
    fatal(
        "load begin",
        with_tracker(|tracker| tracker.on_load_begin(segment)),
    )
}

/// Hook for the end of an overlay load. Patches the overlay passed to [`ovpatch_load_begin`].
///
/// # Safety
///
/// The overlay must now be in memory, see [`OverlayTracker::on_load_complete`].
///
/// # Panics
///
/// If no tracker is installed, no load is in flight, or a patch fails.
#[no_mangle]
pub unsafe extern "C" fn ovpatch_load_complete() {
    fatal(
        "load complete",
        with_tracker(|tracker| unsafe { tracker.on_load_complete() }),
    );
}

/// Hook for the start of an overlay unload.
///
/// # Panics
///
/// If no tracker is installed or `segment` is out of range.
#[no_mangle]
pub extern "C" fn ovpatch_unload(_param1: u32, segment: u32) {
    fatal("unload", with_tracker(|tracker| tracker.on_unload(segment)))
}
