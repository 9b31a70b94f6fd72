//! # Engine
//!
//! Applies the patch records of an overlay once it is in memory

use log::debug;

use crate::{
    code::arm::decode_branch,
    hook::{branch::BranchHook, Hook},
    patcher::Patcher,
    segment::SegmentId,
    table::{PatchRecord, PatchTable},
};

/// Applies patch records from a table through a patcher
#[derive(Debug)]
pub struct PatchEngine<'t, P> {
    /// Records to apply
    table: PatchTable<'t>,
    /// Writes the branches
    hook: BranchHook<P>,
}
impl<'t, P: Patcher> PatchEngine<'t, P> {
    /// Creates an engine over `table`. The table should have passed [`PatchTable::validate`].
    pub fn new(table: PatchTable<'t>, patcher: P) -> Self {
        Self {
            table,
            hook: BranchHook::new(patcher),
        }
    }

    /// The patcher memory goes through
    pub fn patcher(&self) -> &P {
        self.hook.patcher()
    }

    /// Applies every record of `segment`, in table order, returning how many were applied.
    ///
    /// For each record the original word is first copied into its backup slot (if it has one),
    /// then replaced with a branch to the replacement. If a write fails, the records before it
    /// stay applied.
    ///
    /// # Safety
    ///
    /// `segment` must be resident, and every `patch_location` and `backup_location` of its records
    /// must be valid for the patcher.
    ///
    /// # Panics
    ///
    /// If a record's branch can't be encoded. [`PatchTable::validate`] rules this out.
    pub unsafe fn apply_patches_for(&self, segment: SegmentId) -> Result<usize, P::Error> {
        let mut applied = 0;
        for record in self.table.for_segment(segment) {
            self.apply(record)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Applies a single record
    ///
    /// # Safety
    ///
    /// See [`PatchEngine::apply_patches_for`]
    unsafe fn apply(&self, record: &PatchRecord) -> Result<(), P::Error> {
        let location = record.patch_location();
        if let Some(backup) = record.backup_location() {
            let original = self.patcher().read(location as *const u32);
            self.patcher().patch(backup as *mut u32, original)?;
        }

        let original = self
            .hook
            .hook(location, record.replacement_target(), record.kind())?;
        match decode_branch(original, location) {
            // repatching a word that already branches, e.g. after a reload without an unload
            Some((previous, previous_kind)) => debug!(
                "Patched {:#010x}: {:?} to {:#010x} -> {:?} to {:#010x}",
                location,
                previous_kind,
                previous,
                record.kind(),
                record.replacement_target()
            ),
            None => debug!(
                "Patched {:#010x}: {:#010x} -> {:?} to {:#010x}",
                location,
                original,
                record.kind(),
                record.replacement_target()
            ),
        }
        Ok(())
    }
}
