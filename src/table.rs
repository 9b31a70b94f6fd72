//! # Table
//!
//! The patch table is an array of [`PatchRecord`]s placed in memory by the link step, before any of
//! our code runs. This module turns the raw bounds of that array into a checked, iterable view.

use std::collections::HashSet;
use std::{fmt, iter, mem, slice};

use thiserror::Error;

use crate::code::arm::{checked_branch, BranchError, BranchKind};
use crate::segment::SegmentId;

/// One requested redirection inside an overlay.
///
/// The layout is shared with the patch table produced by the link step, so every field is a plain
/// integer: the table is foreign memory and must not be able to hold an invalid Rust value.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchRecord {
    /// Overlay that contains `patch_location`
    segment_id: u32,
    /// Word to overwrite with the branch
    patch_location: usize,
    /// Where the branch goes
    replacement_target: usize,
    /// Non-zero for `bl`, zero for `b`
    is_call: u32,
    /// Slot that receives the original word, or zero
    backup_location: usize,
}
impl PatchRecord {
    /// Creates a record. `backup_location` of `None` leaves the original word unsaved.
    pub const fn new(
        segment_id: u32,
        patch_location: usize,
        replacement_target: usize,
        is_call: bool,
        backup_location: Option<usize>,
    ) -> Self {
        Self {
            segment_id,
            patch_location,
            replacement_target,
            is_call: is_call as u32,
            backup_location: match backup_location {
                Some(backup) => backup,
                None => 0,
            },
        }
    }

    /// Raw overlay id, which may be out of range in an unvalidated table
    pub fn segment_id(&self) -> u32 {
        self.segment_id
    }

    /// Address of the word to overwrite
    pub fn patch_location(&self) -> usize {
        self.patch_location
    }

    /// Address the branch lands on
    pub fn replacement_target(&self) -> usize {
        self.replacement_target
    }

    /// Whether the replacement is called (and returns) rather than jumped to
    pub fn is_call(&self) -> bool {
        self.is_call != 0
    }

    /// Kind of branch to emit
    pub fn kind(&self) -> BranchKind {
        BranchKind::from_call_flag(self.is_call())
    }

    /// Where to save the original word, if anywhere
    pub fn backup_location(&self) -> Option<usize> {
        match self.backup_location {
            0 => None,
            backup => Some(backup),
        }
    }
}
impl fmt::Debug for PatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchRecord")
            .field("segment_id", &self.segment_id)
            .field("patch_location", &format_args!("{:#x}", self.patch_location))
            .field(
                "replacement_target",
                &format_args!("{:#x}", self.replacement_target),
            )
            .field("kind", &self.kind())
            .field(
                "backup_location",
                &format_args!("{:#x}", self.backup_location),
            )
            .finish()
    }
}

/// Reasons a patch table is unusable
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// The end marker comes before the start marker
    #[error("patch table ends at {end:#x}, before it starts at {start:#x}")]
    Reversed {
        /// Start marker
        start: usize,
        /// End marker
        end: usize,
    },
    /// The start marker can't hold a record
    #[error("patch table start {start:#x} is not aligned for a patch record")]
    Misaligned {
        /// Start marker
        start: usize,
    },
    /// The table isn't a whole number of records
    #[error("patch table spans {bytes:#x} bytes, which is not a multiple of the {record_size}-byte record")]
    RaggedLength {
        /// Distance between the markers
        bytes: usize,
        /// Size of one record
        record_size: usize,
    },
    /// A record names an overlay that can't exist
    #[error("patch record {index} names overlay {segment}, which is out of range")]
    InvalidSegment {
        /// Position of the record in the table
        index: usize,
        /// The offending id
        segment: u32,
    },
    /// A record would write to a null or unaligned word
    #[error("patch record {index} targets {location:#x}, which is not a patchable word")]
    BadLocation {
        /// Position of the record in the table
        index: usize,
        /// The offending address
        location: usize,
    },
    /// A record's backup slot is unaligned
    #[error("patch record {index} backs up into {location:#x}, which is not word-aligned")]
    BadBackup {
        /// Position of the record in the table
        index: usize,
        /// The offending address
        location: usize,
    },
    /// A record's branch can't be encoded
    #[error("patch record {index}: {source}")]
    Branch {
        /// Position of the record in the table
        index: usize,
        /// Why the branch can't be encoded
        source: BranchError,
    },
    /// Two records of one overlay patch the same word
    #[error("patch record {index} patches {location:#x} in overlay {segment}, which an earlier record already patches")]
    DuplicateLocation {
        /// Position of the later record in the table
        index: usize,
        /// Overlay both records belong to
        segment: u32,
        /// The shared address
        location: usize,
    },
    /// Two records back up into the same slot
    #[error("patch record {index} backs up into {location:#x}, which an earlier record already backs up into")]
    DuplicateBackup {
        /// Position of the later record in the table
        index: usize,
        /// The shared backup slot
        location: usize,
    },
    /// A record's backup slot is a word that some record patches, in any overlay
    #[error("patch record {index} in overlay {segment} backs up into {location:#x}, which is also a patch location")]
    BackupOverlapsPatch {
        /// Position of the record in the table
        index: usize,
        /// Overlay the record belongs to
        segment: u32,
        /// The shared address
        location: usize,
    },
}

/// Checked view over a patch table
#[derive(Debug, Clone, Copy)]
pub struct PatchTable<'a> {
    /// Every record, in storage order
    records: &'a [PatchRecord],
}
impl<'a> PatchTable<'a> {
    /// Creates a view over records that are already in a slice
    pub fn new(records: &'a [PatchRecord]) -> Self {
        Self { records }
    }

    /// Creates a view over the records between two markers. `end` is one past the last record.
    ///
    /// # Safety
    ///
    /// If the markers are consistent (see [`TableError`]), the memory between them must be valid
    /// for reads of [`PatchRecord`]s for `'a` and must not change while the view exists.
    pub unsafe fn from_bounds(
        start: *const PatchRecord,
        end: *const PatchRecord,
    ) -> Result<Self, TableError> {
        let (start_addr, end_addr) = (start as usize, end as usize);
        let bytes = end_addr
            .checked_sub(start_addr)
            .ok_or(TableError::Reversed {
                start: start_addr,
                end: end_addr,
            })?;
        if start_addr % mem::align_of::<PatchRecord>() != 0 {
            return Err(TableError::Misaligned { start: start_addr });
        }
        let record_size = mem::size_of::<PatchRecord>();
        if bytes % record_size != 0 {
            return Err(TableError::RaggedLength { bytes, record_size });
        }

        let len = bytes / record_size;
        if len == 0 {
            return Ok(Self::new(&[]));
        }
        // Safety: markers are aligned and ordered, caller guarantees the memory itself
        Ok(Self::new(slice::from_raw_parts(start, len)))
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Checks if the table holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Every record in storage order. Each call starts over from the first record.
    pub fn records(&self) -> Records<'a> {
        self.records.iter()
    }

    /// Records for a single overlay, in storage order
    pub fn for_segment(&self, segment: SegmentId) -> SegmentRecords<'a> {
        SegmentRecords {
            records: self.records.iter(),
            segment: segment.get(),
        }
    }

    /// Number of records for a single overlay
    pub fn count_for(&self, segment: SegmentId) -> usize {
        self.for_segment(segment).count()
    }

    /// Checks that every record can be applied.
    ///
    /// Besides the per-record checks, two records of the same overlay may not patch the same
    /// word, and two records may not share a backup slot. No backup slot may be a word that any
    /// record patches: backup slots live outside the overlay window, so a slot that another
    /// overlay patches gets overwritten whenever that overlay loads.
    pub fn validate(&self) -> Result<(), TableError> {
        let mut patched = HashSet::with_capacity(self.len());
        let mut backups = HashSet::new();
        for (index, record) in self.records.iter().enumerate() {
            let segment = record.segment_id();
            if SegmentId::new(segment).is_none() {
                return Err(TableError::InvalidSegment { index, segment });
            }

            let location = record.patch_location();
            if location == 0 || location % mem::align_of::<u32>() != 0 {
                return Err(TableError::BadLocation { index, location });
            }
            if let Some(backup) = record.backup_location() {
                if backup % mem::align_of::<u32>() != 0 {
                    return Err(TableError::BadBackup {
                        index,
                        location: backup,
                    });
                }
                if !backups.insert(backup) {
                    return Err(TableError::DuplicateBackup {
                        index,
                        location: backup,
                    });
                }
            }
            checked_branch(location, record.replacement_target(), record.kind())
                .map_err(|source| TableError::Branch { index, source })?;

            if !patched.insert((segment, location)) {
                return Err(TableError::DuplicateLocation {
                    index,
                    segment,
                    location,
                });
            }
        }

        let locations: HashSet<usize> = patched.iter().map(|&(_, location)| location).collect();
        for (index, record) in self.records.iter().enumerate() {
            let segment = record.segment_id();
            if let Some(backup) = record.backup_location() {
                if locations.contains(&backup) {
                    return Err(TableError::BackupOverlapsPatch {
                        index,
                        segment,
                        location: backup,
                    });
                }
            }
        }

        Ok(())
    }
}

/// Iterator over every record of a [`PatchTable`]
pub type Records<'a> = slice::Iter<'a, PatchRecord>;

/// Iterator over the records of a [`PatchTable`] that belong to one overlay
#[derive(Debug, Clone)]
pub struct SegmentRecords<'a> {
    /// Remaining records
    records: slice::Iter<'a, PatchRecord>,
    /// Raw id to match
    segment: u32,
}
impl<'a> Iterator for SegmentRecords<'a> {
    type Item = &'a PatchRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let segment = self.segment;
        self.records.find(|record| record.segment_id() == segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.records.size_hint().1)
    }
}
impl iter::FusedIterator for SegmentRecords<'_> {}
