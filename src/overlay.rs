//! # Overlay
//!
//! Reacts to the loader: tracks which overlay is being loaded, patches it once it's in memory,
//! and keeps the set of resident overlays up to date.
//!
//! An overlay goes `unloaded -> loading -> loaded -> unloaded`. The loader announces the start of a
//! load with the overlay id, and the end of the load without one, so the id is remembered in
//! between. Loads are expected to be strictly serialized; a second load starting before the first
//! finished is reported as an error rather than silently patching the wrong overlay.

use log::{info, warn};
use thiserror::Error;

use crate::{
    engine::PatchEngine,
    patcher::Patcher,
    segment::{InvalidSegment, SegmentId, SegmentSet},
    table::{PatchTable, TableError},
};

/// Whether a load is in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverlayPhase {
    /// No load is in flight
    #[default]
    Idle,
    /// The loader is reading the given overlay into memory
    Loading(SegmentId),
}

/// Errors from loader events
#[derive(Debug, Error)]
pub enum EventError<E> {
    /// The loader passed an id we can't track
    #[error(transparent)]
    InvalidSegment(#[from] InvalidSegment),
    /// A load began while another was still in flight
    #[error("overlay {requested} began loading while overlay {in_flight} was still loading")]
    LoadInFlight {
        /// Overlay whose load hasn't completed
        in_flight: SegmentId,
        /// Overlay that tried to start loading
        requested: SegmentId,
    },
    /// A load completed that never began
    #[error("overlay load completed, but no load was in flight")]
    NoLoadInFlight,
    /// The patcher failed partway through an overlay's records
    #[error("failed to patch overlay {segment}")]
    Patch {
        /// Overlay being patched
        segment: SegmentId,
        /// Error from the patcher
        error: E,
    },
}

/// Loader event handlers and the state they share
#[derive(Debug)]
pub struct OverlayTracker<'t, P> {
    /// Applies patches once an overlay is loaded
    engine: PatchEngine<'t, P>,
    /// Overlays that are resident
    loaded: SegmentSet,
    /// Load in flight, if any
    phase: OverlayPhase,
}
impl<'t, P: Patcher> OverlayTracker<'t, P> {
    /// Creates a tracker with nothing loaded. Fails if any record in `table` can't be applied.
    pub fn new(table: PatchTable<'t>, patcher: P) -> Result<Self, TableError> {
        table.validate()?;
        Ok(Self {
            engine: PatchEngine::new(table, patcher),
            loaded: SegmentSet::new(),
            phase: OverlayPhase::Idle,
        })
    }

    /// Resident overlays
    pub fn loaded(&self) -> &SegmentSet {
        &self.loaded
    }

    /// Load in flight, if any
    pub fn phase(&self) -> OverlayPhase {
        self.phase
    }

    /// The loader started reading `segment` into memory
    pub fn on_load_begin(&mut self, segment: u32) -> Result<(), EventError<P::Error>> {
        let requested = SegmentId::try_from(segment)?;
        if let OverlayPhase::Loading(in_flight) = self.phase {
            return Err(EventError::LoadInFlight {
                in_flight,
                requested,
            });
        }
        if self.loaded.is_loaded(requested) {
            warn!("Overlay {} is loading again without being unloaded", requested);
        }

        self.phase = OverlayPhase::Loading(requested);
        Ok(())
    }

    /// The loader finished reading the overlay from [`OverlayTracker::on_load_begin`] into memory.
    ///
    /// Patches the overlay and marks it loaded, returning how many records were applied. The
    /// loader has put the overlay in memory whether or not patching succeeds, so it is marked
    /// loaded either way; the records applied before a failure stay applied. Either way the load
    /// is no longer in flight.
    ///
    /// # Safety
    ///
    /// The overlay's patch and backup locations must be valid for the patcher now that it's loaded.
    pub unsafe fn on_load_complete(&mut self) -> Result<usize, EventError<P::Error>> {
        let segment = match std::mem::take(&mut self.phase) {
            OverlayPhase::Loading(segment) => segment,
            OverlayPhase::Idle => return Err(EventError::NoLoadInFlight),
        };

        let result = self.engine.apply_patches_for(segment);
        self.loaded.mark_loaded(segment);
        let applied = result.map_err(|error| {
            warn!("Loaded overlay {} but failed to patch it", segment);
            EventError::Patch { segment, error }
        })?;

        info!("Loaded overlay {} ({} patches)", segment, applied);
        info!("{}", self.loaded.render_loaded_summary().trim_end());
        Ok(applied)
    }

    /// The loader is about to drop `segment`. Its memory may still be in place.
    pub fn on_unload(&mut self, segment: u32) -> Result<(), EventError<P::Error>> {
        let segment = SegmentId::try_from(segment)?;
        self.loaded.mark_unloaded(segment);

        info!("Unloaded overlay {}", segment);
        info!("{}", self.loaded.render_loaded_summary().trim_end());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::code::arm::{encode_branch, BranchKind};
    use crate::overlay::{EventError, OverlayPhase, OverlayTracker};
    use crate::segment::{InvalidSegment, SegmentId};
    use crate::table::{PatchRecord, PatchTable, TableError};
    use crate::testing::{Fault, SimMemory};

    /// Shorthand for ids known to be in range
    fn id(id: u32) -> SegmentId {
        SegmentId::new(id).unwrap()
    }

    /// Two records for overlay 3, one for overlay 9
    static RECORDS: [PatchRecord; 3] = [
        PatchRecord::new(3, 0x1000, 0x9000, true, Some(0x2000)),
        PatchRecord::new(9, 0x1000, 0x9100, false, None),
        PatchRecord::new(3, 0x1010, 0x9200, false, None),
    ];

    #[test]
    /// begin -> complete -> unload
    fn test_lifecycle() {
        let memory = SimMemory::with_words([(0x1000, 0xDEAD_BEEF), (0x1010, 0xCAFE_F00D)]);
        let mut tracker = OverlayTracker::new(PatchTable::new(&RECORDS), &memory).unwrap();
        assert_eq!(tracker.phase(), OverlayPhase::Idle);
        assert!(tracker.loaded().is_empty());

        tracker.on_load_begin(3).unwrap();
        assert_eq!(tracker.phase(), OverlayPhase::Loading(id(3)));
        // nothing is patched until the load completes
        assert!(memory.writes().is_empty());
        assert!(!tracker.loaded().is_loaded(id(3)));

        let applied = unsafe { tracker.on_load_complete().unwrap() };
        assert_eq!(applied, 2);
        assert_eq!(tracker.phase(), OverlayPhase::Idle);
        assert!(tracker.loaded().is_loaded(id(3)));
        assert_eq!(memory.word(0x2000), 0xDEAD_BEEF);
        assert_eq!(
            memory.word(0x1000),
            encode_branch(0x1000, 0x9000, BranchKind::Call)
        );
        assert_eq!(
            memory.word(0x1010),
            encode_branch(0x1010, 0x9200, BranchKind::Jump)
        );

        let writes = memory.writes().len();
        tracker.on_unload(3).unwrap();
        assert!(!tracker.loaded().is_loaded(id(3)));
        // unloading doesn't touch the overlay's memory
        assert_eq!(memory.writes().len(), writes);
    }

    #[test]
    /// Several overlays resident at once
    fn test_multiple_loaded() {
        let memory = SimMemory::default();
        let mut tracker = OverlayTracker::new(PatchTable::new(&RECORDS), &memory).unwrap();

        for segment in [40, 2, 5] {
            tracker.on_load_begin(segment).unwrap();
            unsafe { tracker.on_load_complete().unwrap() };
        }
        assert_eq!(
            tracker.loaded().render_loaded_summary(),
            "Overlays loaded: 2 5 40\n"
        );

        tracker.on_unload(5).unwrap();
        // unloading twice is harmless
        tracker.on_unload(5).unwrap();
        assert_eq!(
            tracker.loaded().render_loaded_summary(),
            "Overlays loaded: 2 40\n"
        );
    }

    #[test]
    /// A second begin before the first completes is a protocol violation
    fn test_reentrant_load() {
        let memory = SimMemory::default();
        let mut tracker = OverlayTracker::new(PatchTable::new(&RECORDS), &memory).unwrap();

        tracker.on_load_begin(3).unwrap();
        let err = tracker.on_load_begin(9).unwrap_err();
        assert!(matches!(
            err,
            EventError::LoadInFlight { in_flight, requested }
                if in_flight == id(3) && requested == id(9)
        ));
        // the first load is still the one in flight
        assert_eq!(tracker.phase(), OverlayPhase::Loading(id(3)));
    }

    #[test]
    fn test_complete_without_begin() {
        let memory = SimMemory::default();
        let mut tracker = OverlayTracker::new(PatchTable::new(&RECORDS), &memory).unwrap();

        let err = unsafe { tracker.on_load_complete().unwrap_err() };
        assert!(matches!(err, EventError::NoLoadInFlight));

        // a completed load can't be completed twice
        tracker.on_load_begin(9).unwrap();
        unsafe { tracker.on_load_complete().unwrap() };
        let err = unsafe { tracker.on_load_complete().unwrap_err() };
        assert!(matches!(err, EventError::NoLoadInFlight));
    }

    #[test]
    fn test_invalid_ids() {
        let memory = SimMemory::default();
        let mut tracker = OverlayTracker::new(PatchTable::new(&RECORDS), &memory).unwrap();

        assert!(matches!(
            tracker.on_load_begin(64),
            Err(EventError::InvalidSegment(InvalidSegment(64)))
        ));
        assert_eq!(tracker.phase(), OverlayPhase::Idle);
        assert!(matches!(
            tracker.on_unload(1000),
            Err(EventError::InvalidSegment(InvalidSegment(1000)))
        ));
    }

    #[test]
    /// A failed patch still marks the overlay loaded and leaves the tracker ready for the next load
    fn test_patch_failure() {
        let memory = SimMemory::default().fault_at(0x1010);
        let mut tracker = OverlayTracker::new(PatchTable::new(&RECORDS), &memory).unwrap();

        tracker.on_load_begin(3).unwrap();
        let err = unsafe { tracker.on_load_complete().unwrap_err() };
        assert!(matches!(
            err,
            EventError::Patch { segment, error: Fault(0x1010) } if segment == id(3)
        ));
        assert!(tracker.loaded().is_loaded(id(3)));
        assert_eq!(tracker.phase(), OverlayPhase::Idle);

        // the record before the fault stays applied
        assert_eq!(
            memory.word(0x1000),
            encode_branch(0x1000, 0x9000, BranchKind::Call)
        );
        assert_eq!(memory.word(0x1010), 0);

        // unloading clears it as usual
        tracker.on_unload(3).unwrap();
        assert!(tracker.loaded().is_empty());
    }

    #[test]
    /// Bad tables are rejected before any event arrives
    fn test_rejects_bad_table() {
        let records = [
            PatchRecord::new(3, 0x1000, 0x9000, true, None),
            PatchRecord::new(3, 0x1000, 0x9100, true, None),
        ];
        let memory = SimMemory::default();
        let err = OverlayTracker::new(PatchTable::new(&records), &memory).unwrap_err();
        assert!(matches!(err, TableError::DuplicateLocation { index: 1, .. }));
    }
}
