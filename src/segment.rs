//! # Segment
//!
//! Bookkeeping for which overlay segments are currently resident

use std::fmt::{self, Write};

use thiserror::Error;

/// Text that starts every loaded-overlay summary line
pub const SUMMARY_PREFIX: &str = "Overlays loaded:";

/// A segment id was outside of `0..SegmentId::COUNT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("overlay id {0} is out of range (expected < {})", SegmentId::COUNT)]
pub struct InvalidSegment(pub u32);

/// Identifier of an overlay segment, guaranteed to be in range for a [`SegmentSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId(u8);
impl SegmentId {
    /// Number of distinct segment ids
    pub const COUNT: u32 = 64;

    /// Creates a segment id, returning `None` if `id` is out of range
    pub const fn new(id: u32) -> Option<Self> {
        if id < Self::COUNT {
            Some(Self(id as u8))
        } else {
            None
        }
    }

    /// Raw id, as it appears in patch records and loader calls
    pub const fn get(self) -> u32 {
        self.0 as u32
    }

    /// Position of this segment's bit in a [`SegmentSet`]
    const fn slot(self) -> (usize, u32) {
        ((self.0 >> 5) as usize, 1 << (self.0 & 31))
    }
}
impl TryFrom<u32> for SegmentId {
    type Error = InvalidSegment;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::new(id).ok_or(InvalidSegment(id))
    }
}
impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of resident segments, one bit per [`SegmentId`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SegmentSet {
    /// Bit `i % 32` of word `i / 32` is set while segment `i` is loaded
    words: [u32; 2],
}
impl SegmentSet {
    /// Creates an empty set
    pub const fn new() -> Self {
        Self { words: [0; 2] }
    }

    /// Records `id` as resident. Marking a resident segment again does nothing.
    pub fn mark_loaded(&mut self, id: SegmentId) {
        let (word, bit) = id.slot();
        self.words[word] |= bit;
    }

    /// Records `id` as no longer resident. Unmarking a missing segment does nothing.
    pub fn mark_unloaded(&mut self, id: SegmentId) {
        let (word, bit) = id.slot();
        self.words[word] &= !bit;
    }

    /// Checks if `id` is resident
    pub fn is_loaded(&self, id: SegmentId) -> bool {
        let (word, bit) = id.slot();
        self.words[word] & bit != 0
    }

    /// Iterates over resident segments in ascending order
    pub fn iter(&self) -> impl Iterator<Item = SegmentId> + '_ {
        (0..SegmentId::COUNT)
            .filter_map(SegmentId::new)
            .filter(move |&id| self.is_loaded(id))
    }

    /// Number of resident segments
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Checks if no segment is resident
    pub fn is_empty(&self) -> bool {
        self.words == [0; 2]
    }

    /// Forgets every segment
    pub fn clear(&mut self) {
        self.words = [0; 2];
    }

    /// Renders the summary line for the debug console, e.g. `"Overlays loaded: 2 5 40\n"`
    pub fn render_loaded_summary(&self) -> String {
        if self.is_empty() {
            format!("{}\n", SUMMARY_PREFIX)
        } else {
            format!("{} {}\n", SUMMARY_PREFIX, self)
        }
    }
}
impl fmt::Display for SegmentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.iter().enumerate() {
            if i > 0 {
                f.write_char(' ')?;
            }
            write!(f, "{}", id)?;
        }
        Ok(())
    }
}
