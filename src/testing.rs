//! Simulated address space for tests that need fixed addresses

use std::cell::RefCell;
use std::collections::BTreeMap;

use crate::patcher::Patcher;

/// A write hit an address marked as faulting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault(pub usize);

/// Sparse word-addressed memory. Pointers handed to it are treated as plain addresses and are
/// never dereferenced. Words that were never written read as zero.
#[derive(Debug, Default)]
pub struct SimMemory {
    /// Every word that has been written
    words: RefCell<BTreeMap<usize, u32>>,
    /// Addresses in the order they were written
    writes: RefCell<Vec<usize>>,
    /// Address that fails to patch
    fault: Option<usize>,
}
impl SimMemory {
    /// Creates memory from `(address, word)` pairs
    pub fn with_words(words: impl IntoIterator<Item = (usize, u32)>) -> Self {
        Self {
            words: RefCell::new(words.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Makes writes to `address` fail
    pub fn fault_at(mut self, address: usize) -> Self {
        self.fault = Some(address);
        self
    }

    /// Word at `address`
    pub fn word(&self, address: usize) -> u32 {
        self.words.borrow().get(&address).copied().unwrap_or(0)
    }

    /// Copy of all memory, to diff before and after
    pub fn snapshot(&self) -> BTreeMap<usize, u32> {
        self.words.borrow().clone()
    }

    /// Addresses written so far, in order
    pub fn writes(&self) -> Vec<usize> {
        self.writes.borrow().clone()
    }
}
unsafe impl Patcher for SimMemory {
    type Error = Fault;

    unsafe fn read(&self, location: *const u32) -> u32 {
        self.word(location as usize)
    }

    unsafe fn patch(&self, location: *mut u32, word: u32) -> Result<u32, Self::Error> {
        let address = location as usize;
        if self.fault == Some(address) {
            return Err(Fault(address));
        }
        self.writes.borrow_mut().push(address);
        Ok(self
            .words
            .borrow_mut()
            .insert(address, word)
            .unwrap_or(0))
    }
}
