//! Speculative load/store queues.
//!
//! A load or store that retires architecturally before the memory subsystem has confirmed it (no
//! asynchronous fault pending) is tracked here so that a later, asynchronously reported bus error
//! can be matched back to the instruction that issued it and replayed as a precise trap. Each entry
//! carries the data its resolution needs to actually undo the speculative effect: a load's
//! destination register and the value it held before the load wrote it, a store's address and the
//! bytes that sat there before the write so they can be put back.

use crate::memory::MemoryError;
use crate::registers::Specifier;
use log::warn;
use std::collections::VecDeque;

/// A load admitted to the queue before its result (or fault) is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadQueueEntry {
    pub tag: u64,
    /// Address of the load instruction itself, so a deferred fault can replay a precise trap
    /// against it.
    pub pc: u64,
    pub address: u64,
    pub size: u8,
    /// Register the load wrote, so a deferred fault can undo the write.
    pub target_reg: Specifier,
    /// The register's value immediately before the load wrote it.
    pub prev_reg_value: u64,
    /// Set to `false` once a later, non-faulting load or store has made this entry's eventual
    /// asynchronous result moot — it's no longer "in flight" for `apply_load_exception`'s purposes.
    pub valid: bool,
}

/// A store admitted to the queue before the backing memory has confirmed it landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreQueueEntry {
    pub tag: u64,
    pub pc: u64,
    pub address: u64,
    pub size: u8,
    /// The bytes at `address` immediately before the store overwrote them, so a deferred fault can
    /// restore them.
    pub old_bytes: u64,
    /// The bytes the store actually wrote.
    pub new_bytes: u64,
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QueueOutcome<T> {
    /// No in-flight entry at all, or no entry matching the criteria the caller asked for.
    NoMatch,
    /// Exactly one matching entry was found, consumed, and returned.
    Matched(T),
    /// More than one valid entry was in flight when a deferred exception arrived, which can never
    /// be resolved back to a single instruction; the caller should treat this as a fatal internal
    /// condition (`debug_assert!`-reachable only).
    Ambiguous,
}

/// A bounded FIFO of in-flight memory operations. Pushing past `capacity` drops the oldest entry,
/// which is treated as it having already retired: its eventual bus status (if the memory subsystem
/// ever reports one) is simply never observed.
#[derive(Debug, Clone)]
pub struct Queue<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> Queue<T> {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every in-flight entry without resolving it, for `FENCE`'s "discard all outstanding
    /// memory operations" semantics.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Queue<LoadQueueEntry> {
    pub fn push(&mut self, entry: LoadQueueEntry) {
        if self.entries.len() == self.capacity {
            let dropped = self.entries.pop_front();
            warn!("load queue full, dropping oldest in-flight entry {dropped:?}");
        }
        self.entries.push_back(entry);
    }

    /// A later load/store to an overlapping address makes any prior valid entries at that address
    /// no longer resolvable to a single in-flight instruction.
    pub fn invalidate_overlapping(&mut self, address: u64, size: u8) {
        for entry in self.entries.iter_mut() {
            if entry.valid && ranges_overlap(entry.address, entry.size, address, size) {
                entry.valid = false;
            }
        }
    }

    /// Apply an asynchronously reported bus error, per the "exactly one valid in-flight entry"
    /// resolution in DESIGN.md: entries already invalidated by an intervening access don't count.
    pub fn apply_load_exception(&mut self, _error: MemoryError) -> QueueOutcome<LoadQueueEntry> {
        let valid_positions: Vec<_> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
            .map(|(i, _)| i)
            .collect();
        match valid_positions.as_slice() {
            [] => QueueOutcome::NoMatch,
            [only] => QueueOutcome::Matched(self.entries.remove(*only).expect("index just observed")),
            _ => QueueOutcome::Ambiguous,
        }
    }

    /// The memory subsystem confirmed the oldest valid entry completed without fault; drop it.
    pub fn apply_load_finished(&mut self) -> QueueOutcome<LoadQueueEntry> {
        match self.entries.iter().position(|e| e.valid) {
            Some(idx) => QueueOutcome::Matched(self.entries.remove(idx).expect("index just observed")),
            None => QueueOutcome::NoMatch,
        }
    }
}

impl Queue<StoreQueueEntry> {
    pub fn push(&mut self, entry: StoreQueueEntry) {
        if self.entries.len() == self.capacity {
            let dropped = self.entries.pop_front();
            warn!("store queue full, dropping oldest in-flight entry {dropped:?}");
        }
        self.entries.push_back(entry);
    }

    pub fn apply_store_exception(&mut self, _error: MemoryError) -> QueueOutcome<StoreQueueEntry> {
        let valid_positions: Vec<_> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.valid)
            .map(|(i, _)| i)
            .collect();
        match valid_positions.as_slice() {
            [] => QueueOutcome::NoMatch,
            [only] => QueueOutcome::Matched(self.entries.remove(*only).expect("index just observed")),
            _ => QueueOutcome::Ambiguous,
        }
    }

    pub fn retire_oldest(&mut self) -> Option<StoreQueueEntry> {
        self.entries.pop_front()
    }
}

fn ranges_overlap(a_addr: u64, a_size: u8, b_addr: u64, b_size: u8) -> bool {
    let a_end = a_addr + a_size as u64;
    let b_end = b_addr + b_size as u64;
    a_addr < b_end && b_addr < a_end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_entry(tag: u64, address: u64, size: u8) -> LoadQueueEntry {
        LoadQueueEntry {
            tag,
            pc: 0,
            address,
            size,
            target_reg: Specifier::from_u5(5),
            prev_reg_value: 0,
            valid: true,
        }
    }

    fn store_entry(tag: u64, address: u64, size: u8) -> StoreQueueEntry {
        StoreQueueEntry { tag, pc: 0, address, size, old_bytes: 0, new_bytes: 0, valid: true }
    }

    #[test]
    fn push_past_capacity_drops_oldest() {
        let mut q: Queue<LoadQueueEntry> = Queue::new(2);
        q.push(load_entry(1, 0x100, 4));
        q.push(load_entry(2, 0x104, 4));
        q.push(load_entry(3, 0x108, 4));
        assert_eq!(2, q.len());
        assert_eq!(QueueOutcome::Matched(load_entry(2, 0x104, 4)), q.apply_load_finished());
    }

    #[test]
    fn single_valid_entry_resolves_exception() {
        let mut q: Queue<LoadQueueEntry> = Queue::new(4);
        q.push(load_entry(7, 0x200, 8));
        match q.apply_load_exception(MemoryError::BusError) {
            QueueOutcome::Matched(entry) => assert_eq!(7, entry.tag),
            other => panic!("expected Matched, got {other:?}"),
        }
        assert!(q.is_empty());
    }

    #[test]
    fn ambiguous_when_multiple_valid_entries() {
        let mut q: Queue<LoadQueueEntry> = Queue::new(4);
        q.push(load_entry(1, 0x200, 4));
        q.push(load_entry(2, 0x300, 4));
        assert_eq!(QueueOutcome::Ambiguous, q.apply_load_exception(MemoryError::BusError));
    }

    #[test]
    fn invalidated_entries_are_excluded_from_exception_matching() {
        let mut q: Queue<LoadQueueEntry> = Queue::new(4);
        q.push(load_entry(1, 0x200, 4));
        q.push(load_entry(2, 0x300, 4));
        q.invalidate_overlapping(0x200, 4);
        match q.apply_load_exception(MemoryError::BusError) {
            QueueOutcome::Matched(entry) => assert_eq!(2, entry.tag),
            other => panic!("expected Matched, got {other:?}"),
        }
    }

    #[test]
    fn no_in_flight_entries_is_no_match() {
        let mut q: Queue<StoreQueueEntry> = Queue::new(4);
        assert_eq!(QueueOutcome::NoMatch, q.apply_store_exception(MemoryError::BusError));
    }

    #[test]
    fn store_exception_resolves_rollback_data() {
        let mut q: Queue<StoreQueueEntry> = Queue::new(4);
        let mut entry = store_entry(3, 0x400, 4);
        entry.old_bytes = 0xdead_beef;
        entry.new_bytes = 0x1234_5678;
        q.push(entry);
        match q.apply_store_exception(MemoryError::BusError) {
            QueueOutcome::Matched(resolved) => {
                assert_eq!(0xdead_beef, resolved.old_bytes);
                assert_eq!(0x1234_5678, resolved.new_bytes);
            }
            other => panic!("expected Matched, got {other:?}"),
        }
    }
}
