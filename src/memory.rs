//! The narrow interface this crate needs from an external memory subsystem.
//!
//! Everything about how addresses map to backing storage — page tables, PMP, memory-mapped
//! peripherals — lives outside this crate. [`Memory`] only describes the operations the execution
//! engine needs to drive: sized reads/writes on the data and instruction sides, the permission
//! pre-check used to decide whether a speculative store may retire, and enough region metadata for
//! the run loop's tightly-coupled-memory bookkeeping.

use std::fmt::Debug;
use thiserror::Error;

/// Errors a memory access can fail with.
///
/// `BusError` models an asynchronous fault reported by the bus after the access itself appeared to
/// succeed; the other two are synchronous and raised immediately.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    #[error("misaligned access")]
    Misaligned,
    #[error("access fault")]
    AccessFault,
    #[error("asynchronous bus error")]
    BusError,
}

/// Which side of the Harvard-ish split an access is on. Most backing memories don't distinguish,
/// but some implementation-defined regions (e.g. ROM shadowed over RAM) do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Data,
    Instruction,
}

/// Broad classification of a memory region, used for the speculative-queue and tightly-coupled
/// memory rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Regular closely-coupled memory (DCCM/ICCM): accesses to it can never produce an
    /// asynchronous [`MemoryError::BusError`], so speculative queue entries targeting it retire
    /// without waiting.
    TightlyCoupled,
    /// Anything reachable only through the external bus, where an asynchronous fault is possible.
    BusMapped,
    /// No region is mapped at this address.
    Unmapped,
}

/// The memory subsystem collaborator this crate drives.
///
/// Implementations are expected to be cheap to call per instruction; the execution engine calls
/// into this trait at least once per load/store/atomic and once per instruction fetch.
pub trait Memory: Debug {
    fn read_u8(&mut self, address: u64, kind: AccessKind) -> Result<u8, MemoryError>;
    fn read_u16(&mut self, address: u64, kind: AccessKind) -> Result<u16, MemoryError>;
    fn read_u32(&mut self, address: u64, kind: AccessKind) -> Result<u32, MemoryError>;
    fn read_u64(&mut self, address: u64, kind: AccessKind) -> Result<u64, MemoryError>;

    fn write_u8(&mut self, address: u64, value: u8) -> Result<(), MemoryError>;
    fn write_u16(&mut self, address: u64, value: u16) -> Result<(), MemoryError>;
    fn write_u32(&mut self, address: u64, value: u32) -> Result<(), MemoryError>;
    fn write_u64(&mut self, address: u64, value: u64) -> Result<(), MemoryError>;

    /// Atomically replace the word at `address` computed from its old value, used for the `A`
    /// extension's AMO operations (and `LR`/`SC` pair validation). `op` receives the current value
    /// and returns the value to store; the old value is returned to the caller. Serializing this
    /// as one call, instead of a separate read then write, is what makes the operation atomic with
    /// respect to other harts sharing this `Memory`.
    fn amo_u32(
        &mut self,
        address: u64,
        op: &mut dyn FnMut(u32) -> u32,
    ) -> Result<u32, MemoryError>;
    fn amo_u64(
        &mut self,
        address: u64,
        op: &mut dyn FnMut(u64) -> u64,
    ) -> Result<u64, MemoryError>;

    /// Check whether a store of `size` bytes to `address` would succeed, without performing it.
    /// Used before admitting an entry to the speculative store queue: a
    /// store that would fault synchronously must never be queued.
    fn check_write(&self, address: u64, size: u8) -> Result<(), MemoryError>;

    fn region_kind(&self, address: u64) -> RegionKind;

    fn is_addr_in_dccm(&self, address: u64) -> bool {
        self.region_kind(address) == RegionKind::TightlyCoupled
    }

    /// Natural alignment granularity the backing device prefers to see stores retire at, in bytes.
    /// The run loop uses this to decide how eagerly it can drain the store queue.
    fn page_size(&self) -> u64;

    /// Address and byte count of the most recent write accepted by this memory, for trace replay
    /// of the "get last write old/new value" debug hook. Returns `None` if
    /// nothing has been written yet or the implementation doesn't track this.
    fn last_write(&self) -> Option<(u64, u64, u64)> {
        None
    }
}

/// A flat, fully-populated backing store used by this crate's own tests. Out-of-range accesses
/// fault; nothing here is tightly coupled, and no asynchronous bus errors are ever injected unless
/// a test explicitly arranges one via [`TestMemory::fail_next_write`].
#[derive(Debug, Default)]
pub struct TestMemory {
    bytes: Vec<u8>,
    last_write: Option<(u64, u64, u64)>,
    pending_bus_error: Option<u64>,
}

impl TestMemory {
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
            last_write: None,
            pending_bus_error: None,
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            last_write: None,
            pending_bus_error: None,
        }
    }

    /// Arrange for the write at `address` to fail with [`MemoryError::BusError`] once, modeling an
    /// asynchronous fault the real bus would only report after the store queue drains it.
    pub fn fail_next_write(&mut self, address: u64) {
        self.pending_bus_error = Some(address);
    }

    fn bounds(&self, address: u64, size: u64) -> Result<(usize, usize), MemoryError> {
        let start = usize::try_from(address).map_err(|_| MemoryError::AccessFault)?;
        let end = start.checked_add(size as usize).ok_or(MemoryError::AccessFault)?;
        if end > self.bytes.len() {
            return Err(MemoryError::AccessFault);
        }
        Ok((start, end))
    }

    fn read_bytes(&self, address: u64, size: u64) -> Result<&[u8], MemoryError> {
        let (start, end) = self.bounds(address, size)?;
        Ok(&self.bytes[start..end])
    }

    fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<(), MemoryError> {
        if self.pending_bus_error == Some(address) {
            self.pending_bus_error = None;
            return Err(MemoryError::BusError);
        }
        let (start, end) = self.bounds(address, data.len() as u64)?;
        let old = self.bytes[start..end].to_vec();
        self.bytes[start..end].copy_from_slice(data);
        let old_value = old.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        let new_value = data.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64);
        self.last_write = Some((address, old_value, new_value));
        Ok(())
    }
}

macro_rules! impl_read {
    ($name:ident, $ty:ty) => {
        fn $name(&mut self, address: u64, _kind: AccessKind) -> Result<$ty, MemoryError> {
            let bytes = self.read_bytes(address, std::mem::size_of::<$ty>() as u64)?;
            Ok(<$ty>::from_le_bytes(bytes.try_into().unwrap()))
        }
    };
}

macro_rules! impl_write {
    ($name:ident, $ty:ty) => {
        fn $name(&mut self, address: u64, value: $ty) -> Result<(), MemoryError> {
            self.write_bytes(address, &value.to_le_bytes())
        }
    };
}

impl Memory for TestMemory {
    impl_read!(read_u8, u8);
    impl_read!(read_u16, u16);
    impl_read!(read_u32, u32);
    impl_read!(read_u64, u64);

    impl_write!(write_u8, u8);
    impl_write!(write_u16, u16);
    impl_write!(write_u32, u32);
    impl_write!(write_u64, u64);

    fn amo_u32(&mut self, address: u64, op: &mut dyn FnMut(u32) -> u32) -> Result<u32, MemoryError> {
        let old = self.read_u32(address, AccessKind::Data)?;
        self.write_u32(address, op(old))?;
        Ok(old)
    }

    fn amo_u64(&mut self, address: u64, op: &mut dyn FnMut(u64) -> u64) -> Result<u64, MemoryError> {
        let old = self.read_u64(address, AccessKind::Data)?;
        self.write_u64(address, op(old))?;
        Ok(old)
    }

    fn check_write(&self, address: u64, size: u8) -> Result<(), MemoryError> {
        self.bounds(address, size as u64).map(|_| ())
    }

    fn region_kind(&self, address: u64) -> RegionKind {
        if (address as usize) < self.bytes.len() {
            RegionKind::BusMapped
        } else {
            RegionKind::Unmapped
        }
    }

    fn page_size(&self) -> u64 {
        4096
    }

    fn last_write(&self) -> Option<(u64, u64, u64)> {
        self.last_write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_little_endian_bytes() {
        let mut mem = TestMemory::new(16);
        mem.write_u32(4, 0x1234_5678).unwrap();
        assert_eq!(0x1234_5678, mem.read_u32(4, AccessKind::Data).unwrap());
        assert_eq!([0x78, 0x56, 0x34, 0x12], mem.read_bytes(4, 4).unwrap());
    }

    #[test]
    fn out_of_bounds_access_faults() {
        let mut mem = TestMemory::new(4);
        assert_eq!(Err(MemoryError::AccessFault), mem.read_u64(0, AccessKind::Data));
    }

    #[test]
    fn amo_applies_the_closure_atomically() {
        let mut mem = TestMemory::new(8);
        mem.write_u32(0, 10).unwrap();
        let old = mem.amo_u32(0, &mut |v| v + 5).unwrap();
        assert_eq!(10, old);
        assert_eq!(15, mem.read_u32(0, AccessKind::Data).unwrap());
    }

    #[test]
    fn injected_bus_error_is_one_shot() {
        let mut mem = TestMemory::new(8);
        mem.fail_next_write(0);
        assert_eq!(Err(MemoryError::BusError), mem.write_u32(0, 1));
        assert!(mem.write_u32(0, 1).is_ok());
    }

    #[test]
    fn last_write_reports_old_and_new_value() {
        let mut mem = TestMemory::new(8);
        mem.write_u32(0, 1).unwrap();
        mem.write_u32(0, 2).unwrap();
        assert_eq!(Some((0, 1, 2)), mem.last_write());
    }
}
