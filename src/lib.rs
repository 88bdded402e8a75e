//! Instruction-accurate execution engine for a single RISC-V hart.
//!
//! This crate implements fetch/decode/execute, trap dispatch, the CSR file, the floating-point
//! rounding/flag protocol, atomic reservation tracking, and the speculative load/store queues used
//! to replay architectural state when the memory subsystem reports an asynchronous bus error.
//!
//! The memory subsystem itself, ELF/hex loaders, command-line front-ends, disassembly, and the
//! debug-trigger match engine are external collaborators; this crate only consumes the narrow
//! interfaces they need to provide (see [`memory::Memory`] and [`trigger::TriggerUnit`]).

#[macro_use]
extern crate static_assertions;

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub mod address_range;
pub mod csr;
pub mod decode;
pub mod fp;
pub mod hart;
pub mod memory;
pub mod queues;
pub mod registers;
pub mod run;
pub mod stats;
pub mod trace;
pub mod trap;
pub mod trigger;

pub use address_range::AddressRange;

/// Register width a hart is configured for.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Xlen {
    Rv32,
    Rv64,
}

impl Xlen {
    /// Number of bits in a general-purpose register at this width.
    pub fn bits(self) -> u32 {
        match self {
            Xlen::Rv32 => 32,
            Xlen::Rv64 => 64,
        }
    }

    /// Mask that clears everything above the `xlen`-th bit of a `u64`.
    pub fn mask(self) -> u64 {
        match self {
            Xlen::Rv32 => u32::MAX as u64,
            Xlen::Rv64 => u64::MAX,
        }
    }

    /// `xlen - 1`, used to mask shift amounts for variable shifts.
    pub fn shift_mask(self) -> u32 {
        self.bits() - 1
    }

    /// Truncate a 64-bit word to this width, zero-extending the result back up to 64 bits.
    pub fn truncate(self, value: u64) -> u64 {
        value & self.mask()
    }

    /// Sign-extend the low `self.bits()` bits of `value` to a full 64-bit value.
    pub fn sign_extend(self, value: u64) -> u64 {
        match self {
            Xlen::Rv32 => (value as u32 as i32 as i64) as u64,
            Xlen::Rv64 => value,
        }
    }

    /// Encoding of the MXL field in MISA for this width.
    pub fn misa_mxl(self) -> u64 {
        match self {
            Xlen::Rv32 => 1,
            Xlen::Rv64 => 2,
        }
    }
}

/// List of all possible privilege levels for RISC-V.
///
/// Same as [`PrivilegeLevel`] except that it allows specifying the reserved privilege level `2`.
/// This can be useful when a minimum required privilege level is specified as a 2-bit value, since
/// that value itself may be the reserved privilege level.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum RawPrivilegeLevel {
    User = 0,
    Supervisor = 1,
    /// Privilege level `0b10` is reserved in the base ISA.
    Reserved = 2,
    Machine = 3,
}

impl RawPrivilegeLevel {
    /// Convert a 2-bit value into a [`RawPrivilegeLevel`]. Panics if `value_u2 > 3`.
    pub fn from_u2(value_u2: u8) -> Self {
        match value_u2 {
            0 => Self::User,
            1 => Self::Supervisor,
            2 => Self::Reserved,
            3 => Self::Machine,
            _ => panic!("out of range u2 used"),
        }
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, Self::Reserved)
    }
}

impl fmt::Display for RawPrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            RawPrivilegeLevel::User => "U",
            RawPrivilegeLevel::Supervisor => "S",
            RawPrivilegeLevel::Reserved => "2",
            RawPrivilegeLevel::Machine => "M",
        })
    }
}

/// List of defined privilege levels for RISC-V.
///
/// > The machine level has the highest privileges and is the only mandatory privilege level for a
/// > RISC-V hardware platform. User-mode (U-mode) and supervisor-mode (S-mode) are intended for
/// > conventional application and operating system usage respectively.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrivilegeLevel {
    User = 0,
    Supervisor = 1,
    Machine = 3,
}

impl PrivilegeLevel {
    /// The least-privileged mode implemented, used when writing `xPP` fields per the trap-entry
    /// state machine (`xPP` is set to the *least*-privileged supported mode on entry, so that a
    /// subsequent `xRET` can't accidentally elevate privilege if software never explicitly lowers
    /// it again).
    pub fn least_privileged(supports_u: bool) -> Self {
        if supports_u {
            PrivilegeLevel::User
        } else {
            PrivilegeLevel::Machine
        }
    }
}

impl PartialEq<PrivilegeLevel> for RawPrivilegeLevel {
    fn eq(&self, other: &PrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialEq<RawPrivilegeLevel> for PrivilegeLevel {
    fn eq(&self, other: &RawPrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialOrd<PrivilegeLevel> for RawPrivilegeLevel {
    fn partial_cmp(&self, other: &PrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl PartialOrd<RawPrivilegeLevel> for PrivilegeLevel {
    fn partial_cmp(&self, other: &RawPrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Supervisor => "S",
            PrivilegeLevel::Machine => "M",
        })
    }
}

impl From<PrivilegeLevel> for RawPrivilegeLevel {
    fn from(value: PrivilegeLevel) -> Self {
        match value {
            PrivilegeLevel::User => Self::User,
            PrivilegeLevel::Supervisor => Self::Supervisor,
            PrivilegeLevel::Machine => Self::Machine,
        }
    }
}

impl TryFrom<RawPrivilegeLevel> for PrivilegeLevel {
    type Error = ReservedPrivilegeLevelError;
    fn try_from(value: RawPrivilegeLevel) -> Result<Self, Self::Error> {
        match value {
            RawPrivilegeLevel::User => Ok(Self::User),
            RawPrivilegeLevel::Supervisor => Ok(Self::Supervisor),
            RawPrivilegeLevel::Reserved => Err(ReservedPrivilegeLevelError(value)),
            RawPrivilegeLevel::Machine => Ok(Self::Machine),
        }
    }
}

#[derive(Error, Debug)]
#[error("privilege level {0} is reserved")]
pub struct ReservedPrivilegeLevelError(RawPrivilegeLevel);

bitflags::bitflags! {
    /// ISA extensions enabled for a hart, derived from MISA at reset.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct Extensions: u32 {
        const A = 1 << 0;
        const C = 1 << 2;
        const D = 1 << 3;
        const F = 1 << 5;
        const M = 1 << 12;
        const S = 1 << 18;
        const U = 1 << 20;
        /// Minor, "experimental" bit-manipulation subset.
        const ZBB_LITE = 1 << 30;
    }
}

impl Extensions {
    /// Build the MISA `Extensions` field bitmask (bit N set for letter 'A' + N) corresponding to
    /// the standard lettered subset of `self` (the experimental bit-manip bit has no MISA letter).
    pub fn misa_bits(self) -> u64 {
        let mut bits = 0u64;
        if self.contains(Extensions::A) {
            bits |= 1 << 0;
        }
        if self.contains(Extensions::C) {
            bits |= 1 << 2;
        }
        if self.contains(Extensions::D) {
            bits |= 1 << 3;
        }
        if self.contains(Extensions::F) {
            bits |= 1 << 5;
        }
        bits |= 1 << 8; // I is always implemented.
        if self.contains(Extensions::M) {
            bits |= 1 << 12;
        }
        if self.contains(Extensions::S) {
            bits |= 1 << 18;
        }
        if self.contains(Extensions::U) {
            bits |= 1 << 20;
        }
        bits
    }

    /// Normalize a requested extension set: drop `D` if `F` is absent (D requires F), and
    /// `warn!` about every extension dropped for that or any other unsupported-combination reason.
    pub fn normalize(requested: Self) -> Self {
        let mut enabled = requested;
        if enabled.contains(Extensions::D) && !enabled.contains(Extensions::F) {
            log::warn!("extension D requires F; clearing D");
            enabled.remove(Extensions::D);
        }
        enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xlen_truncate_and_sign_extend() {
        assert_eq!(Xlen::Rv32.truncate(0xFFFF_FFFF_0000_0001), 1);
        assert_eq!(
            Xlen::Rv32.sign_extend(0x8000_0000),
            0xFFFF_FFFF_8000_0000
        );
        assert_eq!(Xlen::Rv64.sign_extend(0x8000_0000_0000_0000), 0x8000_0000_0000_0000);
    }

    #[test]
    fn privilege_ordering() {
        assert!(PrivilegeLevel::User < PrivilegeLevel::Supervisor);
        assert!(PrivilegeLevel::Supervisor < PrivilegeLevel::Machine);
    }

    #[test]
    fn extensions_normalize_drops_d_without_f() {
        let requested = Extensions::D | Extensions::M;
        let enabled = Extensions::normalize(requested);
        assert!(!enabled.contains(Extensions::D));
        assert!(enabled.contains(Extensions::M));
    }
}
