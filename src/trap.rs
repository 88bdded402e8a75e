//! Exception/interrupt causes and the trap dispatch state machine.
//!
//! > When a trap is taken into M-mode, mepc is written with the virtual address of the instruction
//! > that was interrupted or that encountered the exception. [...] mcause is written with a code
//! > indicating the event that caused the trap. [...] mtval is either set to zero or written with
//! > exception-specific information to assist software in handling the trap.
//!
//! This module only implements the mechanics described above (§4.4.1 of the trap-dispatch design).
//! Address translation/paging is out of scope, so the page-fault causes exist for completeness of
//! the mcause encoding but this core never raises them itself.

use crate::csr::{numbers, CsrFile};
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// A synchronous exception, carrying the faulting address/instruction where the cause needs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    InstructionAddressMisaligned(u64),
    InstructionAccessFault(u64),
    /// `None` when the faulting bit pattern is unavailable (e.g. fetch itself faulted).
    IllegalInstruction(Option<u32>),
    Breakpoint(u64),
    LoadAddressMisaligned(u64),
    LoadAccessFault(u64),
    StoreOrAmoAddressMisaligned(u64),
    StoreOrAmoAccessFault(u64),
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault(u64),
    LoadPageFault(u64),
    StoreOrAmoPageFault(u64),
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u64 = 0;
    pub const INSTRUCTION_ACCESS_FAULT: u64 = 1;
    pub const ILLEGAL_INSTRUCTION: u64 = 2;
    pub const BREAKPOINT: u64 = 3;
    pub const LOAD_ADDRESS_MISALIGNED: u64 = 4;
    pub const LOAD_ACCESS_FAULT: u64 = 5;
    pub const STORE_OR_AMO_ADDRESS_MISALIGNED: u64 = 6;
    pub const STORE_OR_AMO_ACCESS_FAULT: u64 = 7;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: u64 = 8;
    pub const ENVIRONMENT_CALL_FROM_S_MODE: u64 = 9;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u64 = 11;
    pub const INSTRUCTION_PAGE_FAULT: u64 = 12;
    pub const LOAD_PAGE_FAULT: u64 = 13;
    pub const STORE_OR_AMO_PAGE_FAULT: u64 = 15;

    pub const fn code(&self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned(_) => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::InstructionAccessFault(_) => Self::INSTRUCTION_ACCESS_FAULT,
            Self::IllegalInstruction(_) => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint(_) => Self::BREAKPOINT,
            Self::LoadAddressMisaligned(_) => Self::LOAD_ADDRESS_MISALIGNED,
            Self::LoadAccessFault(_) => Self::LOAD_ACCESS_FAULT,
            Self::StoreOrAmoAddressMisaligned(_) => Self::STORE_OR_AMO_ADDRESS_MISALIGNED,
            Self::StoreOrAmoAccessFault(_) => Self::STORE_OR_AMO_ACCESS_FAULT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromSMode => Self::ENVIRONMENT_CALL_FROM_S_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
            Self::InstructionPageFault(_) => Self::INSTRUCTION_PAGE_FAULT,
            Self::LoadPageFault(_) => Self::LOAD_PAGE_FAULT,
            Self::StoreOrAmoPageFault(_) => Self::STORE_OR_AMO_PAGE_FAULT,
        }
    }

    /// The value to latch into `mtval`/`stval`, per Table 3.5 of the privileged spec.
    fn tval(&self, faulting_pc: u64) -> u64 {
        match *self {
            Self::IllegalInstruction(raw) => raw.unwrap_or(0) as u64,
            Self::Breakpoint(addr) => addr,
            Self::InstructionAddressMisaligned(a)
            | Self::InstructionAccessFault(a)
            | Self::LoadAddressMisaligned(a)
            | Self::StoreOrAmoAddressMisaligned(a)
            | Self::LoadAccessFault(a)
            | Self::StoreOrAmoAccessFault(a)
            | Self::InstructionPageFault(a)
            | Self::LoadPageFault(a)
            | Self::StoreOrAmoPageFault(a) => a,
            Self::EnvironmentCallFromUMode
            | Self::EnvironmentCallFromSMode
            | Self::EnvironmentCallFromMMode => {
                let _ = faulting_pc;
                0
            }
        }
    }
}

/// An asynchronous interrupt. Ordered by decreasing trap priority when multiple are pending
/// (machine-mode interrupts, then supervisor; external before software before timer within a
/// privilege level, as required by the privileged spec's §3.1.9 priority rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Interrupt {
    SupervisorSoftware,
    SupervisorTimer,
    SupervisorExternal,
    MachineSoftware,
    MachineTimer,
    MachineExternal,
    /// Implementation-defined local timer interrupts, not part of the standard `mip`/`mie`
    /// layout.
    MachineTimer0,
    MachineTimer1,
}

impl Interrupt {
    pub fn code(self) -> u64 {
        match self {
            Self::SupervisorSoftware => 1,
            Self::MachineSoftware => 3,
            Self::SupervisorTimer => 5,
            Self::MachineTimer => 7,
            Self::SupervisorExternal => 9,
            Self::MachineExternal => 11,
            Self::MachineTimer0 => 28,
            Self::MachineTimer1 => 29,
        }
    }

    /// Bit position within `mip`/`mie`.
    pub fn mip_bit(self) -> u32 {
        self.code() as u32
    }

    /// Highest-to-lowest priority order per the privileged spec's interrupt-priority rule. The
    /// two local timers are implementation-defined and sort below the standard causes.
    pub const PRIORITY: [Interrupt; 8] = [
        Interrupt::MachineExternal,
        Interrupt::MachineSoftware,
        Interrupt::MachineTimer,
        Interrupt::SupervisorExternal,
        Interrupt::SupervisorSoftware,
        Interrupt::SupervisorTimer,
        Interrupt::MachineTimer0,
        Interrupt::MachineTimer1,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

impl TrapCause {
    /// The raw `mcause`/`scause` encoding: the interrupt bit (MSB of the register) set for
    /// [`TrapCause::Interrupt`], clear for [`TrapCause::Exception`].
    pub fn encode(self, xlen_bits: u32) -> u64 {
        match self {
            TrapCause::Exception(e) => e.code(),
            TrapCause::Interrupt(i) => i.code() | (1 << (xlen_bits - 1)),
        }
    }
}

const SIE: u64 = 1 << 1;
const MIE: u64 = 1 << 3;
const SPIE: u64 = 1 << 5;
const MPIE: u64 = 1 << 7;
const SPP: u64 = 1 << 8;
const MPP_SHIFT: u32 = 11;
const MPP_MASK: u64 = 0b11 << MPP_SHIFT;

/// Pick which pending, enabled interrupt (if any) should be taken right now, in priority order.
///
/// `mip`/`mie` are the raw CSR values; `mideleg` selects which of them are eligible for S-mode
/// delegation. Global enables (`mstatus.MIE`/`mstatus.SIE`) and the current privilege level gate
/// whether a delegated-or-not interrupt is actually taken, per the privileged spec's §3.1.9.
pub fn pending_interrupt(
    mip: u64,
    mie: u64,
    mideleg: u64,
    mstatus: u64,
    privilege: PrivilegeLevel,
) -> Option<Interrupt> {
    let pending = mip & mie;
    for candidate in Interrupt::PRIORITY {
        if pending & (1 << candidate.mip_bit()) == 0 {
            continue;
        }
        let delegated = mideleg & (1 << candidate.mip_bit()) != 0;
        let taken = if delegated {
            match privilege {
                PrivilegeLevel::Supervisor => mstatus & SIE != 0,
                PrivilegeLevel::User => true,
                PrivilegeLevel::Machine => false,
            }
        } else {
            match privilege {
                PrivilegeLevel::Machine => mstatus & MIE != 0,
                PrivilegeLevel::Supervisor | PrivilegeLevel::User => true,
            }
        };
        if taken {
            return Some(candidate);
        }
    }
    None
}

/// Run the trap-entry state machine: write `xcause`/`xepc`/`xtval`, flip the privilege-mode and
/// `mstatus` interrupt-enable bits, and compute the new `pc`.
///
/// Returns `(new_pc, new_privilege)`. Does not itself decide whether `cause` should be taken (see
/// [`pending_interrupt`] for the interrupt case); exceptions are always taken immediately.
///
/// `delegation_enabled` gates S-mode delegation via `medeleg`/`mideleg`; with it off (the core's
/// default), every trap lands in Machine mode regardless of what those registers hold, and
/// `medeleg`/`mideleg` are writable/readable but otherwise inert.
pub fn dispatch(
    csrs: &mut CsrFile,
    xlen_bits: u32,
    pc: u64,
    privilege: PrivilegeLevel,
    cause: TrapCause,
    delegation_enabled: bool,
) -> (u64, PrivilegeLevel) {
    let medeleg = csrs.read_raw(numbers::MEDELEG);
    let mideleg = csrs.read_raw(numbers::MIDELEG);
    let delegate = delegation_enabled
        && match cause {
            TrapCause::Exception(e) => {
                privilege != PrivilegeLevel::Machine && medeleg & (1 << e.code()) != 0
            }
            TrapCause::Interrupt(i) => {
                privilege != PrivilegeLevel::Machine && mideleg & (1 << i.mip_bit()) != 0
            }
        };

    let code = cause.encode(xlen_bits);
    let tval = match cause {
        TrapCause::Exception(e) => e.tval(pc),
        TrapCause::Interrupt(_) => 0,
    };

    if delegate {
        csrs.write_raw(numbers::SEPC, pc & !1);
        csrs.write_raw(numbers::SCAUSE, code);
        csrs.write_raw(numbers::STVAL, tval);
    } else {
        csrs.write_raw(numbers::MEPC, pc & !1);
        csrs.write_raw(numbers::MCAUSE, code);
        csrs.write_raw(numbers::MTVAL, tval);
        csrs.write_raw(numbers::MTVAL2, 0);
        csrs.write_raw(numbers::MTINST, 0);
    }

    let mut mstatus = csrs.read_raw(numbers::MSTATUS);
    if delegate {
        let sie = mstatus & SIE != 0;
        mstatus = (mstatus & !SPIE) | (if sie { SPIE } else { 0 });
        mstatus &= !SIE;
        mstatus = (mstatus & !SPP) | (if privilege == PrivilegeLevel::Supervisor { SPP } else { 0 });
    } else {
        let mie = mstatus & MIE != 0;
        mstatus = (mstatus & !MPIE) | (if mie { MPIE } else { 0 });
        mstatus &= !MIE;
        let mpp = RawPrivilegeLevel::from(privilege) as u64;
        mstatus = (mstatus & !MPP_MASK) | (mpp << MPP_SHIFT);
    }
    csrs.write_raw(numbers::MSTATUS, mstatus);

    let tvec = csrs.read_raw(if delegate { numbers::STVEC } else { numbers::MTVEC });
    let base = tvec & !0b11;
    let vectored = tvec & 0b1 == 1;
    let new_pc = if vectored {
        match cause {
            TrapCause::Interrupt(i) => base + 4 * i.code(),
            TrapCause::Exception(_) => base,
        }
    } else {
        base
    };

    let new_privilege = if delegate {
        PrivilegeLevel::Supervisor
    } else {
        PrivilegeLevel::Machine
    };
    (new_pc, new_privilege)
}

/// Run the `xRET` (`MRET`/`SRET`) inverse of [`dispatch`]: restore the interrupt-enable and
/// privilege-mode bits that trap entry saved away, and return the resume `pc`.
///
/// > An xRET instruction is used to return from a trap in M-mode, S-mode, or U-mode respectively.
/// > When executing an xRET instruction, [...] xPP is set to the least-privileged supported mode
/// > (U if U-mode is implemented, else M). [...] If xPP != M, xRET also sets MPRV=0.
pub fn xret(csrs: &mut CsrFile, from: RawPrivilegeLevel, least_privileged: PrivilegeLevel) -> (u64, PrivilegeLevel) {
    let mut mstatus = csrs.read_raw(numbers::MSTATUS);
    let (pc, new_privilege) = match from {
        RawPrivilegeLevel::Machine => {
            let mpp = RawPrivilegeLevel::from_u2(((mstatus & MPP_MASK) >> MPP_SHIFT) as u8);
            let mpie = mstatus & MPIE != 0;
            mstatus = (mstatus & !MIE) | (if mpie { MIE } else { 0 });
            mstatus |= MPIE;
            mstatus = (mstatus & !MPP_MASK) | ((least_privileged as u64) << MPP_SHIFT);
            let new_privilege = PrivilegeLevel::try_from(mpp).unwrap_or(least_privileged);
            (csrs.read_raw(numbers::MEPC), new_privilege)
        }
        RawPrivilegeLevel::Supervisor => {
            let spp = if mstatus & SPP != 0 {
                PrivilegeLevel::Supervisor
            } else {
                PrivilegeLevel::User
            };
            let spie = mstatus & SPIE != 0;
            mstatus = (mstatus & !SIE) | (if spie { SIE } else { 0 });
            mstatus |= SPIE;
            mstatus &= !SPP;
            (csrs.read_raw(numbers::SEPC), spp)
        }
        RawPrivilegeLevel::User | RawPrivilegeLevel::Reserved => {
            unreachable!("URET is not implemented by this core")
        }
    };
    csrs.write_raw(numbers::MSTATUS, mstatus);
    (pc, new_privilege)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn new_file() -> CsrFile {
        CsrFile::new(crate::Xlen::Rv64, 0, 0, Rc::new(Cell::new(0)), Rc::new(Cell::new(0)), 0)
    }

    #[test]
    fn machine_trap_saves_pc_and_cause() {
        let mut csrs = new_file();
        let (pc, privilege) = dispatch(
            &mut csrs,
            64,
            0x8000_0004,
            PrivilegeLevel::User,
            Exception::IllegalInstruction(Some(0xdead_beef)).into(),
            false,
        );
        assert_eq!(PrivilegeLevel::Machine, privilege);
        assert_eq!(0, pc); // mtvec reset value
        assert_eq!(0x8000_0004, csrs.read_raw(numbers::MEPC));
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, csrs.read_raw(numbers::MCAUSE));
        assert_eq!(0xdead_beef, csrs.read_raw(numbers::MTVAL));
    }

    #[test]
    fn trap_always_lands_in_machine_mode_when_delegation_is_disabled() {
        let mut csrs = new_file();
        csrs.write_raw(numbers::MEDELEG, 1 << Exception::BREAKPOINT);
        let (_, privilege) = dispatch(
            &mut csrs,
            64,
            0x1000,
            PrivilegeLevel::User,
            Exception::Breakpoint(0x1000).into(),
            false,
        );
        assert_eq!(PrivilegeLevel::Machine, privilege);
        assert_eq!(0x1000, csrs.read_raw(numbers::MEPC));
    }

    #[test]
    fn delegated_exception_traps_to_supervisor_when_enabled() {
        let mut csrs = new_file();
        csrs.write_raw(numbers::MEDELEG, 1 << Exception::BREAKPOINT);
        let (_, privilege) = dispatch(
            &mut csrs,
            64,
            0x1000,
            PrivilegeLevel::User,
            Exception::Breakpoint(0x1000).into(),
            true,
        );
        assert_eq!(PrivilegeLevel::Supervisor, privilege);
        assert_eq!(0x1000, csrs.read_raw(numbers::SEPC));
    }

    #[test]
    fn vectored_mtvec_offsets_interrupts_by_four_times_code() {
        let mut csrs = new_file();
        csrs.write_raw(numbers::MTVEC, 0x8000_0000 | 1);
        let (pc, _) = dispatch(
            &mut csrs,
            64,
            0x100,
            PrivilegeLevel::Machine,
            Interrupt::MachineTimer.into(),
            false,
        );
        assert_eq!(0x8000_0000 + 4 * 7, pc);
    }

    #[test]
    fn mret_restores_saved_privilege_and_enables() {
        let mut csrs = new_file();
        dispatch(
            &mut csrs,
            64,
            0x2000,
            PrivilegeLevel::Supervisor,
            Exception::Breakpoint(0x2000).into(),
            false,
        );
        let (pc, privilege) = xret(&mut csrs, RawPrivilegeLevel::Machine, PrivilegeLevel::User);
        assert_eq!(0x2000, pc);
        assert_eq!(PrivilegeLevel::Supervisor, privilege);
        assert_ne!(0, csrs.read_raw(numbers::MSTATUS) & MIE);
    }

    #[test]
    fn pending_interrupt_honors_global_enable() {
        let mie_all = 0xffff;
        assert_eq!(
            None,
            pending_interrupt(1 << Interrupt::MachineTimer.mip_bit(), mie_all, 0, 0, PrivilegeLevel::Machine)
        );
        assert_eq!(
            Some(Interrupt::MachineTimer),
            pending_interrupt(
                1 << Interrupt::MachineTimer.mip_bit(),
                mie_all,
                0,
                MIE,
                PrivilegeLevel::Machine
            )
        );
    }

    #[test]
    fn pending_interrupt_priority_prefers_external_over_timer() {
        let pending = (1 << Interrupt::MachineTimer.mip_bit()) | (1 << Interrupt::MachineExternal.mip_bit());
        let got = pending_interrupt(pending, 0xffff, 0, MIE, PrivilegeLevel::Machine);
        assert_eq!(Some(Interrupt::MachineExternal), got);
    }
}
