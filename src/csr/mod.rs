//! Control and Status Register file (Zicsr), sparsely mapping a 12-bit CSR number to a descriptor.
//!
//! Most CSRs are plain read/write/poke words described
//! by a [`CsrDescriptor`]; a handful of "composite" CSRs (`sstatus`, `sie`/`sip`, `fcsr`, the
//! unprivileged counter shadows) are views onto another register's bits and are special-cased in
//! [`CsrFile::read`]/[`CsrFile::write`] rather than forced into the generic descriptor shape.

pub mod numbers;

use crate::{PrivilegeLevel, RawPrivilegeLevel, Xlen};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use thiserror::Error;

pub type CsrSpecifier = u16;

/// Where a CSR's live value is actually stored.
#[derive(Debug, Clone)]
enum Storage {
    Owned(u64),
    /// Aliases the low (or only, on RV64) word of an externally owned counter.
    TiedLow(Rc<Cell<u64>>),
    /// Aliases the high 32 bits of an externally owned counter (RV32 `*H` registers).
    TiedHigh(Rc<Cell<u64>>),
}

/// A single CSR's static properties plus its live storage.
///
/// Field names match this core's CSR descriptor table.
#[derive(Debug, Clone)]
struct CsrDescriptor {
    implemented: bool,
    storage: Storage,
    write_mask: u64,
    poke_mask: u64,
    privilege: RawPrivilegeLevel,
    debug_only: bool,
    prev_value: u64,
}

impl CsrDescriptor {
    fn load(&self) -> u64 {
        match &self.storage {
            Storage::Owned(v) => *v,
            Storage::TiedLow(cell) => cell.get(),
            Storage::TiedHigh(cell) => cell.get() >> 32,
        }
    }

    fn store(&mut self, value: u64) {
        match &mut self.storage {
            Storage::Owned(v) => *v = value,
            Storage::TiedLow(cell) => {
                let old = cell.get();
                cell.set((old & 0xffff_ffff_0000_0000) | (value & 0xffff_ffff))
            }
            Storage::TiedHigh(cell) => {
                let old = cell.get();
                cell.set((old & 0xffff_ffff) | (value << 32))
            }
        }
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum CsrError {
    #[error("CSR {0:#05x} is not implemented")]
    NotImplemented(CsrSpecifier),
    #[error("CSR {specifier:#05x} requires privilege {required}, but access is at {actual}")]
    Privileged {
        specifier: CsrSpecifier,
        required: RawPrivilegeLevel,
        actual: PrivilegeLevel,
    },
    #[error("CSR {0:#05x} is accessible only in debug mode")]
    DebugOnly(CsrSpecifier),
}

/// The full CSR address space for one hart.
#[derive(Debug)]
pub struct CsrFile {
    regs: HashMap<CsrSpecifier, CsrDescriptor>,
    written: HashSet<CsrSpecifier>,
    triggers_written: HashSet<u8>,
    mdseac_locked: bool,
    xlen: Xlen,
}

impl CsrFile {
    /// Build a CSR file with the standard privileged/unprivileged set registered at their RISC-V
    /// reset values, tying `MCYCLE`/`MINSTRET` (and their RV32 `H` halves) to `cycle` and
    /// `instret`, which the [`crate::hart::Hart`] updates every step.
    pub fn new(
        xlen: Xlen,
        hart_id: u64,
        misa: u64,
        cycle: Rc<Cell<u64>>,
        instret: Rc<Cell<u64>>,
        reset_vector_width_mask: u64,
    ) -> Self {
        let _ = reset_vector_width_mask;
        let mut file = CsrFile {
            regs: HashMap::new(),
            written: HashSet::new(),
            triggers_written: HashSet::new(),
            mdseac_locked: false,
            xlen,
        };

        use numbers::*;
        let m = RawPrivilegeLevel::Machine;
        let s = RawPrivilegeLevel::Supervisor;
        let u = RawPrivilegeLevel::User;

        file.define(MVENDORID, 0, 0, 0, m, false);
        file.define(MARCHID, 0, 0, 0, m, false);
        file.define(MIMPID, 0, 0, 0, m, false);
        file.define(MHARTID, hart_id, 0, 0, m, false);
        file.define(MCONFIGPTR, 0, 0, 0, m, false);

        file.define(MSTATUS, 0, u64::MAX, u64::MAX, m, false);
        file.define(MSTATUSH, 0, u64::MAX, u64::MAX, m, false);
        file.define(MISA, misa, u64::MAX, u64::MAX, m, false);
        file.define(MEDELEG, 0, u64::MAX, u64::MAX, m, false);
        file.define(MIDELEG, 0, u64::MAX, u64::MAX, m, false);
        file.define(MIE, 0, u64::MAX, u64::MAX, m, false);
        file.define(MIP, 0, u64::MAX, u64::MAX, m, false);
        file.define(MTVEC, 0, u64::MAX, u64::MAX, m, false);
        file.define(MCOUNTEREN, 0, u64::MAX, u64::MAX, m, false);
        file.define(MSCRATCH, 0, u64::MAX, u64::MAX, m, false);
        file.define(MEPC, 0, !1u64, !1u64, m, false);
        file.define(MCAUSE, 0, u64::MAX, u64::MAX, m, false);
        file.define(MTVAL, 0, u64::MAX, u64::MAX, m, false);
        file.define(MTINST, 0, u64::MAX, u64::MAX, m, false);
        file.define(MTVAL2, 0, u64::MAX, u64::MAX, m, false);
        file.define(MENVCFG, 0, u64::MAX, u64::MAX, m, false);
        file.define(MENVCFGH, 0, u64::MAX, u64::MAX, m, false);
        file.define(MSECCFG, 0, u64::MAX, u64::MAX, m, false);
        file.define(MSECCFGH, 0, u64::MAX, u64::MAX, m, false);
        file.define(MCOUNTINHIBIT, 0, u64::MAX, u64::MAX, m, false);

        file.define(SSTATUS, 0, 0, 0, s, false); // Alias; never read directly.
        file.define(STVEC, 0, u64::MAX, u64::MAX, s, false);
        file.define(SCOUNTEREN, 0, u64::MAX, u64::MAX, s, false);
        file.define(SENVCFG, 0, u64::MAX, u64::MAX, s, false);
        file.define(SSCRATCH, 0, u64::MAX, u64::MAX, s, false);
        file.define(SEPC, 0, !1u64, !1u64, s, false);
        file.define(SCAUSE, 0, u64::MAX, u64::MAX, s, false);
        file.define(STVAL, 0, u64::MAX, u64::MAX, s, false);
        file.define(SATP, 0, u64::MAX, u64::MAX, s, false);
        file.define(SCONTEXT, 0, u64::MAX, u64::MAX, s, false);

        file.define(FFLAGS, 0, 0x1f, 0x1f, u, false);
        file.define(FRM, 0, 0x7, 0x7, u, false);
        file.define(FCSR, 0, 0xff, 0xff, u, false);

        file.regs.insert(
            MCYCLE,
            CsrDescriptor {
                implemented: true,
                storage: Storage::TiedLow(cycle.clone()),
                write_mask: u64::MAX,
                poke_mask: u64::MAX,
                privilege: m,
                debug_only: false,
                prev_value: 0,
            },
        );
        file.regs.insert(
            MINSTRET,
            CsrDescriptor {
                implemented: true,
                storage: Storage::TiedLow(instret.clone()),
                write_mask: u64::MAX,
                poke_mask: u64::MAX,
                privilege: m,
                debug_only: false,
                prev_value: 0,
            },
        );
        if xlen == Xlen::Rv32 {
            file.regs.insert(
                MCYCLEH,
                CsrDescriptor {
                    implemented: true,
                    storage: Storage::TiedHigh(cycle.clone()),
                    write_mask: u64::MAX,
                    poke_mask: u64::MAX,
                    privilege: m,
                    debug_only: false,
                    prev_value: 0,
                },
            );
            file.regs.insert(
                MINSTRETH,
                CsrDescriptor {
                    implemented: true,
                    storage: Storage::TiedHigh(instret.clone()),
                    write_mask: u64::MAX,
                    poke_mask: u64::MAX,
                    privilege: m,
                    debug_only: false,
                    prev_value: 0,
                },
            );
        }
        file.define(CYCLE, 0, 0, 0, u, false); // Alias of MCYCLE.
        file.define(TIME, 0, 0, 0, u, false); // Alias of an external time source (see Hart).
        file.define(INSTRET, 0, 0, 0, u, false); // Alias of MINSTRET.
        if xlen == Xlen::Rv32 {
            file.define(CYCLEH, 0, 0, 0, u, false);
            file.define(TIMEH, 0, 0, 0, u, false);
            file.define(INSTRETH, 0, 0, 0, u, false);
        }

        for n in 3..=31 {
            file.define(hpmcounter(n).unwrap(), 0, 0, 0, u, false);
            file.define(mhpmcounter(n).unwrap(), 0, u64::MAX, u64::MAX, m, false);
            file.define(mhpmevent(n).unwrap(), 0, u64::MAX, u64::MAX, m, false);
            if xlen == Xlen::Rv32 {
                file.define(hpmcounterh(n).unwrap(), 0, 0, 0, u, false);
                file.define(mhpmcounterh(n).unwrap(), 0, u64::MAX, u64::MAX, m, false);
            }
        }

        for n in 0..16 {
            file.define(pmpcfg(n).unwrap(), 0, u64::MAX, u64::MAX, m, false);
        }
        for n in 0..64 {
            file.define(pmpaddr(n).unwrap(), 0, u64::MAX, u64::MAX, m, false);
        }

        file.define(TSELECT, 0, u64::MAX, u64::MAX, m, false);
        file.define(TDATA1, 0, u64::MAX, u64::MAX, m, false);
        file.define(TDATA2, 0, u64::MAX, u64::MAX, m, false);
        file.define(TDATA3, 0, u64::MAX, u64::MAX, m, false);
        file.define(MCONTEXT, 0, u64::MAX, u64::MAX, m, false);

        file.define(DCSR, 0x4000_0003, u64::MAX, u64::MAX, m, true);
        file.define(DPC, 0, !1u64, !1u64, m, true);
        file.define(DSCRATCH0, 0, u64::MAX, u64::MAX, m, true);
        file.define(DSCRATCH1, 0, u64::MAX, u64::MAX, m, true);

        file.define(MDSEAC, 0, u64::MAX, u64::MAX, m, false);
        file.define(MEIHAP, 0, 0x3fc, u64::MAX, m, false); // Writes touch only bits 2-9.
        file.define(MGPMC, 1, 0x1, 0x1, m, false);
        file.define(MRAC, 0, u64::MAX, u64::MAX, m, false);

        file
    }

    fn define(
        &mut self,
        number: CsrSpecifier,
        reset: u64,
        write_mask: u64,
        poke_mask: u64,
        privilege: RawPrivilegeLevel,
        debug_only: bool,
    ) {
        self.regs.insert(
            number,
            CsrDescriptor {
                implemented: true,
                storage: Storage::Owned(reset),
                write_mask,
                poke_mask,
                privilege,
                debug_only,
                prev_value: reset,
            },
        );
    }

    fn check_access(
        &self,
        number: CsrSpecifier,
        privilege: PrivilegeLevel,
        debug: bool,
    ) -> Result<(), CsrError> {
        let desc = self
            .regs
            .get(&number)
            .filter(|d| d.implemented)
            .ok_or(CsrError::NotImplemented(number))?;
        if desc.debug_only && !debug {
            return Err(CsrError::DebugOnly(number));
        }
        if privilege < desc.privilege {
            return Err(CsrError::Privileged {
                specifier: number,
                required: desc.privilege,
                actual: privilege,
            });
        }
        Ok(())
    }

    /// Read a CSR, honoring implementation/privilege/debug-only gating.
    pub fn read(
        &self,
        number: CsrSpecifier,
        privilege: PrivilegeLevel,
        debug: bool,
    ) -> Result<u64, CsrError> {
        self.check_access(number, privilege, debug)?;
        use numbers::*;
        Ok(match number {
            SSTATUS => self.regs[&MSTATUS].load() & sstatus_mask(),
            SIE => self.regs[&MIE].load() & sip_sie_mask(),
            SIP => self.regs[&MIP].load() & sip_sie_mask(),
            FFLAGS => self.regs[&FCSR].load() & 0x1f,
            FRM => (self.regs[&FCSR].load() >> 5) & 0x7,
            CYCLE => self.regs[&MCYCLE].load(),
            CYCLEH => self.regs[&MCYCLEH].load(),
            INSTRET => self.regs[&MINSTRET].load(),
            INSTRETH => self.regs[&MINSTRETH].load(),
            TIME | TIMEH => self.regs[&number].load(),
            n if (3..=31).any(|i| hpmcounter(i) == Some(n)) => {
                let mn = n - CYCLE + 0xB00;
                self.regs.get(&mn).map(|d| d.load()).unwrap_or(0)
            }
            n if (3..=31).any(|i| hpmcounterh(i) == Some(n)) => {
                let mn = n - CYCLEH + 0xB80;
                self.regs.get(&mn).map(|d| d.load()).unwrap_or(0)
            }
            _ => self.regs[&number].load(),
        })
    }

    /// Write a CSR (CSR instruction path): applies `value & write_mask`, records the change.
    pub fn write(
        &mut self,
        number: CsrSpecifier,
        privilege: PrivilegeLevel,
        debug: bool,
        value: u64,
    ) -> Result<(), CsrError> {
        self.check_access(number, privilege, debug)?;
        use numbers::*;
        match number {
            SSTATUS => self.write(MSTATUS, privilege, debug, self.read(MSTATUS, privilege, debug)? & !sstatus_mask() | (value & sstatus_mask()))?,
            SIE => self.write(MIE, privilege, debug, self.read(MIE, privilege, debug)? & !sip_sie_mask() | (value & sip_sie_mask()))?,
            SIP => self.write(MIP, privilege, debug, self.read(MIP, privilege, debug)? & !sip_sie_mask() | (value & sip_sie_mask()))?,
            FFLAGS => {
                let fcsr = self.read(FCSR, privilege, debug)?;
                self.write(FCSR, privilege, debug, (fcsr & !0x1f) | (value & 0x1f))?
            }
            FRM => {
                let fcsr = self.read(FCSR, privilege, debug)?;
                self.write(FCSR, privilege, debug, (fcsr & !0xe0) | ((value & 0x7) << 5))?
            }
            _ => {
                if self.mdseac_locked && number == MDSEAC {
                    // Locked: value is dropped, but the write is still recorded (bench contract).
                } else if let Some(desc) = self.regs.get_mut(&number) {
                    let old = desc.load();
                    let new = (old & !desc.write_mask) | (value & desc.write_mask);
                    desc.prev_value = old;
                    desc.store(new);
                }
            }
        }
        self.written.insert(number);
        if matches!(number, TDATA1 | TDATA2 | TDATA3) {
            self.triggers_written.insert(0);
        }
        Ok(())
    }

    /// Poke a CSR (debugger/test-bench path): applies `value & poke_mask`, never recorded for the
    /// trace-data set.
    pub fn poke(&mut self, number: CsrSpecifier, value: u64) {
        use numbers::MEIHAP;
        if number == MEIHAP {
            if let Some(desc) = self.regs.get_mut(&number) {
                let old = desc.load();
                desc.store((old & !0x3fc) | (value & 0x3fc));
            }
            return;
        }
        if let Some(desc) = self.regs.get_mut(&number) {
            let old = desc.load();
            desc.store((old & !desc.poke_mask) | (value & desc.poke_mask));
        }
    }

    /// Read without gating or write-recording, for internal bookkeeping (e.g. trap dispatch
    /// reading `MTVEC`). Panics if `number` isn't registered — callers only use this for CSRs the
    /// core itself always registers.
    pub fn read_raw(&self, number: CsrSpecifier) -> u64 {
        self.regs
            .get(&number)
            .map(|d| d.load())
            .unwrap_or_else(|| panic!("internal read of unregistered CSR {number:#05x}"))
    }

    /// Write without gating, for internal bookkeeping (e.g. trap dispatch writing `MEPC`). Does
    /// not touch the trace-data set, matching a hardware state-machine side effect rather than a
    /// CSR instruction.
    pub fn write_raw(&mut self, number: CsrSpecifier, value: u64) {
        if let Some(desc) = self.regs.get_mut(&number) {
            desc.store(value);
        }
    }

    /// CSR numbers (and trigger indices) written since the last [`Self::clear_last_written`].
    pub fn last_written_regs(&self) -> (Vec<CsrSpecifier>, Vec<u8>) {
        let mut regs: Vec<_> = self.written.iter().copied().collect();
        regs.sort_unstable();
        let mut triggers: Vec<_> = self.triggers_written.iter().copied().collect();
        triggers.sort_unstable();
        (regs, triggers)
    }

    pub fn clear_last_written(&mut self) {
        self.written.clear();
        self.triggers_written.clear();
    }

    /// Lock `MDSEAC` so further writes are dropped (but still recorded) until
    /// [`Self::lock_mdseac`]`(false)` is called on NMI acknowledgement.
    pub fn lock_mdseac(&mut self, locked: bool) {
        self.mdseac_locked = locked;
    }

    pub fn mdseac_locked(&self) -> bool {
        self.mdseac_locked
    }

    pub fn xlen(&self) -> Xlen {
        self.xlen
    }
}

fn sstatus_mask() -> u64 {
    0b1111_1111_1000_1101_1110_0111_0111_0111
}

fn sip_sie_mask() -> u64 {
    (1 << 1) | (1 << 5) | (1 << 9) // SSIP, STIP, SEIP
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_file() -> CsrFile {
        CsrFile::new(
            Xlen::Rv32,
            0,
            0x4014_0100,
            Rc::new(Cell::new(0)),
            Rc::new(Cell::new(0)),
            0,
        )
    }

    #[test]
    fn unimplemented_csr_errors() {
        let file = new_file();
        assert_eq!(
            Err(CsrError::NotImplemented(0x000)),
            file.read(0x000, PrivilegeLevel::Machine, false)
        );
    }

    #[test]
    fn privilege_gating() {
        let file = new_file();
        assert!(matches!(
            file.read(numbers::MSTATUS, PrivilegeLevel::User, false),
            Err(CsrError::Privileged { .. })
        ));
        assert!(file.read(numbers::MSTATUS, PrivilegeLevel::Machine, false).is_ok());
    }

    #[test]
    fn debug_only_csr_requires_debug_mode() {
        let file = new_file();
        assert!(matches!(
            file.read(numbers::DCSR, PrivilegeLevel::Machine, false),
            Err(CsrError::DebugOnly(_))
        ));
        assert!(file.read(numbers::DCSR, PrivilegeLevel::Machine, true).is_ok());
    }

    #[test]
    fn write_mask_restricts_bits() {
        let mut file = new_file();
        file.write(numbers::FCSR, PrivilegeLevel::User, false, 0xff).unwrap();
        assert_eq!(0xff, file.read(numbers::FCSR, PrivilegeLevel::User, false).unwrap());
        file.write(numbers::FCSR, PrivilegeLevel::User, false, 0xffff_ffff)
            .unwrap();
        assert_eq!(0xff, file.read(numbers::FCSR, PrivilegeLevel::User, false).unwrap());
    }

    #[test]
    fn mcycle_is_tied_to_external_word() {
        let cycle = Rc::new(Cell::new(0u64));
        let instret = Rc::new(Cell::new(0u64));
        let file = CsrFile::new(Xlen::Rv64, 0, 0x8000_0000_0014_0100, cycle.clone(), instret, 0);
        cycle.set(42);
        assert_eq!(42, file.read(numbers::MCYCLE, PrivilegeLevel::Machine, false).unwrap());
    }

    #[test]
    fn mdseac_write_is_always_recorded_even_when_locked() {
        let mut file = new_file();
        file.lock_mdseac(true);
        file.write(numbers::MDSEAC, PrivilegeLevel::Machine, false, 0x1234)
            .unwrap();
        assert_eq!(0, file.read(numbers::MDSEAC, PrivilegeLevel::Machine, false).unwrap());
        assert!(file.last_written_regs().0.contains(&numbers::MDSEAC));
    }

    #[test]
    fn sstatus_is_a_masked_view_of_mstatus() {
        let mut file = new_file();
        file.write(numbers::MSTATUS, PrivilegeLevel::Machine, false, u64::MAX)
            .unwrap();
        let sstatus = file.read(numbers::SSTATUS, PrivilegeLevel::Supervisor, false).unwrap();
        assert_eq!(sstatus, sstatus_mask());
    }

    #[test]
    fn clear_last_written_resets_trace_set() {
        let mut file = new_file();
        file.write(numbers::MSCRATCH, PrivilegeLevel::Machine, false, 5)
            .unwrap();
        assert!(!file.last_written_regs().0.is_empty());
        file.clear_last_written();
        assert!(file.last_written_regs().0.is_empty());
    }
}
