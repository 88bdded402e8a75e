//! Performance-counter event enumeration.
//!
//! `MHPMEVENTn` selects, per counter, which of a fixed set of retirement/micro-architectural
//! events increments the paired `MHPMCOUNTERn`; the teacher's `counter_control.rs`/`counters.rs`
//! stubbed this out entirely (reads as zero, writes ignored). This core actually drives the
//! counters: every event the executor or run loop observes is reported here and fanned out to
//! whichever `MHPMEVENTn` registers currently select it, gated by `MGPMC`'s one-step-delayed
//! enable (see [`super::Hart::request_counters_on`]).

use crate::csr::{numbers, CsrFile};

/// One architecturally observable event a hart can retire or experience in a given step.
/// Ordinal values are this core's own `MHPMEVENTn` selector encoding, not a
/// standard RISC-V numbering — no such standard exists for this counter set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u64)]
pub enum PerfEvent {
    Ecall = 1,
    Ebreak = 2,
    Fence = 3,
    FenceI = 4,
    Mret = 5,
    Alu = 6,
    Mul = 7,
    Div = 8,
    Load = 9,
    MisalignLoad = 10,
    Store = 11,
    MisalignStore = 12,
    Lr = 13,
    Sc = 14,
    Atomic = 15,
    CsrRead = 16,
    CsrWrite = 17,
    CsrReadWrite = 18,
    Branch = 19,
    BranchTaken = 20,
    InstCommitted = 21,
    Inst16Committed = 22,
    Inst32Committed = 23,
    InstAligned = 24,
    Exception = 25,
    ExternalInterrupt = 26,
    TimerInterrupt = 27,
}

impl PerfEvent {
    fn selector(self) -> u64 {
        self as u64
    }
}

/// Increment every `MHPMCOUNTERn` (`n` in `3..=31`) whose paired `MHPMEVENTn` selects `event`,
/// unless counters are currently gated off by `MGPMC`.
pub fn record(csrs: &mut CsrFile, counters_on: bool, event: PerfEvent) {
    if !counters_on {
        return;
    }
    let selector = event.selector();
    for n in 3..=31 {
        let event_csr = numbers::mhpmevent(n).expect("n in range");
        if csrs.read_raw(event_csr) == selector {
            let counter_csr = numbers::mhpmcounter(n).expect("n in range");
            let value = csrs.read_raw(counter_csr);
            csrs.write_raw(counter_csr, value.wrapping_add(1));
            if csrs.xlen() == crate::Xlen::Rv32 {
                if value.wrapping_add(1) == 0 {
                    let high_csr = numbers::mhpmcounterh(n).expect("n in range");
                    let high = csrs.read_raw(high_csr);
                    csrs.write_raw(high_csr, high.wrapping_add(1));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PrivilegeLevel;
    use std::cell::Cell;
    use std::rc::Rc;

    fn new_file() -> CsrFile {
        CsrFile::new(crate::Xlen::Rv64, 0, 0, Rc::new(Cell::new(0)), Rc::new(Cell::new(0)), 0)
    }

    #[test]
    fn matching_event_selector_increments_its_counter() {
        let mut csrs = new_file();
        csrs.write(numbers::mhpmevent(5).unwrap(), PrivilegeLevel::Machine, false, PerfEvent::Load.selector())
            .unwrap();
        record(&mut csrs, true, PerfEvent::Load);
        record(&mut csrs, true, PerfEvent::Store);
        assert_eq!(1, csrs.read_raw(numbers::mhpmcounter(5).unwrap()));
    }

    #[test]
    fn gated_off_counters_do_not_increment() {
        let mut csrs = new_file();
        csrs.write(numbers::mhpmevent(3).unwrap(), PrivilegeLevel::Machine, false, PerfEvent::Branch.selector())
            .unwrap();
        record(&mut csrs, false, PerfEvent::Branch);
        assert_eq!(0, csrs.read_raw(numbers::mhpmcounter(3).unwrap()));
    }
}
