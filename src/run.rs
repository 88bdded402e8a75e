//! Stepping a hart to completion: the instruction-count/stop-address/user-interrupt surface an
//! embedder's CLI front-end drives, layered over [`Hart::step`].
//!
//! This crate never installs a `SIGINT` handler itself; `run`'s `user_ok` flag is polled, not
//! pushed, so wiring an actual signal into it (e.g. via the `ctrlc` crate) is the embedder's job.

use crate::hart::{Hart, StepOutcome};
use crate::memory::Memory;
use crate::trigger::TriggerUnit;
use std::sync::atomic::{AtomicBool, Ordering};

/// Stop conditions for [`RunLoop::run`], beyond the hart's own `Stop`/`Exit` outcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    /// Stop once this many instructions have retired or trapped.
    pub max_instructions: Option<u64>,
    /// Stop once `pc` equals this address, before fetching it.
    pub stop_pc: Option<u64>,
}

/// Why a [`RunLoop::run`] call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The hart asked to stop (watchdog trip, debug halt) or `stop_pc` was reached.
    Stopped { success: bool },
    /// The guest wrote a well-formed `tohost` exit code.
    Exited { code: u64 },
    /// `max_instructions` was reached without the hart otherwise stopping.
    InstructionLimitReached,
    /// The caller's `user_ok` flag went false (e.g. `Ctrl-C`) before the next step.
    StoppedByUser,
}

/// Drives a single [`Hart`] through repeated [`Hart::step`] calls.
pub struct RunLoop<'a, M: Memory, T: TriggerUnit> {
    hart: &'a mut Hart<M>,
    triggers: T,
}

impl<'a, M: Memory, T: TriggerUnit> RunLoop<'a, M, T> {
    pub fn new(hart: &'a mut Hart<M>, triggers: T) -> Self {
        Self { hart, triggers }
    }

    pub fn hart(&self) -> &Hart<M> {
        self.hart
    }

    pub fn hart_mut(&mut self) -> &mut Hart<M> {
        self.hart
    }

    /// One fetch/decode/execute/trap cycle.
    pub fn step(&mut self) -> StepOutcome {
        self.hart.step(&self.triggers)
    }

    /// Run until the hart itself stops or exits, with no instruction limit, stop address, or
    /// signal check on each iteration. The fast path for a batch run with no debugger attached.
    pub fn simple_run(&mut self) -> RunOutcome {
        loop {
            match self.step() {
                StepOutcome::Continue => {}
                StepOutcome::Stop { success } => return RunOutcome::Stopped { success },
                StepOutcome::Exit { code } => return RunOutcome::Exited { code },
            }
        }
    }

    /// Run with the full stop surface: an instruction budget, a `stop_pc`, and a polled
    /// `user_ok` flag the caller clears (e.g. from a signal handler) to ask the loop to return
    /// before its next step.
    pub fn run(&mut self, limits: RunLimits, user_ok: Option<&AtomicBool>) -> RunOutcome {
        let mut executed = 0u64;
        loop {
            if let Some(max) = limits.max_instructions {
                if executed >= max {
                    return RunOutcome::InstructionLimitReached;
                }
            }
            if let Some(stop_pc) = limits.stop_pc {
                if self.hart.pc == stop_pc {
                    return RunOutcome::Stopped { success: true };
                }
            }
            if let Some(flag) = user_ok {
                if !flag.load(Ordering::Relaxed) {
                    return RunOutcome::StoppedByUser;
                }
            }
            match self.step() {
                StepOutcome::Continue => executed += 1,
                StepOutcome::Stop { success } => return RunOutcome::Stopped { success },
                StepOutcome::Exit { code } => return RunOutcome::Exited { code },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::HartConfig;
    use crate::memory::TestMemory;
    use crate::registers::Specifier;
    use crate::trigger::NoTriggers;

    /// Encode `ADDI dest, src, immediate` (funct3 `0b000`, opcode `OP-IMM`).
    fn addi(dest: Specifier, src: Specifier, immediate: i64) -> u32 {
        ((immediate as u32 & 0xfff) << 20)
            | (u32::from(src) << 15)
            | (0b000 << 12)
            | (u32::from(dest) << 7)
            | 0b0010011
    }

    #[test]
    fn simple_run_stops_on_the_watchdog() {
        let mut memory = TestMemory::new(1024);
        // An illegal instruction (all zero bits) at every fetched address.
        for addr in (0..1024).step_by(4) {
            memory.write_u32(addr, 0).unwrap();
        }
        let mut hart = Hart::new(HartConfig::default(), memory);
        let mut run_loop = RunLoop::new(&mut hart, NoTriggers);
        assert_eq!(RunOutcome::Stopped { success: false }, run_loop.simple_run());
    }

    #[test]
    fn run_honors_the_instruction_limit() {
        let mut memory = TestMemory::new(1024);
        let word = addi(Specifier::from_u5(5), Specifier::ZERO, 1);
        for addr in (0..1024).step_by(4) {
            memory.write_u32(addr, word).unwrap();
        }
        let mut hart = Hart::new(HartConfig::default(), memory);
        let mut run_loop = RunLoop::new(&mut hart, NoTriggers);
        let limits = RunLimits { max_instructions: Some(3), stop_pc: None };
        assert_eq!(RunOutcome::InstructionLimitReached, run_loop.run(limits, None));
    }

    #[test]
    fn run_stops_at_stop_pc() {
        let mut memory = TestMemory::new(1024);
        let word = addi(Specifier::from_u5(5), Specifier::ZERO, 1);
        for addr in (0..1024).step_by(4) {
            memory.write_u32(addr, word).unwrap();
        }
        let mut hart = Hart::new(HartConfig::default(), memory);
        let mut run_loop = RunLoop::new(&mut hart, NoTriggers);
        let limits = RunLimits { max_instructions: None, stop_pc: Some(16) };
        assert_eq!(RunOutcome::Stopped { success: true }, run_loop.run(limits, None));
        assert_eq!(16, run_loop.hart().pc);
    }

    #[test]
    fn run_stops_when_user_ok_goes_false() {
        let mut memory = TestMemory::new(1024);
        let word = addi(Specifier::from_u5(5), Specifier::ZERO, 1);
        for addr in (0..1024).step_by(4) {
            memory.write_u32(addr, word).unwrap();
        }
        let mut hart = Hart::new(HartConfig::default(), memory);
        let mut run_loop = RunLoop::new(&mut hart, NoTriggers);
        let user_ok = AtomicBool::new(false);
        let limits = RunLimits::default();
        assert_eq!(RunOutcome::StoppedByUser, run_loop.run(limits, Some(&user_ok)));
    }
}
