//! A single RISC-V hart: register files, CSR file, trap state, and the load-reservation/queue
//! bookkeeping tied to it.

pub mod counters;
pub mod execute;

use crate::csr::{numbers, CsrFile};
use crate::decode::{self, DecodeError};
use crate::memory::{AccessKind, Memory, MemoryError};
use crate::queues::{LoadQueueEntry, Queue, QueueOutcome, StoreQueueEntry};
use crate::registers::{CustomRegisterFile, FpRegisterFile, IntRegisterFile};
use crate::trace::TraceSink;
use crate::trap::{self, Exception, TrapCause};
use crate::trigger::{TriggerAction, TriggerUnit};
use crate::{Extensions, PrivilegeLevel, RawPrivilegeLevel, Xlen};
use log::{debug, trace, warn};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::io::{Read, Write};
use std::rc::Rc;

/// A byte sink an embedder wires up for `console_io` writes. Shared via `Rc` so the same handle the
/// loader used to discover the address can be handed to the hart without the embedder giving up
/// ownership.
pub type ConsoleWriter = Rc<RefCell<dyn Write>>;
/// A byte source an embedder wires up for `console_io` reads.
pub type ConsoleReader = Rc<RefCell<dyn Read>>;

/// Everything the embedder chooses at construction time, analogous to the teacher's `core::Config`.
/// No JSON/CLI parsing happens here: the embedder builds this struct directly from whatever
/// configuration surface it exposes.
#[derive(Clone)]
pub struct HartConfig {
    pub xlen: Xlen,
    pub hart_id: u64,
    pub reset_vector: u64,
    pub nmi_vector: u64,
    pub requested_extensions: Extensions,
    pub supports_misaligned_access: bool,
    pub load_queue_depth: usize,
    pub store_queue_depth: usize,
    /// Gates `medeleg`/`mideleg`-driven S-mode trap delegation in [`trap::dispatch`]. Off by
    /// default: every trap lands in Machine mode and `medeleg`/`mideleg` are writable/readable but
    /// otherwise inert, matching this core's default configuration.
    pub enable_trap_delegation: bool,
    pub console_io_address: Option<u64>,
    pub to_host_address: Option<u64>,
    pub from_host_address: Option<u64>,
    /// Address of the `_end`/`brk` boundary symbol the loader discovered, passed through unused by
    /// the core itself (brk is a front-end ECALL-handler concern).
    pub end_symbol: Option<u64>,
    /// Destination for `console_io` byte writes. `None` makes such a store a silent no-op.
    pub console_writer: Option<ConsoleWriter>,
    /// Source for `console_io` byte reads. `None` makes such a load read as zero.
    pub console_reader: Option<ConsoleReader>,
}

impl fmt::Debug for HartConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HartConfig")
            .field("xlen", &self.xlen)
            .field("hart_id", &self.hart_id)
            .field("reset_vector", &self.reset_vector)
            .field("nmi_vector", &self.nmi_vector)
            .field("requested_extensions", &self.requested_extensions)
            .field("supports_misaligned_access", &self.supports_misaligned_access)
            .field("load_queue_depth", &self.load_queue_depth)
            .field("store_queue_depth", &self.store_queue_depth)
            .field("enable_trap_delegation", &self.enable_trap_delegation)
            .field("console_io_address", &self.console_io_address)
            .field("to_host_address", &self.to_host_address)
            .field("from_host_address", &self.from_host_address)
            .field("end_symbol", &self.end_symbol)
            .field("console_writer", &self.console_writer.as_ref().map(|_| "<writer>"))
            .field("console_reader", &self.console_reader.as_ref().map(|_| "<reader>"))
            .finish()
    }
}

impl Default for HartConfig {
    fn default() -> Self {
        Self {
            xlen: Xlen::Rv64,
            hart_id: 0,
            reset_vector: 0,
            nmi_vector: 0,
            requested_extensions: Extensions::all(),
            supports_misaligned_access: true,
            load_queue_depth: 8,
            store_queue_depth: 8,
            enable_trap_delegation: false,
            console_io_address: None,
            to_host_address: None,
            from_host_address: None,
            end_symbol: None,
            console_writer: None,
            console_reader: None,
        }
    }
}

/// Outcome of a single [`Hart::step`], or of a [`crate::run::RunLoop::run`] batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Execution continues normally.
    Continue,
    /// The run loop should stop; `success` reflects whether it stopped for an expected reason
    /// (hit a configured stop address, instruction limit reached) versus an anomaly (the
    /// consecutive-illegal-instruction watchdog tripped).
    Stop { success: bool },
    /// The guest wrote a well-formed `tohost` exit code.
    Exit { code: u64 },
}

/// Result of [`Hart::fetch`].
enum FetchOutcome {
    /// An instruction window was fetched and no trigger fired over it.
    Fetched { window: u32, size: u8 },
    /// A `check_address`/`check_opcode` trigger fired; its side effects (trap entry or debug-mode
    /// entry) already ran, and the instruction that would have been fetched next must not execute.
    TriggerFired,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReservation {
    pub address: u64,
    pub size: u8,
}

/// An embedder-installed trace emission hook: where to send [`crate::trace::TraceRecord`]s and the
/// tag counter they're numbered with. `Rc`, not `Arc`: a `Hart` isn't itself `Send`/`Sync` (see
/// `CsrFile`'s tied `Rc<Cell<u64>>` counters), so cross-hart sharing of the sink happens at the
/// `dyn TraceSink` level instead (a [`crate::trace::MutexTraceSink`] is `Send + Sync`).
pub struct TraceHook {
    pub sink: Rc<dyn TraceSink>,
    pub hart_id: u64,
    next_tag: u64,
}

impl TraceHook {
    pub fn new(sink: Rc<dyn TraceSink>, hart_id: u64) -> Self {
        Self { sink, hart_id, next_tag: 0 }
    }
}

impl fmt::Debug for TraceHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceHook").field("hart_id", &self.hart_id).field("next_tag", &self.next_tag).finish()
    }
}

/// A single RISC-V hart's full architectural state, generic over the memory subsystem it's wired
/// to.
#[derive(Debug)]
pub struct Hart<M: Memory> {
    pub config: HartConfig,
    pub memory: M,

    pub pc: u64,
    /// Address of the instruction currently being decoded/executed. `pc` itself is advanced to the
    /// (provisional) next-instruction address before the executor runs,
    /// so branch/jump targets, link-register values, and trap `xepc` all read from this field
    /// instead.
    pub current_pc: u64,
    pub privilege: PrivilegeLevel,
    pub debug_mode: bool,
    pub debug_step_mode: bool,
    pub extensions: Extensions,

    pub int_regs: IntRegisterFile,
    pub fp_regs: FpRegisterFile,
    pub custom_regs: CustomRegisterFile,
    pub csrs: CsrFile,

    pub cycle: Rc<Cell<u64>>,
    pub instret: Rc<Cell<u64>>,

    pub load_reservation: Option<LoadReservation>,
    pub load_queue: Queue<LoadQueueEntry>,
    pub store_queue: Queue<StoreQueueEntry>,

    /// Applied at the start of the step *after* the one that wrote `MGPMC`, per the one-step-delay
    /// cache design note.
    pending_counters_on: Option<bool>,
    counters_on: bool,

    consecutive_illegal: u32,
    next_queue_tag: u64,

    /// Set by the executor when a `tohost`/stop-address write asks the run loop to halt this hart;
    /// consumed (and cleared) by [`Hart::step`] on the same step it was raised.
    pub(crate) halt_request: Option<StepOutcome>,

    /// When set, [`Hart::step`] emits one trace record per resource touched by the instruction it
    /// just retired or trapped on.
    pub trace: Option<TraceHook>,
}

impl<M: Memory> Hart<M> {
    pub fn new(config: HartConfig, memory: M) -> Self {
        let extensions = Extensions::normalize(config.requested_extensions);
        let misa = extensions.misa_bits() | (config.xlen.misa_mxl() << (config.xlen.bits() - 2));
        let cycle = Rc::new(Cell::new(0));
        let instret = Rc::new(Cell::new(0));
        let csrs = CsrFile::new(config.xlen, config.hart_id, misa, cycle.clone(), instret.clone(), 0);
        let pc = config.reset_vector;
        let load_queue_depth = config.load_queue_depth;
        let store_queue_depth = config.store_queue_depth;
        Self {
            pc,
            current_pc: pc,
            privilege: PrivilegeLevel::Machine,
            debug_mode: false,
            debug_step_mode: false,
            extensions,
            int_regs: IntRegisterFile::new(),
            fp_regs: FpRegisterFile::new(),
            custom_regs: CustomRegisterFile::new(),
            csrs,
            cycle,
            instret,
            load_reservation: None,
            load_queue: Queue::new(load_queue_depth),
            store_queue: Queue::new(store_queue_depth),
            pending_counters_on: None,
            counters_on: true,
            consecutive_illegal: 0,
            next_queue_tag: 0,
            halt_request: None,
            trace: None,
            config,
            memory,
        }
    }

    pub fn least_privileged(&self) -> PrivilegeLevel {
        PrivilegeLevel::least_privileged(self.extensions.contains(Extensions::U))
    }

    fn next_tag(&mut self) -> u64 {
        self.next_queue_tag += 1;
        self.next_queue_tag
    }

    /// Fetch, decode, and execute one instruction, handling any resulting trap.
    ///
    /// > The base RISC-V ISA has fixed-length 32-bit instructions that must be naturally aligned on
    /// > 32-bit boundaries.
    pub fn step(&mut self, triggers: &impl TriggerUnit) -> StepOutcome {
        self.apply_pending_counters();
        self.current_pc = self.pc;

        if let Some(hit) = self.poll_interrupt() {
            return hit;
        }

        let fetch_result = self.fetch(triggers);
        let (raw_instruction, outcome) = match fetch_result {
            Ok(FetchOutcome::TriggerFired) => {
                // The trigger hit already ran through `enter_trap`/`handle_trigger_hit` inside
                // `fetch`, which set `pc`/`privilege` to the trap target. Abandon here rather than
                // decoding and executing the instruction the trigger was meant to block, or that
                // target would immediately be clobbered by the unconditional pc-advance below.
                self.csrs.clear_last_written();
                self.int_regs.clear_last_written();
                self.fp_regs.clear_last_written();
                return self.halt_request.take().unwrap_or(StepOutcome::Continue);
            }
            Ok(FetchOutcome::Fetched { window, size }) => {
                (Some(window), self.decode_and_execute(window, size))
            }
            Err(exception) => (None, Err(exception)),
        };

        if let Some(window) = raw_instruction {
            self.emit_trace(window);
        }

        self.csrs.clear_last_written();
        self.int_regs.clear_last_written();
        self.fp_regs.clear_last_written();

        match outcome {
            Ok(()) => {
                self.consecutive_illegal = 0;
                self.cycle.set(self.cycle.get().wrapping_add(1));
                self.instret.set(self.instret.get().wrapping_add(1));
                // An icount trigger fires after the instruction it's counting has actually
                // retired, not before it was even fetched.
                if let Some(hit) = triggers.check_icount() {
                    self.handle_trigger_hit(hit.action, hit.index);
                }
                self.halt_request.take().unwrap_or(StepOutcome::Continue)
            }
            Err(exception) => {
                let is_illegal = matches!(exception, Exception::IllegalInstruction(_));
                self.consecutive_illegal = if is_illegal { self.consecutive_illegal + 1 } else { 0 };
                self.cycle.set(self.cycle.get().wrapping_add(1));
                self.enter_trap(TrapCause::Exception(exception));
                if self.consecutive_illegal >= 64 {
                    warn!("64 consecutive illegal instructions, stopping");
                    return StepOutcome::Stop { success: false };
                }
                StepOutcome::Continue
            }
        }
    }

    /// Report an asynchronously discovered bus error for a load that already wrote its destination
    /// register before the memory subsystem confirmed the access landed. Resolves to the single
    /// in-flight load it must have come from, undoes the speculative register write, and raises the
    /// precise trap against that load's `pc` exactly as if the fault had been synchronous. Returns
    /// `false` when there is no way to resolve the fault to exactly one in-flight load (none was
    /// pending, or more than one was and the embedder's memory subsystem can't tell which).
    pub fn report_load_fault(&mut self, error: MemoryError) -> bool {
        match self.load_queue.apply_load_exception(error) {
            QueueOutcome::Matched(entry) => {
                self.int_regs.poke(entry.target_reg, entry.prev_reg_value);
                self.current_pc = entry.pc;
                self.enter_trap(TrapCause::Exception(execute::map_load_error(error, entry.address)));
                true
            }
            QueueOutcome::NoMatch => false,
            QueueOutcome::Ambiguous => {
                warn!("ambiguous deferred load fault, more than one in-flight load was eligible");
                false
            }
        }
    }

    /// Report an asynchronously discovered bus error for a store that already landed before the
    /// memory subsystem confirmed it. Resolves to the single in-flight store it must have come
    /// from, restores the bytes the store overwrote, and raises the precise trap against that
    /// store's `pc`. Same `false`-on-unresolvable contract as [`Self::report_load_fault`].
    pub fn report_store_fault(&mut self, error: MemoryError) -> bool {
        match self.store_queue.apply_store_exception(error) {
            QueueOutcome::Matched(entry) => {
                execute::restore_store_bytes(self, entry.address, entry.size, entry.old_bytes);
                self.current_pc = entry.pc;
                self.enter_trap(TrapCause::Exception(execute::map_store_error(error, entry.address)));
                true
            }
            QueueOutcome::NoMatch => false,
            QueueOutcome::Ambiguous => {
                warn!("ambiguous deferred store fault, more than one in-flight store was eligible");
                false
            }
        }
    }

    /// Emit one trace record per resource [`Self::int_regs`], [`Self::fp_regs`], [`Self::csrs`], or
    /// [`Self::memory`] reports as touched since the last clear. Must run before those trace-data
    /// sets are cleared.
    fn emit_trace(&mut self, raw_instruction: u32) {
        let Some(hook) = self.trace.as_mut() else { return };
        let records = crate::trace::collect_records(
            hook.next_tag,
            hook.hart_id,
            self.current_pc,
            raw_instruction,
            &self.int_regs,
            &self.fp_regs,
            &self.csrs,
            &self.memory,
        );
        if records.is_empty() {
            return;
        }
        hook.next_tag += 1;
        let disassembly = match decode::decode(raw_instruction) {
            Ok(decoded) => decoded.instruction.to_string(),
            Err(_) => String::from("<illegal>"),
        };
        for record in &records {
            hook.sink.write_line(&record.format_line(&disassembly));
        }
    }

    fn apply_pending_counters(&mut self) {
        if let Some(on) = self.pending_counters_on.take() {
            self.counters_on = on;
        }
    }

    /// Record a write to `MGPMC`; takes effect at the start of the *next* step.
    pub fn request_counters_on(&mut self, on: bool) {
        self.pending_counters_on = Some(on);
    }

    fn poll_interrupt(&mut self) -> Option<StepOutcome> {
        let mip = self.csrs.read_raw(numbers::MIP);
        let mie = self.csrs.read_raw(numbers::MIE);
        let mideleg =
            if self.config.enable_trap_delegation { self.csrs.read_raw(numbers::MIDELEG) } else { 0 };
        let mstatus = self.csrs.read_raw(numbers::MSTATUS);
        if let Some(interrupt) = trap::pending_interrupt(mip, mie, mideleg, mstatus, self.privilege) {
            debug!("taking interrupt {interrupt:?}");
            let event = match interrupt {
                trap::Interrupt::MachineExternal | trap::Interrupt::SupervisorExternal => {
                    Some(counters::PerfEvent::ExternalInterrupt)
                }
                trap::Interrupt::MachineTimer
                | trap::Interrupt::SupervisorTimer
                | trap::Interrupt::MachineTimer0
                | trap::Interrupt::MachineTimer1 => Some(counters::PerfEvent::TimerInterrupt),
                trap::Interrupt::MachineSoftware | trap::Interrupt::SupervisorSoftware => None,
            };
            if let Some(event) = event {
                counters::record(&mut self.csrs, self.counters_on, event);
            }
            self.enter_trap(TrapCause::Interrupt(interrupt));
            return Some(StepOutcome::Continue);
        }
        None
    }

    fn handle_trigger_hit(&mut self, action: TriggerAction, index: u8) {
        match action {
            TriggerAction::Break => {
                self.enter_trap(TrapCause::Exception(Exception::Breakpoint(self.current_pc)))
            }
            TriggerAction::Halt => {
                debug!("trigger {index} halted hart into debug mode");
                self.debug_mode = true;
            }
        }
    }

    fn enter_trap(&mut self, cause: TrapCause) {
        let (new_pc, new_privilege) = trap::dispatch(
            &mut self.csrs,
            self.config.xlen.bits(),
            self.current_pc,
            self.privilege,
            cause,
            self.config.enable_trap_delegation,
        );
        self.pc = new_pc;
        self.privilege = new_privilege;
        self.load_reservation = None;
    }

    /// Fetches one instruction window, checking `check_address`/`check_opcode` triggers as it goes.
    /// A hit runs [`Self::handle_trigger_hit`] immediately (so `pc`/`privilege` already point at the
    /// trap target, or `debug_mode` is already set, by the time this returns) and reports
    /// [`FetchOutcome::TriggerFired`] so the caller abandons rather than decoding and executing the
    /// instruction the trigger was meant to block.
    fn fetch(&mut self, triggers: &impl TriggerUnit) -> Result<FetchOutcome, Exception> {
        if !self.config.supports_misaligned_access && self.pc & 0b1 != 0 {
            return Err(Exception::InstructionAddressMisaligned(self.pc));
        }
        if let Some(hit) = triggers.check_address(self.pc, false, true) {
            self.handle_trigger_hit(hit.action, hit.index);
            return Ok(FetchOutcome::TriggerFired);
        }
        let low = self
            .memory
            .read_u16(self.pc, AccessKind::Instruction)
            .map_err(|e| map_fetch_error(e, self.pc))?;
        if low & 0b11 != 0b11 {
            if let Some(hit) = triggers.check_opcode(low as u32) {
                self.handle_trigger_hit(hit.action, hit.index);
                return Ok(FetchOutcome::TriggerFired);
            }
            return Ok(FetchOutcome::Fetched { window: low as u32, size: 2 });
        }
        let high = self
            .memory
            .read_u16(self.pc + 2, AccessKind::Instruction)
            .map_err(|e| map_fetch_error(e, self.pc + 2))?;
        let word = (low as u32) | ((high as u32) << 16);
        if let Some(hit) = triggers.check_opcode(word) {
            self.handle_trigger_hit(hit.action, hit.index);
            return Ok(FetchOutcome::TriggerFired);
        }
        Ok(FetchOutcome::Fetched { window: word, size: 4 })
    }

    fn decode_and_execute(&mut self, window: u32, _size_hint: u8) -> Result<(), Exception> {
        let decoded = decode::decode(window).map_err(|e| self.map_decode_error(e, window))?;
        if decoded.size == 2 && !self.extensions.contains(Extensions::C) {
            return Err(Exception::IllegalInstruction(Some(window & 0xffff)));
        }
        trace!("executing {:?} at pc {:#x}", decoded.instruction, self.pc);
        let next_pc = self.pc.wrapping_add(decoded.size as u64);
        self.pc = next_pc;
        match execute::execute(self, decoded.instruction) {
            Ok(()) => Ok(()),
            Err(exception) => {
                // Undo speculative register writes this instruction may have already made before
                // faulting partway through (the abandon-and-undo path).
                self.int_regs.undo_last_write();
                self.fp_regs.undo_last_write();
                Err(exception)
            }
        }
    }

    fn map_decode_error(&self, error: DecodeError, window: u32) -> Exception {
        let _ = error;
        Exception::IllegalInstruction(Some(window))
    }

    pub fn raw_privilege(&self) -> RawPrivilegeLevel {
        self.privilege.into()
    }
}

fn map_fetch_error(error: MemoryError, address: u64) -> Exception {
    match error {
        MemoryError::Misaligned => Exception::InstructionAddressMisaligned(address),
        MemoryError::AccessFault | MemoryError::BusError => Exception::InstructionAccessFault(address),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TestMemory;
    use crate::trigger::NoTriggers;

    fn hart_with(bytes: Vec<u8>) -> Hart<TestMemory> {
        let config = HartConfig { xlen: Xlen::Rv64, ..HartConfig::default() };
        Hart::new(config, TestMemory::from_bytes(bytes))
    }

    #[test]
    fn steps_over_addi_and_increments_instret() {
        // addi x1, x0, 5
        let raw: u32 = (5 << 20) | (0 << 15) | (1 << 7) | 0b0010011;
        let mut hart = hart_with(raw.to_le_bytes().to_vec());
        let outcome = hart.step(&NoTriggers);
        assert_eq!(StepOutcome::Continue, outcome);
        assert_eq!(5, hart.int_regs.read(crate::registers::Specifier::from_u5(1)));
        assert_eq!(1, hart.instret.get());
        assert_eq!(4, hart.pc);
    }

    #[test]
    fn illegal_instruction_traps_to_machine_mode() {
        let mut hart = hart_with(vec![0x7f, 0, 0, 0]); // reserved opcode
        hart.step(&NoTriggers);
        assert_eq!(PrivilegeLevel::Machine, hart.privilege);
        assert_eq!(crate::trap::Exception::ILLEGAL_INSTRUCTION, hart.csrs.read_raw(numbers::MCAUSE));
    }

    #[test]
    fn watchdog_stops_after_64_consecutive_illegal_instructions() {
        let mut hart = hart_with(vec![0x7f, 0, 0, 0]);
        hart.csrs.write_raw(numbers::MTVEC, 0); // stays at pc 0 forever, refetches same bytes
        let mut outcome = StepOutcome::Continue;
        for _ in 0..64 {
            outcome = hart.step(&NoTriggers);
        }
        assert_eq!(StepOutcome::Stop { success: false }, outcome);
    }

    /// Fires `Break` on every `check_opcode` call, never on `check_address`/`check_icount` — enough
    /// to drive the abandon-and-undo path through `Hart::step` without a real trigger-match engine.
    struct BreakOnOpcode;

    impl crate::trigger::TriggerUnit for BreakOnOpcode {
        fn check_address(&self, _address: u64, _is_write: bool, _is_fetch: bool) -> Option<crate::trigger::TriggerHit> {
            None
        }

        fn check_opcode(&self, _raw_instruction: u32) -> Option<crate::trigger::TriggerHit> {
            Some(crate::trigger::TriggerHit { index: 0, action: TriggerAction::Break })
        }

        fn check_icount(&self) -> Option<crate::trigger::TriggerHit> {
            None
        }
    }

    #[test]
    fn opcode_trigger_hit_abandons_execution_instead_of_running_it() {
        // addi x1, x0, 5 — if this ever actually executed, x1 would become 5.
        let raw: u32 = (5 << 20) | (0 << 15) | (1 << 7) | 0b0010011;
        let mut hart = hart_with(raw.to_le_bytes().to_vec());
        hart.csrs.write_raw(numbers::MTVEC, 0x1000);

        let outcome = hart.step(&BreakOnOpcode);

        assert_eq!(StepOutcome::Continue, outcome);
        assert_eq!(0, hart.int_regs.read(crate::registers::Specifier::from_u5(1)));
        assert_eq!(0x1000, hart.pc);
        assert_eq!(PrivilegeLevel::Machine, hart.privilege);
        assert_eq!(crate::trap::Exception::BREAKPOINT, hart.csrs.read_raw(numbers::MCAUSE));
    }

    /// Fires `Halt` on `check_icount`, after the instruction it's counting has already retired.
    struct HaltOnIcount;

    impl crate::trigger::TriggerUnit for HaltOnIcount {
        fn check_address(&self, _address: u64, _is_write: bool, _is_fetch: bool) -> Option<crate::trigger::TriggerHit> {
            None
        }

        fn check_opcode(&self, _raw_instruction: u32) -> Option<crate::trigger::TriggerHit> {
            None
        }

        fn check_icount(&self) -> Option<crate::trigger::TriggerHit> {
            Some(crate::trigger::TriggerHit { index: 1, action: TriggerAction::Halt })
        }
    }

    #[test]
    fn icount_trigger_fires_after_the_instruction_retires() {
        let raw: u32 = (5 << 20) | (0 << 15) | (1 << 7) | 0b0010011;
        let mut hart = hart_with(raw.to_le_bytes().to_vec());

        hart.step(&HaltOnIcount);

        assert_eq!(5, hart.int_regs.read(crate::registers::Specifier::from_u5(1)));
        assert_eq!(1, hart.instret.get());
        assert!(hart.debug_mode);
    }
}
