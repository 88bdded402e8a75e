//! Text trace record emission.
//!
//! Every retired (or trapped) instruction can touch several architectural resources — an integer
//! register, a CSR, a memory word — and each touched resource gets its own line, one line per
//! resource rather than one line per instruction, so a trace can be diffed resource-by-resource
//! against a reference model.

use crate::csr::CsrFile;
use crate::memory::Memory;
use crate::registers::{FpRegisterFile, IntRegisterFile};
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

/// Which architectural resource a [`TraceRecord`] reports a change to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// An `x` register, by index.
    Reg(u8),
    /// An `f` register, by index.
    Fp(u8),
    /// A CSR, by its number.
    Csr(u16),
    /// A memory write, at [`TraceRecord::addr`].
    Mem,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Resource::Reg(i) => write!(f, "x{i}"),
            Resource::Fp(i) => write!(f, "f{i}"),
            Resource::Csr(n) => write!(f, "c{n:#05x}"),
            Resource::Mem => write!(f, "mem"),
        }
    }
}

/// One architectural state change to report for a single retired instruction.
#[derive(Debug, Clone, Copy)]
pub struct TraceRecord {
    pub tag: u64,
    pub hart_id: u64,
    pub pc: u64,
    pub raw_instruction: u32,
    pub resource: Resource,
    pub addr: u64,
    pub value: u64,
}

impl TraceRecord {
    /// Render the record as `#<tag> <hartId> <pc:hex> <inst_hex> <resource> <addr:hex> <value:hex>  <disassembly>`.
    pub fn format_line(&self, disassembly: &dyn fmt::Display) -> String {
        format!(
            "#{} {} {:08x} {:08x} {} {:08x} {:016x}  {}",
            self.tag,
            self.hart_id,
            self.pc,
            self.raw_instruction,
            self.resource,
            self.addr,
            self.value,
            disassembly
        )
    }
}

/// A destination for formatted trace lines, sharable across harts.
pub trait TraceSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// A [`TraceSink`] over any [`std::io::Write`], serialized with a `Mutex` so multiple harts can
/// funnel their trace onto one file or stream without interleaving partial lines.
pub struct MutexTraceSink<W: Write + Send> {
    inner: Mutex<W>,
}

impl<W: Write + Send> MutexTraceSink<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: Mutex::new(writer) }
    }
}

impl<W: Write + Send> TraceSink for MutexTraceSink<W> {
    fn write_line(&self, line: &str) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(guard, "{line}");
    }
}

/// Collect one [`TraceRecord`] per resource touched since the last time the register/CSR files'
/// trace-data sets were cleared. Must run before [`crate::hart::Hart::step`]'s own
/// `clear_last_written` calls, so a `RunLoop` (or any embedder stepping a hart directly) needs to
/// call this between `execute` and that reset rather than after `step` has already returned.
pub fn collect_records<M: Memory>(
    tag: u64,
    hart_id: u64,
    pc: u64,
    raw_instruction: u32,
    int_regs: &IntRegisterFile,
    fp_regs: &FpRegisterFile,
    csrs: &CsrFile,
    memory: &M,
) -> Vec<TraceRecord> {
    let mut records = Vec::new();
    if let Some((specifier, _old)) = int_regs.last_written() {
        records.push(TraceRecord {
            tag,
            hart_id,
            pc,
            raw_instruction,
            resource: Resource::Reg(specifier.into()),
            addr: 0,
            value: int_regs.read(specifier),
        });
    }
    if let Some((specifier, _old)) = fp_regs.last_written() {
        records.push(TraceRecord {
            tag,
            hart_id,
            pc,
            raw_instruction,
            resource: Resource::Fp(specifier.into()),
            addr: 0,
            value: fp_regs.read_bits(specifier),
        });
    }
    let (csr_regs, _triggers) = csrs.last_written_regs();
    for number in csr_regs {
        records.push(TraceRecord {
            tag,
            hart_id,
            pc,
            raw_instruction,
            resource: Resource::Csr(number),
            addr: 0,
            value: csrs.read_raw(number),
        });
    }
    if let Some((addr, _old, new)) = memory.last_write() {
        records.push(TraceRecord { tag, hart_id, pc, raw_instruction, resource: Resource::Mem, addr, value: new });
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TestMemory;
    use crate::registers::Specifier;

    #[test]
    fn format_line_matches_the_documented_layout() {
        let record = TraceRecord {
            tag: 7,
            hart_id: 0,
            pc: 0x1000,
            raw_instruction: 0x0000_0013,
            resource: Resource::Reg(5),
            addr: 0,
            value: 42,
        };
        let line = record.format_line(&"addi x5, x0, 42");
        assert_eq!(
            "#7 0 00001000 00000013 x5 00000000 000000000000002a  addi x5, x0, 42",
            line
        );
    }

    #[test]
    fn collect_records_reports_every_touched_resource() {
        let mut int_regs = IntRegisterFile::new();
        let fp_regs = FpRegisterFile::new();
        let csrs = crate::csr::CsrFile::new(
            crate::Xlen::Rv64,
            0,
            0,
            std::rc::Rc::new(std::cell::Cell::new(0)),
            std::rc::Rc::new(std::cell::Cell::new(0)),
            0,
        );
        let memory = TestMemory::new(16);

        int_regs.write(Specifier::from_u5(5), 42);
        let records = collect_records(1, 0, 0x1000, 0x13, &int_regs, &fp_regs, &csrs, &memory);
        assert_eq!(1, records.len());
        assert_eq!(Resource::Reg(5), records[0].resource);
        assert_eq!(42, records[0].value);
    }

    #[test]
    fn mutex_sink_writes_newline_terminated_lines() {
        let buf: Vec<u8> = Vec::new();
        let sink = MutexTraceSink::new(buf);
        sink.write_line("hello");
        sink.write_line("world");
        let guard = sink.inner.lock().unwrap();
        assert_eq!("hello\nworld\n", String::from_utf8_lossy(&guard));
    }
}
