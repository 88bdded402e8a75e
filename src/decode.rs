//! Fetch-to-decode: turns a raw 16- or 32-bit instruction word into an [`Instruction`].
//!
//! Decoding is pure and stateless — it never touches hart state — so it can be (and is) reused for
//! speculative disassembly of queued stores as well as the main fetch/decode/execute pipeline.
//! Compressed (`C`) instructions are expanded into their equivalent base-ISA [`Instruction`]
//! variant at decode time rather than carried as a separate representation, mirroring how the
//! privileged spec itself describes `C` as "instructions as an orthogonal compression space".
//!
//! > The base RISC-V ISA has fixed-length 32-bit instructions that must be naturally aligned on
//! > 32-bit boundaries.

use crate::csr::CsrSpecifier;
use crate::registers::Specifier;
use thiserror::Error;

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("unsupported or reserved opcode")]
    UnsupportedOpcode,
}

/// A decoded instruction plus the number of bytes it occupies in the instruction stream (`2` for a
/// compressed encoding, `4` otherwise), which the caller needs to advance `pc` correctly.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Decoded {
    pub instruction: Instruction,
    pub size: u8,
}

/// Decode one instruction starting at the low 16 bits of `window`; `window`'s high 16 bits are
/// consulted only if the low bits indicate a 32-bit (non-compressed) encoding.
pub fn decode(window: u32) -> Result<Decoded, DecodeError> {
    if window & 0b11 != 0b11 {
        decode_compressed(window as u16).map(|instruction| Decoded { instruction, size: 2 })
    } else {
        decode_32(window).map(|instruction| Decoded { instruction, size: 4 })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm { op: RegImmOp, dest: Specifier, src: Specifier, immediate: i64 },
    OpImm32 { op: RegImmOp, dest: Specifier, src: Specifier, immediate: i64 },
    OpShiftImm { op: ShiftOp, dest: Specifier, src: Specifier, shift_amount: u32 },
    OpShiftImm32 { op: ShiftOp, dest: Specifier, src: Specifier, shift_amount: u32 },
    Auipc { dest: Specifier, immediate: i64 },
    Lui { dest: Specifier, immediate: i64 },
    Op { op: RegRegOp, dest: Specifier, src1: Specifier, src2: Specifier },
    Op32 { op: RegRegOp, dest: Specifier, src1: Specifier, src2: Specifier },
    OpUnary { op: UnaryOp, dest: Specifier, src: Specifier },
    Jal { dest: Specifier, offset: i64 },
    Jalr { dest: Specifier, base: Specifier, offset: i64 },
    Branch { condition: BranchCondition, src1: Specifier, src2: Specifier, offset: i64 },
    Load { width: Width, signed: bool, dest: Specifier, base: Specifier, offset: i64 },
    Store { width: Width, src: Specifier, base: Specifier, offset: i64 },
    Fence,
    FenceI,
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Wfi,
    Csr { op: CsrOp, dest: Specifier, csr: CsrSpecifier, src: Specifier },
    Csri { op: CsrOp, dest: Specifier, csr: CsrSpecifier, immediate: u32 },
    Amo { op: AmoOp, width: Width, aq: bool, rl: bool, addr: Specifier, src: Specifier, dest: Specifier },

    FLoad { width: FpWidth, dest: Specifier, base: Specifier, offset: i64 },
    FStore { width: FpWidth, src: Specifier, base: Specifier, offset: i64 },
    FOp { op: FpOp, width: FpWidth, dest: Specifier, src1: Specifier, src2: Specifier, rm: u8 },
    FFma { op: FpFmaOp, width: FpWidth, dest: Specifier, src1: Specifier, src2: Specifier, src3: Specifier, rm: u8 },
    FUnary { op: FpUnaryOp, width: FpWidth, dest: Specifier, src: Specifier, rm: u8 },
    FCompare { op: FpCompareOp, width: FpWidth, dest: Specifier, src1: Specifier, src2: Specifier },
    FClass { width: FpWidth, dest: Specifier, src: Specifier },
    FCvtToInt { width: FpWidth, to64: bool, unsigned: bool, dest: Specifier, src: Specifier, rm: u8 },
    FCvtFromInt { width: FpWidth, from64: bool, unsigned: bool, dest: Specifier, src: Specifier, rm: u8 },
    FCvtFormat { to_double: bool, dest: Specifier, src: Specifier, rm: u8 },
    FMvToInt { width: FpWidth, dest: Specifier, src: Specifier },
    FMvFromInt { width: FpWidth, dest: Specifier, src: Specifier },
}

/// The coarse classification statistics and performance-counter gating key off of
/// Each [`Instruction`] variant maps to exactly one category.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Category {
    Load,
    Store,
    Branch,
    Jump,
    Multiply,
    Divide,
    Atomic,
    Csr,
    Fp,
    Integer,
    System,
}

impl Instruction {
    pub fn category(&self) -> Category {
        use Instruction::*;
        match self {
            Load { .. } | FLoad { .. } => Category::Load,
            Store { .. } | FStore { .. } => Category::Store,
            Branch { .. } => Category::Branch,
            Jal { .. } | Jalr { .. } => Category::Jump,
            Op { op, .. } | Op32 { op, .. } => match op {
                RegRegOp::Mul | RegRegOp::Mulh | RegRegOp::Mulhsu | RegRegOp::Mulhu => Category::Multiply,
                RegRegOp::Div | RegRegOp::Divu | RegRegOp::Rem | RegRegOp::Remu => Category::Divide,
                _ => Category::Integer,
            },
            Amo { .. } => Category::Atomic,
            Csr { .. } | Csri { .. } => Category::Csr,
            FOp { .. }
            | FFma { .. }
            | FUnary { .. }
            | FCompare { .. }
            | FClass { .. }
            | FCvtToInt { .. }
            | FCvtFromInt { .. }
            | FCvtFormat { .. }
            | FMvToInt { .. }
            | FMvFromInt { .. } => Category::Fp,
            Fence | FenceI | Ecall | Ebreak | Sret | Mret | Wfi => Category::System,
            OpImm { .. } | OpImm32 { .. } | OpShiftImm { .. } | OpShiftImm32 { .. } | Auipc { .. } | Lui { .. }
            | OpUnary { .. } => Category::Integer,
        }
    }
}

impl std::fmt::Display for Instruction {
    /// A short assembly-like mnemonic, good enough to populate a trace record's disassembly
    /// column. Not a full disassembler: operands are rendered positionally, without symbol lookup.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Instruction::*;
        match self {
            OpImm { op, dest, src, immediate } => write!(f, "{op:?} x{dest}, x{src}, {immediate}"),
            OpImm32 { op, dest, src, immediate } => write!(f, "{op:?}w x{dest}, x{src}, {immediate}"),
            OpShiftImm { op, dest, src, shift_amount } => write!(f, "{op:?}i x{dest}, x{src}, {shift_amount}"),
            OpShiftImm32 { op, dest, src, shift_amount } => write!(f, "{op:?}iw x{dest}, x{src}, {shift_amount}"),
            Auipc { dest, immediate } => write!(f, "auipc x{dest}, {immediate:#x}"),
            Lui { dest, immediate } => write!(f, "lui x{dest}, {immediate:#x}"),
            Op { op, dest, src1, src2 } => write!(f, "{op:?} x{dest}, x{src1}, x{src2}"),
            Op32 { op, dest, src1, src2 } => write!(f, "{op:?}w x{dest}, x{src1}, x{src2}"),
            OpUnary { op, dest, src } => write!(f, "{op:?} x{dest}, x{src}"),
            Jal { dest, offset } => write!(f, "jal x{dest}, {offset}"),
            Jalr { dest, base, offset } => write!(f, "jalr x{dest}, {offset}(x{base})"),
            Branch { condition, src1, src2, offset } => write!(f, "{condition:?} x{src1}, x{src2}, {offset}"),
            Load { width, signed, dest, base, offset } => {
                write!(f, "l{width:?}{} x{dest}, {offset}(x{base})", if *signed { "" } else { "u" })
            }
            Store { width, src, base, offset } => write!(f, "s{width:?} x{src}, {offset}(x{base})"),
            Fence => write!(f, "fence"),
            FenceI => write!(f, "fence.i"),
            Ecall => write!(f, "ecall"),
            Ebreak => write!(f, "ebreak"),
            Sret => write!(f, "sret"),
            Mret => write!(f, "mret"),
            Wfi => write!(f, "wfi"),
            Csr { op, dest, csr, src } => write!(f, "{op:?} x{dest}, {csr:#x}, x{src}"),
            Csri { op, dest, csr, immediate } => write!(f, "{op:?}i x{dest}, {csr:#x}, {immediate}"),
            Amo { op, width, addr, src, dest, .. } => write!(f, "amo{op:?}.{width:?} x{dest}, x{src}, (x{addr})"),
            FLoad { width, dest, base, offset } => write!(f, "fl{width:?} f{dest}, {offset}(x{base})"),
            FStore { width, src, base, offset } => write!(f, "fs{width:?} f{src}, {offset}(x{base})"),
            FOp { op, width, dest, src1, src2, .. } => write!(f, "f{op:?}.{width:?} f{dest}, f{src1}, f{src2}"),
            FFma { op, width, dest, src1, src2, src3, .. } => {
                write!(f, "f{op:?}.{width:?} f{dest}, f{src1}, f{src2}, f{src3}")
            }
            FUnary { op, width, dest, src, .. } => write!(f, "f{op:?}.{width:?} f{dest}, f{src}"),
            FCompare { op, width, dest, src1, src2 } => write!(f, "f{op:?}.{width:?} x{dest}, f{src1}, f{src2}"),
            FClass { width, dest, src } => write!(f, "fclass.{width:?} x{dest}, f{src}"),
            FCvtToInt { width, to64, unsigned, dest, src, .. } => {
                write!(f, "fcvt.{}{}.{width:?} x{dest}, f{src}", if *to64 { "l" } else { "w" }, if *unsigned { "u" } else { "" })
            }
            FCvtFromInt { width, from64, unsigned, dest, src, .. } => {
                write!(f, "fcvt.{width:?}.{}{} f{dest}, x{src}", if *from64 { "l" } else { "w" }, if *unsigned { "u" } else { "" })
            }
            FCvtFormat { to_double, dest, src, .. } => {
                write!(f, "fcvt.{}.{} f{dest}, f{src}", if *to_double { "d" } else { "s" }, if *to_double { "s" } else { "d" })
            }
            FMvToInt { width, dest, src } => write!(f, "fmv.x.{width:?} x{dest}, f{src}"),
            FMvFromInt { width, dest, src } => write!(f, "fmv.{width:?}.x f{dest}, x{src}"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp { Addi, Slti, Sltiu, Xori, Ori, Andi }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShiftOp { Sll, Srl, Sra }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add, Slt, Sltu, And, Or, Xor, Sll, Srl, Sub, Sra,
    Mul, Mulh, Mulhsu, Mulhu, Div, Divu, Rem, Remu,
    // Zbb-lite: minor bit-manipulation subset.
    Andn, Orn, Xnor, Min, Minu, Max, Maxu, Rol, Ror,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UnaryOp { SextB, SextH, ZextH, Clz, Ctz, Cpop, OrcB, Rev8, Rori }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition { Beq, Bne, Blt, Bltu, Bge, Bgeu }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Width { Byte, Half, Word, Double }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpWidth { Single, Double }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp { ReadWrite, ReadSet, ReadClear }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoOp { Lr, Sc, Swap, Add, Xor, And, Or, Min, Max, Minu, Maxu }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpOp { Add, Sub, Mul, Div, Min, Max, SgnJ, SgnJn, SgnJx }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpFmaOp { Madd, Msub, Nmsub, Nmadd }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpUnaryOp { Sqrt }

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpCompareOp { Eq, Lt, Le }

fn opcode(raw: u32) -> u32 {
    raw & 0x7f
}
fn rd(raw: u32) -> Specifier {
    Specifier::from_u5(((raw >> 7) & 0x1f) as u8)
}
fn rs1(raw: u32) -> Specifier {
    Specifier::from_u5(((raw >> 15) & 0x1f) as u8)
}
fn rs2(raw: u32) -> Specifier {
    Specifier::from_u5(((raw >> 20) & 0x1f) as u8)
}
fn rs3(raw: u32) -> Specifier {
    Specifier::from_u5(((raw >> 27) & 0x1f) as u8)
}
fn funct3(raw: u32) -> u32 {
    (raw >> 12) & 0x7
}
fn funct7(raw: u32) -> u32 {
    raw >> 25
}
fn funct5(raw: u32) -> u32 {
    raw >> 27
}
fn rm(raw: u32) -> u8 {
    funct3(raw) as u8
}
fn shamt32(raw: u32) -> u32 {
    (raw >> 20) & 0x1f
}
fn shamt64(raw: u32) -> u32 {
    (raw >> 20) & 0x3f
}
fn i_imm(raw: u32) -> i64 {
    (raw as i32 >> 20) as i64
}
fn s_imm(raw: u32) -> i64 {
    let hi = raw & 0xfe00_0000;
    let lo = raw & 0x0000_0f80;
    ((hi | (lo << 13)) as i32 >> 20) as i64
}
fn b_imm(raw: u32) -> i64 {
    let b12 = raw & 0x8000_0000;
    let b10_5 = raw & 0x7e00_0000;
    let b4_1 = raw & 0x0000_0f00;
    let b11 = raw & 0x0000_0080;
    ((b12 | (b11 << 23) | (b10_5 >> 1) | (b4_1 << 12)) as i32 >> 19) as i64
}
fn u_imm(raw: u32) -> i64 {
    (raw & 0xffff_f000) as i32 as i64
}
fn j_imm(raw: u32) -> i64 {
    let b20 = raw & 0x8000_0000;
    let b10_1 = raw & 0x7fe0_0000;
    let b11 = raw & 0x0010_0000;
    let b19_12 = raw & 0x000f_f000;
    ((b20 | (b19_12 << 11) | (b11 << 2) | (b10_1 >> 9)) as i32 >> 11) as i64
}
fn csr_num(raw: u32) -> CsrSpecifier {
    (raw >> 20) as CsrSpecifier
}

pub fn decode_32(raw: u32) -> Result<Instruction, DecodeError> {
    use Instruction::*;
    let err = || DecodeError::UnsupportedOpcode;
    match opcode(raw) {
        0b0000011 => {
            let (width, signed) = match funct3(raw) {
                0b000 => (Width::Byte, true),
                0b001 => (Width::Half, true),
                0b010 => (Width::Word, true),
                0b011 => (Width::Double, true),
                0b100 => (Width::Byte, false),
                0b101 => (Width::Half, false),
                0b110 => (Width::Word, false),
                _ => return Err(err()),
            };
            Ok(Load { width, signed, dest: rd(raw), base: rs1(raw), offset: i_imm(raw) })
        }
        0b0000111 => {
            let width = match funct3(raw) {
                0b010 => FpWidth::Single,
                0b011 => FpWidth::Double,
                _ => return Err(err()),
            };
            Ok(FLoad { width, dest: rd(raw), base: rs1(raw), offset: i_imm(raw) })
        }
        0b0001111 => match funct3(raw) {
            0b000 => Ok(Fence),
            0b001 => Ok(FenceI),
            _ => Err(err()),
        },
        0b0010011 => {
            let op = match funct3(raw) {
                0b000 => return Ok(OpImm { op: RegImmOp::Addi, dest: rd(raw), src: rs1(raw), immediate: i_imm(raw) }),
                0b010 => RegImmOp::Slti,
                0b011 => RegImmOp::Sltiu,
                0b100 => RegImmOp::Xori,
                0b110 => RegImmOp::Ori,
                0b111 => RegImmOp::Andi,
                0b001 => {
                    return Ok(OpShiftImm { op: ShiftOp::Sll, dest: rd(raw), src: rs1(raw), shift_amount: shamt64(raw) })
                }
                0b101 => {
                    let op = if funct7(raw) & 0b0100000 != 0 { ShiftOp::Sra } else { ShiftOp::Srl };
                    return Ok(OpShiftImm { op, dest: rd(raw), src: rs1(raw), shift_amount: shamt64(raw) });
                }
                _ => return Err(err()),
            };
            Ok(OpImm { op, dest: rd(raw), src: rs1(raw), immediate: i_imm(raw) })
        }
        0b0011011 => match funct3(raw) {
            0b000 => Ok(OpImm32 { op: RegImmOp::Addi, dest: rd(raw), src: rs1(raw), immediate: i_imm(raw) }),
            0b001 => Ok(OpShiftImm32 { op: ShiftOp::Sll, dest: rd(raw), src: rs1(raw), shift_amount: shamt32(raw) }),
            0b101 => {
                let op = if funct7(raw) & 0b0100000 != 0 { ShiftOp::Sra } else { ShiftOp::Srl };
                Ok(OpShiftImm32 { op, dest: rd(raw), src: rs1(raw), shift_amount: shamt32(raw) })
            }
            _ => Err(err()),
        },
        0b0010111 => Ok(Auipc { dest: rd(raw), immediate: u_imm(raw) }),
        0b0100011 => {
            let width = match funct3(raw) {
                0b000 => Width::Byte,
                0b001 => Width::Half,
                0b010 => Width::Word,
                0b011 => Width::Double,
                _ => return Err(err()),
            };
            Ok(Store { width, src: rs2(raw), base: rs1(raw), offset: s_imm(raw) })
        }
        0b0100111 => {
            let width = match funct3(raw) {
                0b010 => FpWidth::Single,
                0b011 => FpWidth::Double,
                _ => return Err(err()),
            };
            Ok(FStore { width, src: rs2(raw), base: rs1(raw), offset: s_imm(raw) })
        }
        0b0101111 => decode_amo(raw),
        0b0110011 => decode_op(raw, false),
        0b0111011 => decode_op(raw, true),
        0b0110111 => Ok(Lui { dest: rd(raw), immediate: u_imm(raw) }),
        0b1000011 => decode_fma(raw, FpFmaOp::Madd),
        0b1000111 => decode_fma(raw, FpFmaOp::Msub),
        0b1001011 => decode_fma(raw, FpFmaOp::Nmsub),
        0b1001111 => decode_fma(raw, FpFmaOp::Nmadd),
        0b1010011 => decode_fp(raw),
        0b1100011 => {
            let condition = match funct3(raw) {
                0b000 => BranchCondition::Beq,
                0b001 => BranchCondition::Bne,
                0b100 => BranchCondition::Blt,
                0b101 => BranchCondition::Bge,
                0b110 => BranchCondition::Bltu,
                0b111 => BranchCondition::Bgeu,
                _ => return Err(err()),
            };
            Ok(Branch { condition, src1: rs1(raw), src2: rs2(raw), offset: b_imm(raw) })
        }
        0b1100111 if funct3(raw) == 0 => Ok(Jalr { dest: rd(raw), base: rs1(raw), offset: i_imm(raw) }),
        0b1101111 => Ok(Jal { dest: rd(raw), offset: j_imm(raw) }),
        0b1110011 => decode_system(raw),
        _ => Err(err()),
    }
}

fn decode_op(raw: u32, is_32: bool) -> Result<Instruction, DecodeError> {
    use Instruction::*;
    let op = match (funct7(raw), funct3(raw)) {
        (0b0000000, 0b000) => RegRegOp::Add,
        (0b0100000, 0b000) => RegRegOp::Sub,
        (0b0000000, 0b001) => RegRegOp::Sll,
        (0b0000000, 0b010) if !is_32 => RegRegOp::Slt,
        (0b0000000, 0b011) if !is_32 => RegRegOp::Sltu,
        (0b0000000, 0b100) if !is_32 => RegRegOp::Xor,
        (0b0000000, 0b101) => RegRegOp::Srl,
        (0b0100000, 0b101) => RegRegOp::Sra,
        (0b0000000, 0b110) if !is_32 => RegRegOp::Or,
        (0b0000000, 0b111) if !is_32 => RegRegOp::And,
        (0b0000001, 0b000) => RegRegOp::Mul,
        (0b0000001, 0b001) if !is_32 => RegRegOp::Mulh,
        (0b0000001, 0b010) if !is_32 => RegRegOp::Mulhsu,
        (0b0000001, 0b011) if !is_32 => RegRegOp::Mulhu,
        (0b0000001, 0b100) => RegRegOp::Div,
        (0b0000001, 0b101) => RegRegOp::Divu,
        (0b0000001, 0b110) => RegRegOp::Rem,
        (0b0000001, 0b111) => RegRegOp::Remu,
        (0b0100000, 0b111) if !is_32 => RegRegOp::Andn,
        (0b0100000, 0b110) if !is_32 => RegRegOp::Orn,
        (0b0100000, 0b100) if !is_32 => RegRegOp::Xnor,
        (0b0000101, 0b100) if !is_32 => RegRegOp::Min,
        (0b0000101, 0b101) if !is_32 => RegRegOp::Minu,
        (0b0000101, 0b110) if !is_32 => RegRegOp::Max,
        (0b0000101, 0b111) if !is_32 => RegRegOp::Maxu,
        (0b0110000, 0b001) => RegRegOp::Rol,
        (0b0110000, 0b101) => RegRegOp::Ror,
        (0b0110000, 0b000) if !is_32 => {
            // funct7=0110000,funct3=000,rs2 selects the Zbb-lite unary ops sharing this row.
            // This core groups all Zbb-lite unary encodings under the OP major opcode rather than
            // splitting CLZ/CTZ/CPOP/SEXT.*/OP-IMM-encoded ORC.B/REV8 across OP and OP-IMM the way
            // the real Zbb extension does, to keep the decode surface for this experimental subset
            // small (see DESIGN.md).
            return decode_unary(raw);
        }
        (0b0010100, 0b101) if !is_32 => return decode_unary(raw),
        _ => return Err(DecodeError::UnsupportedOpcode),
    };
    if is_32 {
        Ok(Instruction::Op32 { op, dest: rd(raw), src1: rs1(raw), src2: rs2(raw) })
    } else {
        Ok(Instruction::Op { op, dest: rd(raw), src1: rs1(raw), src2: rs2(raw) })
    }
}

fn decode_unary(raw: u32) -> Result<Instruction, DecodeError> {
    use Instruction::*;
    let op = match (funct7(raw), u8::from(rs2(raw))) {
        (0b0110000, 0) => UnaryOp::Clz,
        (0b0110000, 1) => UnaryOp::Ctz,
        (0b0110000, 2) => UnaryOp::Cpop,
        (0b0110000, 4) => UnaryOp::SextB,
        (0b0110000, 5) => UnaryOp::SextH,
        (0b0000100, 0) => UnaryOp::ZextH,
        (0b0010100, 0b11101) => UnaryOp::OrcB,
        (0b0110101, 0b11000) => UnaryOp::Rev8,
        _ => return Err(DecodeError::UnsupportedOpcode),
    };
    Ok(OpUnary { op, dest: rd(raw), src: rs1(raw) })
}

fn decode_amo(raw: u32) -> Result<Instruction, DecodeError> {
    use Instruction::*;
    let width = match funct3(raw) {
        0b010 => Width::Word,
        0b011 => Width::Double,
        _ => return Err(DecodeError::UnsupportedOpcode),
    };
    let op = match funct5(raw) {
        0b00010 => AmoOp::Lr,
        0b00011 => AmoOp::Sc,
        0b00001 => AmoOp::Swap,
        0b00000 => AmoOp::Add,
        0b00100 => AmoOp::Xor,
        0b01100 => AmoOp::And,
        0b01000 => AmoOp::Or,
        0b10000 => AmoOp::Min,
        0b10100 => AmoOp::Max,
        0b11000 => AmoOp::Minu,
        0b11100 => AmoOp::Maxu,
        _ => return Err(DecodeError::UnsupportedOpcode),
    };
    let aq = (raw >> 26) & 1 == 1;
    let rl = (raw >> 25) & 1 == 1;
    Ok(Amo { op, width, aq, rl, addr: rs1(raw), src: rs2(raw), dest: rd(raw) })
}

fn decode_system(raw: u32) -> Result<Instruction, DecodeError> {
    use Instruction::*;
    match funct3(raw) {
        0b000 => match (funct7(raw), u8::from(rs2(raw))) {
            (0b0000000, 0) => Ok(Ecall),
            (0b0000000, 1) => Ok(Ebreak),
            (0b0001000, 2) => Ok(Sret),
            (0b0011000, 2) => Ok(Mret),
            (0b0001000, 5) => Ok(Wfi),
            // SFENCE.VMA: this core has no MMU to flush, so it decodes to a plain, trap-free FENCE.
            (0b0001001, _) => Ok(Fence),
            _ => Err(DecodeError::UnsupportedOpcode),
        },
        0b001 => Ok(Csr { op: CsrOp::ReadWrite, dest: rd(raw), csr: csr_num(raw), src: rs1(raw) }),
        0b010 => Ok(Csr { op: CsrOp::ReadSet, dest: rd(raw), csr: csr_num(raw), src: rs1(raw) }),
        0b011 => Ok(Csr { op: CsrOp::ReadClear, dest: rd(raw), csr: csr_num(raw), src: rs1(raw) }),
        0b101 => Ok(Csri { op: CsrOp::ReadWrite, dest: rd(raw), csr: csr_num(raw), immediate: u32::from(rs1(raw)) }),
        0b110 => Ok(Csri { op: CsrOp::ReadSet, dest: rd(raw), csr: csr_num(raw), immediate: u32::from(rs1(raw)) }),
        0b111 => Ok(Csri { op: CsrOp::ReadClear, dest: rd(raw), csr: csr_num(raw), immediate: u32::from(rs1(raw)) }),
        _ => Err(DecodeError::UnsupportedOpcode),
    }
}

fn fp_width(fmt: u32) -> Result<FpWidth, DecodeError> {
    match fmt {
        0b00 => Ok(FpWidth::Single),
        0b01 => Ok(FpWidth::Double),
        _ => Err(DecodeError::UnsupportedOpcode),
    }
}

fn decode_fma(raw: u32, op: FpFmaOp) -> Result<Instruction, DecodeError> {
    let width = fp_width((raw >> 25) & 0b11)?;
    Ok(Instruction::FFma {
        op,
        width,
        dest: rd(raw),
        src1: rs1(raw),
        src2: rs2(raw),
        src3: rs3(raw),
        rm: rm(raw),
    })
}

fn decode_fp(raw: u32) -> Result<Instruction, DecodeError> {
    use Instruction::*;
    let fmt = (raw >> 25) & 0b11;
    let f5 = funct5(raw);
    match f5 {
        0b00000 | 0b00001 | 0b00101 | 0b00100 | 0b00010 | 0b00011 => {
            let width = fp_width(fmt)?;
            let op = match (f5, funct3(raw)) {
                (0b00000, _) => FpOp::Add,
                (0b00001, _) => FpOp::Sub,
                (0b00010, _) => FpOp::Mul,
                (0b00011, _) => FpOp::Div,
                (0b00100, 0b000) => FpOp::SgnJ,
                (0b00100, 0b001) => FpOp::SgnJn,
                (0b00100, 0b010) => FpOp::SgnJx,
                (0b00101, 0b000) => FpOp::Min,
                (0b00101, 0b001) => FpOp::Max,
                _ => return Err(DecodeError::UnsupportedOpcode),
            };
            Ok(FOp { op, width, dest: rd(raw), src1: rs1(raw), src2: rs2(raw), rm: rm(raw) })
        }
        0b01011 => {
            let width = fp_width(fmt)?;
            Ok(FUnary { op: FpUnaryOp::Sqrt, width, dest: rd(raw), src: rs1(raw), rm: rm(raw) })
        }
        0b10100 => {
            let width = fp_width(fmt)?;
            let op = match funct3(raw) {
                0b010 => FpCompareOp::Eq,
                0b001 => FpCompareOp::Lt,
                0b000 => FpCompareOp::Le,
                _ => return Err(DecodeError::UnsupportedOpcode),
            };
            Ok(FCompare { op, width, dest: rd(raw), src1: rs1(raw), src2: rs2(raw) })
        }
        0b11100 => {
            let width = fp_width(fmt)?;
            match funct3(raw) {
                0b001 => Ok(FClass { width, dest: rd(raw), src: rs1(raw) }),
                0b000 => Ok(FMvToInt { width, dest: rd(raw), src: rs1(raw) }),
                _ => Err(DecodeError::UnsupportedOpcode),
            }
        }
        0b11110 => {
            let width = fp_width(fmt)?;
            Ok(FMvFromInt { width, dest: rd(raw), src: rs1(raw) })
        }
        0b01000 => {
            let to_double = u8::from(rs2(raw)) == 0;
            Ok(FCvtFormat { to_double, dest: rd(raw), src: rs1(raw), rm: rm(raw) })
        }
        0b11000 => {
            let width = fp_width(fmt)?;
            let (to64, unsigned) = match u8::from(rs2(raw)) {
                0 => (false, false),
                1 => (false, true),
                2 => (true, false),
                3 => (true, true),
                _ => return Err(DecodeError::UnsupportedOpcode),
            };
            Ok(FCvtToInt { width, to64, unsigned, dest: rd(raw), src: rs1(raw), rm: rm(raw) })
        }
        0b11010 => {
            let width = fp_width(fmt)?;
            let (from64, unsigned) = match u8::from(rs2(raw)) {
                0 => (false, false),
                1 => (false, true),
                2 => (true, false),
                3 => (true, true),
                _ => return Err(DecodeError::UnsupportedOpcode),
            };
            Ok(FCvtFromInt { width, from64, unsigned, dest: rd(raw), src: rs1(raw), rm: rm(raw) })
        }
        _ => Err(DecodeError::UnsupportedOpcode),
    }
}

//
// Compressed (C) instruction expansion.
//
// This core implements the common RV32/RV64 `C` subset: it does not
// implement `C.FLW`/`C.FSW` (single-precision compressed loads/stores), since they only exist on
// RV32 with `F` and this core treats that combination as rare enough not to be worth the decode
// surface.

fn creg(bits: u16) -> Specifier {
    Specifier::from_u5(8 + (bits & 0b111) as u8)
}

fn decode_compressed(raw: u16) -> Result<Instruction, DecodeError> {
    use Instruction::*;
    let op = raw & 0b11;
    let funct3 = (raw >> 13) & 0b111;
    match (op, funct3) {
        (0b00, 0b000) if raw != 0 => {
            // C.ADDI4SPN
            let nzuimm = (((raw >> 7) & 0x30) | ((raw >> 1) & 0x3c0) | ((raw >> 4) & 0x4) | ((raw >> 2) & 0x8))
                as i64;
            if nzuimm == 0 {
                return Err(DecodeError::UnsupportedOpcode);
            }
            Ok(OpImm { op: RegImmOp::Addi, dest: creg(raw >> 2), src: Specifier::from_u5(2), immediate: nzuimm })
        }
        (0b00, 0b010) => {
            let imm = (((raw >> 7) & 0x38) | ((raw << 1) & 0x40) | ((raw >> 4) & 0x4)) as i64;
            Ok(Load { width: Width::Word, signed: true, dest: creg(raw >> 2), base: creg(raw >> 7), offset: imm })
        }
        (0b00, 0b011) => {
            let imm = (((raw >> 7) & 0x38) | ((raw << 1) & 0xc0)) as i64;
            Ok(Load { width: Width::Double, signed: true, dest: creg(raw >> 2), base: creg(raw >> 7), offset: imm })
        }
        (0b00, 0b110) => {
            let imm = (((raw >> 7) & 0x38) | ((raw << 1) & 0x40) | ((raw >> 4) & 0x4)) as i64;
            Ok(Store { width: Width::Word, src: creg(raw >> 2), base: creg(raw >> 7), offset: imm })
        }
        (0b00, 0b111) => {
            let imm = (((raw >> 7) & 0x38) | ((raw << 1) & 0xc0)) as i64;
            Ok(Store { width: Width::Double, src: creg(raw >> 2), base: creg(raw >> 7), offset: imm })
        }
        (0b01, 0b000) => {
            let imm = c_imm6(raw);
            Ok(OpImm { op: RegImmOp::Addi, dest: full_reg(raw, 7), src: full_reg(raw, 7), immediate: imm })
        }
        (0b01, 0b001) => {
            // C.ADDIW (RV64)
            let imm = c_imm6(raw);
            Ok(OpImm32 { op: RegImmOp::Addi, dest: full_reg(raw, 7), src: full_reg(raw, 7), immediate: imm })
        }
        (0b01, 0b010) => Ok(OpImm {
            op: RegImmOp::Addi,
            dest: full_reg(raw, 7),
            src: Specifier::ZERO,
            immediate: c_imm6(raw),
        }),
        (0b01, 0b011) if full_reg(raw, 7) == Specifier::from_u5(2) => {
            // C.ADDI16SP
            let bits = raw as i16;
            let imm = (((bits >> 12) & 1) << 9
                | ((bits >> 3) & 0b11) << 7
                | ((bits >> 5) & 1) << 6
                | ((bits >> 2) & 1) << 5
                | ((bits >> 6) & 1) << 4) as i64;
            let imm = sign_extend_10(imm);
            if imm == 0 {
                return Err(DecodeError::UnsupportedOpcode);
            }
            Ok(OpImm { op: RegImmOp::Addi, dest: Specifier::from_u5(2), src: Specifier::from_u5(2), immediate: imm })
        }
        (0b01, 0b011) => {
            let nzimm = (c_imm6(raw)) << 12;
            if nzimm == 0 {
                return Err(DecodeError::UnsupportedOpcode);
            }
            Ok(Lui { dest: full_reg(raw, 7), immediate: nzimm })
        }
        (0b01, 0b100) => decode_c_alu(raw),
        (0b01, 0b101) => Ok(Jal { dest: Specifier::ZERO, offset: c_j_imm(raw) }),
        (0b01, 0b110) => Ok(Branch {
            condition: BranchCondition::Beq,
            src1: creg(raw >> 7),
            src2: Specifier::ZERO,
            offset: c_b_imm(raw),
        }),
        (0b01, 0b111) => Ok(Branch {
            condition: BranchCondition::Bne,
            src1: creg(raw >> 7),
            src2: Specifier::ZERO,
            offset: c_b_imm(raw),
        }),
        (0b10, 0b000) => {
            let shamt = (((raw >> 7) & 0x20) | ((raw >> 2) & 0x1f)) as u32;
            Ok(OpShiftImm { op: ShiftOp::Sll, dest: full_reg(raw, 7), src: full_reg(raw, 7), shift_amount: shamt })
        }
        (0b10, 0b010) => {
            let imm = (((raw >> 7) & 0x20) | ((raw >> 2) & 0x1c) | ((raw << 4) & 0xc0)) as i64;
            Ok(Load { width: Width::Word, signed: true, dest: rd_full(raw), base: Specifier::from_u5(2), offset: imm })
        }
        (0b10, 0b011) => {
            let imm = (((raw >> 7) & 0x18) | ((raw >> 2) & 0x7) << 3 | ((raw << 4) & 0x1c0)) as i64;
            Ok(Load { width: Width::Double, signed: true, dest: rd_full(raw), base: Specifier::from_u5(2), offset: imm })
        }
        (0b10, 0b100) if (raw >> 12) & 1 == 0 && (raw >> 2) & 0x1f == 0 => {
            // C.JR
            Ok(Jalr { dest: Specifier::ZERO, base: rd_full(raw), offset: 0 })
        }
        (0b10, 0b100) if (raw >> 12) & 1 == 0 => {
            // C.MV
            Ok(Op { op: RegRegOp::Add, dest: rd_full(raw), src1: Specifier::ZERO, src2: c_rs2(raw) })
        }
        (0b10, 0b100) if (raw >> 2) & 0x1f == 0 && rd_full(raw) == Specifier::ZERO => Ok(Ebreak),
        (0b10, 0b100) if (raw >> 2) & 0x1f == 0 => {
            // C.JALR
            Ok(Jalr { dest: Specifier::from_u5(1), base: rd_full(raw), offset: 0 })
        }
        (0b10, 0b100) => {
            // C.ADD
            Ok(Op { op: RegRegOp::Add, dest: rd_full(raw), src1: rd_full(raw), src2: c_rs2(raw) })
        }
        (0b10, 0b110) => {
            let imm = (((raw >> 7) & 0x3c) | ((raw >> 1) & 0xc0)) as i64;
            Ok(Store { width: Width::Word, src: c_rs2(raw), base: Specifier::from_u5(2), offset: imm })
        }
        (0b10, 0b111) => {
            let imm = (((raw >> 7) & 0x38) | ((raw >> 1) & 0x1c0)) as i64;
            Ok(Store { width: Width::Double, src: c_rs2(raw), base: Specifier::from_u5(2), offset: imm })
        }
        _ => Err(DecodeError::UnsupportedOpcode),
    }
}

fn decode_c_alu(raw: u16) -> Result<Instruction, DecodeError> {
    use Instruction::*;
    let dest = creg(raw >> 7);
    let high2 = (raw >> 10) & 0b11;
    match high2 {
        0b00 => {
            let shamt = (((raw >> 7) & 0x20) | ((raw >> 2) & 0x1f)) as u32;
            Ok(OpShiftImm { op: ShiftOp::Srl, dest, src: dest, shift_amount: shamt })
        }
        0b01 => {
            let shamt = (((raw >> 7) & 0x20) | ((raw >> 2) & 0x1f)) as u32;
            Ok(OpShiftImm { op: ShiftOp::Sra, dest, src: dest, shift_amount: shamt })
        }
        0b10 => Ok(OpImm { op: RegImmOp::Andi, dest, src: dest, immediate: c_imm6(raw) }),
        0b11 => {
            let src2 = creg(raw >> 2);
            let is_word = (raw >> 12) & 1 == 1;
            let sub_op = (raw >> 5) & 0b11;
            let op = match sub_op {
                0b00 => RegRegOp::Sub,
                0b01 => RegRegOp::Xor,
                0b10 => RegRegOp::Or,
                0b11 => RegRegOp::And,
                _ => unreachable!(),
            };
            if is_word {
                Ok(Op32 { op, dest, src1: dest, src2 })
            } else {
                Ok(Op { op, dest, src1: dest, src2 })
            }
        }
        _ => unreachable!(),
    }
}

fn full_reg(raw: u16, shift: u32) -> Specifier {
    Specifier::from_u5(((raw >> shift) & 0x1f) as u8)
}
fn rd_full(raw: u16) -> Specifier {
    full_reg(raw, 7)
}
fn c_rs2(raw: u16) -> Specifier {
    full_reg(raw, 2)
}
fn sign_extend_10(value: i64) -> i64 {
    (((value as i16) << 6) >> 6) as i64
}
fn c_imm6(raw: u16) -> i64 {
    let bits = (((raw >> 7) & 0x20) | ((raw >> 2) & 0x1f)) as i64;
    (bits << 58) >> 58
}
fn c_j_imm(raw: u16) -> i64 {
    let b = raw as i64;
    let imm = ((b >> 1) & 0x800)
        | ((b << 2) & 0x400)
        | ((b >> 1) & 0x300)
        | ((b << 1) & 0x80)
        | ((b >> 1) & 0x40)
        | ((b << 3) & 0x20)
        | ((b >> 7) & 0x10)
        | ((b >> 2) & 0xe);
    (imm << 52) >> 52
}
fn c_b_imm(raw: u16) -> i64 {
    let b = raw as i64;
    let imm = ((b >> 4) & 0x100)
        | ((b << 1) & 0xc0)
        | ((b << 3) & 0x20)
        | ((b >> 7) & 0x18)
        | ((b >> 2) & 0x6);
    (imm << 55) >> 55
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_addi() {
        // addi x1, x2, 5
        let raw = (5 << 20) | (2 << 15) | (0b000 << 12) | (1 << 7) | 0b0010011;
        let decoded = decode(raw).unwrap();
        assert_eq!(4, decoded.size);
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::from_u5(1),
                src: Specifier::from_u5(2),
                immediate: 5
            },
            decoded.instruction
        );
    }

    #[test]
    fn decodes_add() {
        let raw = (0b0000000 << 25) | (2 << 20) | (1 << 15) | (0b000 << 12) | (3 << 7) | 0b0110011;
        assert_eq!(
            Instruction::Op { op: RegRegOp::Add, dest: Specifier::from_u5(3), src1: Specifier::from_u5(1), src2: Specifier::from_u5(2) },
            decode_32(raw).unwrap()
        );
    }

    #[test]
    fn rejects_reserved_opcode() {
        assert_eq!(Err(DecodeError::UnsupportedOpcode), decode_32(0x7f));
    }

    #[test]
    fn decodes_compressed_addi4spn() {
        // c.addi4spn x8, 4  => nzuimm bit layout: bit 6 maps to immediate bit 2
        let raw: u16 = 0b000_0000001_00_00;
        let decoded = decode(raw as u32).unwrap();
        assert_eq!(2, decoded.size);
    }

    #[test]
    fn decodes_compressed_jr_as_jalr_to_x0() {
        // c.jr x1: op=10, funct3=100, bit12=0, rs1=1, rs2(bits 6:2)=0
        let raw: u16 = 0b1000_00001_00000_10;
        assert_eq!(
            Instruction::Jalr { dest: Specifier::ZERO, base: Specifier::from_u5(1), offset: 0 },
            decode_compressed(raw).unwrap()
        );
    }

    #[test]
    fn fp_add_decodes_width_and_rounding_mode() {
        // fadd.s f1, f2, f3, rne
        let raw = (0b0000000 << 25) | (3 << 20) | (2 << 15) | (0b000 << 12) | (1 << 7) | 0b1010011;
        assert_eq!(
            Instruction::FOp {
                op: FpOp::Add,
                width: FpWidth::Single,
                dest: Specifier::from_u5(1),
                src1: Specifier::from_u5(2),
                src2: Specifier::from_u5(3),
                rm: 0
            },
            decode_32(raw).unwrap()
        );
    }
}
