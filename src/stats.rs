//! Opcode frequency and operand-value histograms, for the embedder's post-run reporting.
//!
//! This is a plain tally, not a CSR-visible performance counter — contrast with
//! [`crate::hart::counters`], which drives `MHPMCOUNTERn` and is gated by `MGPMC`. `Stats` has no
//! gating and no CSR-visible state; an embedder collects it purely for its own `--stats` output.

use crate::decode::{Category, Instruction};
use crate::registers::Specifier;
use std::collections::HashMap;

/// Running tallies for a single hart (or a whole run, if the embedder shares one instance).
#[derive(Debug, Clone, Default)]
pub struct Stats {
    by_category: HashMap<Category, u64>,
    /// How often each integer register specifier appeared as a destination operand.
    dest_reg_hist: [u64; 32],
    /// How often each integer register specifier appeared as a source operand.
    src_reg_hist: [u64; 32],
    total: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one retired instruction.
    pub fn record(&mut self, instruction: &Instruction) {
        self.total += 1;
        *self.by_category.entry(instruction.category()).or_insert(0) += 1;
        for dest in dest_operand(instruction) {
            self.dest_reg_hist[dest.index()] += 1;
        }
        for src in src_operands(instruction) {
            self.src_reg_hist[src.index()] += 1;
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self, category: Category) -> u64 {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    /// Retirement counts for every category that saw at least one instruction, most-frequent
    /// first.
    pub fn by_category_sorted(&self) -> Vec<(Category, u64)> {
        let mut entries: Vec<_> = self.by_category.iter().map(|(&c, &n)| (c, n)).collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        entries
    }

    pub fn dest_register_histogram(&self) -> &[u64; 32] {
        &self.dest_reg_hist
    }

    pub fn src_register_histogram(&self) -> &[u64; 32] {
        &self.src_reg_hist
    }
}

/// The destination integer register an instruction writes, if any (floating-point destinations
/// are tracked separately by the embedder via `Category::Fp`, since `f` and `x` specifiers share
/// the same numeric range and would otherwise collide in one histogram).
fn dest_operand(instruction: &Instruction) -> Option<Specifier> {
    use Instruction::*;
    match *instruction {
        OpImm { dest, .. }
        | OpImm32 { dest, .. }
        | OpShiftImm { dest, .. }
        | OpShiftImm32 { dest, .. }
        | Auipc { dest, .. }
        | Lui { dest, .. }
        | Op { dest, .. }
        | Op32 { dest, .. }
        | OpUnary { dest, .. }
        | Jal { dest, .. }
        | Jalr { dest, .. }
        | Load { dest, .. }
        | Csr { dest, .. }
        | Csri { dest, .. }
        | Amo { dest, .. } => Some(dest),
        _ => None,
    }
}

fn src_operands(instruction: &Instruction) -> Vec<Specifier> {
    use Instruction::*;
    match *instruction {
        Op { src1, src2, .. } | Op32 { src1, src2, .. } => vec![src1, src2],
        OpImm { src, .. } | OpImm32 { src, .. } | OpShiftImm { src, .. } | OpShiftImm32 { src, .. } => vec![src],
        OpUnary { src, .. } => vec![src],
        Jalr { base, .. } => vec![base],
        Branch { src1, src2, .. } => vec![src1, src2],
        Load { base, .. } => vec![base],
        Store { src, base, .. } => vec![src, base],
        Amo { addr, src, .. } => vec![addr, src],
        Csr { src, .. } => vec![src],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RegImmOp;

    #[test]
    fn records_category_and_register_operands() {
        let mut stats = Stats::new();
        let addi = Instruction::OpImm {
            op: RegImmOp::Addi,
            dest: Specifier::from_u5(5),
            src: Specifier::from_u5(6),
            immediate: 1,
        };
        stats.record(&addi);
        stats.record(&addi);

        assert_eq!(2, stats.total());
        assert_eq!(2, stats.count(Category::Integer));
        assert_eq!(0, stats.count(Category::Load));
        assert_eq!(2, stats.dest_register_histogram()[5]);
        assert_eq!(2, stats.src_register_histogram()[6]);
    }

    #[test]
    fn by_category_sorted_is_descending() {
        let mut stats = Stats::new();
        let branch = Instruction::Branch {
            condition: crate::decode::BranchCondition::Beq,
            src1: Specifier::ZERO,
            src2: Specifier::ZERO,
            offset: 4,
        };
        let jal = Instruction::Jal { dest: Specifier::ZERO, offset: 8 };
        stats.record(&branch);
        stats.record(&jal);
        stats.record(&jal);

        let sorted = stats.by_category_sorted();
        assert_eq!((Category::Jump, 2), sorted[0]);
        assert_eq!((Category::Branch, 1), sorted[1]);
    }
}
