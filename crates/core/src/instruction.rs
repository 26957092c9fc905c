//! Decoded instruction model
//!
//! Produced once by [`crate::decoder::decode`] and read-only afterwards.

use crate::instruction_table::{Category, Descriptor, Mnemonic};
use crate::registers::{Register, SegmentRegister};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base/index combination selected by the `rm` field of a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AddressBase {
    BxSi = 0,
    BxDi,
    BpSi,
    BpDi,
    Si,
    Di,
    Bp,
    Bx,
}

impl AddressBase {
    const ALL: [AddressBase; 8] = [
        AddressBase::BxSi,
        AddressBase::BxDi,
        AddressBase::BpSi,
        AddressBase::BpDi,
        AddressBase::Si,
        AddressBase::Di,
        AddressBase::Bp,
        AddressBase::Bx,
    ];

    pub fn from_field(rm: u8) -> Self {
        Self::ALL[(rm & 0x07) as usize]
    }

    pub fn field(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            AddressBase::BxSi => "bx + si",
            AddressBase::BxDi => "bx + di",
            AddressBase::BpSi => "bp + si",
            AddressBase::BpDi => "bp + di",
            AddressBase::Si => "si",
            AddressBase::Di => "di",
            AddressBase::Bp => "bp",
            AddressBase::Bx => "bx",
        }
    }
}

/// One instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Relative branch offset in bytes, as encoded.
    Label(i8),
    Immediate(i16),
    /// AL or AX, depending on the instruction width.
    Accumulator,
    Register(Register),
    SegmentRegister(SegmentRegister),
    EffectiveAddress {
        base: AddressBase,
        displacement: i16,
        segment: Option<SegmentRegister>,
    },
    DirectAccess {
        address: u16,
        segment: Option<SegmentRegister>,
    },
    FarProc {
        ip: i16,
        cs: i16,
    },
}

impl Operand {
    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            Operand::EffectiveAddress { .. } | Operand::DirectAccess { .. }
        )
    }

    /// Attach a segment override to a memory operand. Returns false (and does
    /// nothing) for any other operand kind.
    pub fn set_segment(&mut self, sr: SegmentRegister) -> bool {
        match self {
            Operand::EffectiveAddress { segment, .. } | Operand::DirectAccess { segment, .. } => {
                *segment = Some(sr);
                true
            }
            _ => false,
        }
    }
}

/// Per-instruction modifiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionFlags {
    /// 16-bit operation.
    pub wide: bool,
    /// Operand 1 is the destination. Only meaningful while decoding; always
    /// false on a finished instruction.
    pub dest: bool,
    pub locked: bool,
    pub repeated: bool,
    pub string_op: bool,
    pub far: bool,
}

/// A decoded instruction. Operand 0 is always the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instruction {
    pub name: &'static str,
    pub op: Mnemonic,
    pub category: Category,
    pub operands: [Option<Operand>; 2],
    pub flags: InstructionFlags,
}

impl Instruction {
    pub fn new(descriptor: Descriptor) -> Self {
        Self {
            name: descriptor.name,
            op: descriptor.op,
            category: descriptor.category,
            operands: [None, None],
            flags: InstructionFlags::default(),
        }
    }

    pub fn destination(&self) -> Option<&Operand> {
        self.operands[0].as_ref()
    }

    pub fn source(&self) -> Option<&Operand> {
        self.operands[1].as_ref()
    }
}

/// Branch targets in order of discovery.
///
/// Keys are absolute instruction indices (signed: a backward branch near the
/// start of the stream can point before index 0); values are zero-based label
/// ordinals assigned sequentially as targets are first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelTable {
    ordinals: HashMap<i64, usize>,
    order: Vec<i64>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a branch target and return its ordinal. A target that is
    /// already known keeps its original ordinal.
    pub fn insert(&mut self, target: i64) -> usize {
        if let Some(&ordinal) = self.ordinals.get(&target) {
            return ordinal;
        }
        let ordinal = self.order.len();
        self.ordinals.insert(target, ordinal);
        self.order.push(target);
        ordinal
    }

    pub fn get(&self, target: i64) -> Option<usize> {
        self.ordinals.get(&target).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(target, ordinal)` pairs in ordinal order.
    pub fn iter(&self) -> impl Iterator<Item = (i64, usize)> + '_ {
        self.order.iter().enumerate().map(|(ordinal, &target)| (target, ordinal))
    }
}

/// Absolute instruction index a relative branch at `index` points to.
///
/// Short branches are assumed to be emitted as fixed 2-byte instructions, so
/// the byte offset is halved into an instruction count.
pub fn branch_target(index: usize, offset: i8) -> i64 {
    index as i64 + i64::from(offset >> 1)
}

/// Output of a decode pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: LabelTable,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>, labels: LabelTable) -> Self {
        Self {
            instructions,
            labels,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Instruction>, LabelTable) {
        (self.instructions, self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_ordinals_follow_discovery_order() {
        let mut labels = LabelTable::new();
        assert_eq!(labels.insert(5), 0);
        assert_eq!(labels.insert(2), 1);
        assert_eq!(labels.insert(5), 0);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.get(2), Some(1));
        assert_eq!(labels.get(3), None);
        let pairs: Vec<_> = labels.iter().collect();
        assert_eq!(pairs, vec![(5, 0), (2, 1)]);
    }

    #[test]
    fn test_branch_target_halves_offset() {
        assert_eq!(branch_target(10, -4), 8);
        assert_eq!(branch_target(10, 6), 13);
        // Arithmetic shift rounds toward negative infinity
        assert_eq!(branch_target(3, -3), 1);
        assert_eq!(branch_target(0, -2), -1);
    }

    #[test]
    fn test_set_segment_only_on_memory_operands() {
        let mut ea = Operand::EffectiveAddress {
            base: AddressBase::Bp,
            displacement: 4,
            segment: None,
        };
        assert!(ea.set_segment(SegmentRegister::ES));
        assert_eq!(
            ea,
            Operand::EffectiveAddress {
                base: AddressBase::Bp,
                displacement: 4,
                segment: Some(SegmentRegister::ES),
            }
        );

        let mut reg = Operand::Register(Register::AX);
        assert!(!reg.set_segment(SegmentRegister::ES));
        assert_eq!(reg, Operand::Register(Register::AX));
    }

    #[test]
    fn test_address_base_fields() {
        assert_eq!(AddressBase::from_field(6), AddressBase::Bp);
        assert_eq!(AddressBase::BpDi.field(), 3);
        assert_eq!(AddressBase::BxSi.name(), "bx + si");
    }
}
