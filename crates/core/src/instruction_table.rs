//! 8086 opcode table
//!
//! `lookup` maps every opcode byte to a [`Descriptor`]. Opcodes that share one
//! byte between several instructions (immediate ALU group, shifts, unary group,
//! inc/dec/call/jmp/push group) are marked [`Category::Special`] and carry a
//! [`Group`]; `resolve` then picks the real instruction with the `reg` field
//! (bits 3-5) of the following mod-reg-rm byte.

use serde::{Deserialize, Serialize};

/// Operation identity, independent of encoding form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mnemonic {
    Unknown,
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
    Inc,
    Dec,
    Not,
    Neg,
    Mul,
    Imul,
    Div,
    Idiv,
    Daa,
    Das,
    Aaa,
    Aas,
    Aam,
    Aad,
    Cbw,
    Cwd,
    Rol,
    Ror,
    Rcl,
    Rcr,
    Shl,
    Shr,
    Sar,
    Test,
    Mov,
    Xchg,
    Lea,
    Lds,
    Les,
    Push,
    Pop,
    Pushf,
    Popf,
    Sahf,
    Lahf,
    Xlat,
    In,
    Out,
    Movs,
    Cmps,
    Scas,
    Lods,
    Stos,
    Jo,
    Jno,
    Jb,
    Jnb,
    Je,
    Jne,
    Jbe,
    Ja,
    Js,
    Jns,
    Jp,
    Jnp,
    Jl,
    Jnl,
    Jle,
    Jg,
    Loopnz,
    Loopz,
    Loop,
    Jcxz,
    Jmp,
    Call,
    Ret,
    Retf,
    Int,
    Int3,
    Into,
    Iret,
    Clc,
    Stc,
    Cmc,
    Cli,
    Sti,
    Cld,
    Std,
    Hlt,
    Wait,
    Esc,
    Nop,
    Lock,
    Rep,
    Segment,
    Group,
}

/// Which field-extraction routine the decoder applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    /// Not an 8086 instruction; decoding cannot continue.
    Unknown,
    /// Resolved through a secondary group table.
    Special,
    /// Opcode byte only.
    SingleByte,
    /// es:/cs:/ss:/ds: prefix byte.
    SegmentPrefix,
    /// movs/cmps/scas/lods/stos.
    StringOp,
    /// Opcode plus one ignored byte (aam/aad).
    SkipSecond,
    /// r/m, reg with a direction bit.
    RegMemReg,
    /// r/m, immediate of the operation width.
    ImmRegMem,
    /// r/m, immediate that is sign-extended from 8 bits when the s bit is set.
    ImmRegMemSignExtended,
    /// reg encoded in the opcode, immediate.
    ImmReg,
    /// Accumulator loaded from an absolute address.
    MemAcc,
    /// Accumulator stored to an absolute address.
    AccMem,
    /// Accumulator, immediate.
    ImmAcc,
    /// Single r/m operand.
    RegMem,
    /// Single r/m operand of an indirect far call/jmp.
    RegMemFar,
    /// Word register loaded from r/m (lea/lds/les).
    MemReg,
    /// r/m, 1 (shift by one).
    RegMemOne,
    /// r/m, cl (shift by count).
    RegMemCl,
    /// r/m, segment register with a direction bit.
    SegRegMem,
    /// Word register encoded in the opcode.
    Reg,
    /// Segment register encoded in the opcode.
    SegReg,
    /// ax, word register encoded in the opcode.
    RegAcc,
    /// 8-bit immediate (int).
    Imm8,
    /// 16-bit immediate (ret/retf imm16).
    Imm16,
    /// 16-bit relative call/jmp.
    NearProc,
    /// Absolute ip:cs pair.
    FarProc,
    /// 8-bit relative branch.
    Jump,
    /// in/out with an 8-bit port number.
    FixedPort,
    /// in/out through dx.
    VariablePort,
    /// Coprocessor escape.
    Esc,
}

/// Secondary table selector for [`Category::Special`] opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    /// 0x80-0x82
    Immediate,
    /// 0x83
    ImmediateSignExtended,
    /// 0xD0-0xD1
    ShiftOne,
    /// 0xD2-0xD3
    ShiftCl,
    /// 0xF6-0xF7
    Unary,
    /// 0xFE
    IncDec,
    /// 0xFF
    Indirect,
}

/// Static description of one opcode (or one group slot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    pub name: &'static str,
    pub op: Mnemonic,
    pub category: Category,
    pub group: Option<Group>,
}

const fn d(name: &'static str, op: Mnemonic, category: Category) -> Descriptor {
    Descriptor {
        name,
        op,
        category,
        group: None,
    }
}

const fn special(group: Group) -> Descriptor {
    Descriptor {
        name: "",
        op: Mnemonic::Group,
        category: Category::Special,
        group: Some(group),
    }
}

const UNKNOWN: Descriptor = d("(unknown)", Mnemonic::Unknown, Category::Unknown);

use Category as C;
use Mnemonic as M;

const IMMEDIATE_GROUP: [Descriptor; 8] = [
    d("add", M::Add, C::ImmRegMem),
    d("or", M::Or, C::ImmRegMem),
    d("adc", M::Adc, C::ImmRegMem),
    d("sbb", M::Sbb, C::ImmRegMem),
    d("and", M::And, C::ImmRegMem),
    d("sub", M::Sub, C::ImmRegMem),
    d("xor", M::Xor, C::ImmRegMem),
    d("cmp", M::Cmp, C::ImmRegMem),
];

const IMMEDIATE_SIGN_EXTENDED_GROUP: [Descriptor; 8] = [
    d("add", M::Add, C::ImmRegMemSignExtended),
    d("or", M::Or, C::ImmRegMemSignExtended),
    d("adc", M::Adc, C::ImmRegMemSignExtended),
    d("sbb", M::Sbb, C::ImmRegMemSignExtended),
    d("and", M::And, C::ImmRegMemSignExtended),
    d("sub", M::Sub, C::ImmRegMemSignExtended),
    d("xor", M::Xor, C::ImmRegMemSignExtended),
    d("cmp", M::Cmp, C::ImmRegMemSignExtended),
];

const SHIFT_ONE_GROUP: [Descriptor; 8] = [
    d("rol", M::Rol, C::RegMemOne),
    d("ror", M::Ror, C::RegMemOne),
    d("rcl", M::Rcl, C::RegMemOne),
    d("rcr", M::Rcr, C::RegMemOne),
    d("shl", M::Shl, C::RegMemOne),
    d("shr", M::Shr, C::RegMemOne),
    UNKNOWN,
    d("sar", M::Sar, C::RegMemOne),
];

const SHIFT_CL_GROUP: [Descriptor; 8] = [
    d("rol", M::Rol, C::RegMemCl),
    d("ror", M::Ror, C::RegMemCl),
    d("rcl", M::Rcl, C::RegMemCl),
    d("rcr", M::Rcr, C::RegMemCl),
    d("shl", M::Shl, C::RegMemCl),
    d("shr", M::Shr, C::RegMemCl),
    UNKNOWN,
    d("sar", M::Sar, C::RegMemCl),
];

const UNARY_GROUP: [Descriptor; 8] = [
    d("test", M::Test, C::ImmRegMem),
    UNKNOWN,
    d("not", M::Not, C::RegMem),
    d("neg", M::Neg, C::RegMem),
    d("mul", M::Mul, C::RegMem),
    d("imul", M::Imul, C::RegMem),
    d("div", M::Div, C::RegMem),
    d("idiv", M::Idiv, C::RegMem),
];

const INC_DEC_GROUP: [Descriptor; 8] = [
    d("inc", M::Inc, C::RegMem),
    d("dec", M::Dec, C::RegMem),
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
    UNKNOWN,
];

const INDIRECT_GROUP: [Descriptor; 8] = [
    d("inc", M::Inc, C::RegMem),
    d("dec", M::Dec, C::RegMem),
    d("call", M::Call, C::RegMem),
    d("call", M::Call, C::RegMemFar),
    d("jmp", M::Jmp, C::RegMem),
    d("jmp", M::Jmp, C::RegMemFar),
    d("push", M::Push, C::RegMem),
    UNKNOWN,
];

const ALU_OPS: [(&str, Mnemonic); 8] = [
    ("add", M::Add),
    ("or", M::Or),
    ("adc", M::Adc),
    ("sbb", M::Sbb),
    ("and", M::And),
    ("sub", M::Sub),
    ("xor", M::Xor),
    ("cmp", M::Cmp),
];

const CONDITIONAL_JUMPS: [(&str, Mnemonic); 16] = [
    ("jo", M::Jo),
    ("jno", M::Jno),
    ("jb", M::Jb),
    ("jnb", M::Jnb),
    ("je", M::Je),
    ("jne", M::Jne),
    ("jbe", M::Jbe),
    ("ja", M::Ja),
    ("js", M::Js),
    ("jns", M::Jns),
    ("jp", M::Jp),
    ("jnp", M::Jnp),
    ("jl", M::Jl),
    ("jnl", M::Jnl),
    ("jle", M::Jle),
    ("jg", M::Jg),
];

/// Look up the descriptor for an opcode byte. Total over all 256 values.
pub fn lookup(opcode: u8) -> Descriptor {
    match opcode {
        // ALU r/m,reg and acc,imm forms: 00-05, 08-0D, ... 38-3D
        0x00..=0x3F if opcode & 0x07 < 6 => {
            let (name, op) = ALU_OPS[(opcode >> 3) as usize];
            if opcode & 0x04 == 0 {
                d(name, op, C::RegMemReg)
            } else {
                d(name, op, C::ImmAcc)
            }
        }

        // push/pop segment register; pop cs (0x0F) does not exist
        0x06 | 0x0E | 0x16 | 0x1E => d("push", M::Push, C::SegReg),
        0x07 | 0x17 | 0x1F => d("pop", M::Pop, C::SegReg),

        0x26 | 0x2E | 0x36 | 0x3E => d("segment", M::Segment, C::SegmentPrefix),

        0x27 => d("daa", M::Daa, C::SingleByte),
        0x2F => d("das", M::Das, C::SingleByte),
        0x37 => d("aaa", M::Aaa, C::SingleByte),
        0x3F => d("aas", M::Aas, C::SingleByte),

        0x40..=0x47 => d("inc", M::Inc, C::Reg),
        0x48..=0x4F => d("dec", M::Dec, C::Reg),
        0x50..=0x57 => d("push", M::Push, C::Reg),
        0x58..=0x5F => d("pop", M::Pop, C::Reg),

        0x70..=0x7F => {
            let (name, op) = CONDITIONAL_JUMPS[(opcode & 0x0F) as usize];
            d(name, op, C::Jump)
        }

        0x80 | 0x81 | 0x82 => special(Group::Immediate),
        0x83 => special(Group::ImmediateSignExtended),

        0x84 | 0x85 => d("test", M::Test, C::RegMemReg),
        0x86 | 0x87 => d("xchg", M::Xchg, C::RegMemReg),
        0x88..=0x8B => d("mov", M::Mov, C::RegMemReg),
        0x8C | 0x8E => d("mov", M::Mov, C::SegRegMem),
        0x8D => d("lea", M::Lea, C::MemReg),
        0x8F => d("pop", M::Pop, C::RegMem),

        0x90 => d("nop", M::Nop, C::SingleByte),
        0x91..=0x97 => d("xchg", M::Xchg, C::RegAcc),
        0x98 => d("cbw", M::Cbw, C::SingleByte),
        0x99 => d("cwd", M::Cwd, C::SingleByte),
        0x9A => d("call", M::Call, C::FarProc),
        0x9B => d("wait", M::Wait, C::SingleByte),
        0x9C => d("pushf", M::Pushf, C::SingleByte),
        0x9D => d("popf", M::Popf, C::SingleByte),
        0x9E => d("sahf", M::Sahf, C::SingleByte),
        0x9F => d("lahf", M::Lahf, C::SingleByte),

        0xA0 | 0xA1 => d("mov", M::Mov, C::MemAcc),
        0xA2 | 0xA3 => d("mov", M::Mov, C::AccMem),
        0xA4 | 0xA5 => d("movs", M::Movs, C::StringOp),
        0xA6 | 0xA7 => d("cmps", M::Cmps, C::StringOp),
        0xA8 | 0xA9 => d("test", M::Test, C::ImmAcc),
        0xAA | 0xAB => d("stos", M::Stos, C::StringOp),
        0xAC | 0xAD => d("lods", M::Lods, C::StringOp),
        0xAE | 0xAF => d("scas", M::Scas, C::StringOp),

        0xB0..=0xBF => d("mov", M::Mov, C::ImmReg),

        0xC2 => d("ret", M::Ret, C::Imm16),
        0xC3 => d("ret", M::Ret, C::SingleByte),
        0xC4 => d("les", M::Les, C::MemReg),
        0xC5 => d("lds", M::Lds, C::MemReg),
        0xC6 | 0xC7 => d("mov", M::Mov, C::ImmRegMem),
        0xCA => d("retf", M::Retf, C::Imm16),
        0xCB => d("retf", M::Retf, C::SingleByte),
        0xCC => d("int3", M::Int3, C::SingleByte),
        0xCD => d("int", M::Int, C::Imm8),
        0xCE => d("into", M::Into, C::SingleByte),
        0xCF => d("iret", M::Iret, C::SingleByte),

        0xD0 | 0xD1 => special(Group::ShiftOne),
        0xD2 | 0xD3 => special(Group::ShiftCl),
        0xD4 => d("aam", M::Aam, C::SkipSecond),
        0xD5 => d("aad", M::Aad, C::SkipSecond),
        0xD7 => d("xlat", M::Xlat, C::SingleByte),
        0xD8..=0xDF => d("esc", M::Esc, C::Esc),

        0xE0 => d("loopnz", M::Loopnz, C::Jump),
        0xE1 => d("loopz", M::Loopz, C::Jump),
        0xE2 => d("loop", M::Loop, C::Jump),
        0xE3 => d("jcxz", M::Jcxz, C::Jump),
        0xE4 | 0xE5 => d("in", M::In, C::FixedPort),
        0xE6 | 0xE7 => d("out", M::Out, C::FixedPort),
        0xE8 => d("call", M::Call, C::NearProc),
        0xE9 => d("jmp", M::Jmp, C::NearProc),
        0xEA => d("jmp", M::Jmp, C::FarProc),
        0xEB => d("jmp", M::Jmp, C::Jump),
        0xEC | 0xED => d("in", M::In, C::VariablePort),
        0xEE | 0xEF => d("out", M::Out, C::VariablePort),

        0xF0 => d("lock", M::Lock, C::SingleByte),
        0xF2 => d("repne", M::Rep, C::SingleByte),
        0xF3 => d("rep", M::Rep, C::SingleByte),
        0xF4 => d("hlt", M::Hlt, C::SingleByte),
        0xF5 => d("cmc", M::Cmc, C::SingleByte),
        0xF6 | 0xF7 => special(Group::Unary),
        0xF8 => d("clc", M::Clc, C::SingleByte),
        0xF9 => d("stc", M::Stc, C::SingleByte),
        0xFA => d("cli", M::Cli, C::SingleByte),
        0xFB => d("sti", M::Sti, C::SingleByte),
        0xFC => d("cld", M::Cld, C::SingleByte),
        0xFD => d("std", M::Std, C::SingleByte),
        0xFE => special(Group::IncDec),
        0xFF => special(Group::Indirect),

        // 0x0F, 0x60-0x6F, 0xC0, 0xC1, 0xC8, 0xC9, 0xD6, 0xF1
        _ => UNKNOWN,
    }
}

/// Resolve a [`Category::Special`] descriptor using bits 3-5 of the byte that
/// follows the opcode. Any other descriptor is returned unchanged.
pub fn resolve(descriptor: Descriptor, second_byte: u8) -> Descriptor {
    let slot = ((second_byte >> 3) & 0x07) as usize;
    match descriptor.group {
        Some(Group::Immediate) => IMMEDIATE_GROUP[slot],
        Some(Group::ImmediateSignExtended) => IMMEDIATE_SIGN_EXTENDED_GROUP[slot],
        Some(Group::ShiftOne) => SHIFT_ONE_GROUP[slot],
        Some(Group::ShiftCl) => SHIFT_CL_GROUP[slot],
        Some(Group::Unary) => UNARY_GROUP[slot],
        Some(Group::IncDec) => INC_DEC_GROUP[slot],
        Some(Group::Indirect) => INDIRECT_GROUP[slot],
        None => descriptor,
    }
}

/// True when `byte` is a segment-override prefix opcode.
#[inline]
pub fn is_segment_prefix(byte: u8) -> bool {
    lookup(byte).category == Category::SegmentPrefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_total() {
        for opcode in 0..=255u8 {
            let desc = lookup(opcode);
            // Every byte resolves; special entries always carry a group
            assert_eq!(desc.category == Category::Special, desc.group.is_some());
        }
    }

    #[test]
    fn test_alu_forms() {
        assert_eq!(lookup(0x00).op, Mnemonic::Add);
        assert_eq!(lookup(0x00).category, Category::RegMemReg);
        assert_eq!(lookup(0x05).category, Category::ImmAcc);
        assert_eq!(lookup(0x2B).op, Mnemonic::Sub);
        assert_eq!(lookup(0x3C).op, Mnemonic::Cmp);
        assert_eq!(lookup(0x3C).category, Category::ImmAcc);
        assert_eq!(lookup(0x18).name, "sbb");
    }

    #[test]
    fn test_gaps_in_alu_rows() {
        assert_eq!(lookup(0x06).name, "push");
        assert_eq!(lookup(0x07).name, "pop");
        assert_eq!(lookup(0x0F).category, Category::Unknown);
        assert_eq!(lookup(0x26).category, Category::SegmentPrefix);
        assert_eq!(lookup(0x27).op, Mnemonic::Daa);
        assert_eq!(lookup(0x3F).op, Mnemonic::Aas);
    }

    #[test]
    fn test_unknown_opcodes() {
        for opcode in [0x0F, 0x60, 0x6F, 0xC0, 0xC1, 0xC8, 0xC9, 0xD6, 0xF1] {
            assert_eq!(lookup(opcode).category, Category::Unknown, "{:02X}", opcode);
        }
    }

    #[test]
    fn test_segment_prefixes() {
        let prefixes: Vec<u8> = (0..=255u8).filter(|b| is_segment_prefix(*b)).collect();
        assert_eq!(prefixes, vec![0x26, 0x2E, 0x36, 0x3E]);
    }

    #[test]
    fn test_string_ops() {
        assert_eq!(lookup(0xA4).op, Mnemonic::Movs);
        assert_eq!(lookup(0xA7).op, Mnemonic::Cmps);
        assert_eq!(lookup(0xAA).op, Mnemonic::Stos);
        assert_eq!(lookup(0xAD).op, Mnemonic::Lods);
        assert_eq!(lookup(0xAF).op, Mnemonic::Scas);
        assert_eq!(lookup(0xA8).category, Category::ImmAcc);
        for opcode in [0xA4, 0xA5, 0xA6, 0xA7, 0xAA, 0xAB, 0xAC, 0xAD, 0xAE, 0xAF] {
            assert_eq!(lookup(opcode).category, Category::StringOp);
        }
    }

    #[test]
    fn test_resolve_immediate_group_uses_reg_field() {
        // 0x80 /5 -> sub, 0x83 /7 -> cmp
        let sub = resolve(lookup(0x80), 0b11_101_000);
        assert_eq!(sub.op, Mnemonic::Sub);
        assert_eq!(sub.category, Category::ImmRegMem);

        let cmp = resolve(lookup(0x83), 0b00_111_110);
        assert_eq!(cmp.op, Mnemonic::Cmp);
        assert_eq!(cmp.category, Category::ImmRegMemSignExtended);
    }

    #[test]
    fn test_resolve_ignores_mod_and_rm_bits() {
        for modrm in [0b00_000_000, 0b11_000_111, 0b01_000_110] {
            assert_eq!(resolve(lookup(0x81), modrm).op, Mnemonic::Add);
        }
    }

    #[test]
    fn test_resolve_other_groups() {
        assert_eq!(resolve(lookup(0xD0), 0b11_100_000).op, Mnemonic::Shl);
        assert_eq!(resolve(lookup(0xD3), 0b11_111_000).category, Category::RegMemCl);
        assert_eq!(resolve(lookup(0xF6), 0b11_000_000).op, Mnemonic::Test);
        assert_eq!(resolve(lookup(0xF7), 0b11_011_000).op, Mnemonic::Neg);
        assert_eq!(resolve(lookup(0xFE), 0b11_001_000).op, Mnemonic::Dec);
        assert_eq!(resolve(lookup(0xFF), 0b00_011_111).category, Category::RegMemFar);
        assert_eq!(resolve(lookup(0xFF), 0b00_110_111).op, Mnemonic::Push);
    }

    #[test]
    fn test_undefined_group_slots_are_unknown() {
        assert_eq!(resolve(lookup(0xF6), 0b11_001_000).category, Category::Unknown);
        assert_eq!(resolve(lookup(0xFE), 0b11_010_000).category, Category::Unknown);
        assert_eq!(resolve(lookup(0xFF), 0b11_111_000).category, Category::Unknown);
        assert_eq!(resolve(lookup(0xD0), 0b11_110_000).category, Category::Unknown);
    }

    #[test]
    fn test_resolve_passes_through_plain_descriptors() {
        let mov = lookup(0x89);
        assert_eq!(resolve(mov, 0xFF), mov);
    }
}
