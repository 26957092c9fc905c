//! 8086 register file
//!
//! Eight general purpose 16-bit cells (AX, CX, DX, BX, SP, BP, SI, DI in
//! encoding order), four segment registers and the FLAGS word. The first four
//! cells are also addressable as independent low/high bytes (AL..BL, AH..BH);
//! writing one byte half never disturbs the other.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Register identity as encoded in the 3-bit `reg`/`rm` fields.
///
/// The discriminant is `w * 8 + field`, so byte registers occupy 0-7 and word
/// registers 8-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Register {
    AL = 0,
    CL,
    DL,
    BL,
    AH,
    CH,
    DH,
    BH,
    AX,
    CX,
    DX,
    BX,
    SP,
    BP,
    SI,
    DI,
}

const REGISTERS: [Register; 16] = [
    Register::AL,
    Register::CL,
    Register::DL,
    Register::BL,
    Register::AH,
    Register::CH,
    Register::DH,
    Register::BH,
    Register::AX,
    Register::CX,
    Register::DX,
    Register::BX,
    Register::SP,
    Register::BP,
    Register::SI,
    Register::DI,
];

impl Register {
    /// Resolve a 3-bit register field for the given operation width.
    pub fn from_field(field: u8, wide: bool) -> Self {
        REGISTERS[(wide as usize) * 8 + (field & 0x07) as usize]
    }

    /// The accumulator for the given width (AL or AX).
    pub fn accumulator(wide: bool) -> Self {
        if wide {
            Register::AX
        } else {
            Register::AL
        }
    }

    /// Raw 3-bit field value this register encodes to.
    pub fn field(self) -> u8 {
        (self as u8) & 0x07
    }

    /// True for the 16-bit identities (AX..DI).
    pub fn is_wide(self) -> bool {
        (self as u8) >= 8
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::AL => "al",
            Register::CL => "cl",
            Register::DL => "dl",
            Register::BL => "bl",
            Register::AH => "ah",
            Register::CH => "ch",
            Register::DH => "dh",
            Register::BH => "bh",
            Register::AX => "ax",
            Register::CX => "cx",
            Register::DX => "dx",
            Register::BX => "bx",
            Register::SP => "sp",
            Register::BP => "bp",
            Register::SI => "si",
            Register::DI => "di",
        }
    }

    /// Where this identity lives in the register file.
    fn slot(self) -> Slot {
        let idx = self as usize;
        match idx {
            0..=3 => Slot::Low(idx),
            4..=7 => Slot::High(idx - 4),
            _ => Slot::Word(idx - 8),
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Low(usize),
    High(usize),
    Word(usize),
}

/// Segment register identity (`sr` field order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SegmentRegister {
    ES = 0,
    CS,
    SS,
    DS,
}

impl SegmentRegister {
    pub const ALL: [SegmentRegister; 4] = [
        SegmentRegister::ES,
        SegmentRegister::CS,
        SegmentRegister::SS,
        SegmentRegister::DS,
    ];

    /// Resolve a 2-bit `sr` field.
    pub fn from_field(field: u8) -> Self {
        Self::ALL[(field & 0x03) as usize]
    }

    pub fn field(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            SegmentRegister::ES => "es",
            SegmentRegister::CS => "cs",
            SegmentRegister::SS => "ss",
            SegmentRegister::DS => "ds",
        }
    }
}

impl fmt::Display for SegmentRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Named single-bit flags of the FLAGS register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Flag {
    CF = 0x0001, // Carry Flag
    PF = 0x0004, // Parity Flag
    AF = 0x0010, // Auxiliary Carry Flag
    ZF = 0x0040, // Zero Flag
    SF = 0x0080, // Sign Flag
    TF = 0x0100, // Trap Flag
    IF = 0x0200, // Interrupt Enable Flag
    DF = 0x0400, // Direction Flag
    OF = 0x0800, // Overflow Flag
}

impl Flag {
    /// All defined flags, most significant bit first.
    pub const ALL: [Flag; 9] = [
        Flag::OF,
        Flag::DF,
        Flag::IF,
        Flag::TF,
        Flag::SF,
        Flag::ZF,
        Flag::AF,
        Flag::PF,
        Flag::CF,
    ];

    #[inline]
    pub fn bit(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            Flag::CF => "CF",
            Flag::PF => "PF",
            Flag::AF => "AF",
            Flag::ZF => "ZF",
            Flag::SF => "SF",
            Flag::TF => "TF",
            Flag::IF => "IF",
            Flag::DF => "DF",
            Flag::OF => "OF",
        }
    }
}

/// The 16-bit FLAGS word. Bits outside the nine named flags are inert: they
/// are stored and copied but carry no meaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flags(u16);

impl Flags {
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn contains(self, flag: Flag) -> bool {
        (self.0 & flag.bit()) != 0
    }

    #[inline]
    pub fn set(&mut self, flag: Flag, value: bool) {
        if value {
            self.0 |= flag.bit();
        } else {
            self.0 &= !flag.bit();
        }
    }

    /// Set flags, most significant first.
    pub fn iter(self) -> impl Iterator<Item = Flag> {
        Flag::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in self.iter() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(flag.name())?;
            first = false;
        }
        Ok(())
    }
}

/// General, segment and flags registers, zeroed on creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFile {
    cells: [u16; 8],
    segments: [u16; 4],
    flags: Flags,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a register; byte identities return their half zero-extended.
    #[inline]
    pub fn read(&self, reg: Register) -> u16 {
        match reg.slot() {
            Slot::Low(cell) => self.cells[cell] & 0x00FF,
            Slot::High(cell) => self.cells[cell] >> 8,
            Slot::Word(cell) => self.cells[cell],
        }
    }

    /// Write a register; byte identities take the low 8 bits of `val` and
    /// leave the sibling half untouched.
    #[inline]
    pub fn write(&mut self, reg: Register, val: u16) {
        match reg.slot() {
            Slot::Low(cell) => self.cells[cell] = (self.cells[cell] & 0xFF00) | (val & 0x00FF),
            Slot::High(cell) => {
                self.cells[cell] = (self.cells[cell] & 0x00FF) | ((val & 0x00FF) << 8)
            }
            Slot::Word(cell) => self.cells[cell] = val,
        }
    }

    #[inline]
    pub fn read_segment(&self, sr: SegmentRegister) -> u16 {
        self.segments[sr as usize]
    }

    #[inline]
    pub fn write_segment(&mut self, sr: SegmentRegister, val: u16) {
        self.segments[sr as usize] = val;
    }

    #[inline]
    pub fn test_flag(&self, flag: Flag) -> bool {
        self.flags.contains(flag)
    }

    #[inline]
    pub fn set_flag(&mut self, flag: Flag, value: bool) {
        self.flags.set(flag, value);
    }

    /// Overwrite the whole FLAGS word, inert bits included.
    pub fn replace_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }
}
