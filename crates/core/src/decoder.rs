//! 8086 binary decoder
//!
//! A single forward pass over a raw byte stream. Each opcode is looked up in
//! the instruction table (with the group indirection for shared opcodes) and
//! its [`Category`] selects one field-extraction routine. Every routine takes
//! the cursor positioned on the opcode byte and leaves it on the first byte
//! of the next instruction.
//!
//! Prefix bytes (`lock`, `rep`/`repne`, segment overrides) do not produce
//! instructions of their own; they are latched and applied to the next real
//! instruction.

use crate::instruction::{branch_target, AddressBase, Instruction, LabelTable, Operand, Program};
use crate::instruction_table::{self, Category, Mnemonic};
use crate::logging::{log, LogCategory, LogLevel};
use crate::registers::{Register, SegmentRegister};
use thiserror::Error;

// First byte fields
const W_MASK: u8 = 0x01; // operation width
const D_MASK: u8 = 0x02; // direction (reg is destination)
const S_MASK: u8 = 0x02; // sign-extend immediate (same bit as d)
const IMM_W_MASK: u8 = 0x08; // width in mov reg, imm
const REG_MASK: u8 = 0x07; // register in the low 3 bits of the opcode
const SR_MASK: u8 = 0x18; // segment register in bits 3-4

/// Fatal decode failures. Either way the length of the failing instruction
/// is unknown, so nothing after `offset` can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("instruction not supported: opcode {opcode:#04X} ({category:?}) at offset {offset:#06X}, index {index}")]
    Unsupported {
        opcode: u8,
        category: Category,
        offset: usize,
        index: usize,
    },
    #[error("byte stream ends inside instruction {index} at offset {offset:#06X}")]
    UnexpectedEof { offset: usize, index: usize },
}

/// Addressing mode from the top two bits of the mod-reg-rm byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    NoDisplacement,
    Displacement8,
    Displacement16,
    Register,
}

impl Mode {
    fn from_modrm(modrm: u8) -> Self {
        match modrm >> 6 {
            0b00 => Mode::NoDisplacement,
            0b01 => Mode::Displacement8,
            0b10 => Mode::Displacement16,
            _ => Mode::Register,
        }
    }
}

/// Fields of a mod-reg-rm instruction that the calling routine still needs
/// after operand 0 has been built.
#[derive(Debug, Clone, Copy)]
struct ModRm {
    opcode: u8,
    reg: u8,
    wide: bool,
}

/// Read position in the byte stream.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn next_u8(&mut self) -> Result<u8, Eof> {
        let byte = self.peek(0).ok_or(Eof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn next_i8(&mut self) -> Result<i8, Eof> {
        Ok(self.next_u8()? as i8)
    }

    fn next_u16(&mut self) -> Result<u16, Eof> {
        let lo = self.next_u8()?;
        let hi = self.next_u8()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn next_i16(&mut self) -> Result<i16, Eof> {
        Ok(self.next_u16()? as i16)
    }

    fn skip(&mut self, count: usize) -> Result<(), Eof> {
        for _ in 0..count {
            self.next_u8()?;
        }
        Ok(())
    }
}

/// Ran off the end of the buffer; turned into [`DecodeError::UnexpectedEof`]
/// by the decoder, which knows the instruction index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Eof;

type Step = Result<(), Eof>;

/// Reconstruct a signed 16-bit value from two little-endian bytes.
#[inline]
pub fn displacement16(lo: u8, hi: u8) -> i16 {
    i16::from_le_bytes([lo, hi])
}

/// Read an immediate. A non-sign-extended word consumes two bytes; a byte or
/// a sign-extended word consumes one byte and is sign-extended to 16 bits.
fn immediate(cur: &mut Cursor, wide: bool, sign_extend: bool) -> Result<i16, Eof> {
    if wide && !sign_extend {
        cur.next_i16()
    } else {
        Ok(i16::from(cur.next_i8()?))
    }
}

/// A segment-prefix byte may sit where a displacement byte is expected. It
/// belongs to the operand being built; the displacement follows it.
fn displacement_byte(cur: &mut Cursor, segment: &mut Option<SegmentRegister>) -> Result<u8, Eof> {
    let byte = cur.next_u8()?;
    if instruction_table::is_segment_prefix(byte) {
        *segment = Some(SegmentRegister::from_field((byte & SR_MASK) >> 3));
        return cur.next_u8();
    }
    Ok(byte)
}

/// Consume opcode and mod-reg-rm byte plus displacement, filling operand 0
/// with the r/m side. Sets `wide` and `dest` from the opcode.
fn modrm_operand(cur: &mut Cursor, ins: &mut Instruction, force_wide: bool) -> Result<ModRm, Eof> {
    let opcode = cur.next_u8()?;
    let modrm = cur.next_u8()?;

    let wide = (opcode & W_MASK) != 0 || force_wide;
    let mode = Mode::from_modrm(modrm);
    let reg = (modrm >> 3) & 0x07;
    let rm = modrm & 0x07;

    ins.flags.wide = wide;
    ins.flags.dest = (opcode & D_MASK) != 0;

    let mut segment = None;
    ins.operands[0] = Some(match mode {
        Mode::Register => Operand::Register(Register::from_field(rm, wide)),
        // rm = 110 without displacement is a direct 16-bit address
        Mode::NoDisplacement if rm == 0b110 => {
            let lo = displacement_byte(cur, &mut segment)?;
            let hi = cur.next_u8()?;
            Operand::DirectAccess {
                address: u16::from_le_bytes([lo, hi]),
                segment,
            }
        }
        Mode::NoDisplacement => Operand::EffectiveAddress {
            base: AddressBase::from_field(rm),
            displacement: 0,
            segment: None,
        },
        Mode::Displacement8 => {
            let disp = displacement_byte(cur, &mut segment)? as i8;
            Operand::EffectiveAddress {
                base: AddressBase::from_field(rm),
                displacement: i16::from(disp),
                segment,
            }
        }
        Mode::Displacement16 => {
            let lo = displacement_byte(cur, &mut segment)?;
            let hi = cur.next_u8()?;
            Operand::EffectiveAddress {
                base: AddressBase::from_field(rm),
                displacement: displacement16(lo, hi),
                segment,
            }
        }
    });

    Ok(ModRm { opcode, reg, wide })
}

/// r/m, reg (direction bit decides which one is the destination)
fn regmem_reg(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let m = modrm_operand(cur, ins, false)?;
    ins.operands[1] = Some(Operand::Register(Register::from_field(m.reg, m.wide)));
    Ok(())
}

/// r/m, immediate. Only the sign-extending group honours the s bit: in
/// mov r/m,imm (C6/C7) and test r/m,imm (F6/F7) bit 1 has other meanings.
fn imm_regmem(cur: &mut Cursor, ins: &mut Instruction, sign_extending_form: bool) -> Step {
    let m = modrm_operand(cur, ins, false)?;
    // No direction bit in this form
    ins.flags.dest = false;
    let sign_extend = sign_extending_form && (m.opcode & S_MASK) != 0;
    ins.operands[1] = Some(Operand::Immediate(immediate(cur, m.wide, sign_extend)?));
    Ok(())
}

/// mov reg, imm with the register and width in the opcode
fn imm_reg(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    let wide = (opcode & IMM_W_MASK) != 0;
    ins.flags.wide = wide;
    ins.operands[0] = Some(Operand::Register(Register::from_field(opcode & REG_MASK, wide)));
    ins.operands[1] = Some(Operand::Immediate(immediate(cur, wide, false)?));
    Ok(())
}

/// mov acc, [addr]
fn mem_acc(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    ins.flags.wide = (opcode & W_MASK) != 0;
    let address = cur.next_u16()?;
    ins.operands[0] = Some(Operand::Accumulator);
    ins.operands[1] = Some(Operand::DirectAccess {
        address,
        segment: None,
    });
    Ok(())
}

/// mov [addr], acc
fn acc_mem(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    ins.flags.wide = (opcode & W_MASK) != 0;
    let address = cur.next_u16()?;
    ins.operands[0] = Some(Operand::DirectAccess {
        address,
        segment: None,
    });
    ins.operands[1] = Some(Operand::Accumulator);
    Ok(())
}

/// op acc, imm
fn imm_acc(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    let wide = (opcode & W_MASK) != 0;
    ins.flags.wide = wide;
    ins.operands[0] = Some(Operand::Accumulator);
    ins.operands[1] = Some(Operand::Immediate(immediate(cur, wide, false)?));
    Ok(())
}

/// Single immediate operand following the opcode (int, ret imm16, near call/jmp)
fn imm(cur: &mut Cursor, ins: &mut Instruction, wide: bool) -> Step {
    cur.next_u8()?;
    ins.operands[0] = Some(Operand::Immediate(immediate(cur, wide, false)?));
    Ok(())
}

/// Short relative branch. Returns the raw byte offset.
fn jump(cur: &mut Cursor, ins: &mut Instruction) -> Result<i8, Eof> {
    cur.next_u8()?;
    let offset = cur.next_i8()?;
    ins.operands[0] = Some(Operand::Label(offset));
    Ok(offset)
}

/// Single r/m operand
fn regmem(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    modrm_operand(cur, ins, false)?;
    Ok(())
}

/// r/m, 1
fn regmem_one(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    modrm_operand(cur, ins, false)?;
    ins.operands[1] = Some(Operand::Immediate(1));
    Ok(())
}

/// r/m, cl
fn regmem_cl(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    modrm_operand(cur, ins, false)?;
    // Bit 1 selects the count source here, not a direction
    ins.flags.dest = false;
    ins.operands[1] = Some(Operand::Register(Register::CL));
    Ok(())
}

/// lea/lds/les: word register loaded from r/m
fn mem_reg(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let m = modrm_operand(cur, ins, true)?;
    ins.flags.dest = false;
    ins.operands[1] = ins.operands[0].take();
    ins.operands[0] = Some(Operand::Register(Register::from_field(m.reg, true)));
    Ok(())
}

/// esc: the external opcode (low 3 bits of the opcode, reg field of
/// mod-reg-rm left in place at bits 3-5) as an immediate, followed by the r/m
/// operand.
fn esc(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let m = modrm_operand(cur, ins, false)?;
    ins.flags.dest = false;
    let code = (m.opcode & REG_MASK) | (m.reg << 3);
    ins.operands[1] = ins.operands[0].take();
    ins.operands[0] = Some(Operand::Immediate(i16::from(code)));
    Ok(())
}

/// push/pop/inc/dec of a word register in the opcode
fn reg(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    ins.flags.wide = true;
    ins.operands[0] = Some(Operand::Register(Register::from_field(opcode & REG_MASK, true)));
    Ok(())
}

/// push/pop of a segment register in the opcode
fn seg_reg(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    ins.flags.wide = true;
    ins.operands[0] = Some(Operand::SegmentRegister(SegmentRegister::from_field(
        (opcode & SR_MASK) >> 3,
    )));
    Ok(())
}

/// mov r/m16, sreg / mov sreg, r/m16
fn seg_regmem(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let m = modrm_operand(cur, ins, true)?;
    ins.operands[1] = Some(Operand::SegmentRegister(SegmentRegister::from_field(m.reg)));
    Ok(())
}

/// xchg ax, reg16
fn reg_acc(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    ins.flags.wide = true;
    ins.operands[0] = Some(Operand::Accumulator);
    ins.operands[1] = Some(Operand::Register(Register::from_field(opcode & REG_MASK, true)));
    Ok(())
}

/// in acc, port8 / out port8, acc
fn fixed_port(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    ins.flags.wide = (opcode & W_MASK) != 0;
    ins.flags.dest = (opcode & D_MASK) != 0;
    let port = cur.next_u8()?;
    ins.operands[0] = Some(Operand::Accumulator);
    ins.operands[1] = Some(Operand::Immediate(i16::from(port)));
    Ok(())
}

/// in acc, dx / out dx, acc
fn variable_port(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    let opcode = cur.next_u8()?;
    ins.flags.wide = (opcode & W_MASK) != 0;
    ins.flags.dest = (opcode & D_MASK) != 0;
    ins.operands[0] = Some(Operand::Accumulator);
    ins.operands[1] = Some(Operand::Register(Register::DX));
    Ok(())
}

/// Direct far call/jmp: ip then cs, both little-endian words
fn far_proc(cur: &mut Cursor, ins: &mut Instruction) -> Step {
    cur.next_u8()?;
    let ip = cur.next_i16()?;
    let cs = cur.next_i16()?;
    ins.operands[0] = Some(Operand::FarProc { ip, cs });
    Ok(())
}

/// Swap operands when operand 1 is the real destination, so that operand 0
/// is always the destination downstream. `dest` is cleared either way.
fn normalize_destination(ins: &mut Instruction) {
    if ins.flags.dest && ins.operands[1].is_some() {
        ins.operands.swap(0, 1);
    }
    ins.flags.dest = false;
}

/// Stateful scanner over one byte stream.
#[derive(Debug)]
pub struct Decoder<'a> {
    cursor: Cursor<'a>,
    instructions: Vec<Instruction>,
    labels: LabelTable,
    /// Latched by a segment prefix; consumed by the next instruction
    pending_segment: Option<SegmentRegister>,
    locked: bool,
    repeated: bool,
}

/// Result of scanning one position.
enum Scanned {
    Prefix,
    Instruction(Instruction),
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            instructions: Vec::new(),
            labels: LabelTable::new(),
            pending_segment: None,
            locked: false,
            repeated: false,
        }
    }

    /// Decode the whole stream.
    pub fn run(mut self) -> Result<Program, DecodeError> {
        while !self.cursor.is_at_end() {
            let start = self.cursor.position();
            match self.scan()? {
                Scanned::Prefix => {}
                Scanned::Instruction(ins) => self.emit(ins, start),
            }
        }
        log(LogCategory::Decoder, LogLevel::Info, || {
            format!(
                "decoded {} instructions, {} labels",
                self.instructions.len(),
                self.labels.len()
            )
        });
        Ok(Program::new(self.instructions, self.labels))
    }

    fn eof(&self) -> DecodeError {
        DecodeError::UnexpectedEof {
            offset: self.cursor.position(),
            index: self.instructions.len(),
        }
    }

    /// Decode the instruction or prefix at the cursor.
    fn scan(&mut self) -> Result<Scanned, DecodeError> {
        let start = self.cursor.position();
        let index = self.instructions.len();
        let opcode = self.cursor.peek(0).ok_or_else(|| self.eof())?;

        let mut descriptor = instruction_table::lookup(opcode);
        if descriptor.category == Category::Special {
            let second = self.cursor.peek(1).ok_or(DecodeError::UnexpectedEof {
                offset: start + 1,
                index,
            })?;
            descriptor = instruction_table::resolve(descriptor, second);
        }

        let mut ins = Instruction::new(descriptor);
        let cur = &mut self.cursor;
        let step = match descriptor.category {
            Category::SegmentPrefix => {
                cur.skip(1).map_err(|_| self.eof())?;
                self.pending_segment = Some(SegmentRegister::from_field((opcode & SR_MASK) >> 3));
                return Ok(Scanned::Prefix);
            }
            Category::SingleByte if descriptor.op == Mnemonic::Lock => {
                cur.skip(1).map_err(|_| self.eof())?;
                self.locked = true;
                return Ok(Scanned::Prefix);
            }
            Category::SingleByte if descriptor.op == Mnemonic::Rep => {
                cur.skip(1).map_err(|_| self.eof())?;
                self.repeated = true;
                return Ok(Scanned::Prefix);
            }
            Category::SingleByte => cur.skip(1),
            Category::StringOp => {
                ins.flags.wide = (opcode & W_MASK) != 0;
                ins.flags.string_op = true;
                cur.skip(1)
            }
            Category::SkipSecond => cur.skip(2),
            Category::RegMemReg => regmem_reg(cur, &mut ins),
            Category::ImmRegMem => imm_regmem(cur, &mut ins, false),
            Category::ImmRegMemSignExtended => imm_regmem(cur, &mut ins, true),
            Category::ImmReg => imm_reg(cur, &mut ins),
            Category::MemAcc => mem_acc(cur, &mut ins),
            Category::AccMem => acc_mem(cur, &mut ins),
            Category::ImmAcc => imm_acc(cur, &mut ins),
            Category::RegMem => regmem(cur, &mut ins),
            Category::RegMemFar => {
                ins.flags.far = true;
                regmem(cur, &mut ins)
            }
            Category::MemReg => mem_reg(cur, &mut ins),
            Category::RegMemOne => regmem_one(cur, &mut ins),
            Category::RegMemCl => regmem_cl(cur, &mut ins),
            Category::SegRegMem => seg_regmem(cur, &mut ins),
            Category::Reg => reg(cur, &mut ins),
            Category::SegReg => seg_reg(cur, &mut ins),
            Category::RegAcc => reg_acc(cur, &mut ins),
            Category::Imm8 => imm(cur, &mut ins, false),
            Category::Imm16 | Category::NearProc => imm(cur, &mut ins, true),
            Category::FarProc => far_proc(cur, &mut ins),
            Category::FixedPort => fixed_port(cur, &mut ins),
            Category::VariablePort => variable_port(cur, &mut ins),
            Category::Esc => esc(cur, &mut ins),
            Category::Jump => jump(cur, &mut ins).map(|offset| {
                let target = branch_target(index, offset);
                let known = self.labels.get(target).is_some();
                let ordinal = self.labels.insert(target);
                if !known {
                    log(LogCategory::Decoder, LogLevel::Debug, || {
                        format!("label{} -> instruction {} (from {})", ordinal, target, index)
                    });
                }
            }),
            Category::Unknown | Category::Special => {
                return Err(DecodeError::Unsupported {
                    opcode,
                    category: descriptor.category,
                    offset: start,
                    index,
                });
            }
        };
        step.map_err(|_| self.eof())?;

        normalize_destination(&mut ins);
        Ok(Scanned::Instruction(ins))
    }

    /// Apply latched prefixes and append.
    fn emit(&mut self, mut ins: Instruction, offset: usize) {
        if let Some(sr) = self.pending_segment.take() {
            for operand in ins.operands.iter_mut().flatten() {
                if operand.set_segment(sr) {
                    break;
                }
            }
        }
        ins.flags.locked = std::mem::take(&mut self.locked);
        ins.flags.repeated = std::mem::take(&mut self.repeated);

        log(LogCategory::Decoder, LogLevel::Trace, || {
            format!(
                "{:06X} #{} {} {:?} {:?}",
                offset,
                self.instructions.len(),
                ins.name,
                ins.operands,
                ins.flags
            )
        });
        self.instructions.push(ins);
    }
}

/// Decode a raw 8086 byte stream into an instruction sequence and its label
/// table.
pub fn decode(bytes: &[u8]) -> Result<Program, DecodeError> {
    Decoder::new(bytes).run()
}
