//! Register-only execution engine for mov/add/sub/cmp
//!
//! Runs over an already decoded [`Program`]; it never touches the byte
//! stream. Anything it cannot execute (other mnemonics, memory operands) is
//! skipped with a diagnostic on [`LogCategory::Stubs`] and leaves the
//! register file bit-for-bit unchanged.

use crate::instruction::{Instruction, Operand, Program};
use crate::instruction_table::Mnemonic;
use crate::logging::{log, LogCategory, LogLevel};
use crate::registers::{Flag, Flags, Register, RegisterFile, SegmentRegister};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why an instruction was not executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The engine has no semantics for this mnemonic.
    UnsupportedOpcode,
    /// A required operand is missing or has a shape the engine cannot
    /// read or write (memory, label, far pointer).
    UnsupportedOperand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecOutcome {
    Executed,
    Skipped(SkipReason),
}

/// Post-execution snapshot of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub index: usize,
    pub outcome: ExecOutcome,
    pub flags: Flags,
}

/// Per-instruction record of a [`Emulator::run`] pass, in program order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn executed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == ExecOutcome::Executed)
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.entries.len() - self.executed()
    }
}

/// Readable or writable register location an operand resolves to.
#[derive(Debug, Clone, Copy)]
enum Location {
    Register(Register),
    Segment(SegmentRegister),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arith {
    Add,
    Sub,
    Cmp,
}

/// Operation width: 8 or 16 bits.
#[derive(Debug, Clone, Copy)]
struct Width {
    mask: u16,
    sign: u16,
}

impl Width {
    fn new(wide: bool) -> Self {
        if wide {
            Self {
                mask: 0xFFFF,
                sign: 0x8000,
            }
        } else {
            Self {
                mask: 0x00FF,
                sign: 0x0080,
            }
        }
    }
}

/// Parity of the low byte (true if even number of 1 bits)
#[inline]
fn calc_parity(val: u16) -> bool {
    (val as u8).count_ones().is_multiple_of(2)
}

/// An emulation session. Owns its register file.
#[derive(Debug, Clone, Default)]
pub struct Emulator {
    regs: RegisterFile,
}

impl Emulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing register state.
    pub fn with_registers(regs: RegisterFile) -> Self {
        Self { regs }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn into_registers(self) -> RegisterFile {
        self.regs
    }

    /// Execute every instruction of `program` in order.
    pub fn run(&mut self, program: &Program) -> Trace {
        let entries = program
            .instructions()
            .iter()
            .enumerate()
            .map(|(index, ins)| TraceEntry {
                index,
                outcome: self.execute(ins),
                flags: self.regs.flags(),
            })
            .collect();
        Trace { entries }
    }

    /// Execute one instruction.
    pub fn execute(&mut self, ins: &Instruction) -> ExecOutcome {
        let outcome = match ins.op {
            Mnemonic::Mov => self.mov(ins),
            Mnemonic::Add => self.arith(ins, Arith::Add),
            Mnemonic::Sub => self.arith(ins, Arith::Sub),
            Mnemonic::Cmp => self.arith(ins, Arith::Cmp),
            _ => ExecOutcome::Skipped(SkipReason::UnsupportedOpcode),
        };
        match outcome {
            ExecOutcome::Executed => log(LogCategory::Emulator, LogLevel::Trace, || {
                format!("{} {:?} -> flags {:#06X}", ins.name, ins.operands, self.regs.flags().bits())
            }),
            ExecOutcome::Skipped(reason) => log(LogCategory::Stubs, LogLevel::Warn, || {
                format!("ignoring instruction {}: {:?}", ins.name, reason)
            }),
        }
        outcome
    }

    /// Map an operand to a register location, if it names one.
    fn locate(operand: Option<&Operand>, wide: bool) -> Option<Location> {
        match operand? {
            Operand::Register(reg) => Some(Location::Register(*reg)),
            Operand::Accumulator => Some(Location::Register(Register::accumulator(wide))),
            Operand::SegmentRegister(sr) => Some(Location::Segment(*sr)),
            _ => None,
        }
    }

    fn read(&self, loc: Location) -> u16 {
        match loc {
            Location::Register(reg) => self.regs.read(reg),
            Location::Segment(sr) => self.regs.read_segment(sr),
        }
    }

    fn write(&mut self, loc: Location, val: u16) {
        match loc {
            Location::Register(reg) => self.regs.write(reg, val),
            Location::Segment(sr) => self.regs.write_segment(sr, val),
        }
    }

    /// Source value, truncated to the operation width.
    fn source_value(&self, ins: &Instruction, width: Width) -> Option<u16> {
        let raw = match ins.source()? {
            Operand::Immediate(imm) => *imm as u16,
            other => self.read(Self::locate(Some(other), ins.flags.wide)?),
        };
        Some(raw & width.mask)
    }

    fn mov(&mut self, ins: &Instruction) -> ExecOutcome {
        let width = Width::new(ins.flags.wide);
        let (Some(dest), Some(val)) = (
            Self::locate(ins.destination(), ins.flags.wide),
            self.source_value(ins, width),
        ) else {
            return ExecOutcome::Skipped(SkipReason::UnsupportedOperand);
        };
        self.write(dest, val);
        ExecOutcome::Executed
    }

    fn arith(&mut self, ins: &Instruction, kind: Arith) -> ExecOutcome {
        let width = Width::new(ins.flags.wide);
        // Arithmetic never targets a segment register
        let dest = match Self::locate(ins.destination(), ins.flags.wide) {
            Some(loc @ Location::Register(_)) => loc,
            _ => return ExecOutcome::Skipped(SkipReason::UnsupportedOperand),
        };
        let Some(b) = self.source_value(ins, width) else {
            return ExecOutcome::Skipped(SkipReason::UnsupportedOperand);
        };
        let a = self.read(dest) & width.mask;

        let result = match kind {
            Arith::Add => self.update_flags_add(a, b, width),
            Arith::Sub | Arith::Cmp => self.update_flags_sub(a, b, width),
        };
        if kind != Arith::Cmp {
            self.write(dest, result);
        }
        ExecOutcome::Executed
    }

    /// ZF, SF and PF from a width-truncated result
    fn update_flags_result(&mut self, result: u16, width: Width) {
        self.regs.set_flag(Flag::ZF, result == 0);
        self.regs.set_flag(Flag::SF, (result & width.sign) != 0);
        self.regs.set_flag(Flag::PF, calc_parity(result));
    }

    /// Flags for `a + b`; returns the truncated sum.
    fn update_flags_add(&mut self, a: u16, b: u16, width: Width) -> u16 {
        let result = a.wrapping_add(b) & width.mask;
        let carry = u32::from(a) + u32::from(b) > u32::from(width.mask);
        let overflow = ((a ^ result) & (b ^ result) & width.sign) != 0;
        let aux_carry = (a & 0xF) + (b & 0xF) > 0xF;

        self.update_flags_result(result, width);
        self.regs.set_flag(Flag::CF, carry);
        self.regs.set_flag(Flag::OF, overflow);
        self.regs.set_flag(Flag::AF, aux_carry);
        result
    }

    /// Flags for `a - b`; returns the truncated difference.
    fn update_flags_sub(&mut self, a: u16, b: u16, width: Width) -> u16 {
        let result = a.wrapping_sub(b) & width.mask;
        let borrow = b > a;
        let overflow = ((a ^ b) & (a ^ result) & width.sign) != 0;
        let aux_borrow = (b & 0xF) > (a & 0xF);

        self.update_flags_result(result, width);
        self.regs.set_flag(Flag::CF, borrow);
        self.regs.set_flag(Flag::OF, overflow);
        self.regs.set_flag(Flag::AF, aux_borrow);
        result
    }

    /// Snapshot of the session as JSON.
    pub fn save_state(&self) -> Value {
        serde_json::json!({
            "version": 1,
            "registers": self.regs,
        })
    }

    /// Restore registers from [`Emulator::save_state`] output.
    pub fn load_state(&mut self, state: &Value) -> Result<(), serde_json::Error> {
        if let Some(regs) = state.get("registers") {
            self.regs = serde_json::from_value(regs.clone())?;
        }
        Ok(())
    }
}
