//! Text rendering of decoded programs, traces and register state.
//!
//! Output is NASM-flavoured: a `bits 16` header, one instruction per line,
//! branch targets named `label<N>` by ordinal.

use crate::emulator::Trace;
use crate::instruction::{branch_target, Instruction, LabelTable, Operand, Program};
use crate::instruction_table::Mnemonic;
use crate::registers::{Flags, Register, RegisterFile, SegmentRegister};
use std::fmt;

/// Word registers in dump order.
const DUMP_ORDER: [Register; 8] = [
    Register::AX,
    Register::BX,
    Register::CX,
    Register::DX,
    Register::SP,
    Register::BP,
    Register::SI,
    Register::DI,
];

struct OperandText<'a> {
    operand: &'a Operand,
    wide: bool,
    index: usize,
    labels: &'a LabelTable,
    width_specifier: bool,
}

impl fmt::Display for OperandText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = if self.wide { "word" } else { "byte" };
        match *self.operand {
            Operand::Immediate(imm) => write!(f, "{}", imm),
            Operand::Accumulator => f.write_str(Register::accumulator(self.wide).name()),
            Operand::Register(reg) => f.write_str(reg.name()),
            Operand::SegmentRegister(sr) => f.write_str(sr.name()),
            Operand::EffectiveAddress {
                base,
                displacement,
                segment,
            } => {
                if self.width_specifier {
                    write!(f, "{} ", size)?;
                }
                if let Some(sr) = segment {
                    write!(f, "{}:", sr)?;
                }
                write!(f, "[{}", base.name())?;
                if displacement > 0 {
                    write!(f, " + {}", displacement)?;
                } else if displacement < 0 {
                    write!(f, " - {}", displacement.unsigned_abs())?;
                }
                f.write_str("]")
            }
            Operand::DirectAccess { address, segment } => {
                if self.width_specifier {
                    write!(f, "{} ", size)?;
                }
                if let Some(sr) = segment {
                    write!(f, "{}:", sr)?;
                }
                write!(f, "[{}]", address)
            }
            Operand::FarProc { ip, cs } => write!(f, "{}:{}", cs, ip),
            Operand::Label(offset) => {
                match self.labels.get(branch_target(self.index, offset)) {
                    Some(ordinal) => write!(f, "label{}", ordinal),
                    // Only reachable with a label table from another program
                    None => f.write_str("label?"),
                }
            }
        }
    }
}

/// One instruction as assembly text, without any label definition.
pub struct InstructionText<'a> {
    pub instruction: &'a Instruction,
    pub index: usize,
    pub labels: &'a LabelTable,
}

impl fmt::Display for InstructionText<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ins = self.instruction;
        if ins.flags.locked {
            f.write_str("lock ")?;
        }
        if ins.flags.repeated {
            f.write_str("rep ")?;
        }
        f.write_str(ins.name)?;
        if ins.flags.string_op {
            f.write_str(if ins.flags.wide { "w" } else { "b" })?;
        }
        let [first, second] = &ins.operands;
        if ins.flags.far && !matches!(first, Some(Operand::FarProc { .. })) {
            f.write_str(" far")?;
        }

        // Memory operands need an explicit size unless a register fixes it
        let sized = !matches!(ins.op, Mnemonic::Call | Mnemonic::Jmp);
        let immediate_or_absent = |op: &Option<Operand>| matches!(op, None | Some(Operand::Immediate(_)));

        if let Some(op) = first {
            let text = OperandText {
                operand: op,
                wide: ins.flags.wide,
                index: self.index,
                labels: self.labels,
                width_specifier: sized && immediate_or_absent(second),
            };
            write!(f, " {}", text)?;
        }
        if let Some(op) = second {
            let text = OperandText {
                operand: op,
                wide: ins.flags.wide,
                index: self.index,
                labels: self.labels,
                width_specifier: sized && matches!(first, Some(Operand::Immediate(_))),
            };
            write!(f, ", {}", text)?;
        }
        Ok(())
    }
}

/// Full program listing with label definitions.
pub struct Listing<'a>(pub &'a Program);

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.0;
        let labels = program.labels();
        let len = program.len() as i64;

        writeln!(f, "bits 16")?;
        for (target, ordinal) in labels.iter() {
            if target < 0 {
                writeln!(f, "label{}:", ordinal)?;
            }
        }
        for (index, ins) in program.instructions().iter().enumerate() {
            writeln!(
                f,
                "{}",
                InstructionText {
                    instruction: ins,
                    index,
                    labels,
                }
            )?;
            // A label keyed to an index is defined right after that instruction
            if let Some(ordinal) = labels.get(index as i64) {
                writeln!(f, "label{}:", ordinal)?;
            }
        }
        for (target, ordinal) in labels.iter() {
            if target >= len {
                writeln!(f, "label{}:", ordinal)?;
            }
        }
        Ok(())
    }
}

/// `flags:` followed by each set flag name, high bit first.
pub struct FlagsText(pub Flags);

impl fmt::Display for FlagsText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("flags:")?;
        for flag in self.0.iter() {
            write!(f, " {}", flag.name())?;
        }
        Ok(())
    }
}

/// Register dump: word registers, segment registers, flags.
pub struct RegisterDump<'a>(pub &'a RegisterFile);

impl fmt::Display for RegisterDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let regs = self.0;
        for reg in DUMP_ORDER {
            writeln!(f, "{} -> {:04x}", reg, regs.read(reg))?;
        }
        for sr in SegmentRegister::ALL {
            writeln!(f, "{} -> {:04x}", sr, regs.read_segment(sr))?;
        }
        write!(f, "{}", FlagsText(regs.flags()))
    }
}

pub fn render_instruction(ins: &Instruction, index: usize, labels: &LabelTable) -> String {
    InstructionText {
        instruction: ins,
        index,
        labels,
    }
    .to_string()
}

pub fn render_listing(program: &Program) -> String {
    Listing(program).to_string()
}

pub fn render_registers(regs: &RegisterFile) -> String {
    RegisterDump(regs).to_string()
}

/// One line per trace entry: instruction text, then the flags after it ran.
pub fn render_trace(program: &Program, trace: &Trace) -> String {
    let mut out = String::new();
    for entry in &trace.entries {
        if let Some(ins) = program.instructions().get(entry.index) {
            out.push_str(&render_instruction(ins, entry.index, program.labels()));
            out.push_str(" ; ");
            out.push_str(&FlagsText(entry.flags).to_string());
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::emulator::Emulator;
    use crate::registers::Flag;

    fn lines(bytes: &[u8]) -> Vec<String> {
        let program = decode(bytes).expect("decode");
        program
            .instructions()
            .iter()
            .enumerate()
            .map(|(i, ins)| render_instruction(ins, i, program.labels()))
            .collect()
    }

    #[test]
    fn test_register_and_immediate_forms() {
        assert_eq!(
            lines(&[0x89, 0xD9, 0xB1, 0x0C, 0xB9, 0xF4, 0xFF, 0x8E, 0xD8]),
            vec!["mov cx, bx", "mov cl, 12", "mov cx, -12", "mov ds, ax"]
        );
    }

    #[test]
    fn test_memory_forms() {
        assert_eq!(
            lines(&[
                0x8A, 0x60, 0x04, // mov ah, [bx + si + 4]
                0x8B, 0x41, 0xDB, // mov ax, [bx + di - 37]
                0x8B, 0x2E, 0x05, 0x00, // mov bp, [5]
                0x89, 0x13, // mov [bp + di], dx
            ]),
            vec![
                "mov ah, [bx + si + 4]",
                "mov ax, [bx + di - 37]",
                "mov bp, [5]",
                "mov [bp + di], dx",
            ]
        );
    }

    #[test]
    fn test_width_specifiers() {
        assert_eq!(
            lines(&[
                0xC6, 0x03, 0x07, // mov byte [bp + di], 7
                0xC7, 0x85, 0x85, 0x03, 0x5B, 0x01, // mov word [di + 901], 347
                0xFF, 0x07, // inc word [bx]
                0xFF, 0x17, // call [bx]
            ]),
            vec![
                "mov byte [bp + di], 7",
                "mov word [di + 901], 347",
                "inc word [bx]",
                "call [bx]",
            ]
        );
    }

    #[test]
    fn test_segment_override_rendering() {
        assert_eq!(
            lines(&[0x26, 0x8B, 0x07, 0x2E, 0xA1, 0x10, 0x00]),
            vec!["mov ax, es:[bx]", "mov ax, cs:[16]"]
        );
    }

    #[test]
    fn test_prefixes_and_string_ops() {
        assert_eq!(
            lines(&[0xF3, 0xA5, 0xF0, 0xFE, 0x07, 0xAC]),
            vec!["rep movsw", "lock inc byte [bx]", "lodsb"]
        );
    }

    #[test]
    fn test_far_forms() {
        assert_eq!(
            lines(&[0x9A, 0xC8, 0x01, 0x7B, 0x00, 0xFF, 0x1F, 0xEA, 0x22, 0x00, 0x15, 0x03]),
            vec!["call 123:456", "call far [bx]", "jmp 789:34"]
        );
    }

    #[test]
    fn test_ports_and_esc() {
        assert_eq!(
            lines(&[0xE4, 0xC8, 0xE7, 0x2C, 0xEC, 0xEF, 0xD8, 0x07]),
            vec!["in al, 200", "out 44, ax", "in al, dx", "out dx, ax", "esc 0, byte [bx]"]
        );
    }

    #[test]
    fn test_listing_places_label_after_key_instruction() {
        // nop ; nop ; jne -2 -> target 2 + (-2 >> 1) = 1
        let program = decode(&[0x90, 0x90, 0x75, 0xFE]).expect("decode");
        assert_eq!(
            render_listing(&program),
            "bits 16\nnop\nnop\nlabel0:\njne label0\n"
        );
    }

    #[test]
    fn test_listing_labels_outside_range() {
        // jne -2 at index 0 targets -1; jmp +6 at index 1 targets 4
        let program = decode(&[0x75, 0xFE, 0xEB, 0x06]).expect("decode");
        assert_eq!(
            render_listing(&program),
            "bits 16\nlabel0:\njne label0\njmp label1\nlabel1:\n"
        );
    }

    #[test]
    fn test_register_dump() {
        let mut regs = RegisterFile::new();
        regs.write(Register::AX, 0x0001);
        regs.write(Register::DI, 0xBEEF);
        regs.write_segment(SegmentRegister::SS, 0x1234);
        regs.set_flag(Flag::ZF, true);
        regs.set_flag(Flag::PF, true);
        let dump = render_registers(&regs);
        let expected = "ax -> 0001\nbx -> 0000\ncx -> 0000\ndx -> 0000\nsp -> 0000\n\
                        bp -> 0000\nsi -> 0000\ndi -> beef\nes -> 0000\ncs -> 0000\n\
                        ss -> 1234\nds -> 0000\nflags: ZF PF";
        assert_eq!(dump, expected);
    }

    #[test]
    fn test_trace_lines() {
        // mov ax, 1 ; sub ax, 1
        let program = decode(&[0xB8, 0x01, 0x00, 0x2D, 0x01, 0x00]).expect("decode");
        let mut emu = Emulator::new();
        let trace = emu.run(&program);
        assert_eq!(
            render_trace(&program, &trace),
            "mov ax, 1 ; flags:\nsub ax, 1 ; flags: ZF PF\n"
        );
    }
}
