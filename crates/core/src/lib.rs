//! 8086 instruction decoder and register-level emulator.
//!
//! [`decoder::decode`] turns a raw byte stream into a [`Program`] (instruction
//! sequence plus branch label table). An [`Emulator`] then executes the
//! register forms of mov/add/sub/cmp over it, tracking flags exactly.
//! [`listing`] renders both as text.

pub mod decoder;
pub mod emulator;
pub mod instruction;
pub mod instruction_table;
pub mod listing;
pub mod logging;
pub mod registers;

pub use decoder::{decode, DecodeError};
pub use emulator::{Emulator, ExecOutcome, SkipReason, Trace, TraceEntry};
pub use instruction::{AddressBase, Instruction, InstructionFlags, LabelTable, Operand, Program};
pub use registers::{Flag, Flags, Register, RegisterFile, SegmentRegister};
