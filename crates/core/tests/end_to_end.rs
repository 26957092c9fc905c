//! Decode -> render -> execute over hand-assembled byte streams

use emu86_core::listing::{render_listing, render_registers, render_trace};
use emu86_core::{
    decode, AddressBase, DecodeError, Emulator, ExecOutcome, Flag, Instruction, Operand, Register,
    SegmentRegister,
};

/// Re-encode a mov r/m,reg / reg,r/m instruction from its decoded operands.
fn encode_mov(ins: &Instruction) -> Vec<u8> {
    let w = ins.flags.wide as u8;
    let (rm_operand, reg, d) = match (ins.operands[0], ins.operands[1]) {
        (Some(Operand::Register(dst)), Some(src)) if src.is_memory() => (src, dst, 1),
        (Some(dst), Some(Operand::Register(src))) => (dst, src, 0),
        other => panic!("not a mov r/m form: {:?}", other),
    };

    let mut bytes = vec![0x88 | (d << 1) | w];
    let reg_bits = reg.field() << 3;
    match rm_operand {
        Operand::Register(r) => bytes.push(0b11_000_000 | reg_bits | r.field()),
        Operand::DirectAccess { address, .. } => {
            bytes.push(reg_bits | 0b110);
            bytes.extend_from_slice(&address.to_le_bytes());
        }
        Operand::EffectiveAddress {
            base, displacement, ..
        } => {
            if displacement == 0 && base != AddressBase::Bp {
                bytes.push(reg_bits | base.field());
            } else if let Ok(disp) = i8::try_from(displacement) {
                bytes.push(0b01_000_000 | reg_bits | base.field());
                bytes.push(disp as u8);
            } else {
                bytes.push(0b10_000_000 | reg_bits | base.field());
                bytes.extend_from_slice(&displacement.to_le_bytes());
            }
        }
        other => panic!("unexpected r/m operand {:?}", other),
    }
    bytes
}

#[test]
fn test_mov_field_values_reencode() {
    let encodings: &[&[u8]] = &[
        &[0x89, 0xD9],             // mov cx, bx
        &[0x88, 0xE5],             // mov ch, ah
        &[0x8A, 0x00],             // mov al, [bx + si]
        &[0x8B, 0x1B],             // mov bx, [bp + di]
        &[0x8B, 0x56, 0x00],       // mov dx, [bp]
        &[0x8A, 0x60, 0x04],       // mov ah, [bx + si + 4]
        &[0x8A, 0x80, 0x87, 0x13], // mov al, [bx + si + 4999]
        &[0x89, 0x09],             // mov [bx + di], cx
        &[0x88, 0x0A],             // mov [bp + si], cl
        &[0x88, 0x6E, 0x00],       // mov [bp], ch
        &[0x8B, 0x41, 0xDB],       // mov ax, [bx + di - 37]
        &[0x89, 0x8C, 0xD4, 0xFE], // mov [si - 300], cx
        &[0x8B, 0x57, 0xE0],       // mov dx, [bx - 32]
        &[0x8B, 0x2E, 0x05, 0x00], // mov bp, [5]
        &[0x8B, 0x1E, 0x82, 0x0D], // mov bx, [3458]
        &[0x89, 0x85, 0x00, 0x80], // mov [di - 32768], ax
        &[0x89, 0x85, 0xFF, 0x7F], // mov [di + 32767], ax
    ];

    for bytes in encodings {
        let program = decode(bytes).expect("decode");
        assert_eq!(program.len(), 1);
        assert_eq!(&encode_mov(&program.instructions()[0]), bytes);
    }
}

#[test]
fn test_listing_of_mixed_program() {
    let bytes = [
        0xB9, 0x03, 0x00, // mov cx, 3
        0xBB, 0xE8, 0x03, // mov bx, 1000
        0x83, 0xC3, 0x0A, // add bx, 10
        0x83, 0xE9, 0x01, // sub cx, 1
        0x75, 0xFA, // jne -6 -> index 4 + (-3) = 1
        0x26, 0x8B, 0x47, 0x04, // mov ax, es:[bx + 4]
    ];
    let program = decode(&bytes).expect("decode");
    let expected = "bits 16\n\
                    mov cx, 3\n\
                    mov bx, 1000\n\
                    label0:\n\
                    add bx, 10\n\
                    sub cx, 1\n\
                    jne label0\n\
                    mov ax, es:[bx + 4]\n";
    assert_eq!(render_listing(&program), expected);
}

#[test]
fn test_register_program_final_state() {
    let bytes = [
        0xBB, 0x03, 0xF0, // mov bx, -4093
        0xB9, 0x01, 0x0F, // mov cx, 3841
        0x29, 0xCB, // sub bx, cx
        0xBC, 0xE6, 0x03, // mov sp, 998
        0xBD, 0xE7, 0x03, // mov bp, 999
        0x39, 0xE5, // cmp bp, sp
        0x81, 0xC5, 0x03, 0x04, // add bp, 1027
        0x81, 0xED, 0xEA, 0x07, // sub bp, 2026
    ];
    let program = decode(&bytes).expect("decode");
    let mut emu = Emulator::new();
    let trace = emu.run(&program);

    assert_eq!(trace.executed(), program.len());
    let regs = emu.registers();
    assert_eq!(regs.read(Register::BX), 0xE102);
    assert_eq!(regs.read(Register::CX), 0x0F01);
    assert_eq!(regs.read(Register::SP), 0x03E6);
    assert_eq!(regs.read(Register::BP), 0x0000);
    assert!(regs.test_flag(Flag::ZF));
    assert!(regs.test_flag(Flag::PF));
    assert!(!regs.test_flag(Flag::CF));

    let dump = render_registers(regs);
    assert!(dump.starts_with("ax -> 0000\nbx -> e102\ncx -> 0f01\n"));
    assert!(dump.ends_with("flags: ZF PF"));

    let trace_text = render_trace(&program, &trace);
    assert_eq!(trace_text.lines().count(), program.len());
    assert!(trace_text.starts_with("mov bx, -4093 ; flags:\n"));
    assert!(trace_text.contains("sub bx, cx ; flags: SF\n"));
}

#[test]
fn test_segment_and_byte_registers() {
    let bytes = [
        0xB8, 0x22, 0x22, // mov ax, 0x2222
        0x8E, 0xD8, // mov ds, ax
        0x8C, 0xDB, // mov bx, ds
        0xB3, 0x11, // mov bl, 0x11
        0xB7, 0x33, // mov bh, 0x33
        0x8E, 0xC3, // mov es, bx
    ];
    let program = decode(&bytes).expect("decode");
    let regs = {
        let mut emu = Emulator::new();
        emu.run(&program);
        emu.into_registers()
    };
    assert_eq!(regs.read_segment(SegmentRegister::DS), 0x2222);
    assert_eq!(regs.read(Register::BX), 0x3311);
    assert_eq!(regs.read_segment(SegmentRegister::ES), 0x3311);
}

#[test]
fn test_skipped_instructions_do_not_disturb_state() {
    let bytes = [
        0xB8, 0x05, 0x00, // mov ax, 5
        0x89, 0x07, // mov [bx], ax
        0x40, // inc ax
        0xF3, 0xA4, // rep movsb
        0x2D, 0x05, 0x00, // sub ax, 5
    ];
    let program = decode(&bytes).expect("decode");
    let mut emu = Emulator::new();
    let trace = emu.run(&program);

    let outcomes: Vec<bool> = trace
        .entries
        .iter()
        .map(|e| e.outcome == ExecOutcome::Executed)
        .collect();
    assert_eq!(outcomes, vec![true, false, false, false, true]);
    assert_eq!(trace.entries[1].flags, trace.entries[0].flags);
    assert_eq!(emu.registers().read(Register::AX), 0);
    assert!(emu.registers().test_flag(Flag::ZF));
}

#[test]
fn test_decode_error_stops_everything() {
    let err = decode(&[0xB8, 0x05, 0x00, 0xC0, 0xB8, 0x01, 0x00]).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::Unsupported {
            opcode: 0xC0,
            offset: 3,
            index: 1,
            ..
        }
    ));
    assert!(err.to_string().contains("0xC0"));
}

#[test]
fn test_state_snapshot_is_json() {
    let program = decode(&[0xB8, 0x34, 0x12, 0x2D, 0x35, 0x12]).expect("decode");
    let mut emu = Emulator::new();
    emu.run(&program);

    let state = emu.save_state();
    let text = serde_json::to_string_pretty(&state).expect("serialize");
    let parsed: serde_json::Value = serde_json::from_str(&text).expect("parse");

    let mut restored = Emulator::new();
    restored.load_state(&parsed).expect("load");
    assert_eq!(restored.registers().read(Register::AX), 0xFFFF);
    assert!(restored.registers().test_flag(Flag::CF));
}
