//! Direct interpreter: executes a decomposed function against the CPU model
//! one 6502 instruction at a time, with no IR in between. Used as the
//! fallback execution mode and as the oracle the differential tests compare
//! generated bodies against, so it is deliberately a second, independent
//! reading of the per-opcode semantics rather than a thin wrapper over the
//! converter.
//!
//! A monolithic opcode match in the style of a typical single-pass 6502
//! interpreter, restated against this crate's `Hal`/`Bus`.

use std::collections::HashMap;
use std::rc::Rc;

use crate::cpu::Hal;
use crate::decompose::decompose;
use crate::disasm::{AddressingMode, DisassembledInstruction, Mnemonic};
use crate::error::EmulatorError;
use crate::ir::FlagName;

enum Step {
    Fallthrough,
    Branch(u16),
    Exit(u16),
}

/// Decomposes and interprets the function at `entry` to completion,
/// returning the next 6502 address the driver should dispatch to.
pub fn run(hal: &mut Hal, entry: u16) -> Result<u16, EmulatorError> {
    let func = decompose(&hal.bus, entry)?;
    let addrs = Rc::new(func.instruction_byte_addresses());
    let index: HashMap<u16, usize> = func
        .instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| (instr.cpu_address, i))
        .collect();

    hal.enter_function(addrs.clone());
    let mut pc = *index.get(&entry).ok_or_else(|| EmulatorError::Structural {
        address: entry,
        reason: "entry address is not the start of its own decomposed function".to_string(),
    })?;

    let result = loop {
        if let Some(vector) = hal.poll_for_interrupt() {
            let instr = &func.instructions[pc];
            let continuation = instr.cpu_address;
            hal.push((continuation >> 8) as u8);
            hal.push(continuation as u8);
            hal.push(hal.registers.P.to_byte());
            hal.set_flag(FlagName::InterruptDisable, true);
            hal.leave_function();
            let resume = run(hal, vector)?;
            hal.enter_function(addrs.clone());
            match index.get(&resume) {
                Some(&i) => {
                    pc = i;
                    continue;
                }
                None => break Ok(resume),
            }
        }

        let instr = func.instructions[pc].clone();
        let step = execute_one(hal, &instr, &addrs)?;

        match step {
            Step::Fallthrough => match index.get(&instr.next_addr()) {
                Some(&i) => pc = i,
                None => break Ok(instr.next_addr()),
            },
            Step::Branch(addr) => match index.get(&addr) {
                Some(&i) => pc = i,
                None => break Ok(addr),
            },
            Step::Exit(addr) => break Ok(addr),
        }
    };

    hal.leave_function();
    result
}

fn effective_address(hal: &mut Hal, instr: &DisassembledInstruction) -> u16 {
    use AddressingMode::*;
    match instr.mode {
        ZeroPage => instr.operand_u8() as u16,
        ZeroPageX => instr.operand_u8().wrapping_add(hal.x()) as u16,
        ZeroPageY => instr.operand_u8().wrapping_add(hal.y()) as u16,
        Absolute => instr.operand_u16(),
        AbsoluteX => instr.operand_u16().wrapping_add(hal.x() as u16),
        AbsoluteY => instr.operand_u16().wrapping_add(hal.y() as u16),
        IndexedIndirect => {
            let ptr = instr.operand_u8().wrapping_add(hal.x());
            let lo = hal.read_memory(ptr as u16) as u16;
            let hi = hal.read_memory(ptr.wrapping_add(1) as u16) as u16;
            (hi << 8) | lo
        }
        IndirectIndexed => {
            let lo = hal.read_memory(instr.operand_u8() as u16) as u16;
            let hi = hal.read_memory(instr.operand_u8().wrapping_add(1) as u16) as u16;
            let ptr = (hi << 8) | lo;
            ptr.wrapping_add(hal.y() as u16)
        }
        _ => unreachable!("effective_address called for a mode with no memory operand"),
    }
}

fn read_operand(hal: &mut Hal, instr: &DisassembledInstruction) -> u8 {
    match instr.mode {
        AddressingMode::Accumulator => hal.a(),
        AddressingMode::Immediate => instr.operand_u8(),
        _ => {
            let addr = effective_address(hal, instr);
            hal.read_memory(addr)
        }
    }
}

/// Writes `value` back to the instruction's operand. Returns the written
/// address for the caller's bailout check (`None` for Accumulator mode).
fn write_operand(hal: &mut Hal, instr: &DisassembledInstruction, value: u8) -> Option<u16> {
    match instr.mode {
        AddressingMode::Accumulator => {
            hal.set_a(value);
            None
        }
        _ => {
            let addr = effective_address(hal, instr);
            hal.write_memory(addr, value);
            Some(addr)
        }
    }
}

fn set_zn(hal: &mut Hal, value: u8) {
    hal.set_flag(FlagName::Zero, value == 0);
    hal.set_flag(FlagName::Negative, value & 0x80 != 0);
}

fn adc(hal: &mut Hal, m: u8) {
    let a = hal.a();
    let carry_in = hal.flag(FlagName::Carry) as u16;
    let sum = a as u16 + m as u16 + carry_in;
    let r = sum as u8;
    let overflow = (a ^ r) & (m ^ r) & 0x80 != 0;
    hal.set_flag(FlagName::Carry, sum > 0xFF);
    hal.set_flag(FlagName::Overflow, overflow);
    hal.set_a(r);
    set_zn(hal, r);
}

/// `SBC(A, M, C) == ADC(A, !M, C)`: same adder, byte-complemented operand.
fn sbc(hal: &mut Hal, m: u8) {
    adc(hal, !m);
}

fn compare(hal: &mut Hal, reg_value: u8, m: u8) {
    let diff = reg_value.wrapping_sub(m);
    hal.set_flag(FlagName::Carry, reg_value >= m);
    hal.set_flag(FlagName::Zero, diff == 0);
    hal.set_flag(FlagName::Negative, diff & 0x80 != 0);
}

fn checked_bailout(hal: &Hal, written: Option<u16>) -> Option<u16> {
    written.filter(|addr| hal.on_memory_written(*addr))
}

fn execute_one(
    hal: &mut Hal,
    instr: &DisassembledInstruction,
    func_addrs: &Rc<std::collections::HashSet<u16>>,
) -> Result<Step, EmulatorError> {
    use Mnemonic::*;

    match instr.mnemonic {
        LDA => {
            let v = read_operand(hal, instr);
            hal.set_a(v);
            set_zn(hal, v);
        }
        LDX => {
            let v = read_operand(hal, instr);
            hal.set_x(v);
            set_zn(hal, v);
        }
        LDY => {
            let v = read_operand(hal, instr);
            hal.set_y(v);
            set_zn(hal, v);
        }
        STA => {
            let written = write_operand(hal, instr, hal.a());
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        STX => {
            let written = write_operand(hal, instr, hal.x());
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        STY => {
            let written = write_operand(hal, instr, hal.y());
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        ADC => adc(hal, read_operand(hal, instr)),
        SBC => sbc(hal, read_operand(hal, instr)),
        AND => {
            let v = hal.a() & read_operand(hal, instr);
            hal.set_a(v);
            set_zn(hal, v);
        }
        ORA => {
            let v = hal.a() | read_operand(hal, instr);
            hal.set_a(v);
            set_zn(hal, v);
        }
        EOR => {
            let v = hal.a() ^ read_operand(hal, instr);
            hal.set_a(v);
            set_zn(hal, v);
        }
        CMP => compare(hal, hal.a(), read_operand(hal, instr)),
        CPX => compare(hal, hal.x(), read_operand(hal, instr)),
        CPY => compare(hal, hal.y(), read_operand(hal, instr)),
        ASL => {
            let v = read_operand(hal, instr);
            hal.set_flag(FlagName::Carry, v & 0x80 != 0);
            let r = v << 1;
            let written = write_operand(hal, instr, r);
            set_zn(hal, r);
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        LSR => {
            let v = read_operand(hal, instr);
            hal.set_flag(FlagName::Carry, v & 1 != 0);
            let r = v >> 1;
            let written = write_operand(hal, instr, r);
            set_zn(hal, r);
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        ROL => {
            let v = read_operand(hal, instr);
            let old_carry = hal.flag(FlagName::Carry) as u8;
            hal.set_flag(FlagName::Carry, v & 0x80 != 0);
            let r = (v << 1) | old_carry;
            let written = write_operand(hal, instr, r);
            set_zn(hal, r);
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        ROR => {
            let v = read_operand(hal, instr);
            let old_carry = hal.flag(FlagName::Carry) as u8;
            hal.set_flag(FlagName::Carry, v & 1 != 0);
            let r = (v >> 1) | (old_carry << 7);
            let written = write_operand(hal, instr, r);
            set_zn(hal, r);
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        BIT => {
            let m = read_operand(hal, instr);
            hal.set_flag(FlagName::Zero, hal.a() & m == 0);
            hal.set_flag(FlagName::Negative, m & 0x80 != 0);
            hal.set_flag(FlagName::Overflow, m & 0x40 != 0);
        }
        INC => {
            let r = read_operand(hal, instr).wrapping_add(1);
            let written = write_operand(hal, instr, r);
            set_zn(hal, r);
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        DEC => {
            let r = read_operand(hal, instr).wrapping_sub(1);
            let written = write_operand(hal, instr, r);
            set_zn(hal, r);
            if checked_bailout(hal, written).is_some() {
                return Ok(Step::Exit(instr.next_addr()));
            }
        }
        INX => {
            let r = hal.x().wrapping_add(1);
            hal.set_x(r);
            set_zn(hal, r);
        }
        INY => {
            let r = hal.y().wrapping_add(1);
            hal.set_y(r);
            set_zn(hal, r);
        }
        DEX => {
            let r = hal.x().wrapping_sub(1);
            hal.set_x(r);
            set_zn(hal, r);
        }
        DEY => {
            let r = hal.y().wrapping_sub(1);
            hal.set_y(r);
            set_zn(hal, r);
        }
        BCC => return Ok(branch(instr, !hal.flag(FlagName::Carry))),
        BCS => return Ok(branch(instr, hal.flag(FlagName::Carry))),
        BEQ => return Ok(branch(instr, hal.flag(FlagName::Zero))),
        BNE => return Ok(branch(instr, !hal.flag(FlagName::Zero))),
        BMI => return Ok(branch(instr, hal.flag(FlagName::Negative))),
        BPL => return Ok(branch(instr, !hal.flag(FlagName::Negative))),
        BVC => return Ok(branch(instr, !hal.flag(FlagName::Overflow))),
        BVS => return Ok(branch(instr, hal.flag(FlagName::Overflow))),
        JMP => {
            if matches!(instr.mode, AddressingMode::Indirect) {
                let target = instr.target_address.unwrap_or(0);
                return Ok(Step::Exit(target));
            }
            return Ok(Step::Branch(instr.target_address.unwrap_or(0)));
        }
        JSR => {
            let target = instr.target_address.ok_or_else(|| EmulatorError::Structural {
                address: instr.cpu_address,
                reason: "JSR has no target address".to_string(),
            })?;
            let ret = instr.next_addr().wrapping_sub(1);
            hal.push((ret >> 8) as u8);
            hal.push(ret as u8);
            hal.leave_function();
            let resume = run(hal, target)?;
            hal.enter_function(func_addrs.clone());
            if resume != instr.next_addr() {
                // The callee was diverted by a BRK dispatched to the
                // interrupt vector rather than returning via RTS; bubble
                // the diversion up instead of resuming here as if it had.
                return Ok(Step::Exit(resume));
            }
        }
        RTS => {
            let lo = hal.pop() as u16;
            let hi = hal.pop() as u16;
            let addr = (((hi << 8) | lo).wrapping_add(1)) as u16;
            return Ok(Step::Exit(addr));
        }
        BRK => {
            let ret = instr.cpu_address.wrapping_add(2);
            hal.push((ret >> 8) as u8);
            hal.push(ret as u8);
            hal.push(hal.registers.P.to_pushed_byte());
            hal.set_flag(FlagName::InterruptDisable, true);
            let lo = hal.read_memory(0xFFFE) as u16;
            let hi = hal.read_memory(0xFFFF) as u16;
            return Ok(Step::Exit((hi << 8) | lo));
        }
        RTI => {
            let status = hal.pop();
            hal.set_status_byte(status);
            let lo = hal.pop() as u16;
            let hi = hal.pop() as u16;
            return Ok(Step::Exit((hi << 8) | lo));
        }
        CLC => hal.set_flag(FlagName::Carry, false),
        SEC => hal.set_flag(FlagName::Carry, true),
        CLI => hal.set_flag(FlagName::InterruptDisable, false),
        SEI => hal.set_flag(FlagName::InterruptDisable, true),
        CLV => hal.set_flag(FlagName::Overflow, false),
        CLD => hal.set_flag(FlagName::Decimal, false),
        SED => hal.set_flag(FlagName::Decimal, true),
        TAX => {
            hal.set_x(hal.a());
            set_zn(hal, hal.a());
        }
        TAY => {
            hal.set_y(hal.a());
            set_zn(hal, hal.a());
        }
        TXA => {
            hal.set_a(hal.x());
            set_zn(hal, hal.x());
        }
        TYA => {
            hal.set_a(hal.y());
            set_zn(hal, hal.y());
        }
        TSX => {
            hal.set_x(hal.sp());
            set_zn(hal, hal.sp());
        }
        TXS => hal.set_sp(hal.x()),
        PHA => hal.push(hal.a()),
        PHP => hal.push(hal.registers.P.to_pushed_byte()),
        PLA => {
            let v = hal.pop();
            hal.set_a(v);
            set_zn(hal, v);
        }
        PLP => {
            let v = hal.pop();
            hal.set_status_byte(v);
        }
        NOP => {}
    }

    Ok(Step::Fallthrough)
}

fn branch(instr: &DisassembledInstruction, taken: bool) -> Step {
    if taken {
        Step::Branch(instr.target_address.unwrap_or(instr.next_addr()))
    } else {
        Step::Fallthrough
    }
}
