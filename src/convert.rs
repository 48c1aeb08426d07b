//! Instruction converter: lowers disassembled 6502 instructions into IR.
//!
//! The per-opcode flag math (ADC/SBC/shift/compare) follows the usual 6502
//! semantics found in any accurate emulator's opcode handlers, restructured
//! so every mnemonic produces a flat `IrBody` instead of mutating
//! `Registers` directly.

use crate::decompose::DecompiledFunction;
use crate::disasm::{AddressingMode, DisassembledInstruction, Mnemonic};
use crate::error::EmulatorError;
use crate::ir::{tag, BinOp, FlagName, IrBody, IrInstr, IrValue, Program, Reg, UnOp, VariableAllocator};

/// Lowers a whole decomposed function into a tagged IR program, plus the
/// number of local variable slots the generator/interpreter must reserve
/// (the widest single instruction's variable usage — variables never
/// outlive the instruction that allocated them, so slots are reused across
/// instruction boundaries rather than accumulated).
pub fn lower_function(func: &DecompiledFunction) -> Result<(Program, u32), EmulatorError> {
    let mut program = Program::new();
    let mut max_vars = 0u32;

    for instr in &func.instructions {
        if let Some(name) = func.labels.get(&instr.cpu_address) {
            program.push(tag(IrInstr::Label(name.clone()), instr.cpu_address, instr.next_addr()));
        }

        let mut vars = VariableAllocator::new();
        let body = convert_instruction(instr, func, &mut vars)?;
        max_vars = max_vars.max(vars.count());

        for ir in body {
            program.push(tag(ir, instr.cpu_address, instr.next_addr()));
        }
    }

    Ok((program, max_vars))
}

/// The operand an addressing mode reads from or writes to. Not meaningful
/// for `Indirect` (JMP only, handled specially) or `Relative` (branches,
/// handled specially).
fn addressing_operand(instr: &DisassembledInstruction) -> IrValue {
    match instr.mode {
        AddressingMode::Accumulator => IrValue::Register(Reg::A),
        AddressingMode::Immediate => IrValue::Constant(instr.operand_u8()),
        AddressingMode::ZeroPage => IrValue::zero_page(instr.operand_u8()),
        AddressingMode::ZeroPageX => IrValue::zero_page_indexed(instr.operand_u8(), Reg::X),
        AddressingMode::ZeroPageY => IrValue::zero_page_indexed(instr.operand_u8(), Reg::Y),
        AddressingMode::Absolute => IrValue::memory(instr.operand_u16()),
        AddressingMode::AbsoluteX => IrValue::absolute_indexed(instr.operand_u16(), Reg::X),
        AddressingMode::AbsoluteY => IrValue::absolute_indexed(instr.operand_u16(), Reg::Y),
        AddressingMode::IndexedIndirect => IrValue::IndirectMemory {
            zp: instr.operand_u8(),
            pre_indexed: true,
            post_indexed: false,
        },
        AddressingMode::IndirectIndexed => IrValue::IndirectMemory {
            zp: instr.operand_u8(),
            pre_indexed: false,
            post_indexed: true,
        },
        AddressingMode::Indirect | AddressingMode::Relative | AddressingMode::Implied => {
            unreachable!("addressing_operand called for a mode with no plain operand")
        }
    }
}

/// Appends the Zero/Negative flag derivation shared by loads, arithmetic,
/// transfers, and increments/decrements.
fn set_zn(body: &mut IrBody, value: IrValue) {
    body.push(IrInstr::Unary {
        dst: IrValue::Flag(FlagName::Zero),
        op: UnOp::IsZero,
        src: value.clone(),
    });
    body.push(IrInstr::Unary {
        dst: IrValue::Flag(FlagName::Negative),
        op: UnOp::Bit7,
        src: value,
    });
}

fn branch_target(
    instr: &DisassembledInstruction,
    func: &DecompiledFunction,
) -> Result<String, EmulatorError> {
    let addr = instr.target_address.ok_or_else(|| EmulatorError::Structural {
        address: instr.cpu_address,
        reason: "branch instruction has no target address".to_string(),
    })?;
    func.label_for(addr).map(str::to_string).ok_or_else(|| EmulatorError::Structural {
        address: instr.cpu_address,
        reason: format!("branch target {addr:#06X} has no label in this function"),
    })
}

pub fn convert_instruction(
    instr: &DisassembledInstruction,
    func: &DecompiledFunction,
    vars: &mut VariableAllocator,
) -> Result<IrBody, EmulatorError> {
    use Mnemonic::*;

    let mut body = IrBody::new();

    match instr.mnemonic {
        // -- loads -----------------------------------------------------
        LDA | LDX | LDY => {
            let dst = IrValue::Register(match instr.mnemonic {
                LDA => Reg::A,
                LDX => Reg::X,
                _ => Reg::Y,
            });
            let src = addressing_operand(instr);
            body.push(IrInstr::Copy { dst: dst.clone(), src });
            set_zn(&mut body, dst);
        }

        // -- stores ------------------------------------------------------
        STA | STX | STY => {
            let src = IrValue::Register(match instr.mnemonic {
                STA => Reg::A,
                STX => Reg::X,
                _ => Reg::Y,
            });
            let dst = addressing_operand(instr);
            body.push(IrInstr::Copy { dst, src });
        }

        // -- arithmetic: ADC / SBC ----------------------------------------
        ADC | SBC => {
            let m = addressing_operand(instr);
            let rhs = if matches!(instr.mnemonic, SBC) {
                // SBC(A, M, C) == ADC(A, !M, C): the same adder and overflow
                // circuitry is reused with the operand byte-complemented.
                let not_m = vars.alloc();
                body.push(IrInstr::Binary {
                    dst: not_m.clone(),
                    op: BinOp::Xor,
                    lhs: m,
                    rhs: IrValue::Constant(0xFF),
                });
                not_m
            } else {
                m
            };

            let partial = vars.alloc();
            body.push(IrInstr::Binary {
                dst: partial.clone(),
                op: BinOp::Add,
                lhs: IrValue::Register(Reg::A),
                rhs: rhs.clone(),
            });
            let sum = vars.alloc();
            body.push(IrInstr::Binary {
                dst: sum.clone(),
                op: BinOp::Add,
                lhs: partial,
                rhs: IrValue::Flag(FlagName::Carry),
            });
            // Carry-out must be read before the sum is truncated to a byte.
            body.push(IrInstr::Unary {
                dst: IrValue::Flag(FlagName::Carry),
                op: UnOp::Bit8,
                src: sum.clone(),
            });
            body.push(IrInstr::WrapValueToByte {
                var: sum.clone(),
                flag: Some(FlagName::Overflow),
                lhs: IrValue::Register(Reg::A),
                rhs,
                is_subtraction: matches!(instr.mnemonic, SBC),
            });
            body.push(IrInstr::Copy {
                dst: IrValue::Register(Reg::A),
                src: sum,
            });
            set_zn(&mut body, IrValue::Register(Reg::A));
        }

        // -- logical ---------------------------------------------------
        AND | ORA | EOR => {
            let m = addressing_operand(instr);
            let op = match instr.mnemonic {
                AND => BinOp::And,
                ORA => BinOp::Or,
                _ => BinOp::Xor,
            };
            let result = vars.alloc();
            body.push(IrInstr::Binary {
                dst: result.clone(),
                op,
                lhs: IrValue::Register(Reg::A),
                rhs: m,
            });
            body.push(IrInstr::Copy { dst: IrValue::Register(Reg::A), src: result });
            set_zn(&mut body, IrValue::Register(Reg::A));
        }

        // -- compare -------------------------------------------------------
        CMP | CPX | CPY => {
            let reg = IrValue::Register(match instr.mnemonic {
                CMP => Reg::A,
                CPX => Reg::X,
                _ => Reg::Y,
            });
            let m = addressing_operand(instr);
            let diff = vars.alloc();
            body.push(IrInstr::Binary {
                dst: diff.clone(),
                op: BinOp::Sub,
                lhs: reg.clone(),
                rhs: m.clone(),
            });
            // Negative must be tested on the byte-masked difference: a
            // two's-complement underflow (e.g. 0x00 - 0x01) sets high host
            // bits that bit 7 alone mustn't see.
            body.push(IrInstr::ConvertVariableToByte(diff.clone()));
            body.push(IrInstr::Unary {
                dst: IrValue::Flag(FlagName::Zero),
                op: UnOp::IsZero,
                src: diff.clone(),
            });
            body.push(IrInstr::Unary {
                dst: IrValue::Flag(FlagName::Negative),
                op: UnOp::Bit7,
                src: diff,
            });
            body.push(IrInstr::Binary {
                dst: IrValue::Flag(FlagName::Carry),
                op: BinOp::Uge,
                lhs: reg,
                rhs: m,
            });
        }

        // -- shifts/rotates --------------------------------------------
        ASL | LSR | ROL | ROR => {
            let val = addressing_operand(instr);
            let shifted = vars.alloc();
            match instr.mnemonic {
                ASL => {
                    body.push(IrInstr::Unary {
                        dst: IrValue::Flag(FlagName::Carry),
                        op: UnOp::Bit7,
                        src: val.clone(),
                    });
                    body.push(IrInstr::Binary {
                        dst: shifted.clone(),
                        op: BinOp::Shl,
                        lhs: val.clone(),
                        rhs: IrValue::Constant(1),
                    });
                    body.push(IrInstr::ConvertVariableToByte(shifted.clone()));
                }
                LSR => {
                    body.push(IrInstr::Unary {
                        dst: IrValue::Flag(FlagName::Carry),
                        op: UnOp::Bit0,
                        src: val.clone(),
                    });
                    body.push(IrInstr::Binary {
                        dst: shifted.clone(),
                        op: BinOp::Shr,
                        lhs: val.clone(),
                        rhs: IrValue::Constant(1),
                    });
                }
                ROL => {
                    let old_carry = vars.alloc();
                    body.push(IrInstr::Copy {
                        dst: old_carry.clone(),
                        src: IrValue::Flag(FlagName::Carry),
                    });
                    body.push(IrInstr::Unary {
                        dst: IrValue::Flag(FlagName::Carry),
                        op: UnOp::Bit7,
                        src: val.clone(),
                    });
                    let shl = vars.alloc();
                    body.push(IrInstr::Binary {
                        dst: shl.clone(),
                        op: BinOp::Shl,
                        lhs: val.clone(),
                        rhs: IrValue::Constant(1),
                    });
                    body.push(IrInstr::Binary {
                        dst: shifted.clone(),
                        op: BinOp::Or,
                        lhs: shl,
                        rhs: old_carry,
                    });
                    body.push(IrInstr::ConvertVariableToByte(shifted.clone()));
                }
                ROR => {
                    let old_carry = vars.alloc();
                    body.push(IrInstr::Copy {
                        dst: old_carry.clone(),
                        src: IrValue::Flag(FlagName::Carry),
                    });
                    body.push(IrInstr::Unary {
                        dst: IrValue::Flag(FlagName::Carry),
                        op: UnOp::Bit0,
                        src: val.clone(),
                    });
                    let shr = vars.alloc();
                    body.push(IrInstr::Binary {
                        dst: shr.clone(),
                        op: BinOp::Shr,
                        lhs: val.clone(),
                        rhs: IrValue::Constant(1),
                    });
                    let carry_hi = vars.alloc();
                    body.push(IrInstr::Binary {
                        dst: carry_hi.clone(),
                        op: BinOp::Shl,
                        lhs: old_carry,
                        rhs: IrValue::Constant(7),
                    });
                    body.push(IrInstr::Binary {
                        dst: shifted.clone(),
                        op: BinOp::Or,
                        lhs: shr,
                        rhs: carry_hi,
                    });
                }
                _ => unreachable!(),
            }
            body.push(IrInstr::Copy {
                dst: val.clone(),
                src: shifted,
            });
            set_zn(&mut body, val);
        }

        // -- bit test --------------------------------------------------
        BIT => {
            let m = addressing_operand(instr);
            let and_val = vars.alloc();
            body.push(IrInstr::Binary {
                dst: and_val.clone(),
                op: BinOp::And,
                lhs: IrValue::Register(Reg::A),
                rhs: m.clone(),
            });
            body.push(IrInstr::Unary {
                dst: IrValue::Flag(FlagName::Zero),
                op: UnOp::IsZero,
                src: and_val,
            });
            body.push(IrInstr::Unary {
                dst: IrValue::Flag(FlagName::Negative),
                op: UnOp::Bit7,
                src: m.clone(),
            });
            body.push(IrInstr::Unary {
                dst: IrValue::Flag(FlagName::Overflow),
                op: UnOp::Bit6,
                src: m,
            });
        }

        // -- increment/decrement -----------------------------------------
        INC | DEC => {
            let val = addressing_operand(instr);
            let op = if matches!(instr.mnemonic, INC) { BinOp::Add } else { BinOp::Sub };
            let result = vars.alloc();
            body.push(IrInstr::Binary {
                dst: result.clone(),
                op,
                lhs: val.clone(),
                rhs: IrValue::Constant(1),
            });
            body.push(IrInstr::ConvertVariableToByte(result.clone()));
            body.push(IrInstr::Copy { dst: val.clone(), src: result });
            set_zn(&mut body, val);
        }
        INX | INY | DEX | DEY => {
            let reg = IrValue::Register(match instr.mnemonic {
                INX | DEX => Reg::X,
                _ => Reg::Y,
            });
            let op = if matches!(instr.mnemonic, INX | INY) { BinOp::Add } else { BinOp::Sub };
            let result = vars.alloc();
            body.push(IrInstr::Binary {
                dst: result.clone(),
                op,
                lhs: reg.clone(),
                rhs: IrValue::Constant(1),
            });
            body.push(IrInstr::ConvertVariableToByte(result.clone()));
            body.push(IrInstr::Copy { dst: reg.clone(), src: result });
            set_zn(&mut body, reg);
        }

        // -- branches ----------------------------------------------------
        BCC | BCS | BEQ | BNE | BMI | BPL | BVC | BVS => {
            let target = branch_target(instr, func)?;
            let (flag, branch_if_set) = match instr.mnemonic {
                BCC => (FlagName::Carry, false),
                BCS => (FlagName::Carry, true),
                BEQ => (FlagName::Zero, true),
                BNE => (FlagName::Zero, false),
                BMI => (FlagName::Negative, true),
                BPL => (FlagName::Negative, false),
                BVC => (FlagName::Overflow, false),
                BVS => (FlagName::Overflow, true),
                _ => unreachable!(),
            };
            let cond = IrValue::Flag(flag);
            body.push(if branch_if_set {
                IrInstr::JumpIfNotZero { cond, target }
            } else {
                IrInstr::JumpIfZero { cond, target }
            });
        }

        // -- jumps -------------------------------------------------------
        JMP => {
            if matches!(instr.mode, AddressingMode::Indirect) {
                // The pointer may have been self-modified since decode time,
                // so it is re-read from memory rather than trusting the
                // statically-resolved `target_address`.
                let ptr = instr.operand_u16();
                let hi_addr = if ptr & 0x00FF == 0x00FF { ptr & 0xFF00 } else { ptr.wrapping_add(1) };
                let lo = vars.alloc();
                body.push(IrInstr::Copy { dst: lo.clone(), src: IrValue::memory(ptr) });
                let hi = vars.alloc();
                body.push(IrInstr::Copy { dst: hi.clone(), src: IrValue::memory(hi_addr) });
                let shifted_hi = vars.alloc();
                body.push(IrInstr::Binary {
                    dst: shifted_hi.clone(),
                    op: BinOp::Shl,
                    lhs: hi,
                    rhs: IrValue::Constant(8),
                });
                let addr = vars.alloc();
                body.push(IrInstr::Binary {
                    dst: addr.clone(),
                    op: BinOp::Or,
                    lhs: shifted_hi,
                    rhs: lo,
                });
                body.push(IrInstr::Return(addr));
            } else {
                let target = branch_target(instr, func)?;
                body.push(IrInstr::Jump(target));
            }
        }

        // -- call / return -------------------------------------------------
        JSR => {
            let target = instr.target_address.ok_or_else(|| EmulatorError::Structural {
                address: instr.cpu_address,
                reason: "JSR has no target address".to_string(),
            })?;
            let ret = instr.next_addr().wrapping_sub(1);
            body.push(IrInstr::PushStackValue(IrValue::Constant((ret >> 8) as u8)));
            body.push(IrInstr::PushStackValue(IrValue::Constant(ret as u8)));
            body.push(IrInstr::CallFunction(target));
        }
        RTS => {
            let lo = vars.alloc();
            body.push(IrInstr::PopStackValue(lo.clone()));
            let hi = vars.alloc();
            body.push(IrInstr::PopStackValue(hi.clone()));
            let shifted_hi = vars.alloc();
            body.push(IrInstr::Binary {
                dst: shifted_hi.clone(),
                op: BinOp::Shl,
                lhs: hi,
                rhs: IrValue::Constant(8),
            });
            let combined = vars.alloc();
            body.push(IrInstr::Binary {
                dst: combined.clone(),
                op: BinOp::Or,
                lhs: shifted_hi,
                rhs: lo,
            });
            let plus1 = vars.alloc();
            body.push(IrInstr::Binary {
                dst: plus1.clone(),
                op: BinOp::Add,
                lhs: combined,
                rhs: IrValue::Constant(1),
            });
            body.push(IrInstr::Return(plus1));
        }

        // -- software interrupt / return from interrupt -------------------
        BRK => {
            let ret = instr.cpu_address.wrapping_add(2);
            body.push(IrInstr::PushStackValue(IrValue::Constant((ret >> 8) as u8)));
            body.push(IrInstr::PushStackValue(IrValue::Constant(ret as u8)));
            body.push(IrInstr::PushStackValue(IrValue::AllFlags));
            body.push(IrInstr::Copy {
                dst: IrValue::Flag(FlagName::InterruptDisable),
                src: IrValue::Constant(1),
            });
            body.push(IrInstr::InvokeSoftwareInterrupt);
        }
        RTI => {
            body.push(IrInstr::PopStackValue(IrValue::AllFlags));
            let lo = vars.alloc();
            body.push(IrInstr::PopStackValue(lo.clone()));
            let hi = vars.alloc();
            body.push(IrInstr::PopStackValue(hi.clone()));
            let shifted_hi = vars.alloc();
            body.push(IrInstr::Binary {
                dst: shifted_hi.clone(),
                op: BinOp::Shl,
                lhs: hi,
                rhs: IrValue::Constant(8),
            });
            let combined = vars.alloc();
            body.push(IrInstr::Binary {
                dst: combined.clone(),
                op: BinOp::Or,
                lhs: shifted_hi,
                rhs: lo,
            });
            body.push(IrInstr::Return(combined));
        }

        // -- flag ops ------------------------------------------------------
        CLC => body.push(IrInstr::Copy { dst: IrValue::Flag(FlagName::Carry), src: IrValue::Constant(0) }),
        SEC => body.push(IrInstr::Copy { dst: IrValue::Flag(FlagName::Carry), src: IrValue::Constant(1) }),
        CLI => body.push(IrInstr::Copy { dst: IrValue::Flag(FlagName::InterruptDisable), src: IrValue::Constant(0) }),
        SEI => body.push(IrInstr::Copy { dst: IrValue::Flag(FlagName::InterruptDisable), src: IrValue::Constant(1) }),
        CLV => body.push(IrInstr::Copy { dst: IrValue::Flag(FlagName::Overflow), src: IrValue::Constant(0) }),
        CLD => body.push(IrInstr::Copy { dst: IrValue::Flag(FlagName::Decimal), src: IrValue::Constant(0) }),
        SED => body.push(IrInstr::Copy { dst: IrValue::Flag(FlagName::Decimal), src: IrValue::Constant(1) }),

        // -- transfers -----------------------------------------------------
        TAX => {
            body.push(IrInstr::Copy { dst: IrValue::Register(Reg::X), src: IrValue::Register(Reg::A) });
            set_zn(&mut body, IrValue::Register(Reg::X));
        }
        TAY => {
            body.push(IrInstr::Copy { dst: IrValue::Register(Reg::Y), src: IrValue::Register(Reg::A) });
            set_zn(&mut body, IrValue::Register(Reg::Y));
        }
        TXA => {
            body.push(IrInstr::Copy { dst: IrValue::Register(Reg::A), src: IrValue::Register(Reg::X) });
            set_zn(&mut body, IrValue::Register(Reg::A));
        }
        TYA => {
            body.push(IrInstr::Copy { dst: IrValue::Register(Reg::A), src: IrValue::Register(Reg::Y) });
            set_zn(&mut body, IrValue::Register(Reg::A));
        }
        TSX => {
            // Writes X, not Y: the mnemonic's letters name source (S) and
            // destination (X) registers, not source-then-Y.
            body.push(IrInstr::Copy { dst: IrValue::Register(Reg::X), src: IrValue::StackPointer });
            set_zn(&mut body, IrValue::Register(Reg::X));
        }
        TXS => {
            body.push(IrInstr::Copy { dst: IrValue::StackPointer, src: IrValue::Register(Reg::X) });
        }

        // -- push/pull -----------------------------------------------------
        PHA => body.push(IrInstr::PushStackValue(IrValue::Register(Reg::A))),
        PHP => body.push(IrInstr::PushStackValue(IrValue::AllFlags)),
        PLA => {
            body.push(IrInstr::PopStackValue(IrValue::Register(Reg::A)));
            set_zn(&mut body, IrValue::Register(Reg::A));
        }
        PLP => body.push(IrInstr::PopStackValue(IrValue::AllFlags)),

        NOP => {}

        other => {
            return Err(EmulatorError::Structural {
                address: instr.cpu_address,
                reason: format!("{other:?} has no lowering"),
            })
        }
    }

    Ok(body)
}
