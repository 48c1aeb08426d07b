//! Executable-method generator and runner.
//!
//! A `CompiledMethod` is a flat, tagged IR program plus a label index.
//! `run` executes one to completion against a `Hal`, using an explicit
//! frame stack instead of host recursion: `CallFunction` and a taken
//! interrupt both push a frame, `Return` pops one. Host-stack depth stays
//! one regardless of how many 6502 subroutines are active, because the
//! true call state already lives in the guest stack in RAM — the frame
//! stack here is only a resume-point cache for the hot path.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::cpu::Hal;
use crate::error::EmulatorError;
use crate::ir::{BinOp, FlagName, IrInstr, IrValue, Label, Program, Reg, UnOp};

pub trait FunctionProvider {
    fn resolve(&mut self, hal: &mut Hal, addr: u16) -> Result<Rc<CompiledMethod>, EmulatorError>;
}

#[derive(Debug)]
pub struct CompiledMethod {
    pub entry_address: u16,
    pub instruction_addrs: Rc<HashSet<u16>>,
    program: Program,
    label_index: HashMap<Label, usize>,
    num_locals: u32,
}

impl CompiledMethod {
    pub fn new(
        entry_address: u16,
        instruction_addrs: Rc<HashSet<u16>>,
        program: Program,
        num_locals: u32,
    ) -> Self {
        let mut label_index = HashMap::new();
        for (i, node) in program.iter().enumerate() {
            if let IrInstr::Label(name) = &node.instr {
                label_index.insert(name.clone(), i);
            }
        }
        CompiledMethod {
            entry_address,
            instruction_addrs,
            program,
            label_index,
            num_locals,
        }
    }
}

struct Frame {
    method: Rc<CompiledMethod>,
    pc: usize,
    locals: Vec<u32>,
    /// The 6502 address this frame is expected to hand back on `Return`,
    /// for frames pushed by `CallFunction` (the JSR's static fall-through).
    /// `None` for the entry frame and for interrupt-taken frames, neither
    /// of which are checked here.
    expected_return: Option<u16>,
}

enum StepResult {
    Continue,
    Jump(Label),
    /// Push a new frame at this address, without popping the current one.
    /// Used for both `CallFunction` and a taken interrupt.
    Call(u16),
    /// A callee handed back an address. Normally that's the call site's own
    /// fall-through and the caller just resumes; but a callee that pops its
    /// return address, rewrites it, and re-pushes it (a jump-table
    /// trampoline) hands back something else, and the frame stack can't be
    /// trusted to resume anywhere in particular after that — see the
    /// `expected_return` check in `run`.
    Return(u16),
    /// The current instruction's memory write modified code inside the
    /// currently-executing function; unwind every frame and report the
    /// origin instruction's fall-through address to the driver (the guest
    /// stack already holds the real return addresses, so nothing is lost
    /// by discarding the host-side frame cache).
    Bailout,
    /// A BRK dispatched to the IRQ/BRK vector. Unlike `Call`, this unwinds
    /// every frame rather than nesting one: the handler is a brand-new
    /// top-level dispatch from the driver's point of view, and RTI's own
    /// `Return` will hand the driver the PC+2 address that was explicitly
    /// pushed onto the guest stack, not anything cached in a host frame.
    Dispatch(u16),
}

/// Runs `entry` to completion and returns the next 6502 address the driver
/// should dispatch.
pub fn run(
    entry: Rc<CompiledMethod>,
    hal: &mut Hal,
    provider: &mut dyn FunctionProvider,
) -> Result<u16, EmulatorError> {
    let mut stack = vec![Frame {
        locals: vec![0u32; entry.num_locals as usize],
        method: entry,
        pc: 0,
        expected_return: None,
    }];
    hal.enter_function(stack[0].method.instruction_addrs.clone());

    let result = loop {
        let top = stack.len() - 1;
        if stack[top].pc >= stack[top].method.program.len() {
            let fallback = stack[top]
                .method
                .program
                .last()
                .map(|n| n.origin_next_addr)
                .unwrap_or(stack[top].method.entry_address);
            stack.pop();
            match stack.last() {
                Some(frame) => {
                    hal.enter_function(frame.method.instruction_addrs.clone());
                    continue;
                }
                None => break Ok(fallback),
            }
        }

        let node = &stack[top].method.program[stack[top].pc];
        let instr = node.instr.clone();
        let origin_addr = node.origin_addr;
        let origin_next_addr = node.origin_next_addr;
        stack[top].pc += 1;

        let outcome = step(&instr, hal, &mut stack[top].locals);

        match outcome {
            Ok(StepResult::Continue) => {}
            Ok(StepResult::Jump(label)) => match stack[top].method.label_index.get(&label) {
                Some(&index) => stack[top].pc = index,
                None => {
                    break Err(EmulatorError::Structural {
                        address: origin_addr,
                        reason: format!("unresolved label {label}"),
                    })
                }
            },
            Ok(StepResult::Call(target)) => match provider.resolve(hal, target) {
                Ok(method) => {
                    hal.enter_function(method.instruction_addrs.clone());
                    let expected_return = match &instr {
                        IrInstr::CallFunction(_) => Some(origin_next_addr),
                        _ => None,
                    };
                    stack.push(Frame {
                        locals: vec![0u32; method.num_locals as usize],
                        method,
                        pc: 0,
                        expected_return,
                    });
                }
                Err(e) => break Err(e),
            },
            Ok(StepResult::Return(addr)) => {
                let popped = stack.pop().unwrap();
                if popped.expected_return.is_some_and(|expected| expected != addr) {
                    // The callee's return address isn't the call site's own
                    // fall-through (a jump-table trampoline rewrote it on
                    // the guest stack); the remaining host frames assumed a
                    // fall-through that never happens, so none of them can
                    // be trusted to resume correctly. Unwind all of them and
                    // let the driver re-dispatch from the diverted address,
                    // matching the interpreter's JSR-divergence handling.
                    break Ok(addr);
                }
                match stack.last() {
                    Some(frame) => hal.enter_function(frame.method.instruction_addrs.clone()),
                    None => break Ok(addr),
                }
            }
            Ok(StepResult::Bailout) => break Ok(origin_next_addr),
            Ok(StepResult::Dispatch(addr)) => break Ok(addr),
            Err(e) => break Err(e),
        }
    };

    hal.leave_function();
    result
}

fn reg_val(hal: &Hal, r: Reg) -> u8 {
    match r {
        Reg::A => hal.a(),
        Reg::X => hal.x(),
        Reg::Y => hal.y(),
    }
}

fn effective_addr(hal: &Hal, addr: u16, index: Option<Reg>, single_byte_address: bool) -> u16 {
    let idx = index.map(|r| reg_val(hal, r)).unwrap_or(0);
    if single_byte_address {
        (addr as u8).wrapping_add(idx) as u16
    } else {
        addr.wrapping_add(idx as u16)
    }
}

fn indirect_addr(hal: &mut Hal, zp: u8, pre_indexed: bool, post_indexed: bool) -> u16 {
    if pre_indexed {
        let ptr = zp.wrapping_add(hal.x());
        let lo = hal.read_memory(ptr as u16) as u16;
        let hi = hal.read_memory(ptr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    } else {
        debug_assert!(post_indexed);
        let lo = hal.read_memory(zp as u16) as u16;
        let hi = hal.read_memory(zp.wrapping_add(1) as u16) as u16;
        let ptr = (hi << 8) | lo;
        ptr.wrapping_add(hal.y() as u16)
    }
}

fn read_value(hal: &mut Hal, locals: &[u32], v: &IrValue) -> u32 {
    match v {
        IrValue::Constant(c) => *c as u32,
        IrValue::Register(r) => reg_val(hal, *r) as u32,
        IrValue::Memory { addr, index, single_byte_address } => {
            let a = effective_addr(hal, *addr, *index, *single_byte_address);
            hal.read_memory(a) as u32
        }
        IrValue::IndirectMemory { zp, pre_indexed, post_indexed } => {
            let a = indirect_addr(hal, *zp, *pre_indexed, *post_indexed);
            hal.read_memory(a) as u32
        }
        IrValue::Variable(i) => locals[*i as usize],
        IrValue::Flag(f) => hal.flag(*f) as u32,
        IrValue::AllFlags => hal.status_byte() as u32,
        IrValue::StackPointer => hal.sp() as u32,
    }
}

/// Writes `value` to `dst`. Returns the memory address touched, if any, so
/// the caller can run the SMC bailout check.
fn write_value(hal: &mut Hal, locals: &mut [u32], dst: &IrValue, value: u32) -> Option<u16> {
    match dst {
        IrValue::Constant(_) => unreachable!("IR never targets a constant"),
        IrValue::Register(Reg::A) => hal.set_a(value as u8),
        IrValue::Register(Reg::X) => hal.set_x(value as u8),
        IrValue::Register(Reg::Y) => hal.set_y(value as u8),
        IrValue::Memory { addr, index, single_byte_address } => {
            let a = effective_addr(hal, *addr, *index, *single_byte_address);
            hal.write_memory(a, value as u8);
            return Some(a);
        }
        IrValue::IndirectMemory { zp, pre_indexed, post_indexed } => {
            let a = indirect_addr(hal, *zp, *pre_indexed, *post_indexed);
            hal.write_memory(a, value as u8);
            return Some(a);
        }
        IrValue::Variable(i) => locals[*i as usize] = value,
        IrValue::Flag(f) => hal.set_flag(*f, value & 1 != 0),
        IrValue::AllFlags => hal.set_status_byte(value as u8),
        IrValue::StackPointer => hal.set_sp(value as u8),
    }
    None
}

fn step(instr: &IrInstr, hal: &mut Hal, locals: &mut [u32]) -> Result<StepResult, EmulatorError> {
    macro_rules! copy_with_bailout {
        ($dst:expr, $value:expr) => {{
            if let Some(addr) = write_value(hal, locals, $dst, $value) {
                if hal.on_memory_written(addr) {
                    return Ok(StepResult::Bailout);
                }
            }
            Ok(StepResult::Continue)
        }};
    }

    match instr {
        IrInstr::Label(_) => Ok(StepResult::Continue),

        IrInstr::Copy { dst, src } => {
            let v = read_value(hal, locals, src);
            copy_with_bailout!(dst, v)
        }

        IrInstr::Unary { dst, op, src } => {
            let s = read_value(hal, locals, src);
            let v = match op {
                UnOp::Not => !(s as u8) as u32,
                UnOp::Neg => (s as u8).wrapping_neg() as u32,
                UnOp::IsZero => (s == 0) as u32,
                UnOp::Bit0 => s & 1,
                UnOp::Bit6 => (s >> 6) & 1,
                UnOp::Bit7 => (s >> 7) & 1,
                UnOp::Bit8 => (s >> 8) & 1,
            };
            copy_with_bailout!(dst, v)
        }

        IrInstr::Binary { dst, op, lhs, rhs } => {
            let l = read_value(hal, locals, lhs);
            let r = read_value(hal, locals, rhs);
            let v = match op {
                BinOp::Add => l.wrapping_add(r),
                BinOp::Sub => l.wrapping_sub(r),
                BinOp::And => l & r,
                BinOp::Or => l | r,
                BinOp::Xor => l ^ r,
                BinOp::Shl => l << (r & 0x1F),
                BinOp::Shr => l >> (r & 0x1F),
                BinOp::Eq => (l == r) as u32,
                BinOp::Uge => (l >= r) as u32,
            };
            copy_with_bailout!(dst, v)
        }

        IrInstr::Jump(label) => Ok(StepResult::Jump(label.clone())),

        IrInstr::JumpIfZero { cond, target } => {
            if read_value(hal, locals, cond) == 0 {
                Ok(StepResult::Jump(target.clone()))
            } else {
                Ok(StepResult::Continue)
            }
        }
        IrInstr::JumpIfNotZero { cond, target } => {
            if read_value(hal, locals, cond) != 0 {
                Ok(StepResult::Jump(target.clone()))
            } else {
                Ok(StepResult::Continue)
            }
        }

        IrInstr::PushStackValue(v) => {
            let byte = if matches!(v, IrValue::AllFlags) {
                hal.registers.P.to_pushed_byte()
            } else {
                read_value(hal, locals, v) as u8
            };
            hal.push(byte);
            Ok(StepResult::Continue)
        }
        IrInstr::PopStackValue(dst) => {
            let byte = hal.pop();
            if matches!(dst, IrValue::AllFlags) {
                hal.set_status_byte(byte);
            } else {
                write_value(hal, locals, dst, byte as u32);
            }
            Ok(StepResult::Continue)
        }

        IrInstr::CallFunction(target) => Ok(StepResult::Call(*target)),
        IrInstr::Return(v) => Ok(StepResult::Return(read_value(hal, locals, v) as u16)),

        IrInstr::InvokeSoftwareInterrupt => {
            let lo = hal.read_memory(0xFFFE) as u16;
            let hi = hal.read_memory(0xFFFF) as u16;
            Ok(StepResult::Dispatch((hi << 8) | lo))
        }

        IrInstr::PollForInterrupt { continuation } => match hal.poll_for_interrupt() {
            Some(vector) => {
                hal.push((*continuation >> 8) as u8);
                hal.push(*continuation as u8);
                hal.push(hal.registers.P.to_byte());
                hal.set_flag(FlagName::InterruptDisable, true);
                Ok(StepResult::Call(vector))
            }
            None => Ok(StepResult::Continue),
        },

        IrInstr::StoreDebugString(text) => {
            hal.debug_hook(text);
            Ok(StepResult::Continue)
        }

        IrInstr::WrapValueToByte { var, flag, lhs, rhs, is_subtraction: _ } => {
            let raw = read_value(hal, locals, var);
            let truncated = raw & 0xFF;
            if let Some(f) = flag {
                let a = read_value(hal, locals, lhs) & 0xFF;
                let m = read_value(hal, locals, rhs) & 0xFF;
                let overflow = ((a ^ truncated) & (m ^ truncated) & 0x80) != 0;
                hal.set_flag(*f, overflow);
            }
            write_value(hal, locals, var, truncated);
            Ok(StepResult::Continue)
        }
        IrInstr::ConvertVariableToByte(v) => {
            let raw = read_value(hal, locals, v);
            write_value(hal, locals, v, raw & 0xFF);
            Ok(StepResult::Continue)
        }
    }
}
