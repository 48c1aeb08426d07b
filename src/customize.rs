//! JIT customizer pipeline: function-level IR mutators that run after
//! optimization and before code generation.
//!
//! The standard customizer prepends a debug trace and an interrupt poll to
//! every original instruction's IR block, landing after any `Label` so a
//! branch into the block still polls before the instruction executes.

use crate::decompose::DecompiledFunction;
use crate::ir::{tag, IrInstr, Program};

pub trait IrCustomizer {
    fn apply(&self, program: Program, func: &DecompiledFunction) -> Program;
}

/// Runs each customizer over `program` in order, threading the result of
/// one into the next.
pub fn run_pipeline(customizers: &[Box<dyn IrCustomizer>], mut program: Program, func: &DecompiledFunction) -> Program {
    for customizer in customizers {
        program = customizer.apply(program, func);
    }
    program
}

/// Groups consecutive nodes by `origin_addr` (the nodes a single 6502
/// instruction lowered to are always contiguous) and, for each group,
/// inserts a poll-for-interrupt and an optional debug trace after any
/// leading `Label`.
pub struct StandardCustomizer {
    pub trace_enabled: bool,
}

impl IrCustomizer for StandardCustomizer {
    fn apply(&self, program: Program, _func: &DecompiledFunction) -> Program {
        let mut out = Program::with_capacity(program.len() + program.len() / 2);
        let mut i = 0;
        while i < program.len() {
            let origin_addr = program[i].origin_addr;
            let origin_next_addr = program[i].origin_next_addr;
            let start = i;
            while i < program.len() && program[i].origin_addr == origin_addr {
                i += 1;
            }
            let group = &program[start..i];

            let mut rest = group;
            if let Some(first) = group.first() {
                if matches!(first.instr, IrInstr::Label(_)) {
                    out.push(first.clone());
                    rest = &group[1..];
                }
            }

            if self.trace_enabled {
                out.push(tag(
                    IrInstr::StoreDebugString(format!("{origin_addr:#06X}")),
                    origin_addr,
                    origin_next_addr,
                ));
            }
            out.push(tag(
                IrInstr::PollForInterrupt { continuation: origin_addr },
                origin_addr,
                origin_next_addr,
            ));

            out.extend_from_slice(rest);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::DecompiledFunction;
    use crate::ir::{IrValue, Reg};
    use std::collections::HashMap;

    fn empty_func() -> DecompiledFunction {
        DecompiledFunction {
            entry_address: 0x8000,
            name: "fn_8000".to_string(),
            instructions: vec![],
            labels: HashMap::new(),
        }
    }

    #[test]
    fn inserts_poll_after_label() {
        let program: Program = vec![
            tag(IrInstr::Label("L_8000".to_string()), 0x8000, 0x8002),
            tag(
                IrInstr::Copy {
                    dst: IrValue::Register(Reg::A),
                    src: IrValue::Constant(1),
                },
                0x8000,
                0x8002,
            ),
        ];
        let customizer = StandardCustomizer { trace_enabled: false };
        let out = customizer.apply(program, &empty_func());
        assert!(matches!(out[0].instr, IrInstr::Label(_)));
        assert!(matches!(out[1].instr, IrInstr::PollForInterrupt { .. }));
        assert!(matches!(out[2].instr, IrInstr::Copy { .. }));
    }
}
