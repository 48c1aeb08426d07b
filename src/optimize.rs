//! IR optimizer: static self-modifying-code analysis.
//!
//! Walks a lowered function's IR once, looking for writes to a fixed memory
//! address (as opposed to an indexed or indirect one). Each such write is a
//! candidate SMC source; the cache cross-references the target address
//! against every other compiled function's instruction bytes to decide
//! whether it is actually self-modifying code, since a single function's IR
//! has no visibility into the rest of the cache.

use crate::ir::{IrInstr, Program};

/// `(source_addr, target_addr)`: the 6502 instruction address that performs
/// a fixed-address write, and the address it writes to.
pub type SmcCandidate = (u16, u16);

pub fn find_smc_candidates(program: &Program) -> Vec<SmcCandidate> {
    let mut found = Vec::new();
    for node in program {
        let dst = match &node.instr {
            IrInstr::Copy { dst, .. } => Some(dst),
            IrInstr::Binary { dst, .. } => Some(dst),
            IrInstr::Unary { dst, .. } => Some(dst),
            _ => None,
        };
        if let Some(addr) = dst.and_then(|d| d.direct_memory_addr()) {
            found.push((node.origin_addr, addr));
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{tag, IrValue};

    #[test]
    fn finds_fixed_address_write() {
        let program: Program = vec![tag(
            IrInstr::Copy {
                dst: IrValue::zero_page(0x10),
                src: IrValue::Register(crate::ir::Reg::A),
            },
            0x8000,
            0x8002,
        )];
        let candidates = find_smc_candidates(&program);
        assert_eq!(candidates, vec![(0x8000, 0x10)]);
    }

    #[test]
    fn ignores_indexed_write() {
        let program: Program = vec![tag(
            IrInstr::Copy {
                dst: IrValue::absolute_indexed(0x0200, crate::ir::Reg::X),
                src: IrValue::Register(crate::ir::Reg::A),
            },
            0x8000,
            0x8003,
        )];
        assert!(find_smc_candidates(&program).is_empty());
    }
}
