//! Function decomposer.
//!
//! Walks from an entry address through the bus's code regions, following
//! fall-through and branch targets, to produce a [`DecompiledFunction`]: an
//! ordered instruction list plus a map from in-function branch targets to
//! label identifiers.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::bus::Bus;
use crate::disasm::{disassemble, DisassembledInstruction};
use crate::error::EmulatorError;

/// Entry address, ordered instructions, and the branch-target-to-label map.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DecompiledFunction {
    pub entry_address: u16,
    pub name: String,
    pub instructions: Vec<DisassembledInstruction>,
    /// Maps an address inside this function's body to the label identifier
    /// the converter must emit a `Label` IR instruction for.
    pub labels: HashMap<u16, String>,
}

impl DecompiledFunction {
    /// The set of every byte address occupied by this function's
    /// instructions (opcode + operand bytes), used by the cache for
    /// page-granularity invalidation and by the optimizer/SMC tracker for
    /// in-scope rewrites.
    pub fn instruction_byte_addresses(&self) -> HashSet<u16> {
        let mut set = HashSet::new();
        for instr in &self.instructions {
            for i in 0..instr.len() {
                set.insert(instr.cpu_address.wrapping_add(i));
            }
        }
        set
    }

    pub fn label_for(&self, addr: u16) -> Option<&str> {
        self.labels.get(&addr).map(|s| s.as_str())
    }
}

fn label_name(addr: u16) -> String {
    format!("L_{addr:04X}")
}

pub fn function_name(addr: u16) -> String {
    format!("fn_{addr:04X}")
}

/// Walks from `entry` over `bus`'s code regions. Each address is visited at
/// most once; the walk halts when the queue drains or would enter code
/// outside every attached code region.
pub fn decompose(bus: &Bus, entry: u16) -> Result<DecompiledFunction, EmulatorError> {
    let regions = bus.code_regions();
    let find_region = |addr: u16| {
        regions
            .iter()
            .find(|r| r.contains_range(addr, 1))
    };

    let mut visited: BTreeMap<u16, DisassembledInstruction> = BTreeMap::new();
    let mut queue: VecDeque<u16> = VecDeque::new();
    let mut branch_targets: HashSet<u16> = HashSet::new();
    queue.push_back(entry);

    while let Some(addr) = queue.pop_front() {
        if visited.contains_key(&addr) {
            continue;
        }
        let region = match find_region(addr) {
            Some(r) => r,
            None => continue, // enters code outside any attached region: halt this path
        };
        let instr = disassemble(region, addr)?;

        let is_branch = instr.is_conditional_branch();
        let is_jsr = matches!(instr.mnemonic, crate::disasm::Mnemonic::JSR);
        let is_terminator = instr.is_unconditional_terminator();

        if !is_terminator {
            queue.push_back(instr.next_addr());
        }
        if (is_branch || matches!(instr.mnemonic, crate::disasm::Mnemonic::JMP)) && !is_jsr {
            if let Some(target) = instr.target_address {
                if find_region(target).is_some() {
                    branch_targets.insert(target);
                    queue.push_back(target);
                }
            }
        }
        // JSR targets are calls to other functions, not part of this body's
        // control-flow graph; they don't get walked or labeled here.

        visited.insert(addr, instr);
    }

    let mut labels = HashMap::new();
    for target in &branch_targets {
        if visited.contains_key(target) {
            labels.insert(*target, label_name(*target));
        }
    }

    Ok(DecompiledFunction {
        entry_address: entry,
        name: function_name(entry),
        instructions: visited.into_values().collect(),
        labels,
    })
}
