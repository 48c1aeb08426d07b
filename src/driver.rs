//! JIT driver.
//!
//! The driver is a flat loop: resolve the method at the current address
//! (compiling it through decomposition → conversion → optimization →
//! customization → code generation if it isn't cached), run it, and
//! dispatch to whatever address it hands back. `CallFunction` and taken
//! interrupts are handled inside `codegen::run` via its own frame stack, so
//! this loop never recurses.

use std::cell::RefCell;
use std::rc::Rc;

use log::{debug, trace};

use crate::cache::MethodCache;
use crate::codegen::{self, CompiledMethod, FunctionProvider};
use crate::convert::lower_function;
use crate::customize::{run_pipeline, IrCustomizer, StandardCustomizer};
use crate::cpu::Hal;
use crate::decompose::{decompose, DecompiledFunction};
use crate::error::EmulatorError;
use crate::optimize::find_smc_candidates;
use crate::smc::SmcTracker;

/// A native host handler that pre-empts compilation for one entry address —
/// used for emulator-side trap routines.
pub struct Patch {
    pub handler: Box<dyn Fn(&mut Hal) -> Result<u16, EmulatorError>>,
}

/// Named for tracing only; the driver's actual control flow is the loop in
/// `Driver::run`, not a literal state value threaded between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Entering(u16),
    Running(u16),
    YieldedToSubroutine(u16),
    YieldedToInterrupt(u16),
    Returned(u16),
}

pub struct Driver {
    cache: Rc<RefCell<MethodCache>>,
    smc: SmcTracker,
    customizers: Vec<Box<dyn IrCustomizer>>,
    patches: std::collections::HashMap<u16, Patch>,
    /// The raw decomposed form of every function compiled so far, kept
    /// alongside the cache's compiled bodies so `--save-compiled` has
    /// something serializable to write out.
    decompiled: std::collections::HashMap<u16, DecompiledFunction>,
}

impl Driver {
    pub fn new(cache: Rc<RefCell<MethodCache>>, trace_enabled: bool) -> Self {
        Driver {
            cache,
            smc: SmcTracker::new(),
            customizers: vec![Box::new(StandardCustomizer { trace_enabled })],
            patches: std::collections::HashMap::new(),
            decompiled: std::collections::HashMap::new(),
        }
    }

    pub fn install_patch(&mut self, addr: u16, patch: Patch) {
        self.patches.insert(addr, patch);
    }

    fn compile(&mut self, hal: &mut Hal, entry: u16) -> Result<Rc<CompiledMethod>, EmulatorError> {
        let func = decompose(&hal.bus, entry)?;
        self.compile_function(func)
    }

    /// Runs a [`DecompiledFunction`] through conversion, SMC-candidate
    /// recording, and customization, and inserts the result into the cache.
    /// Shared by normal compilation (from a freshly decomposed function) and
    /// by `--load-compiled` (from a function deserialized off disk).
    fn compile_function(&mut self, func: DecompiledFunction) -> Result<Rc<CompiledMethod>, EmulatorError> {
        let entry = func.entry_address;
        self.decompiled.insert(entry, func.clone());
        let (program, num_vars) = lower_function(&func)?;

        for (source, target) in find_smc_candidates(&program) {
            if func.instruction_byte_addresses().contains(&target) {
                self.smc.record(source, target)?;
            }
        }

        let program = run_pipeline(&self.customizers, program, &func);
        let addrs = Rc::new(func.instruction_byte_addresses());
        let method = Rc::new(CompiledMethod::new(entry, addrs, program, num_vars));
        self.cache.borrow_mut().add(method.clone());
        debug!("compiled {} at {:#06X}", func.name, entry);
        Ok(method)
    }

    /// Re-lowers a set of previously-decomposed functions (e.g. loaded from
    /// a `--load-compiled` directory) into the cache without touching the
    /// bus. Used to skip re-disassembly on a warm start.
    pub fn preload(&mut self, functions: Vec<DecompiledFunction>) -> Result<(), EmulatorError> {
        for func in functions {
            self.compile_function(func)?;
        }
        Ok(())
    }

    fn get_or_compile(&mut self, hal: &mut Hal, entry: u16) -> Result<Rc<CompiledMethod>, EmulatorError> {
        if let Some(method) = self.cache.borrow_mut().get(entry) {
            return Ok(method);
        }
        self.compile(hal, entry)
    }

    /// Runs one dispatch cycle: either the installed patch for `addr`, or
    /// the compiled body.
    pub fn run_one(&mut self, hal: &mut Hal, addr: u16) -> Result<u16, EmulatorError> {
        trace!("{:?}", RunState::Entering(addr));
        if let Some(patch) = self.patches.get(&addr) {
            let next = (patch.handler)(hal)?;
            trace!("{:?}", RunState::Returned(next));
            return Ok(next);
        }
        let method = self.get_or_compile(hal, addr)?;
        trace!("{:?}", RunState::Running(addr));
        let next = codegen::run(method, hal, self)?;
        trace!("{:?}", RunState::Returned(next));
        Ok(next)
    }

    /// Runs forever, dispatching from `entry`. The caller is expected to
    /// break out (e.g. on a host-visible halt condition) by not calling
    /// back in; this emulator has no native STP/halt instruction.
    pub fn run_forever(&mut self, hal: &mut Hal, entry: u16) -> Result<(), EmulatorError> {
        let mut next = entry;
        loop {
            next = self.run_one(hal, next)?;
        }
    }

    pub fn smc_tracker(&self) -> &SmcTracker {
        &self.smc
    }

    /// Every function compiled so far, in its raw decomposed form (before
    /// conversion/customization), for `--save-compiled` to serialize.
    pub fn decompiled_functions(&self) -> impl Iterator<Item = &DecompiledFunction> {
        self.decompiled.values()
    }
}

impl FunctionProvider for Driver {
    fn resolve(&mut self, hal: &mut Hal, addr: u16) -> Result<Rc<CompiledMethod>, EmulatorError> {
        trace!("{:?}", RunState::YieldedToSubroutine(addr));
        self.get_or_compile(hal, addr)
    }
}
