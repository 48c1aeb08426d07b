use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;

use mos6502_jit::bus::Bus;
use mos6502_jit::cache::{MethodCache, DEFAULT_CAPACITY};
use mos6502_jit::cpu::Hal;
use mos6502_jit::decompose::DecompiledFunction;
use mos6502_jit::devices::{build_c64_bus, build_nes_bus};
use mos6502_jit::driver::Driver;
use mos6502_jit::error::EmulatorError;
use mos6502_jit::interpreter;
use mos6502_jit::rom::{load_c64, load_ines};

/// A JIT recompiler for 6502 machine code: NES (iNES) and C64 (raw PRG) ROMs.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the ROM image to run.
    #[arg(long)]
    rom: PathBuf,

    /// Interpret `--rom` as a raw C64 PRG image instead of iNES.
    #[arg(long)]
    c64: bool,

    /// Emit a trace line per 6502 instruction (A/X/Y/SP/P snapshot).
    #[arg(long)]
    trace: bool,

    /// Run entirely through the direct interpreter, bypassing the JIT
    /// driver and code cache.
    #[arg(long)]
    interpreter: bool,

    /// Stop after executing this many dispatch steps, for bounded runs
    /// (this emulator has no native halt instruction).
    #[arg(long)]
    max_steps: Option<u64>,

    /// Directory to write one serialized decomposed function per cached
    /// entry point to, after the run completes.
    #[arg(long)]
    save_compiled: Option<PathBuf>,

    /// Directory of previously-saved decomposed functions to preload into
    /// the cache before running.
    #[arg(long)]
    load_compiled: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    SimpleLogger::new()
        .with_level(if cli.trace { LevelFilter::Trace } else { LevelFilter::Info })
        .init()
        .expect("logger already initialized");

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), EmulatorError> {
    let bus = load_bus(&cli)?;
    let mut hal = Hal::new(bus);
    hal.debug_enabled = cli.trace;

    if cli.interpreter {
        run_interpreter(&mut hal, cli.max_steps)
    } else {
        run_jit(&mut hal, &cli)
    }
}

fn load_bus(cli: &Cli) -> Result<Bus, EmulatorError> {
    if cli.c64 {
        let image = load_c64(&cli.rom)?;
        info!("loaded C64 PRG, load address {:#06X}, {} bytes", image.load_address, image.data.len());
        Ok(build_c64_bus(&image))
    } else {
        let image = load_ines(&cli.rom)?;
        info!(
            "loaded iNES ROM: mapper {}, {:?} mirroring, {} PRG bytes, {} CHR bytes",
            image.mapper,
            image.mirroring,
            image.prg_rom.len(),
            image.chr_rom.len(),
        );
        Ok(build_nes_bus(&image))
    }
}

fn run_interpreter(hal: &mut Hal, max_steps: Option<u64>) -> Result<(), EmulatorError> {
    let mut next = hal.pc();
    let mut steps: u64 = 0;
    loop {
        next = interpreter::run(hal, next)?;
        steps += 1;
        if max_steps.is_some_and(|max| steps >= max) {
            break;
        }
    }
    Ok(())
}

fn run_jit(hal: &mut Hal, cli: &Cli) -> Result<(), EmulatorError> {
    let cache = Rc::new(RefCell::new(MethodCache::new(DEFAULT_CAPACITY)));
    hal.bus.add_observer(cache.clone());
    let mut driver = Driver::new(cache, cli.trace);

    if let Some(dir) = &cli.load_compiled {
        driver.preload(load_decompiled_dir(dir)?)?;
    }

    let entry = hal.pc();
    let mut next = entry;
    let mut steps: u64 = 0;
    loop {
        next = driver.run_one(hal, next)?;
        steps += 1;
        if cli.max_steps.is_some_and(|max| steps >= max) {
            break;
        }
    }

    if let Some(dir) = &cli.save_compiled {
        save_decompiled_dir(dir, &driver)?;
    }
    Ok(())
}

fn load_decompiled_dir(dir: &std::path::Path) -> Result<Vec<DecompiledFunction>, EmulatorError> {
    let mut functions = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let bytes = std::fs::read(&path)?;
        let func: DecompiledFunction = serde_json::from_slice(&bytes)?;
        functions.push(func);
    }
    Ok(functions)
}

fn save_decompiled_dir(dir: &std::path::Path, driver: &Driver) -> Result<(), EmulatorError> {
    std::fs::create_dir_all(dir)?;
    for func in driver.decompiled_functions() {
        let path = dir.join(format!("{:04X}.json", func.entry_address));
        let bytes = serde_json::to_vec_pretty(func)?;
        std::fs::write(path, bytes)?;
    }
    Ok(())
}
