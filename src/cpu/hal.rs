//! The CPU model (`Hal`): push/pop/interrupt routines in the style of a
//! typical 6502 emulator's CPU struct, with exact stack math, interrupt
//! vector dispatch, and the self-modifying-code bailout check.

use std::collections::HashSet;
use std::rc::Rc;

use log::trace;

use crate::bus::Bus;
use crate::ir::FlagName;

use super::registers::Registers;

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// The CPU model the generated/interpreted bodies operate against. Owns the
/// bus (the 6502 stack lives in guest RAM at 0x0100-0x01FF, so pushes and
/// pops are just bus accesses) and the interrupt lines the PPU/VIC
/// peripheral raises.
pub struct Hal {
    pub registers: Registers,
    pub bus: Bus,

    nmi_pending: bool,
    irq_pending: bool,

    /// The instruction-byte addresses of the function currently executing a
    /// compiled or interpreted body, set by the driver before each dispatch.
    /// `on_memory_written` consults this set.
    current_function_addrs: Option<Rc<HashSet<u16>>>,

    pub debug_enabled: bool,
}

impl Hal {
    pub fn new(bus: Bus) -> Self {
        let mut hal = Hal {
            registers: Registers::default(),
            bus,
            nmi_pending: false,
            irq_pending: false,
            current_function_addrs: None,
            debug_enabled: false,
        };
        hal.reset();
        hal
    }

    pub fn reset(&mut self) {
        self.registers.A = 0;
        self.registers.X = 0;
        self.registers.Y = 0;
        self.registers.S = 0xFF;
        self.registers.P = Default::default();
        self.registers.PC = self.bus.read_u16(RESET_VECTOR);
        trace!("reset: PC = {:#06X}", self.registers.PC);
    }

    // -- register/flag accessors --------------------------------------

    pub fn a(&self) -> u8 {
        self.registers.A
    }
    pub fn set_a(&mut self, v: u8) {
        self.registers.A = v;
    }
    pub fn x(&self) -> u8 {
        self.registers.X
    }
    pub fn set_x(&mut self, v: u8) {
        self.registers.X = v;
    }
    pub fn y(&self) -> u8 {
        self.registers.Y
    }
    pub fn set_y(&mut self, v: u8) {
        self.registers.Y = v;
    }
    pub fn sp(&self) -> u8 {
        self.registers.S
    }
    pub fn set_sp(&mut self, v: u8) {
        self.registers.S = v;
    }
    pub fn pc(&self) -> u16 {
        self.registers.PC
    }
    pub fn set_pc(&mut self, v: u16) {
        self.registers.PC = v;
    }

    pub fn flag(&self, flag: FlagName) -> bool {
        self.registers.P.get(flag)
    }
    pub fn set_flag(&mut self, flag: FlagName, value: bool) {
        self.registers.P.set(flag, value);
    }
    pub fn status_byte(&self) -> u8 {
        self.registers.P.to_byte()
    }
    pub fn set_status_byte(&mut self, byte: u8) {
        self.registers.P = super::registers::ProcessorStatus::from_byte(byte);
    }

    // -- stack --------------------------------------------------------

    /// Writes `byte` at `0x0100 + SP`, then decrements SP (wrapping 0x00 -> 0xFF).
    pub fn push(&mut self, byte: u8) {
        let addr = 0x0100 + self.registers.S as u16;
        self.bus.write(addr, byte);
        self.registers.S = self.registers.S.wrapping_sub(1);
        trace!("push {:#04X}, SP now {:#04X}", byte, self.registers.S);
    }

    /// Increments SP (wrapping 0xFF -> 0x00), then reads `0x0100 + SP`.
    pub fn pop(&mut self) -> u8 {
        self.registers.S = self.registers.S.wrapping_add(1);
        let addr = 0x0100 + self.registers.S as u16;
        let byte = self.bus.read(addr);
        trace!("pop {:#04X}, SP now {:#04X}", byte, self.registers.S);
        byte
    }

    pub fn push_u16(&mut self, value: u16) {
        self.push((value >> 8) as u8);
        self.push(value as u8);
    }

    pub fn pop_u16(&mut self) -> u16 {
        let lo = self.pop() as u16;
        let hi = self.pop() as u16;
        (hi << 8) | lo
    }

    // -- interrupts -------------------------------------------------------

    pub fn request_nmi(&mut self) {
        self.nmi_pending = true;
    }

    pub fn request_irq(&mut self) {
        self.irq_pending = true;
    }

    /// Called between 6502 instructions. Returns the vector address to
    /// dispatch to, or `None`. NMI is non-maskable; IRQ only fires when
    /// `InterruptDisable` is clear. A handler that never raises either line
    /// simply never sees `Some` here.
    pub fn poll_for_interrupt(&mut self) -> Option<u16> {
        if self.nmi_pending {
            self.nmi_pending = false;
            return Some(NMI_VECTOR);
        }
        if self.irq_pending && !self.flag(FlagName::InterruptDisable) {
            self.irq_pending = false;
            return Some(IRQ_VECTOR);
        }
        None
    }

    /// Installs the instruction-byte address set for the function about to
    /// run, so `on_memory_written` can recognize self-modification.
    pub fn enter_function(&mut self, addrs: Rc<HashSet<u16>>) {
        self.current_function_addrs = Some(addrs);
    }

    pub fn leave_function(&mut self) {
        self.current_function_addrs = None;
    }

    /// True if `address` falls within the instruction bytes of the function
    /// currently executing. A compiled/interpreted body must stop immediately
    /// when this returns true and re-dispatch at the following 6502
    /// instruction.
    pub fn on_memory_written(&self, address: u16) -> bool {
        match &self.current_function_addrs {
            Some(set) => set.contains(&address),
            None => false,
        }
    }

    /// Logs one trace line for the instruction at `addr`: the address plus
    /// the live A/X/Y/SP/P snapshot. A no-op unless `--trace` enabled
    /// `debug_enabled`.
    pub fn debug_hook(&self, addr_text: &str) {
        if self.debug_enabled {
            trace!(
                "{addr_text} A={:02X} X={:02X} Y={:02X} SP={:02X} P={:02X}",
                self.registers.A,
                self.registers.X,
                self.registers.Y,
                self.registers.S,
                self.registers.P.to_byte(),
            );
        }
    }

    pub fn read_memory(&mut self, addr: u16) -> u8 {
        self.bus.read(addr)
    }

    pub fn write_memory(&mut self, addr: u16, value: u8) {
        self.bus.write(addr, value);
    }
}
