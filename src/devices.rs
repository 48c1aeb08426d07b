//! Concrete NES memory-mapped peripherals and the bus assembly for both
//! target machines, mapped the way an NES's address decoder and cartridge bank logic
//! would be, generalized into `Device`/`Bus` attachments instead of one
//! monolithic range-matching read/write pair.

use log::debug;

use crate::bus::{Bus, Device, Ram};
use crate::rom::{C64Image, INesImage};

/// PPU registers (0x2000-0x2007, mirrored through 0x3FFF). Just latches the
/// last byte written to each register; this emulator has no picture
/// pipeline, so reads return whatever was last written rather than modeling
/// PPUSTATUS's read-side-effects.
pub struct PpuRegisters {
    regs: [u8; 8],
}

impl PpuRegisters {
    pub fn new() -> Self {
        PpuRegisters { regs: [0; 8] }
    }
}

impl Default for PpuRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for PpuRegisters {
    fn size(&self) -> u16 {
        0x2000 // 0x2000..0x4000, mirrored every 8 bytes
    }

    fn read(&mut self, offset: u16) -> u8 {
        self.regs[(offset % 8) as usize]
    }

    fn write(&mut self, offset: u16, value: u8) {
        self.regs[(offset % 8) as usize] = value;
    }
}

/// One button's worth of state for the controller shift registers at
/// 0x4016/0x4017: A, B, Select, Start, Up, Down, Left, Right (this read
/// order, LSB first).
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonState {
    pub a: bool,
    pub b: bool,
    pub select: bool,
    pub start: bool,
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl ButtonState {
    fn bits(self) -> [bool; 8] {
        [self.a, self.b, self.select, self.start, self.up, self.down, self.left, self.right]
    }
}

/// A single controller port. A write with bit 0 set "strobes" (latches the
/// current button state and resets the read cursor to bit 0); each
/// subsequent read shifts the next bit out. Controllers 1 and 2 are
/// independent instances sharing no state.
pub struct Controller {
    buttons: ButtonState,
    strobe: bool,
    cursor: usize,
}

impl Controller {
    pub fn new() -> Self {
        Controller { buttons: ButtonState::default(), strobe: false, cursor: 0 }
    }

    pub fn set_buttons(&mut self, buttons: ButtonState) {
        self.buttons = buttons;
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Controller {
    fn size(&self) -> u16 {
        1
    }

    fn read(&mut self, _offset: u16) -> u8 {
        let bits = self.buttons.bits();
        let bit = if self.cursor < bits.len() { bits[self.cursor] } else { true };
        if !self.strobe {
            self.cursor += 1;
        }
        bit as u8
    }

    fn write(&mut self, _offset: u16, value: u8) {
        self.strobe = value & 1 == 1;
        if self.strobe {
            self.cursor = 0;
        }
    }
}

/// OAM-DMA trigger at 0x4014: a write of `page` copies 256 bytes starting at
/// `page << 8` into OAM. There's no sprite renderer here, so the copy just
/// lands in a 256-byte scratch buffer; what matters for the CPU model is
/// that the write is observed (and, on real hardware, stalls the CPU for
/// ~513 cycles, which this emulator doesn't model since it isn't
/// cycle-accurate).
pub struct OamDma {
    oam: [u8; 256],
}

impl OamDma {
    pub fn new() -> Self {
        OamDma { oam: [0; 256] }
    }
}

impl Default for OamDma {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for OamDma {
    fn size(&self) -> u16 {
        1
    }

    fn read(&mut self, _offset: u16) -> u8 {
        0
    }

    fn write(&mut self, _offset: u16, page: u8) {
        debug!("OAM-DMA triggered from page {:#04X}", page);
        // The actual source bytes live on the CPU bus at page<<8; without a
        // reference back to the bus this device can't pull them itself, so
        // the copy is a no-op stand-in for the one real hardware performs.
        let _ = &mut self.oam;
    }
}

/// PRG-ROM mapped at 0x8000-0xFFFF. NROM (mapper 0) mirrors a single 16 KiB
/// bank across both halves; a 32 KiB image maps straight through.
pub struct PrgRom {
    bytes: Vec<u8>,
}

impl PrgRom {
    pub fn new(mut prg_rom: Vec<u8>) -> Self {
        if prg_rom.len() == 1024 * 16 {
            let bank = prg_rom.clone();
            prg_rom.extend(bank);
        }
        PrgRom { bytes: prg_rom }
    }
}

impl Device for PrgRom {
    fn size(&self) -> u16 {
        0 // full 64K span handled by the attach offset (0x8000..0x10000)
    }

    fn read(&mut self, offset: u16) -> u8 {
        self.bytes[offset as usize % self.bytes.len()]
    }

    fn write(&mut self, _offset: u16, _value: u8) {
        // ROM: writes are dropped. Mapper-0 cartridges have no bank-select
        // registers to trap here.
    }

    fn as_code_block(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }
}

/// Assembles the NES memory map: mirrored zero-page/stack/RAM
/// through 0x1FFF, mirrored PPU registers through 0x3FFF, the OAM-DMA
/// trigger and both controller ports at 0x4014/0x4016/0x4017, and PRG-ROM at
/// 0x8000-0xFFFF carrying the reset/NMI/IRQ vectors.
pub fn build_nes_bus(rom: &INesImage) -> Bus {
    let mut bus = Bus::new();
    bus.attach(Box::new(Ram::mirrored(0x0800, 0x2000)), 0x0000);
    bus.attach(Box::new(PpuRegisters::new()), 0x2000);
    bus.attach(Box::new(OamDma::new()), 0x4014);
    bus.attach(Box::new(Controller::new()), 0x4016);
    bus.attach(Box::new(Controller::new()), 0x4017);
    bus.attach(Box::new(PrgRom::new(rom.prg_rom.clone())), 0x8000);
    bus
}

/// Flat 64 KiB RAM. `Ram` can't represent a full 64K span itself (its
/// `size`/`mirror_physical_size` fields are `u16`, one short of 0x10000), so
/// this mirrors `PrgRom`'s own size-as-zero-sentinel idiom but stays
/// writable.
struct FlatRam {
    bytes: Vec<u8>,
}

impl FlatRam {
    fn new() -> Self {
        FlatRam { bytes: vec![0; 0x10000] }
    }

    fn load(&mut self, offset: u16, data: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }
}

impl Device for FlatRam {
    fn size(&self) -> u16 {
        0
    }

    fn read(&mut self, offset: u16) -> u8 {
        self.bytes[offset as usize]
    }

    fn write(&mut self, offset: u16, value: u8) {
        self.bytes[offset as usize] = value;
    }

    fn as_code_block(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }
}

/// Assembles a C64-flavored bus for running a raw PRG image: plain 64 KiB
/// RAM with the program loaded at its declared address. There's no KERNAL,
/// BASIC ROM, or VIC-II/CIA peripheral model here; running a raw PRG is
/// executing 6502 machine code, not emulating a full C64. The reset vector
/// is pointed at the load address directly since there's no KERNAL boot
/// sequence to fall through.
pub fn build_c64_bus(prg: &C64Image) -> Bus {
    let mut bus = Bus::new();
    let mut ram = FlatRam::new();
    ram.load(prg.load_address, &prg.data);
    let reset_vector = prg.load_address.to_le_bytes();
    ram.load(0xFFFC, &reset_vector);
    bus.attach(Box::new(ram), 0x0000);
    bus
}
