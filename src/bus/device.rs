//! Memory-mapped devices attached to the [`super::Bus`].

/// A device occupying a contiguous span of the 16-bit address space.
///
/// `read`/`write` receive an address already relative to the device's
/// attach offset. `as_code_block` exposes a raw byte view for devices whose
/// contents the decomposer may disassemble; devices that are pure registers
/// (PPU, controllers) return `None`.
pub trait Device {
    fn size(&self) -> u16;
    fn read(&mut self, offset: u16) -> u8;
    fn write(&mut self, offset: u16, value: u8);

    fn as_code_block(&self) -> Option<&[u8]> {
        None
    }
}

/// Flat RAM with optional NES-style mirroring: addresses past the physical
/// size (if mirrored) wrap modulo that size. The PRG-ROM device supplies its
/// own `as_code_block`; this one backs CPU RAM and PPU-register mirroring
/// both, since the mirroring logic is identical once the physical size is
/// known.
pub struct Ram {
    bytes: Vec<u8>,
    /// The span the bus should route to this device, which may exceed
    /// `bytes.len()` when mirrored.
    logical_size: u16,
    /// Physical size used for the mirror wrap (`addr % physical_size`).
    /// `None` disables mirroring: `logical_size == bytes.len()`.
    mirror_physical_size: Option<u16>,
    writable: bool,
}

impl Ram {
    pub fn new(size: u16) -> Self {
        Ram {
            bytes: vec![0; size as usize],
            logical_size: size,
            mirror_physical_size: None,
            writable: true,
        }
    }

    /// A mirrored RAM region: `logical_size` is the span the bus attaches
    /// (e.g. NES's 0x0800..0x2000), `physical_size` is the backing store
    /// that address wraps into (0x0800 bytes of real RAM, or 8 PPU
    /// registers).
    pub fn mirrored(physical_size: u16, logical_size: u16) -> Self {
        Ram {
            bytes: vec![0; physical_size as usize],
            logical_size,
            mirror_physical_size: Some(physical_size),
            writable: true,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn load(&mut self, offset: u16, data: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }
}

impl Device for Ram {
    fn size(&self) -> u16 {
        self.logical_size
    }

    fn read(&mut self, offset: u16) -> u8 {
        let idx = match self.mirror_physical_size {
            Some(phys) => (offset % phys) as usize,
            None => offset as usize,
        };
        self.bytes[idx]
    }

    fn write(&mut self, offset: u16, value: u8) {
        if !self.writable {
            return;
        }
        let idx = match self.mirror_physical_size {
            Some(phys) => (offset % phys) as usize,
            None => offset as usize,
        };
        self.bytes[idx] = value;
    }

    fn as_code_block(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }
}
