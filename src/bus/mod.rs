//! Address-decoding fabric.
//!
//! Devices attach at a fixed offset and claim a span of the 16-bit address
//! space; the bus finds the right one per access instead of hard-coding a
//! range match, so the NES and C64 memory maps can share one implementation.

pub mod device;

pub use device::{Device, Ram};

use log::trace;

/// A device attached at a fixed offset, spanning `size` addresses.
struct Attachment {
    offset: u16,
    size: u32, // widened so 0x10000 (a full 64K device) is representable
    device: Box<dyn Device>,
}

impl Attachment {
    fn contains(&self, addr: u16) -> bool {
        let addr = addr as u32;
        let base = self.offset as u32;
        addr >= base && addr < base + self.size
    }
}

/// Something notified on every guest write, before the device sees it.
/// Implemented by the executable-method cache and by the SMC tracker, both
/// of which need to react to a write before it lands; both use interior
/// mutability since the bus only ever holds a shared reference.
pub trait WriteObserver {
    fn on_write(&self, addr: u16);
}

/// The memory bus. Owns its devices and a list of observers notified on
/// every write.
pub struct Bus {
    attachments: Vec<Attachment>,
    observers: Vec<std::rc::Rc<dyn WriteObserver>>,
}

impl Bus {
    pub fn new() -> Self {
        Bus {
            attachments: Vec::new(),
            observers: Vec::new(),
        }
    }

    pub fn attach(&mut self, device: Box<dyn Device>, offset: u16) {
        let size = device.size() as u32;
        let size = if size == 0 { 0x10000 } else { size };
        self.attachments.push(Attachment {
            offset,
            size,
            device,
        });
    }

    pub fn add_observer(&mut self, observer: std::rc::Rc<dyn WriteObserver>) {
        self.observers.push(observer);
    }

    fn find(&mut self, addr: u16) -> Option<&mut Attachment> {
        self.attachments.iter_mut().find(|a| a.contains(addr))
    }

    /// Reads from an unmapped region return 0 rather than failing.
    pub fn read(&mut self, addr: u16) -> u8 {
        match self.find(addr) {
            Some(a) => a.device.read(addr - a.offset),
            None => {
                trace!("read from unmapped address {:#06X}, returning 0", addr);
                0
            }
        }
    }

    pub fn read_u16(&mut self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Writes to an unmapped region are dropped silently. Observers (cache,
    /// SMC tracker) run first regardless of whether any device claims the
    /// address.
    pub fn write(&mut self, addr: u16, value: u8) {
        for observer in &self.observers {
            observer.on_write(addr);
        }
        match self.find(addr) {
            Some(a) => a.device.write(addr - a.offset, value),
            None => trace!("write to unmapped address {:#06X} dropped", addr),
        }
    }

    /// The contiguous byte-addressable spans the decomposer may disassemble:
    /// only attachments whose device exposes a raw block participate.
    pub fn code_regions(&self) -> Vec<CodeRegion<'_>> {
        self.attachments
            .iter()
            .filter_map(|a| {
                a.device.as_code_block().map(|bytes| CodeRegion {
                    base_addr: a.offset,
                    bytes,
                })
            })
            .collect()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Bus::new()
    }
}

/// A contiguous span the decomposer may scan for instructions.
pub struct CodeRegion<'a> {
    pub base_addr: u16,
    pub bytes: &'a [u8],
}

impl<'a> CodeRegion<'a> {
    /// True if the whole instruction starting at `addr` (`len` bytes) lies
    /// within this region.
    pub fn contains_range(&self, addr: u16, len: u16) -> bool {
        let base = self.base_addr as u32;
        let end = base + self.bytes.len() as u32;
        let addr = addr as u32;
        addr >= base && addr + len as u32 <= end
    }

    pub fn byte_at(&self, addr: u16) -> Option<u8> {
        let idx = addr as i64 - self.base_addr as i64;
        if idx < 0 || idx as usize >= self.bytes.len() {
            None
        } else {
            Some(self.bytes[idx as usize])
        }
    }
}
