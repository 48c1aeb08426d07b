//! ROM image loading: iNES (NES) and raw PRG (C64).
//!
//! A `Result`-returning loader that hands back plain bytes and metadata
//! rather than panicking or owning a bus device itself; the caller wires
//! the bytes into whatever memory map it's building.

mod c64;
mod ines;

pub use c64::C64Image;
pub use ines::{INesImage, Mirroring};

use std::path::Path;

use crate::error::EmulatorError;

/// Reads `path` and parses it as an iNES image.
pub fn load_ines(path: &Path) -> Result<INesImage, EmulatorError> {
    let bytes = std::fs::read(path)?;
    INesImage::parse(&bytes)
}

/// Reads `path` and parses it as a raw C64 PRG image.
pub fn load_c64(path: &Path) -> Result<C64Image, EmulatorError> {
    let bytes = std::fs::read(path)?;
    C64Image::parse(&bytes)
}
