//! The CPU model.

pub mod hal;
pub mod registers;

pub use hal::Hal;
pub use registers::{ProcessorStatus, Registers};
