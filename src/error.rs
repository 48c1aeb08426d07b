//! Error categories.
//!
//! `thiserror` gives every fallible layer of the pipeline a uniform,
//! non-panicking way to report trouble, down to ROM parsing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    /// A bug in the decomposer or converter: unknown opcode, a branch target
    /// with no label in the decomposed function, a JSR to an address that
    /// isn't a function entry, or an SMC source that targets two different
    /// addresses. Fatal: the process aborts with this diagnostic after the
    /// current IR instruction finishes.
    #[error("structural error at {address:#06X}: {reason}")]
    Structural { address: u16, reason: String },

    /// Constructed to document the category but never returned as an `Err`:
    /// a `memory_changed` during body execution sets a bailout flag instead
    /// of raising.
    #[error("cache coherence event at {address:#06X}: {reason}")]
    CacheCoherence { address: u16, reason: String },

    #[error("failed to read ROM file: {0}")]
    RomIo(#[from] std::io::Error),

    #[error("invalid iNES header: {0}")]
    InvalidInesHeader(String),

    #[error("invalid C64 PRG image: {0}")]
    InvalidC64Prg(String),

    #[error("failed to (de)serialize compiled body: {0}")]
    Persistence(#[from] serde_json::Error),
}
