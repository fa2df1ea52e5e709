//! Startup error type.
//!
//! Simulated traps (exceptions, interrupts) are never represented as Rust
//! errors — they are recorded into CSRs and the trace stream by
//! [`crate::machine::Machine::step`] and never escape it. This type only
//! covers the things that can go wrong before the simulator starts
//! executing: bad arguments and files that cannot be opened.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to open hex image {path}: {source}")]
    OpenHexImage { path: PathBuf, source: io::Error },

    #[error("failed to create trace output {path}: {source}")]
    OpenTrace { path: PathBuf, source: io::Error },

    #[error("failed to open terminal input {path}: {source}")]
    OpenTerminalIn { path: PathBuf, source: io::Error },

    #[error("failed to create terminal output {path}: {source}")]
    OpenTerminalOut { path: PathBuf, source: io::Error },

    #[error("failed to read hex image {path}: {source}")]
    ReadHexImage { path: PathBuf, source: io::Error },
}
