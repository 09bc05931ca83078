//! Helper process plumbing
//!
//! Both the cue loader and the library scanner are external programs that
//! report results as newline-terminated text on their standard output.
//! This module provides the two building blocks they share:
//!
//! - [`LineReader`]: turns a (possibly non-blocking) byte stream into lines
//! - [`HelperProcess`]: spawns a helper with its stdout wired to a pipe

mod process;
mod reader;

pub use process::{spawn, spawn_nonblocking, ExitOutcome, HelperProcess};
pub use reader::{LineRead, LineReader};

use std::path::PathBuf;
use thiserror::Error;

/// Errors from launching or reaping a helper process
#[derive(Debug, Error)]
pub enum ExternalError {
    /// fork/exec of the helper failed
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The child was spawned without a stdout pipe
    #[error("Helper '{0}' has no output pipe")]
    NoPipe(PathBuf),

    /// Changing descriptor flags failed
    #[error("Failed to make pipe non-blocking: {0}")]
    NonBlocking(#[source] std::io::Error),

    /// Sending a signal to the child failed
    #[error("Failed to signal pid {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// waitpid() failed
    #[error("Failed to wait for pid {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for helper process operations
pub type ExternalResult<T> = Result<T, ExternalError>;
