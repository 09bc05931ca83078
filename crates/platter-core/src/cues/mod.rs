//! Cue points and their asynchronous exchange with a cue loader helper
//!
//! A [`CueSet`] holds the [`MAX_CUES`] cue points of one track. Loading and
//! saving is delegated to an external cue loader program:
//!
//! ```text
//! cueloader LOAD <path>            -> up to 16 lines on stdout
//! cueloader SAVE <path> v0 .. v15  -> exit status only
//! ```
//!
//! The exchange never blocks the caller. The [`CueRegistry`] hands the
//! running sets' pipes to the rig's poll loop and feeds readiness back in.
//!
//! ## Lifetime
//!
//! Sets are reference counted. A running helper holds one reference of its
//! own, so a set outlives every holder until its process is reaped:
//!
//! ```text
//! create()        refcount 1           (caller)
//! begin_load()    refcount 2           (caller + helper)
//! release()       refcount 1, running  -> SIGTERM, set stays alive
//! helper reaped   refcount 0           -> completion fired, set removed
//! ```

mod completion;
mod points;
mod registry;
mod set;

pub use completion::{Completion, CueOutcome};
pub use points::{parse_line, serialize_slot, CueLine, CuePoints, MAX_CUES, UNSET_TOKEN};
pub use registry::{CueHandle, CueRegistry, DEFAULT_TERMINATE_GRACE};
pub use set::{CueSet, ExchangeMode, Handled, ProcessState, Release};

use crate::external::ExternalError;
use thiserror::Error;

/// Errors starting a cue exchange
#[derive(Debug, Error)]
pub enum CueError {
    /// The cue loader could not be launched; the set is unchanged
    #[error("Failed to start cue loader: {0}")]
    Spawn(#[from] ExternalError),
}

/// Result type for cue operations
pub type CueResult<T> = Result<T, CueError>;
