//! Platter Core - cue point exchange and record library for DJ tools
//!
//! Two subsystems share one problem: driving slow, possibly failing helper
//! programs from a responsive, single-threaded, poll-driven main loop.
//!
//! - [`cues`]: per-track cue points, loaded and saved asynchronously through
//!   a cue loader helper and polled by the [`rig`]
//! - [`library`]: scanned records indexed into named, multiply-sorted crates
//! - [`external`]: line reader and process launcher shared by both
//!
//! ```text
//! helper stdout ──pipe──▶ LineReader ──▶ CueSet ◀── CueRegistry ◀── Rig (poll)
//! scanner stdout ─pipe──▶ LineReader ──▶ Library ──▶ Crate listings
//! ```

pub mod config;
pub mod cues;
pub mod external;
pub mod library;
pub mod rig;
pub mod status;

#[cfg(test)]
mod testing;

pub use cues::{CueHandle, CueOutcome, CuePoints, CueRegistry, MAX_CUES};
pub use library::{Crate, Library, Record, RecordId, SortOrder};
pub use rig::{Rig, RigHandle};
pub use status::Status;
