//! Registry of live cue sets
//!
//! Owned by the rig rather than kept in a process-wide list. Every
//! operation goes through a [`CueHandle`]; a handle stays valid until the
//! set's last reference is released.

use super::completion::CueOutcome;
use super::set::{CueSet, Handled, Release};
use super::CueResult;
use crate::status::Status;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

/// How long a helper may ignore SIGTERM before it is sent SIGKILL
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Identifies a cue set within its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CueHandle(u64);

impl fmt::Display for CueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cues#{}", self.0)
    }
}

#[derive(Debug)]
pub struct CueRegistry {
    sets: BTreeMap<CueHandle, CueSet>,
    next_id: u64,
    status: Status,
    terminate_grace: Duration,
}

impl CueRegistry {
    pub fn new(status: Status, terminate_grace: Duration) -> Self {
        Self {
            sets: BTreeMap::new(),
            next_id: 1,
            status,
            terminate_grace,
        }
    }

    /// Create an idle set with every slot unset, held once by the caller
    pub fn create(&mut self) -> CueHandle {
        let handle = CueHandle(self.next_id);
        self.next_id += 1;
        self.sets.insert(handle, CueSet::new(self.status.clone()));
        log::debug!("Created {}", handle);
        handle
    }

    pub fn get(&self, handle: CueHandle) -> Option<&CueSet> {
        self.sets.get(&handle)
    }

    pub fn get_mut(&mut self, handle: CueHandle) -> Option<&mut CueSet> {
        self.sets.get_mut(&handle)
    }

    pub fn contains(&self, handle: CueHandle) -> bool {
        self.sets.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Number of sets with a helper outstanding
    pub fn running(&self) -> usize {
        self.sets.values().filter(|s| s.is_running()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CueHandle, &CueSet)> {
        self.sets.iter().map(|(h, s)| (*h, s))
    }

    fn live(&mut self, handle: CueHandle) -> &mut CueSet {
        self.sets
            .get_mut(&handle)
            .unwrap_or_else(|| panic!("{} used after its last release", handle))
    }

    /// Start a LOAD exchange
    ///
    /// The rig only polls the new helper on its next pass; callers outside
    /// the loop should use [`crate::rig::RigHandle::begin_load`], which
    /// also wakes it.
    pub fn begin_load(&mut self, handle: CueHandle, helper: &Path, path: &Path) -> CueResult<()> {
        self.live(handle).begin_load(helper, path)
    }

    /// Start a SAVE exchange; see [`CueRegistry::begin_load`] about waking the rig
    pub fn begin_save(&mut self, handle: CueHandle, helper: &Path, path: &Path) -> CueResult<()> {
        self.live(handle).begin_save(helper, path)
    }

    pub fn acquire(&mut self, handle: CueHandle) {
        self.live(handle).acquire();
    }

    /// Drop one reference; returns true if the set was freed
    pub fn release(&mut self, handle: CueHandle) -> bool {
        match self.live(handle).release() {
            Release::Held | Release::Terminating => false,
            Release::Freed => {
                self.sets.remove(&handle);
                log::debug!("Freed {}", handle);
                true
            }
        }
    }

    /// Append a poll entry for every running set
    pub fn poll_entries(&mut self, fds: &mut Vec<libc::pollfd>) {
        for set in self.sets.values_mut() {
            if let Some(entry) = set.pollfd(fds.len()) {
                fds.push(entry);
            }
        }
    }

    /// Dispatch poll results; finished sets drop their helper's reference
    ///
    /// Returns the outcome of every exchange that ended.
    pub fn handle(&mut self, fds: &[libc::pollfd]) -> Vec<(CueHandle, CueOutcome)> {
        let finished: Vec<(CueHandle, CueOutcome)> = self
            .sets
            .iter_mut()
            .filter_map(|(handle, set)| match set.handle(fds) {
                Handled::Finished(outcome) => Some((*handle, outcome)),
                Handled::Pending | Handled::NotReady => None,
            })
            .collect();

        for (handle, _) in &finished {
            self.release(*handle);
        }
        finished
    }

    /// Force down helpers that outlived their termination grace period
    pub fn escalate(&mut self, now: Instant) -> usize {
        let grace = self.terminate_grace;
        self.sets
            .values_mut()
            .map(|set| set.escalate(now, grace))
            .filter(|&killed| killed)
            .count()
    }

    /// Earliest pending SIGKILL deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sets
            .values()
            .filter_map(|set| set.kill_deadline(self.terminate_grace))
            .min()
    }
}
