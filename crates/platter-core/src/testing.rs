//! Shared helpers for tests that drive real helper processes

use crate::cues::{CueHandle, CueOutcome, CueRegistry, CueSet, Handled};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const PUMP_LIMIT: Duration = Duration::from_secs(20);

/// Path of an executable script under `testdata/`
pub fn fixture(name: &str) -> PathBuf {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name);
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Write a cue file for the test cue loader
pub fn cue_file(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn poll(fds: &mut [libc::pollfd]) {
    // SAFETY: fds is a valid, exclusively borrowed slice of pollfd.
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, 100) };
    assert!(n >= 0, "poll failed: {}", std::io::Error::last_os_error());
}

/// Poll a single set until its exchange finishes
pub fn pump(set: &mut CueSet) -> CueOutcome {
    let start = Instant::now();
    while start.elapsed() < PUMP_LIMIT {
        let mut fds: Vec<libc::pollfd> = set.pollfd(0).into_iter().collect();
        assert!(!fds.is_empty(), "pump() on a set that is not running");
        poll(&mut fds);
        if let Handled::Finished(outcome) = set.handle(&fds) {
            return outcome;
        }
    }
    panic!("cue exchange did not finish within {:?}", PUMP_LIMIT);
}

/// Poll a registry until no exchange is outstanding
pub fn pump_registry(cues: &mut CueRegistry) -> Vec<(CueHandle, CueOutcome)> {
    let start = Instant::now();
    let mut finished = Vec::new();
    while cues.running() > 0 {
        assert!(start.elapsed() < PUMP_LIMIT, "cue exchanges did not finish");
        let mut fds = Vec::new();
        cues.poll_entries(&mut fds);
        poll(&mut fds);
        finished.extend(cues.handle(&fds));
    }
    finished
}
