//! A track's cue points and the state of its helper exchange

use super::completion::{Completion, CueOutcome};
use super::points::{CuePoints, MAX_CUES};
use super::CueResult;
use crate::external::{self, ExitOutcome, HelperProcess, LineRead, LineReader};
use crate::status::Status;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Which direction cue points travel in an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    Load,
    Save,
}

impl ExchangeMode {
    /// First protocol argument after argv[0]
    pub fn verb(&self) -> &'static str {
        match self {
            ExchangeMode::Load => "LOAD",
            ExchangeMode::Save => "SAVE",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            ExchangeMode::Load => "loading",
            ExchangeMode::Save => "saving",
        }
    }
}

/// A helper process in flight and the bookkeeping around it
#[derive(Debug)]
pub struct Exchange {
    mode: ExchangeMode,
    path: PathBuf,
    process: HelperProcess,
    reader: LineReader,
    poll_index: Option<usize>,
    terminated_at: Option<Instant>,
    killed: bool,
}

impl Exchange {
    pub fn mode(&self) -> ExchangeMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// True once termination has been requested
    pub fn is_terminated(&self) -> bool {
        self.terminated_at.is_some()
    }
}

#[derive(Debug)]
pub enum ProcessState {
    Idle,
    Running(Exchange),
    Exited,
}

/// Result of feeding poll readiness to a set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    /// Not running, not registered, or not ready
    NotReady,
    /// Lines were consumed; the helper is still running
    Pending,
    /// The helper was reaped and completion fired
    Finished(CueOutcome),
}

/// What a release did to the set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other holders remain
    Held,
    /// Only the helper's reference remains; it was asked to terminate
    Terminating,
    /// Last reference gone; the set must be discarded
    Freed,
}

/// Cue points of one track, plus their exchange with a cue loader
#[derive(Debug)]
pub struct CueSet {
    points: CuePoints,
    refcount: usize,
    state: ProcessState,
    cursor: usize,
    completion: Completion,
    status: Status,
}

impl CueSet {
    /// A set with all slots unset and a single reference
    pub fn new(status: Status) -> Self {
        Self {
            points: CuePoints::new(),
            refcount: 1,
            state: ProcessState::Idle,
            cursor: 0,
            completion: Completion::new(),
            status,
        }
    }

    pub fn points(&self) -> &CuePoints {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut CuePoints {
        &mut self.points
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, ProcessState::Running(_))
    }

    /// Next label a LOAD line will be written to
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn completion(&mut self) -> &mut Completion {
        &mut self.completion
    }

    pub fn completion_fired(&self) -> bool {
        self.completion.has_fired()
    }

    /// Start loading cue points for `path` from the helper
    pub fn begin_load(&mut self, helper: &Path, path: &Path) -> CueResult<()> {
        log::info!("Loading cues for {:?}...", path);
        self.begin(ExchangeMode::Load, helper, path, Vec::new())
    }

    /// Start saving the current cue points for `path` through the helper
    pub fn begin_save(&mut self, helper: &Path, path: &Path) -> CueResult<()> {
        log::info!("Saving cues for {:?}...", path);
        let values = self.points.to_args();
        self.begin(ExchangeMode::Save, helper, path, values)
    }

    fn begin(
        &mut self,
        mode: ExchangeMode,
        helper: &Path,
        path: &Path,
        values: Vec<String>,
    ) -> CueResult<()> {
        assert!(!self.is_running(), "cue exchange started while one is running");

        let mut args = vec![mode.verb().into(), path.as_os_str().to_os_string()];
        args.extend(values.into_iter().map(Into::into));

        let arg0 = helper.to_string_lossy();
        let process = external::spawn_nonblocking(helper, &arg0, &args)?;

        self.state = ProcessState::Running(Exchange {
            mode,
            path: path.to_path_buf(),
            process,
            reader: LineReader::new(),
            poll_index: None,
            terminated_at: None,
            killed: false,
        });
        self.cursor = 0;
        self.completion.rearm();

        // The running helper holds a reference until it is reaped
        self.refcount += 1;
        Ok(())
    }

    /// Register the poll entry at `index` that will report on this set
    ///
    /// Returns the entry to place at `index`, or `None` if nothing is running.
    pub fn pollfd(&mut self, index: usize) -> Option<libc::pollfd> {
        let ProcessState::Running(exchange) = &mut self.state else {
            return None;
        };
        let fd = exchange.process.output_fd()?;
        exchange.poll_index = Some(index);
        Some(libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
    }

    /// Consume whatever the helper has written, given the poll results
    pub fn handle(&mut self, fds: &[libc::pollfd]) -> Handled {
        let ProcessState::Running(exchange) = &mut self.state else {
            return Handled::NotReady;
        };
        let Some(entry) = exchange.poll_index.and_then(|i| fds.get(i)) else {
            return Handled::NotReady;
        };
        if entry.revents == 0 || Some(entry.fd) != exchange.process.output_fd() {
            return Handled::NotReady;
        }

        match drain(exchange, &mut self.points, &mut self.cursor) {
            Ok(false) => Handled::Pending,
            Ok(true) => Handled::Finished(self.finish(None)),
            Err(e) => {
                log::error!("Reading from cue loader: {}", e);
                Handled::Finished(self.finish(Some(e)))
            }
        }
    }

    /// Reap the helper, report, and fire completion
    fn finish(&mut self, read_error: Option<io::Error>) -> CueOutcome {
        let ProcessState::Running(mut exchange) =
            std::mem::replace(&mut self.state, ProcessState::Exited)
        else {
            unreachable!("finish() called without a running exchange");
        };

        // Without end of stream the helper may still be running; don't
        // block on it under the rig lock
        if read_error.is_some() {
            if let Err(e) = exchange.process.kill() {
                log::error!("{}", e);
            }
        }

        let outcome = match (exchange.process.wait(), read_error) {
            (Err(e), _) => CueOutcome::Failed(e.to_string()),
            (Ok(_), Some(e)) => CueOutcome::Failed(e.to_string()),
            (Ok(ExitOutcome::Success), None) => CueOutcome::Completed,
            (Ok(failed), _) if exchange.is_terminated() => {
                log::debug!("Terminated cue loader ended with {}", failed);
                CueOutcome::Terminated
            }
            (Ok(failed), _) => CueOutcome::Failed(failed.to_string()),
        };

        match &outcome {
            CueOutcome::Completed => {
                log::info!("Cue {} completed for {:?}", exchange.mode.noun(), exchange.path)
            }
            CueOutcome::Terminated => {
                log::info!("Cue {} cancelled for {:?}", exchange.mode.noun(), exchange.path)
            }
            CueOutcome::Failed(reason) => {
                log::warn!(
                    "Cue {} completed with {} for {:?}",
                    exchange.mode.noun(),
                    reason,
                    exchange.path
                );
                self.status
                    .alert(format!("Error {} cues", exchange.mode.noun()));
            }
        }

        self.completion.fire(outcome.clone());
        outcome
    }

    pub fn acquire(&mut self) {
        self.refcount += 1;
    }

    /// Drop one reference
    ///
    /// Falling to one while running means only the helper still holds the
    /// set, so it is asked to stop. Destruction then waits for the reap.
    pub fn release(&mut self) -> Release {
        assert!(self.refcount > 0, "cue set released more often than acquired");
        log::debug!("Release cue set, refcount={}", self.refcount);
        self.refcount -= 1;

        if self.refcount == 1 {
            if let ProcessState::Running(exchange) = &mut self.state {
                log::debug!("Cue set still executing but no longer required");
                request_termination(exchange);
                return Release::Terminating;
            }
        }

        if self.refcount == 0 {
            assert!(!self.is_running(), "cue set freed with helper running");
            return Release::Freed;
        }
        Release::Held
    }

    /// When this set's helper should be forced down, if ever
    pub fn kill_deadline(&self, grace: Duration) -> Option<Instant> {
        match &self.state {
            ProcessState::Running(exchange) if !exchange.killed => {
                exchange.terminated_at.map(|at| at + grace)
            }
            _ => None,
        }
    }

    /// SIGKILL a helper that ignored SIGTERM for longer than `grace`
    ///
    /// Returns true if a kill was sent.
    pub fn escalate(&mut self, now: Instant, grace: Duration) -> bool {
        let Some(deadline) = self.kill_deadline(grace) else {
            return false;
        };
        if now < deadline {
            return false;
        }
        let ProcessState::Running(exchange) = &mut self.state else {
            return false;
        };

        log::warn!("Cue loader pid {} ignored SIGTERM, killing", exchange.pid());
        if let Err(e) = exchange.process.kill() {
            log::error!("{}", e);
        }
        exchange.killed = true;
        true
    }
}

fn request_termination(exchange: &mut Exchange) {
    if exchange.is_terminated() {
        return;
    }
    if let Err(e) = exchange.process.terminate() {
        log::error!("{}", e);
    }
    exchange.terminated_at = Some(Instant::now());
}

/// Read every line currently available
///
/// Returns true at end of stream.
fn drain(exchange: &mut Exchange, points: &mut CuePoints, cursor: &mut usize) -> io::Result<bool> {
    loop {
        let line = match exchange.reader.read_line(&mut exchange.process)? {
            LineRead::Line(line) => line,
            LineRead::WouldBlock => return Ok(false),
            LineRead::EndOfStream => return Ok(true),
        };

        log::debug!("Cues got line '{}'", line);

        if exchange.mode == ExchangeMode::Save {
            continue;
        }

        // Every line uses up a label, even malformed ones, so later lines
        // stay aligned with the helper's output
        if *cursor < MAX_CUES {
            points.apply_line(*cursor, &line);
            *cursor += 1;
        } else if *cursor == MAX_CUES {
            log::warn!("Cue loader sent more than {} lines, ignoring the rest", MAX_CUES);
            *cursor += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cue_file, fixture, pump};

    #[test]
    fn test_new_set_is_idle_and_empty() {
        let set = CueSet::new(Status::new());
        assert_eq!(set.refcount(), 1);
        assert!(!set.is_running());
        assert!(set.points().is_empty());
    }

    #[test]
    fn test_load_reads_lines_in_label_order() {
        let dir = tempfile::tempdir().unwrap();
        let track = cue_file(dir.path(), "track", "1.5\n-\n\n42\nbogus\n");
        let mut set = CueSet::new(Status::new());
        set.points_mut().set(2, 7.0);
        set.points_mut().set(4, 9.0);
        let done = set.completion().subscribe();

        set.begin_load(&fixture("cueloader.sh"), &track).unwrap();
        assert_eq!(set.refcount(), 2);
        assert_eq!(set.cursor(), 0);

        let outcome = pump(&mut set);
        assert_eq!(outcome, CueOutcome::Completed);
        assert_eq!(done.try_recv(), Ok(CueOutcome::Completed));

        let points = set.points();
        assert_eq!(points.get(0), Some(1.5));
        assert_eq!(points.get(1), None);
        assert_eq!(points.get(2), Some(7.0), "empty line keeps the slot");
        assert_eq!(points.get(3), Some(42.0));
        assert_eq!(points.get(4), None, "malformed line unsets but consumes");
        assert_eq!(set.cursor(), 5);
        assert!(matches!(set.state(), ProcessState::Exited));
    }

    #[test]
    fn test_lines_beyond_sixteen_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (1..=20).map(|n| format!("{}\n", n)).collect();
        let track = cue_file(dir.path(), "long", &body);
        let mut set = CueSet::new(Status::new());

        set.begin_load(&fixture("cueloader.sh"), &track).unwrap();
        assert_eq!(pump(&mut set), CueOutcome::Completed);

        assert_eq!(set.points().get(15), Some(16.0));
        assert_eq!(set.cursor(), MAX_CUES + 1);
    }

    #[test]
    fn test_failed_load_keeps_partial_results_and_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let track = cue_file(dir.path(), "partial.fail", "3.0\n4.0\n");
        let status = Status::new();
        let mut set = CueSet::new(status.clone());

        set.begin_load(&fixture("cueloader.sh"), &track).unwrap();
        let outcome = pump(&mut set);

        assert!(matches!(outcome, CueOutcome::Failed(_)));
        assert_eq!(set.points().get(0), Some(3.0));
        assert_eq!(set.points().get(1), Some(4.0));
        assert_eq!(status.alerts(), 1);
    }

    #[test]
    fn test_read_error_kills_helper_before_reaping() {
        let dir = tempfile::tempdir().unwrap();
        let track = cue_file(dir.path(), "broken.hang", "");
        let status = Status::new();
        let mut set = CueSet::new(status.clone());
        let done = set.completion().subscribe();

        set.begin_load(&fixture("cueloader.sh"), &track).unwrap();
        let start = Instant::now();
        let outcome = set.finish(Some(io::Error::other("pipe broke")));

        assert_eq!(outcome, CueOutcome::Failed("pipe broke".into()));
        assert!(start.elapsed() < Duration::from_secs(10), "helper was not killed");
        assert!(matches!(set.state(), ProcessState::Exited));
        assert_eq!(done.try_recv(), Ok(outcome));
        assert_eq!(status.alerts(), 1);
    }

    #[test]
    fn test_spawn_failure_leaves_set_idle() {
        let mut set = CueSet::new(Status::new());
        let result = set.begin_load(Path::new("/nonexistent/cueloader"), Path::new("/a.mp3"));

        assert!(result.is_err());
        assert!(matches!(set.state(), ProcessState::Idle));
        assert_eq!(set.refcount(), 1);
    }

    #[test]
    fn test_save_passes_slots_to_helper() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("saved");
        let mut set = CueSet::new(Status::new());
        set.points_mut().set(0, 12.5);
        set.points_mut().set(15, 300.0);

        set.begin_save(&fixture("cueloader.sh"), &track).unwrap();
        assert_eq!(pump(&mut set), CueOutcome::Completed);

        let written = std::fs::read_to_string(&track).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), MAX_CUES);
        assert_eq!(lines[0], "12.5");
        assert_eq!(lines[1], "-");
        assert_eq!(lines[15], "300");

        // And back again
        let mut loaded = CueSet::new(Status::new());
        loaded.begin_load(&fixture("cueloader.sh"), &track).unwrap();
        assert_eq!(pump(&mut loaded), CueOutcome::Completed);
        assert_eq!(loaded.points(), set.points());
    }

    #[test]
    fn test_release_terminates_once_then_frees_after_reap() {
        let dir = tempfile::tempdir().unwrap();
        let track = cue_file(dir.path(), "slow.hang", "");
        let status = Status::new();
        let mut set = CueSet::new(status.clone());

        set.begin_load(&fixture("cueloader.sh"), &track).unwrap();
        set.acquire();
        assert_eq!(set.refcount(), 3);
        assert_eq!(set.release(), Release::Held);
        assert_eq!(set.release(), Release::Terminating);
        assert!(set.is_running());

        set.acquire();
        assert_eq!(set.release(), Release::Terminating);
        let ProcessState::Running(exchange) = set.state() else {
            panic!("expected running exchange");
        };
        assert!(exchange.is_terminated());

        assert_eq!(pump(&mut set), CueOutcome::Terminated);
        assert_eq!(status.alerts(), 0, "requested termination is not an alert");
        assert_eq!(set.release(), Release::Freed);
    }

    #[test]
    fn test_escalate_kills_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let track = cue_file(dir.path(), "stubborn.ignore", "");
        let mut set = CueSet::new(Status::new());

        set.begin_load(&fixture("cueloader.sh"), &track).unwrap();
        assert!(!set.escalate(Instant::now(), Duration::ZERO), "nothing to escalate yet");

        assert_eq!(set.release(), Release::Terminating);
        let grace = Duration::from_millis(50);
        assert!(!set.escalate(Instant::now(), grace));
        assert!(set.escalate(Instant::now() + grace, grace));
        assert!(!set.escalate(Instant::now() + grace, grace), "kill is sent once");

        assert_eq!(pump(&mut set), CueOutcome::Terminated);
    }
}
