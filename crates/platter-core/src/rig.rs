//! The rig: main loop servicing outstanding helper processes
//!
//! All cue sets live in a registry guarded by one lock. The loop thread
//! builds a poll set from the running exchanges, drops the lock while it
//! sleeps in `poll`, then dispatches whatever became readable. Other
//! threads take the same lock to create, load or release cue sets and call
//! [`RigHandle::notify`] so the loop picks up new work without waiting for
//! its timeout.
//!
//! ```text
//! ┌─────────────┐  lock + notify   ┌──────────────────────────────┐
//! │ UI / decks  │ ───────────────▶ │ Rig::run                     │
//! └─────────────┘                  │   lock, collect pollfds      │
//!                                  │   unlock, poll(wake + cues)  │
//!                                  │   lock, handle, escalate     │
//!                                  └──────────────────────────────┘
//! ```

use crate::cues::{CueHandle, CueOutcome, CueRegistry, CueResult, DEFAULT_TERMINATE_GRACE};
use crate::status::Status;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Upper bound on a single poll when nothing else limits it
const IDLE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RigError {
    #[error("Failed to create wake pipe: {0}")]
    WakePipe(#[source] io::Error),

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
}

pub type RigResult<T> = Result<T, RigError>;

#[derive(Debug, Clone)]
pub struct RigConfig {
    /// How long a helper may ignore SIGTERM before SIGKILL
    pub terminate_grace: Duration,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}

/// State shared between the loop and its clients, behind the rig lock
#[derive(Debug)]
pub struct RigState {
    pub cues: CueRegistry,
    quit: bool,
}

impl RigState {
    pub fn quit_requested(&self) -> bool {
        self.quit
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<RigState>,
    wake_rx: UnixStream,
    wake_tx: UnixStream,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        // A full pipe already guarantees a wakeup
        match (&self.wake_tx).write(&[1]) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::error!("Failed to wake rig: {}", e),
        }
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.wake_rx).read(&mut buf) {
                Ok(0) => return,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => {
                    log::error!("Failed to drain wake pipe: {}", e);
                    return;
                }
            }
        }
    }
}

/// Cloneable, thread-safe access to a running rig
#[derive(Debug, Clone)]
pub struct RigHandle {
    shared: Arc<Shared>,
}

impl RigHandle {
    pub fn lock(&self) -> MutexGuard<'_, RigState> {
        self.shared.lock()
    }

    /// Wake the loop so it re-reads the registry
    pub fn notify(&self) {
        self.shared.notify();
    }

    /// Start loading cues for `path` and wake the loop to poll the helper
    pub fn begin_load(&self, handle: CueHandle, helper: &Path, path: &Path) -> CueResult<()> {
        self.shared.lock().cues.begin_load(handle, helper, path)?;
        self.shared.notify();
        Ok(())
    }

    /// Start saving cues for `path` and wake the loop to poll the helper
    pub fn begin_save(&self, handle: CueHandle, helper: &Path, path: &Path) -> CueResult<()> {
        self.shared.lock().cues.begin_save(handle, helper, path)?;
        self.shared.notify();
        Ok(())
    }

    /// Ask the loop to exit once outstanding exchanges are done
    pub fn quit(&self) {
        self.shared.lock().quit = true;
        self.shared.notify();
    }
}

pub struct Rig {
    shared: Arc<Shared>,
    fds: Vec<libc::pollfd>,
}

impl Rig {
    pub fn new(config: RigConfig, status: Status) -> RigResult<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair().map_err(RigError::WakePipe)?;
        wake_rx.set_nonblocking(true).map_err(RigError::WakePipe)?;
        wake_tx.set_nonblocking(true).map_err(RigError::WakePipe)?;

        log::info!(
            "Rig ready (terminate grace {} ms)",
            config.terminate_grace.as_millis()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RigState {
                    cues: CueRegistry::new(status, config.terminate_grace),
                    quit: false,
                }),
                wake_rx,
                wake_tx,
            }),
            fds: Vec::new(),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, RigState> {
        self.shared.lock()
    }

    pub fn handle(&self) -> RigHandle {
        RigHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn notify(&self) {
        self.shared.notify();
    }

    pub fn quit(&self) {
        self.handle().quit();
    }

    /// Wait once for helper output, a wakeup or a deadline, and dispatch it
    ///
    /// Returns the outcome of every exchange that finished.
    pub fn poll_once(&mut self, timeout: Duration) -> RigResult<Vec<(CueHandle, CueOutcome)>> {
        let timeout = {
            let mut state = self.shared.lock();
            self.fds.clear();
            self.fds.push(libc::pollfd {
                fd: self.shared.wake_rx.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });
            state.cues.poll_entries(&mut self.fds);

            match state.cues.next_deadline() {
                Some(deadline) => timeout.min(deadline.saturating_duration_since(Instant::now())),
                None => timeout,
            }
        };

        let ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: self.fds is a valid, exclusively borrowed vector of pollfd.
        let n = unsafe { libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, ms) };
        if n == -1 {
            let e = io::Error::last_os_error();
            if e.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(RigError::Poll(e));
        }

        if self.fds[0].revents != 0 {
            self.shared.drain_wake();
        }

        let mut state = self.shared.lock();
        let finished = state.cues.handle(&self.fds);
        state.cues.escalate(Instant::now());
        Ok(finished)
    }

    /// Service helpers until quit is requested and none are outstanding
    pub fn run(&mut self) -> RigResult<()> {
        log::info!("Rig main loop started");
        loop {
            {
                let state = self.shared.lock();
                if state.quit && state.cues.running() == 0 {
                    break;
                }
            }
            for (handle, outcome) in self.poll_once(IDLE_POLL)? {
                log::debug!("{} finished: {:?}", handle, outcome);
            }
        }
        log::info!("Rig main loop finished");
        Ok(())
    }
}
