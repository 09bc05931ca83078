//! One-shot completion signal for cue exchanges
//!
//! Subscribers receive a crossbeam channel; firing delivers the outcome to
//! all of them exactly once. Subscribing after the fact still works: the
//! stored outcome is sent straight away.

use crossbeam::channel::{self, Receiver, Sender};
use std::fmt;

/// How a cue load or save ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CueOutcome {
    /// The helper exited successfully
    Completed,
    /// The helper failed or could not be read; partial results are kept
    Failed(String),
    /// The exchange was cut short because nobody needed it any more
    Terminated,
}

impl fmt::Display for CueOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CueOutcome::Completed => write!(f, "completed"),
            CueOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            CueOutcome::Terminated => write!(f, "terminated"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Completion {
    subscribers: Vec<Sender<CueOutcome>>,
    outcome: Option<CueOutcome>,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<CueOutcome> {
        let (tx, rx) = channel::bounded(1);
        match &self.outcome {
            Some(outcome) => {
                let _ = tx.send(outcome.clone());
            }
            None => self.subscribers.push(tx),
        }
        rx
    }

    /// Deliver `outcome` to every subscriber
    ///
    /// Returns false, delivering nothing, if the signal already fired.
    pub fn fire(&mut self, outcome: CueOutcome) -> bool {
        if self.outcome.is_some() {
            log::warn!("Completion fired twice, ignoring {}", outcome);
            return false;
        }

        for tx in self.subscribers.drain(..) {
            // A dropped receiver just means that subscriber lost interest
            let _ = tx.send(outcome.clone());
        }
        self.outcome = Some(outcome);
        true
    }

    pub fn has_fired(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&CueOutcome> {
        self.outcome.as_ref()
    }

    /// Re-arm for another exchange; pending subscribers are kept
    pub(crate) fn rearm(&mut self) {
        self.outcome = None;
    }
}
