//! Cue point values and their line format
//!
//! Each track has [`MAX_CUES`] labelled slots. A slot is either unset or a
//! finite, non-negative position in seconds. The cue loader helper speaks
//! the text form produced by [`serialize_slot`] and read by [`parse_line`].

/// Number of cue point labels per track
pub const MAX_CUES: usize = 16;

/// Text form of an unset slot in the helper protocol
pub const UNSET_TOKEN: &str = "-";

/// One line of cue loader output, interpreted
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CueLine {
    /// Explicitly clear the slot
    Unset,
    /// Empty line: keep whatever the slot holds
    Unchanged,
    /// Set the slot to this position (seconds)
    Position(f64),
}

/// Interpret one line of cue loader output
///
/// Anything that is not a finite, strictly positive decimal collapses to
/// [`CueLine::Unset`].
pub fn parse_line(line: &str) -> CueLine {
    if line.is_empty() {
        return CueLine::Unchanged;
    }
    if line.starts_with(UNSET_TOKEN) {
        return CueLine::Unset;
    }

    match line.trim().parse::<f64>() {
        Ok(p) if p.is_finite() && p > 0.0 => CueLine::Position(p),
        Ok(p) => {
            log::warn!("Ignoring out of range cue point {}", p);
            CueLine::Unset
        }
        Err(_) => {
            log::warn!("Ignoring malformed cue point '{}'", line);
            CueLine::Unset
        }
    }
}

/// Text form of a slot: `-` when unset, otherwise the shortest decimal
/// that parses back to the same value
pub fn serialize_slot(slot: Option<f64>) -> String {
    match slot {
        Some(p) => format!("{}", p),
        None => UNSET_TOKEN.to_string(),
    }
}

/// The cue points of one track
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CuePoints {
    positions: [Option<f64>; MAX_CUES],
}

impl CuePoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every slot
    pub fn reset(&mut self) {
        self.positions = [None; MAX_CUES];
    }

    pub fn set(&mut self, label: usize, position: f64) {
        assert!(label < MAX_CUES, "cue label {} out of range", label);
        log::debug!("Setting cue point {} to {:.2}", label, position);
        self.positions[label] = Some(position);
    }

    pub fn unset(&mut self, label: usize) {
        assert!(label < MAX_CUES, "cue label {} out of range", label);
        log::debug!("Clearing cue point {}", label);
        self.positions[label] = None;
    }

    pub fn get(&self, label: usize) -> Option<f64> {
        assert!(label < MAX_CUES, "cue label {} out of range", label);
        self.positions[label]
    }

    /// Iterate over `(label, position)` for every set slot
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.positions
            .iter()
            .enumerate()
            .filter_map(|(label, p)| p.map(|p| (label, p)))
    }

    pub fn is_empty(&self) -> bool {
        self.positions.iter().all(Option::is_none)
    }

    /// The closest set position strictly before `current`
    pub fn previous(&self, current: f64) -> Option<f64> {
        self.iter()
            .map(|(_, p)| p)
            .filter(|&p| p < current)
            .fold(None, |best, p| match best {
                Some(b) if b >= p => Some(b),
                _ => Some(p),
            })
    }

    /// The closest set position strictly after `current`
    pub fn next(&self, current: f64) -> Option<f64> {
        self.iter()
            .map(|(_, p)| p)
            .filter(|&p| p > current)
            .fold(None, |best, p| match best {
                Some(b) if b <= p => Some(b),
                _ => Some(p),
            })
    }

    /// Apply one line of cue loader output to `label`
    pub fn apply_line(&mut self, label: usize, line: &str) {
        match parse_line(line) {
            CueLine::Unset => self.unset(label),
            CueLine::Unchanged => {}
            CueLine::Position(p) => self.set(label, p),
        }
    }

    /// The SAVE arguments for the cue loader, one per label
    pub fn to_args(&self) -> Vec<String> {
        self.positions.iter().map(|&p| serialize_slot(p)).collect()
    }
}
