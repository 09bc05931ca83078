//! Records and the scanner's line format
//!
//! The scanner prints one record per line:
//!
//! ```text
//! pathname<TAB>artist<TAB>title[<TAB>bpm]
//! ```
//!
//! Artist and title may be empty (untagged files); the pathname may not.

use super::{LibraryError, LibraryResult};
use std::path::PathBuf;

/// Index of a record in its library's record store
///
/// Two crates listing the same `RecordId` refer to the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) usize);

/// One scanned media item
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub pathname: PathBuf,
    pub artist: String,
    pub title: String,
    /// Beats per minute, 0.0 when unknown
    pub bpm: f64,
}

impl Record {
    pub fn has_bpm(&self) -> bool {
        self.bpm > 0.0
    }

    /// BPM formatted for display, "-" when unknown
    pub fn format_bpm(&self) -> String {
        if self.has_bpm() {
            format!("{:.1}", self.bpm)
        } else {
            "-".to_string()
        }
    }
}

/// Translate the scanner's BPM field
///
/// Returns `None` for a malformed value; an empty field is a valid
/// "unknown" and gives 0.0.
pub fn parse_bpm(field: &str) -> Option<f64> {
    if field.is_empty() {
        return Some(0.0);
    }
    match field.parse::<f64>() {
        Ok(bpm) if bpm.is_finite() && bpm > 0.0 => Some(bpm),
        _ => None,
    }
}

/// Convert one line of scanner output into a record
pub fn parse_record(line: &str) -> LibraryResult<Record> {
    let fields: Vec<&str> = line.split('\t').collect();

    let (pathname, artist, title, bpm) = match fields.as_slice() {
        [pathname, artist, title] => (*pathname, *artist, *title, None),
        [pathname, artist, title, bpm] => (*pathname, *artist, *title, Some(*bpm)),
        _ => {
            log::error!("Malformed record '{}'", line);
            return Err(LibraryError::Malformed(line.to_string()));
        }
    };

    if pathname.is_empty() {
        log::error!("Malformed record '{}'", line);
        return Err(LibraryError::Malformed(line.to_string()));
    }

    let bpm = match bpm.map(|field| (field, parse_bpm(field))) {
        None => 0.0,
        Some((_, Some(bpm))) => bpm,
        Some((field, None)) => {
            log::warn!("{}: Ignoring malformed BPM '{}'", pathname, field);
            0.0
        }
    };

    Ok(Record {
        pathname: PathBuf::from(pathname),
        artist: artist.to_string(),
        title: title.to_string(),
        bpm,
    })
}
