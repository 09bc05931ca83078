//! Sorted listings of records
//!
//! A listing holds [`RecordId`]s only; the records live in the library.
//! Sorted listings reject duplicates: inserting a record equal to one
//! already present returns the existing id instead.

use super::record::{Record, RecordId};
use std::cmp::Ordering;

/// Orderings a crate maintains over its records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Artist, then title, then pathname; also the identity of a record
    Artist,
    /// BPM ascending (unknown first), then artist order
    Bpm,
    /// Order of insertion
    Playlist,
}

impl SortOrder {
    pub const ALL: [SortOrder; 3] = [SortOrder::Artist, SortOrder::Bpm, SortOrder::Playlist];

    pub fn name(&self) -> &'static str {
        match self {
            SortOrder::Artist => "artist",
            SortOrder::Bpm => "bpm",
            SortOrder::Playlist => "playlist",
        }
    }
}

/// Case-insensitive comparison, falling back to exact order
fn cmp_text(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| a.cmp(b))
}

fn cmp_artist(a: &Record, b: &Record) -> Ordering {
    cmp_text(&a.artist, &b.artist)
        .then_with(|| cmp_text(&a.title, &b.title))
        .then_with(|| a.pathname.cmp(&b.pathname))
}

/// Compare two records under a sorted order
///
/// [`SortOrder::Playlist`] has no intrinsic order; records compare equal.
pub fn compare(a: &Record, b: &Record, order: SortOrder) -> Ordering {
    match order {
        SortOrder::Artist => cmp_artist(a, b),
        SortOrder::Bpm => a.bpm.total_cmp(&b.bpm).then_with(|| cmp_artist(a, b)),
        SortOrder::Playlist => Ordering::Equal,
    }
}

/// Where an inserted id ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// The id was not present and now is
    Added(RecordId),
    /// An equal record was already listed; nothing changed
    Existing(RecordId),
}

impl Placement {
    /// The id now standing for the record
    pub fn id(&self) -> RecordId {
        match *self {
            Placement::Added(id) | Placement::Existing(id) => id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Listing {
    ids: Vec<RecordId>,
}

impl Listing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `id` at its sorted position
    ///
    /// Inserting a record that compares equal to a listed one, including
    /// `id` itself, leaves the listing unchanged and reports the listed id.
    pub fn insert(&mut self, records: &[Record], id: RecordId, order: SortOrder) -> Placement {
        debug_assert!(order != SortOrder::Playlist, "playlist order is append-only");
        let record = &records[id.0];

        match self
            .ids
            .binary_search_by(|probe| compare(&records[probe.0], record, order))
        {
            Ok(pos) => Placement::Existing(self.ids[pos]),
            Err(pos) => {
                self.ids.insert(pos, id);
                Placement::Added(id)
            }
        }
    }

    /// Append `id` regardless of order
    pub fn push(&mut self, id: RecordId) {
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[RecordId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.ids.iter().copied()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
