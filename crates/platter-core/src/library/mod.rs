//! Record library built from scanner output
//!
//! The library is rebuilt on every run by invoking a scanner program on
//! each source directory. Records are grouped into crates:
//!
//! - "All records": the fixed crate, containing every record once
//! - one crate per scanned source, named after its final path component
//!
//! Each crate keeps three orderings over its members ([`SortOrder`]).
//!
//! ## Ownership
//!
//! The library owns every [`Record`]; crates hold [`RecordId`]s. A record
//! scanned twice (same artist, title and pathname) is stored once and
//! shared by every crate that lists it.

mod listing;
mod record;

pub use listing::{compare, Listing, Placement, SortOrder};
pub use record::{parse_bpm, parse_record, Record, RecordId};

use crate::external::{self, ExitOutcome, ExternalError, LineRead, LineReader};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the fixed crate holding every record
pub const CRATE_ALL: &str = "All records";

/// argv[0] given to the scanner
const SCAN_ARG0: &str = "scan";

/// The fixed crate sorts before all others, so it stays at this index
const ALL_INDEX: usize = 0;

/// Errors during a library import
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Failed to run scanner: {0}")]
    Spawn(#[from] ExternalError),

    #[error("Failed to read from scanner: {0}")]
    Read(#[source] std::io::Error),

    #[error("Malformed record '{0}'")]
    Malformed(String),

    #[error("Library scan of {path:?} exited reporting failure ({outcome})")]
    ScanFailed { path: PathBuf, outcome: ExitOutcome },
}

/// Result type for library operations
pub type LibraryResult<T> = Result<T, LibraryError>;

/// A named view over a subset of the library's records
#[derive(Debug, Clone)]
pub struct Crate {
    name: String,
    is_fixed: bool,
    by_artist: Listing,
    by_bpm: Listing,
    by_order: Listing,
}

impl Crate {
    fn new(name: &str, is_fixed: bool) -> Self {
        Self {
            name: name.to_string(),
            is_fixed,
            by_artist: Listing::new(),
            by_bpm: Listing::new(),
            by_order: Listing::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_fixed(&self) -> bool {
        self.is_fixed
    }

    pub fn len(&self) -> usize {
        self.by_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_order.is_empty()
    }

    pub fn listing(&self, order: SortOrder) -> &Listing {
        match order {
            SortOrder::Artist => &self.by_artist,
            SortOrder::Bpm => &self.by_bpm,
            SortOrder::Playlist => &self.by_order,
        }
    }

    pub fn contains(&self, id: RecordId) -> bool {
        self.by_order.iter().any(|x| x == id)
    }

    /// Add a record to every index of this crate
    ///
    /// If an artist-equal record is already present, `id` included, no
    /// index changes and the listed record is reported.
    fn add(&mut self, records: &[Record], id: RecordId) -> Placement {
        let placement = self.by_artist.insert(records, id, SortOrder::Artist);
        if let Placement::Existing(_) = placement {
            return placement;
        }

        let x = self.by_bpm.insert(records, id, SortOrder::Bpm);
        debug_assert_eq!(x, Placement::Added(id), "BPM order disagrees with artist order");
        self.by_order.push(id);
        placement
    }

    fn clear(&mut self) {
        self.by_artist.clear();
        self.by_bpm.clear();
        self.by_order.clear();
    }
}

/// Fixed crates first, then by name
fn crate_cmp(a: &Crate, b: &Crate) -> Ordering {
    b.is_fixed
        .cmp(&a.is_fixed)
        .then_with(|| a.name.cmp(&b.name))
}

/// Crate name for a scanned source: its final path component
fn crate_name(source: &Path) -> String {
    source
        .file_name()
        .unwrap_or(source.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// The record library
#[derive(Debug)]
pub struct Library {
    records: Vec<Record>,
    crates: Vec<Crate>,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Library {
    /// An empty library holding only the fixed "All records" crate
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            crates: vec![Crate::new(CRATE_ALL, true)],
        }
    }

    /// The crate containing every record
    pub fn all(&self) -> &Crate {
        &self.crates[ALL_INDEX]
    }

    /// All crates: fixed first, then alphabetical
    pub fn crates(&self) -> impl Iterator<Item = &Crate> {
        self.crates.iter()
    }

    pub fn crate_count(&self) -> usize {
        self.crates.len()
    }

    /// Find a crate by name
    ///
    /// The fixed crate matches too if its name is given.
    pub fn get_crate(&self, name: &str) -> Option<&Crate> {
        self.crates.iter().find(|c| c.name == name)
    }

    /// Get an existing crate, or create an empty one
    pub fn use_crate(&mut self, name: &str) -> &Crate {
        let index = self.use_crate_index(name);
        &self.crates[index]
    }

    fn use_crate_index(&mut self, name: &str) -> usize {
        if let Some(index) = self.crates.iter().position(|c| c.name == name) {
            if self.crates[index].is_fixed {
                log::warn!("Crate name '{}' is the fixed crate, importing into it", name);
            } else {
                log::info!("Crate '{}' already exists...", name);
            }
            return index;
        }

        self.crates.push(Crate::new(name, false));
        self.crates.sort_by(crate_cmp);

        self.crates
            .iter()
            .position(|c| c.name == name && !c.is_fixed)
            .unwrap_or_else(|| unreachable!("crate '{}' vanished after insert", name))
    }

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id.0)
    }

    /// Every record in the library, in no particular order
    pub fn records(&self) -> impl Iterator<Item = (RecordId, &Record)> {
        self.records.iter().enumerate().map(|(n, r)| (RecordId(n), r))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of `krate` in the given order
    pub fn crate_records<'a>(
        &'a self,
        krate: &'a Crate,
        order: SortOrder,
    ) -> impl Iterator<Item = (RecordId, &'a Record)> + 'a {
        krate
            .listing(order)
            .iter()
            .filter_map(move |id| self.record(id).map(|r| (id, r)))
    }

    /// Store a record and index it in "All records"
    ///
    /// Returns the id now standing for it; if an equal record already
    /// existed, that one is kept and the new one is discarded.
    fn add_record(&mut self, record: Record) -> RecordId {
        let id = RecordId(self.records.len());
        self.records.push(record);

        match self.crates[ALL_INDEX].add(&self.records, id) {
            Placement::Added(id) => id,
            Placement::Existing(existing) => {
                self.records.pop();
                existing
            }
        }
    }

    /// Add a record to the crate at `index`, via "All records"
    fn add_to_crate(&mut self, index: usize, record: Record) -> RecordId {
        let id = self.add_record(record);
        self.crates[index].add(&self.records, id);
        id
    }

    /// Scan `source` with the `scan` program and import its records
    ///
    /// Blocks until the scanner exits. A malformed line, a read error or a
    /// failing scanner aborts the import; records from earlier lines stay.
    ///
    /// Returns the number of records listed by the scanner.
    pub fn import(&mut self, scan: &Path, source: &Path) -> LibraryResult<usize> {
        log::info!("Scanning {:?}...", source);

        let name = crate_name(source);
        let index = self.use_crate_index(&name);

        let mut process = external::spawn(scan, SCAN_ARG0, [source])?;
        let mut reader = LineReader::new();
        let mut count = 0;

        loop {
            let line = match reader.read_line(&mut process).map_err(LibraryError::Read)? {
                LineRead::Line(line) => line,
                LineRead::EndOfStream => break,
                LineRead::WouldBlock => {
                    return Err(LibraryError::Read(std::io::ErrorKind::WouldBlock.into()));
                }
            };

            // On error the scanner is killed and reaped as it drops
            let record = parse_record(&line)?;
            self.add_to_crate(index, record);
            count += 1;
        }

        match process.wait()? {
            ExitOutcome::Success => {
                log::info!("Imported {} records into '{}'", count, name);
                Ok(count)
            }
            outcome => {
                log::error!("Library scan exited reporting failure");
                Err(LibraryError::ScanFailed {
                    path: source.to_path_buf(),
                    outcome,
                })
            }
        }
    }

    /// Release every record and crate, leaving only an empty "All records"
    pub fn clear(&mut self) {
        for krate in &mut self.crates {
            krate.clear();
        }
        self.crates.truncate(ALL_INDEX + 1);
        self.records.clear();
    }
}
