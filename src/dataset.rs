/*!
 * Snapshots of the loaded sources and the cache that owns the current one
 *
 * A [`Snapshot`] bundles the three notification tables, the roster and its
 * index together with the modification times of the four tracked files at
 * capture. [`SnapshotCache`] hands out shared snapshots and rebuilds only
 * when one of those times changes or after [`SnapshotCache::invalidate`].
 */

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analytics::EpiAnalytics;
use crate::config::EpiConfig;
use crate::data_types::SourceKind;
use crate::reader::{SourceReader, SourceTable};
use crate::roster::RosterIndex;

/// Filesystem metadata seam, replaceable in tests
pub trait FileStat: Send + Sync {
    /// Last modification time in UTC, `None` when the file is absent
    fn modified(&self, path: &Path) -> Option<DateTime<Utc>>;

    fn exists(&self, path: &Path) -> bool {
        self.modified(path).is_some()
    }
}

/// [`FileStat`] backed by the real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct FsStat;

impl FileStat for FsStat {
    fn modified(&self, path: &Path) -> Option<DateTime<Utc>> {
        std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .map(DateTime::<Utc>::from)
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }
}

/// Modification times of the four tracked sources; compared wholesale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceStamps {
    pub ira: DateTime<Utc>,
    pub eda: DateTime<Utc>,
    pub febrile: DateTime<Utc>,
    pub roster: DateTime<Utc>,
}

impl SourceStamps {
    /// Stamp recorded for a file that does not exist
    pub const ABSENT: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

    /// Read the stamps of the tracked files in `directory`
    pub fn capture(stat: &dyn FileStat, directory: &Path) -> Self {
        let stamp = |kind: SourceKind| {
            stat.modified(&directory.join(kind.file_name()))
                .unwrap_or(Self::ABSENT)
        };
        Self {
            ira: stamp(SourceKind::Ira),
            eda: stamp(SourceKind::Eda),
            febrile: stamp(SourceKind::Febrile),
            roster: stamp(SourceKind::Roster),
        }
    }

    pub fn absent() -> Self {
        Self {
            ira: Self::ABSENT,
            eda: Self::ABSENT,
            febrile: Self::ABSENT,
            roster: Self::ABSENT,
        }
    }
}

impl Default for SourceStamps {
    fn default() -> Self {
        Self::absent()
    }
}

/// Where the source files live
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocator {
    /// Always read from this directory
    Fixed(PathBuf),
    /// Read from `uploads` once it holds any known source file, otherwise from `seed`
    PreferUploads { uploads: PathBuf, seed: PathBuf },
}

impl SourceLocator {
    pub fn fixed<P: AsRef<Path>>(dir: P) -> Self {
        Self::Fixed(dir.as_ref().to_path_buf())
    }

    pub fn prefer_uploads<P: AsRef<Path>, Q: AsRef<Path>>(uploads: P, seed: Q) -> Self {
        Self::PreferUploads {
            uploads: uploads.as_ref().to_path_buf(),
            seed: seed.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the current sources
    pub fn resolve(&self, stat: &dyn FileStat) -> PathBuf {
        match self {
            Self::Fixed(dir) => dir.clone(),
            Self::PreferUploads { uploads, seed } => {
                let has_sources = SourceKind::ALL
                    .iter()
                    .any(|kind| stat.exists(&uploads.join(kind.file_name())));
                if has_sources {
                    uploads.clone()
                } else {
                    seed.clone()
                }
            }
        }
    }
}

/// Immutable bundle of loaded sources
#[derive(Debug)]
pub struct Snapshot {
    pub ira: SourceTable,
    pub eda: SourceTable,
    pub febrile: SourceTable,
    /// Raw roster rows, kept for diagnostics
    pub roster_table: SourceTable,
    pub roster: RosterIndex,
    stamps: SourceStamps,
    directory: Option<PathBuf>,
    built_at: DateTime<Utc>,
}

impl Snapshot {
    /// Assemble a snapshot from already parsed tables
    pub fn from_tables(
        ira: SourceTable,
        eda: SourceTable,
        febrile: SourceTable,
        roster_table: SourceTable,
    ) -> Self {
        let roster = RosterIndex::build(&roster_table);
        Self {
            ira,
            eda,
            febrile,
            roster_table,
            roster,
            stamps: SourceStamps::absent(),
            directory: None,
            built_at: Utc::now(),
        }
    }

    /// Load the standard file names from a directory, missing files become empty tables
    pub fn load_directory<P: AsRef<Path>>(dir: P) -> Self {
        SnapshotBuilder::from_directory(dir).build()
    }

    /// The loaded table of a source; the individual export is never loaded
    pub fn table(&self, kind: SourceKind) -> Option<&SourceTable> {
        match kind {
            SourceKind::Ira => Some(&self.ira),
            SourceKind::Eda => Some(&self.eda),
            SourceKind::Febrile => Some(&self.febrile),
            SourceKind::Roster => Some(&self.roster_table),
            SourceKind::Individual => None,
        }
    }

    /// The three notification tables
    pub fn clinical_tables(&self) -> [(SourceKind, &SourceTable); 3] {
        [
            (SourceKind::Ira, &self.ira),
            (SourceKind::Eda, &self.eda),
            (SourceKind::Febrile, &self.febrile),
        ]
    }

    pub fn stamps(&self) -> &SourceStamps {
        &self.stamps
    }

    /// Directory the snapshot was loaded from, if it came from disk
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Create an aggregation engine over this snapshot
    pub fn analytics(&self) -> EpiAnalytics<'_> {
        EpiAnalytics::new(self)
    }

    pub fn statistics(&self) -> SnapshotStatistics {
        SnapshotStatistics::from_snapshot(self)
    }
}

/// Builder for loading a snapshot from source files
///
/// # Example
/// ```no_run
/// # use episurv::dataset::SnapshotBuilder;
/// let snapshot = SnapshotBuilder::new()
///     .ira("data/iras.csv")
///     .eda("data/edas.csv")
///     .febrile("data/febriles.csv")
///     .roster("data/eess_maestro.csv")
///     .build();
/// println!("{} roster facilities", snapshot.roster.len());
/// ```
pub struct SnapshotBuilder {
    ira_path: Option<PathBuf>,
    eda_path: Option<PathBuf>,
    febrile_path: Option<PathBuf>,
    roster_path: Option<PathBuf>,
    directory: Option<PathBuf>,
    reader: SourceReader,
    stamps: SourceStamps,
    parallel: bool,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self {
            ira_path: None,
            eda_path: None,
            febrile_path: None,
            roster_path: None,
            directory: None,
            reader: SourceReader::new(),
            stamps: SourceStamps::absent(),
            parallel: true,
        }
    }

    /// Point every source at its standard file name inside `dir`
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        let mut builder = Self::new()
            .ira(dir.join(SourceKind::Ira.file_name()))
            .eda(dir.join(SourceKind::Eda.file_name()))
            .febrile(dir.join(SourceKind::Febrile.file_name()))
            .roster(dir.join(SourceKind::Roster.file_name()));
        builder.directory = Some(dir.to_path_buf());
        builder
    }

    pub fn ira<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.ira_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn eda<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.eda_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn febrile<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.febrile_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn roster<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.roster_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Reader used for every source
    pub fn reader(mut self, reader: SourceReader) -> Self {
        self.reader = reader;
        self
    }

    /// Stamps to record on the built snapshot
    pub fn stamps(mut self, stamps: SourceStamps) -> Self {
        self.stamps = stamps;
        self
    }

    /// Parse the four files concurrently (needs the `parallel` feature)
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Load every source. Each one is best-effort: a source that cannot be
    /// read becomes an empty table without affecting the others.
    pub fn build(self) -> Snapshot {
        let reader = &self.reader;
        let load = |path: &Option<PathBuf>, kind: SourceKind| load_source(reader, path.as_deref(), kind);
        let load_sequential = || {
            (
                (load(&self.ira_path, SourceKind::Ira), load(&self.eda_path, SourceKind::Eda)),
                (load(&self.febrile_path, SourceKind::Febrile), load(&self.roster_path, SourceKind::Roster)),
            )
        };

        #[cfg(feature = "parallel")]
        let ((ira, eda), (febrile, roster_table)) = if self.parallel {
            rayon::join(
                || rayon::join(|| load(&self.ira_path, SourceKind::Ira), || load(&self.eda_path, SourceKind::Eda)),
                || rayon::join(|| load(&self.febrile_path, SourceKind::Febrile), || load(&self.roster_path, SourceKind::Roster)),
            )
        } else {
            load_sequential()
        };

        #[cfg(not(feature = "parallel"))]
        let ((ira, eda), (febrile, roster_table)) = load_sequential();

        let mut snapshot = Snapshot::from_tables(ira, eda, febrile, roster_table);
        snapshot.stamps = self.stamps;
        snapshot.directory = self.directory;
        snapshot
    }
}

fn load_source(reader: &SourceReader, path: Option<&Path>, kind: SourceKind) -> SourceTable {
    let Some(path) = path else {
        return SourceTable::empty();
    };
    reader.read_path(path).unwrap_or_else(|e| {
        warn!(source = %kind, error = %e, "source unreadable, using empty table");
        SourceTable::empty()
    })
}

/// Owner of the current snapshot.
///
/// The stamp check, any rebuild and the publish run under one lock, so two
/// callers never rebuild the same change twice and nobody sees tables paired
/// with stamps from another capture. Callers get an `Arc` and read without
/// holding the lock.
pub struct SnapshotCache {
    locator: SourceLocator,
    stat: Arc<dyn FileStat>,
    reader: SourceReader,
    parallel: bool,
    current: Mutex<Option<Arc<Snapshot>>>,
    rebuilds: AtomicU64,
}

impl SnapshotCache {
    /// Cache over the real filesystem
    pub fn new(locator: SourceLocator) -> Self {
        Self {
            locator,
            stat: Arc::new(FsStat),
            reader: SourceReader::new(),
            parallel: true,
            current: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Cache configured from [`EpiConfig`]
    pub fn from_config(config: &EpiConfig) -> Self {
        Self::new(config.locator())
            .with_reader(SourceReader::new().with_max_line_length(config.max_line_length))
            .with_parallel_load(config.parallel_load)
    }

    /// Replace the filesystem metadata source
    pub fn with_file_stat(mut self, stat: Arc<dyn FileStat>) -> Self {
        self.stat = stat;
        self
    }

    pub fn with_reader(mut self, reader: SourceReader) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_parallel_load(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Current snapshot, rebuilt first if any tracked file changed
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);

        let directory = self.locator.resolve(self.stat.as_ref());
        let stamps = SourceStamps::capture(self.stat.as_ref(), &directory);

        if let Some(snapshot) = current.as_ref() {
            if snapshot.stamps == stamps && snapshot.directory() == Some(directory.as_path()) {
                return Arc::clone(snapshot);
            }
        }

        let snapshot = Arc::new(
            SnapshotBuilder::from_directory(&directory)
                .reader(self.reader.clone())
                .stamps(stamps)
                .parallel(self.parallel)
                .build(),
        );
        let generation = self.rebuilds.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            generation,
            directory = %directory.display(),
            ira_rows = snapshot.ira.len(),
            eda_rows = snapshot.eda.len(),
            febrile_rows = snapshot.febrile.len(),
            roster_facilities = snapshot.roster.len(),
            "rebuilt source snapshot"
        );

        *current = Some(Arc::clone(&snapshot));
        snapshot
    }

    /// Force the next [`get_snapshot`](Self::get_snapshot) to rebuild
    pub fn invalidate(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.take().is_some() {
            debug!("source snapshot invalidated");
        }
    }

    /// The published snapshot without checking for changes
    pub fn peek(&self) -> Option<Arc<Snapshot>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many snapshots this cache has built
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Directory the next rebuild would read from
    pub fn source_directory(&self) -> PathBuf {
        self.locator.resolve(self.stat.as_ref())
    }
}

/// Row counts of a snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStatistics {
    pub ira_rows: usize,
    pub eda_rows: usize,
    pub febrile_rows: usize,
    pub roster_rows: usize,
    pub roster_facilities: usize,
    pub roster_skipped_rows: usize,
    pub regions: usize,
    pub built_at: DateTime<Utc>,
    pub directory: Option<PathBuf>,
}

impl SnapshotStatistics {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            ira_rows: snapshot.ira.len(),
            eda_rows: snapshot.eda.len(),
            febrile_rows: snapshot.febrile.len(),
            roster_rows: snapshot.roster_table.len(),
            roster_facilities: snapshot.roster.len(),
            roster_skipped_rows: snapshot.roster.skipped_rows(),
            regions: snapshot.roster.region_options().len(),
            built_at: snapshot.built_at(),
            directory: snapshot.directory().map(Path::to_path_buf),
        }
    }

    /// Print a formatted summary of the statistics
    pub fn print_summary(&self) {
        println!("=== Surveillance Snapshot ===");
        if let Some(dir) = &self.directory {
            println!("Source directory: {}", dir.display());
        }
        println!("Built at: {}", self.built_at.to_rfc3339());
        println!("IRA rows: {}", self.ira_rows);
        println!("EDA rows: {}", self.eda_rows);
        println!("Febrile rows: {}", self.febrile_rows);
        println!(
            "Roster: {} facilities from {} rows ({} without code)",
            self.roster_facilities, self.roster_rows, self.roster_skipped_rows
        );
        println!("Regions: {}", self.regions);
    }
}
