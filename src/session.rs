// Import session: discovers file pairs and drives extract -> reconcile -> load
//
// Idle -> Running -> Completed | Aborted
//
// Pair-level failures are logged, counted and skipped. Only a store that
// cannot be opened or a data directory that cannot be scanned aborts the run.

use crate::attributes::AttributeExtractor;
use crate::config::ImportConfig;
use crate::db::{self, BatchLoader};
use crate::error::{ImportError, Result};
use crate::geometry::{GeometryExtractor, GeometrySet};
use crate::normalize::{MatchPolicy, ZeroPaddedSplit};
use crate::parcel::RawAttributeRecord;
use crate::parser::SourceParser;
use crate::reconciliation::ParcelReconciler;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};

// ============================================================================
// STATE & STATISTICS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Run-scoped counters; reset when a run starts, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStatistics {
    /// Pairs whose files were both present and attempted
    pub files_processed: usize,
    pub parcels_imported: usize,
    /// Attribute records with no geometry under either key
    pub parcels_skipped: usize,
    /// Pair-level failures (parse, missing counterpart, persistence)
    pub errors: usize,
    pub exact_matches: usize,
    pub normalized_matches: usize,
    pub duplicate_geometry_ids: usize,
    /// Placemarks dropped for a missing id or an unusable ring
    pub skipped_placemarks: usize,
    pub orphan_geometry_files: usize,
    pub checkpoints: usize,
}

impl ImportStatistics {
    pub fn summary(&self) -> String {
        format!(
            "Files processed: {} | Parcels imported: {} | Parcels skipped: {} | Errors: {}",
            self.files_processed, self.parcels_imported, self.parcels_skipped, self.errors
        )
    }
}

/// What happened to one file pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PairReport {
    pub name: String,
    pub parsed_records: usize,
    pub geometries: usize,
    pub imported: usize,
    pub skipped: usize,
    pub exact_matches: usize,
    pub normalized_matches: usize,
    pub duplicate_geometry_ids: usize,
    pub skipped_placemarks: usize,
    /// Raw parcel numbers that found no geometry
    pub unmatched: Vec<String>,
    pub error: Option<String>,
}

impl PairReport {
    fn new(name: &str) -> Self {
        PairReport {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Cooperative stop request, honored only between pairs.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// DISCOVERY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct FilePair {
    /// Shared base name, recorded as the parcels' source file
    pub name: String,
    pub attribute: PathBuf,
    pub geometry: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairEntry {
    Complete(FilePair),
    MissingGeometry { attribute: PathBuf, expected: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// One entry per attribute file, sorted by file name
    pub entries: Vec<PairEntry>,
    /// Geometry files with no attribute counterpart
    pub orphan_geometry: Vec<PathBuf>,
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn base_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Match every attribute file in `data_dir` to the geometry file with the same base name.
pub fn discover_pairs(data_dir: &Path, attribute_ext: &str, geometry_ext: &str) -> Result<Discovery> {
    let read_dir = fs::read_dir(data_dir).map_err(|source| ImportError::DataDir {
        path: data_dir.to_path_buf(),
        source,
    })?;

    let mut attribute_files = Vec::new();
    let mut geometry_files = Vec::new();
    for entry in read_dir {
        let path = entry
            .map_err(|source| ImportError::DataDir {
                path: data_dir.to_path_buf(),
                source,
            })?
            .path();
        if !path.is_file() {
            continue;
        }
        if has_extension(&path, attribute_ext) {
            attribute_files.push(path);
        } else if has_extension(&path, geometry_ext) {
            geometry_files.push(path);
        }
    }
    attribute_files.sort();
    geometry_files.sort();

    let mut paired = HashSet::new();
    let entries = attribute_files
        .into_iter()
        .map(|attribute| {
            let geometry = geometry_files
                .iter()
                .find(|g| g.file_stem() == attribute.file_stem())
                .cloned();
            match geometry {
                Some(geometry) => {
                    paired.insert(geometry.clone());
                    PairEntry::Complete(FilePair {
                        name: base_name(&attribute),
                        attribute,
                        geometry,
                    })
                }
                None => PairEntry::MissingGeometry {
                    expected: attribute.with_extension(geometry_ext),
                    attribute,
                },
            }
        })
        .collect();

    let orphan_geometry = geometry_files
        .into_iter()
        .filter(|g| !paired.contains(g))
        .collect();

    Ok(Discovery {
        entries,
        orphan_geometry,
    })
}

// ============================================================================
// SESSION
// ============================================================================

pub struct ImportSession<P: MatchPolicy = ZeroPaddedSplit> {
    config: ImportConfig,
    state: SessionState,
    stats: ImportStatistics,
    reports: Vec<PairReport>,
    attributes: AttributeExtractor,
    geometry: GeometryExtractor,
    reconciler: ParcelReconciler<P>,
    loader: BatchLoader,
    stop: StopHandle,
    deadline: Option<Instant>,
}

impl ImportSession<ZeroPaddedSplit> {
    pub fn new(config: ImportConfig) -> Self {
        Self::with_policy(config, ZeroPaddedSplit)
    }
}

impl<P: MatchPolicy> ImportSession<P> {
    pub fn with_policy(config: ImportConfig, policy: P) -> Self {
        let loader = BatchLoader::new(config.batch_size);
        ImportSession {
            config,
            state: SessionState::Idle,
            stats: ImportStatistics::default(),
            reports: Vec::new(),
            attributes: AttributeExtractor::new(),
            geometry: GeometryExtractor::new(),
            reconciler: ParcelReconciler::with_policy(policy),
            loader,
            stop: StopHandle::default(),
            deadline: None,
        }
    }

    /// No pair is started after `deadline`; the pair in flight always finishes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn statistics(&self) -> &ImportStatistics {
        &self.stats
    }

    pub fn reports(&self) -> &[PairReport] {
        &self.reports
    }

    /// Open the configured store and import every discovered pair.
    pub fn run(&mut self) -> Result<ImportStatistics> {
        self.ensure_idle()?;

        let mut conn = match db::open_store(&self.config.database_path) {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Failed to open store; aborting import");
                self.state = SessionState::Aborted;
                return Err(e);
            }
        };
        info!(path = %self.config.database_path.display(), "Store opened");

        self.run_with_connection(&mut conn)
    }

    /// Import into an already opened (and set up) connection.
    pub fn run_with_connection(&mut self, conn: &mut Connection) -> Result<ImportStatistics> {
        self.ensure_idle()?;
        self.state = SessionState::Running;
        self.stats = ImportStatistics::default();
        self.reports.clear();

        let discovery = match discover_pairs(
            &self.config.data_dir,
            &self.config.attribute_extension,
            &self.config.geometry_extension,
        ) {
            Ok(discovery) => discovery,
            Err(e) => {
                error!(error = %e, "Failed to scan data directory; aborting import");
                self.state = SessionState::Aborted;
                return Err(e);
            }
        };

        info!(
            pairs = discovery.entries.len(),
            policy = self.reconciler.policy().name(),
            "Found attribute files to process"
        );
        for orphan in &discovery.orphan_geometry {
            warn!(file = %orphan.display(), "Geometry file has no attribute counterpart");
        }
        self.stats.orphan_geometry_files = discovery.orphan_geometry.len();

        for entry in discovery.entries {
            if self.stop.is_stopped() {
                info!("Stop requested; not starting further pairs");
                break;
            }
            if self.deadline.map_or(false, |d| Instant::now() >= d) {
                warn!("Deadline reached; not starting further pairs");
                break;
            }

            match entry {
                PairEntry::MissingGeometry { attribute, expected } => {
                    let err = ImportError::MissingCounterpart {
                        expected,
                        attribute: attribute.clone(),
                    };
                    warn!(error = %err, "Skipping pair");
                    self.stats.errors += 1;

                    let mut report = PairReport::new(&base_name(&attribute));
                    report.error = Some(err.to_string());
                    self.reports.push(report);
                }
                PairEntry::Complete(pair) => {
                    let report = self.process_pair(conn, &pair);
                    self.record(report);

                    if self.stats.files_processed % self.config.checkpoint_every.max(1) == 0 {
                        self.checkpoint(conn);
                        info!(
                            files = self.stats.files_processed,
                            parcels = self.stats.parcels_imported,
                            "Progress"
                        );
                    }
                }
            }
        }

        self.checkpoint(conn);
        self.state = SessionState::Completed;
        self.log_summary();

        Ok(self.stats.clone())
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            SessionState::Idle => Ok(()),
            other => Err(ImportError::InvalidState(other.to_string())),
        }
    }

    fn record(&mut self, report: PairReport) {
        self.stats.files_processed += 1;
        self.stats.parcels_imported += report.imported;
        self.stats.parcels_skipped += report.skipped;
        self.stats.exact_matches += report.exact_matches;
        self.stats.normalized_matches += report.normalized_matches;
        self.stats.duplicate_geometry_ids += report.duplicate_geometry_ids;
        self.stats.skipped_placemarks += report.skipped_placemarks;
        if report.is_error() {
            self.stats.errors += 1;
        }
        self.reports.push(report);
    }

    fn checkpoint(&mut self, conn: &Connection) {
        match db::checkpoint(conn) {
            Ok((busy, log, checkpointed)) => {
                self.stats.checkpoints += 1;
                debug!(busy, log, checkpointed, "WAL checkpoint");
            }
            Err(e) => warn!(error = %e, "WAL checkpoint failed"),
        }
    }

    /// Run one pair; every failure is caught here and lands in the report.
    fn process_pair(&self, conn: &mut Connection, pair: &FilePair) -> PairReport {
        let span = info_span!("pair", pair = %pair.name);
        let _enter = span.enter();

        let mut report = PairReport::new(&pair.name);
        match self.import_pair(conn, pair, &mut report) {
            Ok(()) => info!(
                imported = report.imported,
                skipped = report.skipped,
                exact = report.exact_matches,
                normalized = report.normalized_matches,
                "Pair imported"
            ),
            Err(e) => {
                error!(error = %e, "Pair failed");
                report.imported = 0;
                report.error = Some(e.to_string());
            }
        }
        report
    }

    fn import_pair(&self, conn: &mut Connection, pair: &FilePair, report: &mut PairReport) -> Result<()> {
        let (records, geometries) = self.extract(pair)?;
        report.parsed_records = records.len();
        report.geometries = geometries.len();
        report.duplicate_geometry_ids = geometries.duplicate_ids.len();
        report.skipped_placemarks = geometries.skipped_placemarks;
        if geometries.skipped_placemarks > 0 {
            debug!(
                skipped = geometries.skipped_placemarks,
                "Placemarks without a usable id or ring"
            );
        }

        if records.is_empty() {
            warn!(file = %pair.attribute.display(), "No land data found");
            return Ok(());
        }

        let reconciliation = self.reconciler.reconcile(records, &geometries);
        report.skipped = reconciliation.skipped;
        report.exact_matches = reconciliation.exact_matches;
        report.normalized_matches = reconciliation.normalized_matches;
        report.unmatched = reconciliation.unmatched.clone();
        debug!(result = %reconciliation.summary(), "Reconciled");

        report.imported = self.loader.load(conn, &pair.name, &reconciliation.parcels)?;
        Ok(())
    }

    /// Both documents are parsed independently before the join.
    fn extract(&self, pair: &FilePair) -> Result<(Vec<RawAttributeRecord>, GeometrySet)> {
        for (source, version) in [
            (self.attributes.source_type(), self.attributes.version()),
            (self.geometry.source_type(), self.geometry.version()),
        ] {
            debug!(source = source.name(), version, "Extracting");
        }
        let records = self.attributes.parse(&pair.attribute);
        let geometries = self.geometry.parse(&pair.geometry);

        match (records, geometries) {
            (Ok(records), Ok(geometries)) => Ok((records, geometries)),
            (Err(e), Ok(_)) | (Ok(_), Err(e)) => Err(e),
            (Err(attribute_err), Err(geometry_err)) => {
                warn!(
                    source = self.geometry.source_type().name(),
                    error = %geometry_err,
                    "Second document also failed"
                );
                Err(attribute_err)
            }
        }
    }

    fn log_summary(&self) {
        info!(
            files_processed = self.stats.files_processed,
            parcels_imported = self.stats.parcels_imported,
            parcels_skipped = self.stats.parcels_skipped,
            errors = self.stats.errors,
            exact_matches = self.stats.exact_matches,
            normalized_matches = self.stats.normalized_matches,
            skipped_placemarks = self.stats.skipped_placemarks,
            duplicate_geometry_ids = self.stats.duplicate_geometry_ids,
            "Import completed"
        );
    }
}
