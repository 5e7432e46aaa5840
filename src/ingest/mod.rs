//! Batch loading of GTDB source files into the live tables of one release.
//!
//! Work units (files, or amino/nucleotide file pairs) are grouped into
//! chunks. Each chunk is parsed and inserted in a single transaction; when
//! that transaction hits a constraint violation the chunk is retried row by
//! row and the rows the database still refuses go to a [`FailureLog`]. A bad
//! file or a panicking worker costs its own chunk, never the run.

pub mod annotations;
pub mod counter;
pub mod discovery;
pub mod failures;
pub mod metadata;
pub mod proteins;
pub mod source;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use crate::config::IngestConfig;
use crate::db::{Database, Row};
use crate::error::{DbError, IngestError};
use crate::schema::{Entity, Schema, TableDef};

use annotations::{KeggAnnotationsFile, PfamAnnotationsFile};
use counter::AnnotationCounter;
use discovery::{discover, WorkUnit};
use failures::FailureLog;
use metadata::MetadataFile;
use proteins::{ProteinPair, ProteinsFile};
use source::SourceFile;

/// Progress side channel. Nothing in the pipeline reads it back.
#[derive(Debug, Clone)]
pub enum IngestProgress {
    Started { table: String, total_units: usize },
    Unit { current: usize, total: usize, label: String },
    ChunkDone { inserted: usize, failed: usize },
    Completed { table: String, rows_inserted: usize, rows_failed: usize },
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chunk_size: usize,
    pub workers: usize,
    pub representatives_only: bool,
    pub failure_log_dir: PathBuf,
}

impl IngestOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            workers: config.workers,
            representatives_only: config.representatives_only,
            failure_log_dir: config.failure_log_dir.clone(),
        }
    }
}

/// A work unit that produced no rows, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub table: String,
    pub units_processed: usize,
    pub units_failed: Vec<UnitFailure>,
    pub rows_inserted: usize,
    pub rows_failed: usize,
    pub chunks_degraded: usize,
    /// Set when at least one row was written to the failure log.
    pub failure_log: Option<PathBuf>,
}

impl IngestReport {
    fn absorb(&mut self, outcome: ChunkOutcome) {
        self.units_processed += outcome.units_processed;
        self.units_failed.extend(outcome.units_failed);
        self.rows_inserted += outcome.rows_inserted;
        self.rows_failed += outcome.rows_failed;
        if outcome.degraded {
            self.chunks_degraded += 1;
        }
    }
}

#[derive(Debug, Default)]
struct ChunkOutcome {
    units_processed: usize,
    units_failed: Vec<UnitFailure>,
    rows_inserted: usize,
    rows_failed: usize,
    degraded: bool,
}

/// State shared by every worker of one table load.
struct Run<'a> {
    entity: Entity,
    table: &'a TableDef,
    counter: Option<AnnotationCounter>,
    failures: FailureLog,
    total_units: usize,
    started_units: AtomicUsize,
}

pub struct Ingestor<'a> {
    db: &'a Database,
    release: i64,
    schema: Schema,
    options: IngestOptions,
}

impl<'a> Ingestor<'a> {
    pub fn new(db: &'a Database, release: i64, options: IngestOptions) -> Self {
        Self {
            db,
            release,
            schema: Schema::live(release),
            options,
        }
    }

    pub fn release(&self) -> i64 {
        self.release
    }

    /// Load every category in `entities`, parents first, from
    /// `{data_dir}/r{release}`.
    pub fn ingest_release(
        &self,
        data_dir: &Path,
        entities: &[Entity],
        progress: Option<mpsc::Sender<IngestProgress>>,
    ) -> Result<Vec<IngestReport>> {
        let dir = discovery::release_dir(data_dir, self.release);
        if !dir.is_dir() {
            bail!("No data for release {} at {:?}", self.release, dir);
        }
        Entity::ALL
            .iter()
            .filter(|e| entities.contains(e))
            .map(|e| self.run(*e, &dir, progress.clone()))
            .collect()
    }

    /// Load one category from `release_dir` into its live table, which must
    /// already exist.
    pub fn run(
        &self,
        entity: Entity,
        release_dir: &Path,
        progress: Option<mpsc::Sender<IngestProgress>>,
    ) -> Result<IngestReport> {
        let table = self
            .schema
            .table_for(entity)
            .with_context(|| format!("No table declared for {}", entity.base_name()))?;
        if !self.db.table_exists(&table.name)? {
            bail!("Table {} does not exist; create the release tables first", table.name);
        }

        let units = discover(entity, release_dir)?;
        let counter = if entity.has_synthetic_key() {
            Some(AnnotationCounter::seeded(self.db, &table.name, entity.key_column())?)
        } else {
            None
        };

        let run = Run {
            entity,
            table,
            counter,
            failures: FailureLog::new(&self.options.failure_log_dir, table),
            total_units: units.len(),
            started_units: AtomicUsize::new(0),
        };

        tracing::info!(
            table = %table.name,
            units = units.len(),
            workers = self.options.workers,
            "Starting load"
        );
        if let Some(ref tx) = progress {
            let _ = tx.send(IngestProgress::Started {
                table: table.name.clone(),
                total_units: units.len(),
            });
        }

        let chunks: Vec<&[WorkUnit]> = units.chunks(self.options.chunk_size.max(1)).collect();
        let outcomes: Vec<ChunkOutcome> = if self.options.workers <= 1 {
            chunks
                .iter()
                .map(|chunk| self.guarded_chunk(&run, chunk, progress.as_ref()))
                .collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.workers)
                .build()
                .context("Failed to start worker pool")?;
            pool.install(|| {
                chunks
                    .par_iter()
                    .map_with(progress.clone(), |tx, chunk| self.guarded_chunk(&run, chunk, tx.as_ref()))
                    .collect()
            })
        };

        let mut report = IngestReport {
            table: table.name.clone(),
            ..Default::default()
        };
        for outcome in outcomes {
            report.absorb(outcome);
        }
        if run.failures.count() > 0 {
            report.failure_log = Some(run.failures.path().to_path_buf());
        }

        tracing::info!(
            table = %report.table,
            inserted = report.rows_inserted,
            failed_rows = report.rows_failed,
            failed_units = report.units_failed.len(),
            degraded_chunks = report.chunks_degraded,
            "Load finished"
        );
        if let Some(ref tx) = progress {
            let _ = tx.send(IngestProgress::Completed {
                table: report.table.clone(),
                rows_inserted: report.rows_inserted,
                rows_failed: report.rows_failed,
            });
        }
        Ok(report)
    }

    fn guarded_chunk(
        &self,
        run: &Run<'_>,
        chunk: &[WorkUnit],
        progress: Option<&mpsc::Sender<IngestProgress>>,
    ) -> ChunkOutcome {
        let outcome = contain_panic(chunk, || self.load_chunk(run, chunk, progress));
        if let Some(tx) = progress {
            let _ = tx.send(IngestProgress::ChunkDone {
                inserted: outcome.rows_inserted,
                failed: outcome.rows_failed,
            });
        }
        outcome
    }

    fn load_chunk(
        &self,
        run: &Run<'_>,
        chunk: &[WorkUnit],
        progress: Option<&mpsc::Sender<IngestProgress>>,
    ) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        let mut rows: Vec<Row> = Vec::new();

        for unit in chunk {
            let current = run.started_units.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(tx) = progress {
                let _ = tx.send(IngestProgress::Unit {
                    current,
                    total: run.total_units,
                    label: unit.label(),
                });
            }

            match self.parse_unit(run.entity, unit) {
                Ok(mut entries) => {
                    self.stamp(run, &mut entries);
                    rows.append(&mut entries);
                    outcome.units_processed += 1;
                }
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", unit, e);
                    if let Some(tx) = progress {
                        let _ = tx.send(IngestProgress::Error {
                            message: format!("{}: {}", unit, e),
                        });
                    }
                    outcome.units_failed.push(UnitFailure {
                        unit: unit.label(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        match self.db.bulk_insert(run.table, &rows) {
            Ok(inserted) => outcome.rows_inserted = inserted,
            Err(e) if e.is_integrity() => {
                tracing::warn!(
                    "Chunk of {} rows rejected by {} ({}); inserting row by row",
                    rows.len(),
                    run.table.name,
                    e
                );
                outcome.degraded = true;
                let (inserted, failed) = self.insert_rows_individually(run, &rows);
                outcome.rows_inserted = inserted;
                outcome.rows_failed = failed;
            }
            Err(e) => {
                tracing::error!("Chunk of {} rows failed for {}: {}", rows.len(), run.table.name, e);
                run.failures.record_all(&rows, &e.to_string());
                outcome.rows_failed = rows.len();
            }
        }
        outcome
    }

    fn insert_rows_individually(&self, run: &Run<'_>, rows: &[Row]) -> (usize, usize) {
        let mut inserted = 0;
        let mut failed = 0;
        for row in rows {
            match self.db.insert_row(run.table, row) {
                Ok(()) => inserted += 1,
                Err(e) => {
                    failed += 1;
                    run.failures.record(row, &failure_text(&e));
                }
            }
        }
        (inserted, failed)
    }

    fn parse_unit(&self, entity: Entity, unit: &WorkUnit) -> Result<Vec<Row>, IngestError> {
        match unit {
            WorkUnit::ProteinPair {
                genome_id,
                amino,
                nucleotide,
            } => {
                let amino = amino.as_deref().ok_or_else(|| IngestError::MissingPair {
                    genome_id: genome_id.clone(),
                    missing: "amino-acid (.faa)",
                })?;
                let nucleotide = nucleotide.as_deref().ok_or_else(|| IngestError::MissingPair {
                    genome_id: genome_id.clone(),
                    missing: "nucleotide (.fna)",
                })?;
                ProteinPair::new(ProteinsFile::open(amino)?, ProteinsFile::open(nucleotide)?)?.entries()
            }
            WorkUnit::File(path) => match entity {
                Entity::Metadata => MetadataFile::new(path, self.options.representatives_only).entries(),
                Entity::Proteins => ProteinsFile::open(path)?.entries(),
                Entity::AnnotationsKegg => KeggAnnotationsFile::open(path)?.entries(),
                Entity::AnnotationsPfam => PfamAnnotationsFile::open(path)?.entries(),
            },
        }
    }

    /// Add the release and, for annotation rows, a block of fresh ids in file
    /// order.
    fn stamp(&self, run: &Run<'_>, rows: &mut [Row]) {
        let first = run.counter.as_ref().map(|c| c.claim(rows.len()));
        for (offset, row) in rows.iter_mut().enumerate() {
            if let Some(first) = first {
                row.insert(run.entity.key_column().into(), (first + offset as i64).into());
            }
            row.insert("release".into(), self.release.into());
        }
    }
}

fn failure_text(err: &DbError) -> String {
    err.to_string().replace('\n', " ")
}

/// Run one chunk, turning a panic into a failure of every unit in it.
fn contain_panic<F>(chunk: &[WorkUnit], work: F) -> ChunkOutcome
where
    F: FnOnce() -> ChunkOutcome,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Worker panicked on a chunk of {} units: {}", chunk.len(), message);
            ChunkOutcome {
                units_failed: chunk
                    .iter()
                    .map(|unit| UnitFailure {
                        unit: unit.label(),
                        reason: format!("worker panicked: {}", message),
                    })
                    .collect(),
                ..Default::default()
            }
        }
    }
}

/// Create the live tables of `release`. With `drop_existing` they are
/// dropped first and come back empty.
pub fn prepare_release(db: &Database, release: i64, drop_existing: bool) -> Result<(), DbError> {
    db.create_tables(&Schema::live(release), drop_existing)
}

/// Move every live table of release `from` into the history tables,
/// children first. Categories with no live table are skipped. Returns the
/// number of rows moved.
pub fn promote_release(db: &Database, from: i64) -> Result<usize, DbError> {
    let live = Schema::live(from);
    let history = Schema::history();
    db.create_tables(&history, false)?;

    let mut moved = 0;
    for entity in Entity::ALL.iter().rev() {
        let (Some(live_table), Some(history_table)) = (live.table_for(*entity), history.table_for(*entity)) else {
            continue;
        };
        if !db.table_exists(&live_table.name)? {
            tracing::info!("No {} table to promote", live_table.name);
            continue;
        }
        moved += db.move_to_history(live_table, history_table)?;
    }
    tracing::info!("Promoted release {} ({} rows) to history", from, moved);
    Ok(moved)
}
