//! Bulk loader for one GTDB release.
//!
//! Expects `{data_dir}/r{release}/` with `metadata/`, `proteins_aa/`,
//! `proteins_nt/`, `annotations_kegg/` and `annotations_pfam/` inside.

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use findabug::config::{Config, CONFIG_ENV};
use findabug::db::Database;
use findabug::ingest::{self, IngestOptions, IngestProgress, IngestReport, Ingestor};
use findabug::logging;
use findabug::schema::Entity;

#[derive(Debug, Parser)]
#[command(name = "findabug-ingest", version, about = "Load a GTDB release into the Find-A-Bug database")]
struct Args {
    /// Release to load, e.g. 207
    #[arg(short, long)]
    release: i64,

    /// Path to config file
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Directory holding r{release}/ (overrides [ingest].data_dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Categories to load: metadata, proteins, annotations (both kinds),
    /// annotations_kegg, annotations_pfam
    #[arg(long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Drop and recreate the release's tables before loading
    #[arg(long)]
    drop_existing: bool,

    /// Move this release's live tables into history before loading
    #[arg(long, value_name = "RELEASE")]
    promote_from: Option<i64>,

    /// Work units per insert transaction
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Worker threads (1 loads sequentially)
    #[arg(long)]
    workers: Option<usize>,

    /// Load every genome, not only species representatives
    #[arg(long)]
    all_genomes: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_stderr();

    let config = Config::load(args.config.as_deref())?;
    let mut options = IngestOptions::from_config(&config.ingest);
    if let Some(chunk_size) = args.chunk_size {
        options.chunk_size = chunk_size;
    }
    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    if args.all_genomes {
        options.representatives_only = false;
    }
    let data_dir = args.data_dir.clone().unwrap_or_else(|| config.ingest.data_dir.clone());
    let entities = selected_entities(&args.tables)?;

    let db = Database::open(&config.database).context("Failed to open database")?;

    if let Some(from) = args.promote_from {
        if from == args.release {
            bail!("Cannot promote release {} while loading it", from);
        }
        let moved = ingest::promote_release(&db, from)
            .with_context(|| format!("Failed to promote release {}", from))?;
        eprintln!("Moved {} rows of release {} to history", moved, from);
    }

    ingest::prepare_release(&db, args.release, args.drop_existing)
        .with_context(|| format!("Failed to create tables for release {}", args.release))?;

    let (tx, rx) = mpsc::channel();
    let renderer = thread::spawn(move || render_progress(rx));

    let ingestor = Ingestor::new(&db, args.release, options);
    let result = ingestor.ingest_release(&data_dir, &entities, Some(tx));
    // The sender is gone once ingest_release returns, which ends the renderer.
    let _ = renderer.join();

    let reports = result?;
    for report in &reports {
        print_report(report);
    }
    if reports.iter().any(|r| !r.units_failed.is_empty() || r.rows_failed > 0) {
        std::process::exit(2);
    }
    Ok(())
}

fn selected_entities(names: &[String]) -> Result<Vec<Entity>> {
    if names.is_empty() {
        return Ok(Entity::ALL.to_vec());
    }
    let mut entities = Vec::new();
    for name in names {
        match name.as_str() {
            "annotations" => entities.extend([Entity::AnnotationsKegg, Entity::AnnotationsPfam]),
            other => entities.push(
                Entity::from_name(other).with_context(|| format!("Unknown table category '{}'", other))?,
            ),
        }
    }
    Ok(entities)
}

fn render_progress(rx: mpsc::Receiver<IngestProgress>) {
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    let mut bar: Option<ProgressBar> = None;

    for event in rx {
        match event {
            IngestProgress::Started { table, total_units } => {
                let pb = ProgressBar::new(total_units as u64);
                pb.set_style(style.clone());
                pb.set_message(table);
                bar = Some(pb);
            }
            IngestProgress::Unit { .. } => {
                if let Some(ref pb) = bar {
                    pb.inc(1);
                }
            }
            IngestProgress::Error { message } => match bar {
                Some(ref pb) => pb.println(format!("error: {}", message)),
                None => eprintln!("error: {}", message),
            },
            IngestProgress::Completed { .. } => {
                if let Some(pb) = bar.take() {
                    pb.finish();
                }
            }
            IngestProgress::ChunkDone { .. } => {}
        }
    }
}

fn print_report(report: &IngestReport) {
    eprintln!(
        "{}: {} units loaded, {} failed; {} rows inserted, {} rejected; {} chunks retried row by row",
        report.table,
        report.units_processed,
        report.units_failed.len(),
        report.rows_inserted,
        report.rows_failed,
        report.chunks_degraded
    );
    for failure in &report.units_failed {
        eprintln!("  {}: {}", failure.unit, failure.reason);
    }
    if let Some(ref log) = report.failure_log {
        eprintln!("  rejected rows written to {}", log.display());
    }
}
