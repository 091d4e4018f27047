//! Batch - ingests every candidate file of a directory
//!
//! Responsibilities:
//! - List `.xlsx` candidates, skipping hidden and lock files
//! - Apply the exclude and focus lists of the run config
//! - Skip files already recorded in the ledger with the same content hash
//! - Ingest the rest one by one, stopping the run at the first failure
//! - Record every ingested file in the ledger
//!
//! Usage:
//!   # All candidates in CANDIDATES_DIR:
//!   cargo run --bin batch
//!
//!   # With a run config and an explicit ledger:
//!   cargo run --bin batch -- --dir data/candidates --config config/batch.json --ledger data/ledger.json

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use loader::catalog::memory::MemoryCatalog;
use loader::catalog::pg::PgCatalog;
use loader::catalog::Catalog;
use loader::config::Config;
use loader::pipeline::{ingest_file, IngestOptions, IngestReport};
use loader::registrar::DatasetPolicy;
use loader::source::{list_candidate_files, TabularSource, WorkbookSource};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "batch", about = "Ingests all IEDC candidate files of a directory")]
struct Args {
    /// Candidates directory (default: CANDIDATES_DIR)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Path to the run config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the processed-files ledger (default: <dir>/ledger.json)
    #[arg(long)]
    ledger: Option<PathBuf>,

    /// Run each file against an in-memory mirror of the catalog
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

// ============================================================================
// Run config
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
struct BatchConfig {
    /// File names never ingested
    exclude: Vec<String>,
    /// If non-empty, only these file names are ingested
    focus: Vec<String>,
    policy: PolicyConfig,
    create_classifications: bool,
    skip_item_check: bool,
    crash: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            focus: Vec::new(),
            policy: PolicyConfig::default(),
            create_classifications: true,
            skip_item_check: false,
            crash: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(default)]
struct PolicyConfig {
    create: bool,
    crash_on_exist: bool,
    update: bool,
    replace: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            create: true,
            crash_on_exist: false,
            update: false,
            replace: true,
        }
    }
}

impl BatchConfig {
    fn options(&self) -> IngestOptions {
        IngestOptions {
            policy: DatasetPolicy {
                create: self.policy.create,
                crash_on_exist: self.policy.crash_on_exist,
                update: self.policy.update,
                replace: self.policy.replace,
            },
            create_classifications: self.create_classifications,
            skip_item_check: self.skip_item_check,
            crash: self.crash,
        }
    }

    fn selects(&self, file: &str) -> bool {
        if self.exclude.iter().any(|f| f == file) {
            return false;
        }
        self.focus.is_empty() || self.focus.iter().any(|f| f == file)
    }
}

async fn load_batch_config(path: &Path) -> Result<BatchConfig> {
    let content = fs::read_to_string(path)
        .await
        .context("Failed to read batch config")?;
    let config: BatchConfig = serde_json::from_str(&content).context("Failed to parse batch config")?;
    Ok(config)
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct LedgerEntry {
    file: String,
    sha256: String,
    dataset_id: i64,
    facts: u64,
    run_id: Uuid,
    ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct Ledger {
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    async fn load(path: &Path) -> Result<Self> {
        let exists = fs::try_exists(path)
            .await
            .with_context(|| format!("Failed to check ledger {}", path.display()))?;
        if !exists {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).await.context("Failed to read ledger")?;
        serde_json::from_str(&content).context("Failed to parse ledger")
    }

    async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await.context("Failed to write ledger")
    }

    fn is_processed(&self, file: &str, sha256: &str) -> bool {
        self.entries.iter().any(|e| e.file == file && e.sha256 == sha256)
    }

    fn record(&mut self, sha256: String, report: &IngestReport) {
        self.entries.retain(|e| e.file != report.file);
        self.entries.push(LedgerEntry {
            file: report.file.clone(),
            sha256,
            dataset_id: report.dataset_id,
            facts: report.facts_inserted,
            run_id: report.run_id,
            ingested_at: Utc::now(),
        });
    }
}

async fn file_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

// ============================================================================
// Run
// ============================================================================

async fn ingest_one(pg: &PgCatalog, path: &Path, file: &str, options: IngestOptions, dry_run: bool) -> Result<IngestReport> {
    let mut source = WorkbookSource::open(path)?;
    let mirror;
    let catalog: &dyn Catalog = if dry_run {
        let meta = source.read_metadata()?;
        mirror = MemoryCatalog::mirror(pg, meta.dataset_name()).await?;
        &mirror
    } else {
        pg
    };
    let (report, _) = ingest_file(catalog, &mut source, file, options).await?;
    Ok(report)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env()?;

    println!("=== IEDC Batch Loader ===");
    let dir = args.dir.clone().unwrap_or_else(|| config.candidates_dir.clone());
    println!("Candidates: {}", dir.display());

    let batch_config = match &args.config {
        Some(path) => {
            println!("Loading batch config from: {}", path.display());
            load_batch_config(path).await?
        }
        None => BatchConfig::default(),
    };
    let ledger_path = args.ledger.clone().unwrap_or_else(|| dir.join("ledger.json"));
    let mut ledger = Ledger::load(&ledger_path).await?;
    println!("Ledger: {} ({} entries)", ledger_path.display(), ledger.entries.len());

    let files: Vec<String> = list_candidate_files(&dir)?
        .into_iter()
        .filter(|f| batch_config.selects(f))
        .collect();
    if files.is_empty() {
        anyhow::bail!("No candidate files match the batch config");
    }

    let pg = PgCatalog::connect(&config)
        .await
        .context("Failed to connect to database")?;

    println!("\nProcessing {} file(s)...", files.len());
    let mut ingested = 0;
    let mut skipped = 0;
    for file in &files {
        let path = dir.join(file);
        let hash = file_hash(&path).await?;
        if ledger.is_processed(file, &hash) {
            println!("[{}] already ingested, skipping", file);
            skipped += 1;
            continue;
        }

        println!("\n[{}]", file);
        let report = match ingest_one(&pg, &path, file, batch_config.options(), args.dry_run).await {
            Ok(report) => report,
            Err(e) => {
                error!(file = %file, error = %e, "ingestion failed, stopping run");
                eprintln!("Failed on {}", file);
                return Err(e.context(format!("Failed to ingest {file}")));
            }
        };
        println!(
            "  Dataset {} ({:?}), {} facts",
            report.dataset_id, report.dataset, report.facts_inserted
        );

        if !args.dry_run {
            ledger.record(hash, &report);
            ledger.save(&ledger_path).await?;
        }
        ingested += 1;
    }

    info!(ingested, skipped, "batch finished");
    println!("\n=== Summary ===");
    println!("Ingested: {}", ingested);
    println!("Skipped: {}", skipped);
    if args.dry_run {
        println!("Dry run: catalog and ledger left unchanged");
    }
    Ok(())
}
