//! Loader - ingests one IEDC candidate file into the dataset catalog
//!
//! Steps:
//! - Read the Cover sheet metadata and build the aspect table
//! - Create missing custom classifications and their items
//! - Register the dataset, its submitting user and licence
//! - Normalize and insert the facts
//!
//! Usage:
//!   # Ingest one file from the candidates directory:
//!   cargo run --bin loader -- --file 1_F_steel_SankeyFlows_2008_Global.xlsx
//!
//!   # Run everything against an in-memory copy of the catalog:
//!   cargo run --bin loader -- --file data.xlsx --dry-run --dump-facts facts.csv
//!
//!   # Re-create an existing dataset entry:
//!   cargo run --bin loader -- --file data.xlsx --replace

use anyhow::{Context, Result};
use clap::Parser;
use loader::catalog::memory::MemoryCatalog;
use loader::catalog::pg::PgCatalog;
use loader::catalog::Catalog;
use loader::config::Config;
use loader::facts::FactBatch;
use loader::pipeline::{ingest_file, IngestOptions, IngestReport};
use loader::registrar::DatasetPolicy;
use loader::source::{TabularSource, WorkbookSource};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "loader", about = "Ingests an IEDC candidate file into the dataset catalog")]
struct Args {
    /// Candidate file name (relative to --dir)
    #[arg(long)]
    file: String,

    /// Candidates directory (default: CANDIDATES_DIR)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Run against an in-memory mirror of the catalog; nothing is written
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Write the normalized fact rows to this CSV file
    #[arg(long)]
    dump_facts: Option<PathBuf>,

    /// Delete and re-create the dataset entry if it exists
    #[arg(long, default_value = "false", conflicts_with = "update")]
    replace: bool,

    /// Rewrite the dataset entry in place if it exists
    #[arg(long, default_value = "false")]
    update: bool,

    /// Fail if the dataset entry exists (default unless --replace or --update)
    #[arg(long, default_value = "false")]
    crash_on_exist: bool,

    /// Do not create custom classifications or their items
    #[arg(long, default_value = "false")]
    no_create: bool,

    /// Skip the item check of existing classifications
    #[arg(long, default_value = "false")]
    skip_item_check: bool,

    /// Log missing items of existing classifications instead of failing
    #[arg(long, default_value = "false")]
    no_crash: bool,

    /// Print the run report as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

impl Args {
    fn options(&self) -> IngestOptions {
        let overwrite = self.replace || self.update;
        IngestOptions {
            policy: DatasetPolicy {
                create: true,
                crash_on_exist: self.crash_on_exist || !overwrite,
                update: self.update,
                replace: self.replace,
            },
            create_classifications: !self.no_create,
            skip_item_check: self.skip_item_check,
            crash: !self.no_crash,
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();
}

fn dump_facts(batch: &FactBatch, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    batch.write_csv(file).context("Failed to write facts CSV")?;
    println!("Facts written to: {}", path.display());
    Ok(())
}

fn print_report(report: &IngestReport) {
    println!("\n=== Summary ===");
    println!("Dataset: {} (version {:?})", report.dataset_name, report.dataset_version);
    println!("Dataset id: {} ({:?})", report.dataset_id, report.dataset);
    println!("Classifications created: {}", report.created_classifications.len());
    println!("Classification items created: {}", report.created_items);
    println!("Facts inserted: {}", report.facts_inserted);
    if report.facts_dropped_empty > 0 {
        println!("Empty values dropped: {}", report.facts_dropped_empty);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    let config = Config::from_env()?;

    println!("=== IEDC Candidate Loader ===");
    let dir = args.dir.clone().unwrap_or_else(|| config.candidates_dir.clone());
    let path = dir.join(&args.file);
    println!("File: {}", path.display());

    let mut source = WorkbookSource::open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let pg = PgCatalog::connect(&config)
        .await
        .context("Failed to connect to database")?;

    let mirror;
    let catalog: &dyn Catalog = if args.dry_run {
        let meta = source.read_metadata()?;
        println!("Dry run: mirroring catalog for '{}'", meta.dataset_name());
        mirror = MemoryCatalog::mirror(&pg, meta.dataset_name()).await?;
        &mirror
    } else {
        &pg
    };

    let (report, batch) = ingest_file(catalog, &mut source, &args.file, args.options())
        .await
        .with_context(|| format!("Failed to ingest {}", args.file))?;

    if let Some(out) = &args.dump_facts {
        dump_facts(&batch, out)?;
    } else if args.dry_run {
        batch.write_csv(std::io::stdout()).context("Failed to write facts CSV")?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if args.dry_run {
        println!("Dry run: catalog left unchanged");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_crashes_on_existing_dataset() {
        let args = Args::parse_from(["loader", "--file", "a.xlsx"]);
        let options = args.options();
        assert!(options.policy.crash_on_exist);
        assert!(options.create_classifications);
        assert!(options.crash);
    }

    #[test]
    fn test_replace_disables_crash_on_exist() {
        let args = Args::parse_from(["loader", "--file", "a.xlsx", "--replace", "--no-create"]);
        let options = args.options();
        assert!(options.policy.replace);
        assert!(!options.policy.crash_on_exist);
        assert!(!options.create_classifications);
    }

    #[test]
    fn test_replace_and_update_conflict() {
        assert!(Args::try_parse_from(["loader", "--file", "a.xlsx", "--replace", "--update"]).is_err());
    }
}
