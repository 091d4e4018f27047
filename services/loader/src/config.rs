use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment configuration shared by the `loader` and `batch` binaries.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    /// PostgreSQL schema qualifying every catalog table, if not `public`.
    pub schema: Option<String>,
    pub candidates_dir: PathBuf,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            db_url: std::env::var("DB_URL").context("DB_URL env var missing")?,
            schema: std::env::var("CATALOG_SCHEMA")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            candidates_dir: PathBuf::from(
                std::env::var("CANDIDATES_DIR").unwrap_or_else(|_| "./data/candidates".to_string()),
            ),
            max_connections: parse_max_connections(std::env::var("DB_MAX_CONNECTIONS").ok().as_deref())?,
        })
    }
}

fn parse_max_connections(raw: Option<&str>) -> Result<u32> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(5),
        Some(s) => s
            .parse()
            .with_context(|| format!("DB_MAX_CONNECTIONS must be a positive integer, got '{s}'")),
    }
}
