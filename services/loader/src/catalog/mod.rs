//! Catalog access.
//!
//! The catalog is the relational database holding classification definitions,
//! classification items, units, datasets and facts. Components read a
//! [`CatalogSnapshot`] fetched once per file and write through the
//! [`Catalog`] trait, which has a PostgreSQL implementation ([`pg`]) and an
//! in-memory one ([`memory`]) for fixtures and dry runs.

pub mod memory;
pub mod pg;
mod snapshot;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::{IngestError, Result};
use crate::values::SqlValue;

pub use snapshot::{
    AspectEntry, CatalogSnapshot, ClassificationDefinition, ClassificationItem, DatasetEntry, UnitEntry,
};

/// Number of `attribute<n>_oto` columns in `classification_items`.
pub const ATTRIBUTE_SLOTS: u8 = 4;

/// Catalog table names.
pub mod tables {
    pub const DATASETS: &str = "datasets";
    pub const CLASSIFICATION_DEFINITION: &str = "classification_definition";
    pub const CLASSIFICATION_ITEMS: &str = "classification_items";
    pub const DATA: &str = "data";
    pub const UNITS: &str = "units";
    pub const ASPECTS: &str = "aspects";
    pub const TYPES: &str = "types";
    pub const LAYERS: &str = "layers";
    pub const PROVENANCE: &str = "provenance";
    pub const SOURCE_TYPE: &str = "source_type";
    pub const LICENCES: &str = "licences";
    pub const USERS: &str = "users";
}

/// Name of the item column holding attribute slot `slot`.
pub fn attribute_column(slot: u8) -> String {
    format!("attribute{slot}_oto")
}

/// One catalog row without its `id`.
pub type Row = BTreeMap<String, SqlValue>;

/// Catalog rows indexed by id.
pub type Table = BTreeMap<i64, Row>;

/// Builds a [`Row`] from `(column, value)` pairs.
pub fn row<K, V, I>(fields: I) -> Row
where
    K: Into<String>,
    V: Into<SqlValue>,
    I: IntoIterator<Item = (K, V)>,
{
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Row filter for reads and deletes. Values are always bound, never
/// interpolated.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, SqlValue),
    In(String, Vec<SqlValue>),
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<SqlValue>) -> Self {
        Self::Eq(column.to_string(), value.into())
    }

    pub fn any_of<V: Into<SqlValue>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(column.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Eq(c, _) | Self::In(c, _) => Some(c),
        }
    }
}

/// Result of an existence lookup against a supposedly unique key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
    Ambiguous(Vec<T>),
}

impl<T> Lookup<T> {
    pub fn from_matches(mut matches: Vec<T>) -> Self {
        match matches.len() {
            0 => Self::NotFound,
            1 => Self::Found(matches.remove(0)),
            _ => Self::Ambiguous(matches),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(t) => Some(t),
            _ => None,
        }
    }
}

impl Lookup<i64> {
    /// Unique id or an error: `not_found` for no match, `AmbiguousMatch`
    /// naming `what`/`value` for several.
    pub fn require(self, what: &str, value: &str, not_found: impl FnOnce() -> IngestError) -> Result<i64> {
        match self {
            Self::Found(id) => Ok(id),
            Self::NotFound => Err(not_found()),
            Self::Ambiguous(ids) => Err(IngestError::AmbiguousMatch {
                what: what.to_string(),
                value: value.to_string(),
                ids,
            }),
        }
    }
}

/// Outcome of [`Catalog::insert_row_if_absent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    AlreadyPresent(i64),
}

impl InsertOutcome {
    pub fn id(self) -> i64 {
        match self {
            Self::Inserted(id) | Self::AlreadyPresent(id) => id,
        }
    }
}

/// Operations the ingestion core performs against the catalog. Each call
/// commits on its own.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Rows of `table` indexed by id, restricted to `columns` when given.
    async fn fetch_table(&self, table: &str, columns: Option<&[&str]>, filter: &Filter) -> Result<Table>;

    /// Inserts one row and returns its id.
    async fn insert_row(&self, table: &str, fields: &Row) -> Result<i64>;

    /// Inserts `fields` unless a row matching every `key` column exists.
    /// The check and the insert run in one serializable transaction.
    async fn insert_row_if_absent(&self, table: &str, key: &Row, fields: &Row) -> Result<InsertOutcome>;

    /// Inserts `rows` (values ordered as `columns`) and returns the count.
    async fn bulk_insert(&self, table: &str, columns: &[String], rows: &[Vec<SqlValue>]) -> Result<u64>;

    async fn update_row(&self, table: &str, id: i64, fields: &Row) -> Result<()>;

    async fn delete_rows(&self, table: &str, filter: &Filter) -> Result<u64>;

    async fn count_rows(&self, table: &str, filter: &Filter) -> Result<u64>;

    /// Last id handed out for `table`, which can exceed the highest id still
    /// present. `None` when no id was ever assigned.
    async fn last_id(&self, table: &str) -> Result<Option<i64>>;
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes (the PostgreSQL limit).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates and double-quotes an identifier.
pub fn quote_ident(s: &str) -> Result<String> {
    if is_identifier(s) {
        Ok(format!("\"{s}\""))
    } else {
        Err(IngestError::InvalidIdentifier(s.to_string()))
    }
}
