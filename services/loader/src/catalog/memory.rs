//! In-memory [`Catalog`] used for test fixtures and `--dry-run` ingestion.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::info;

use super::{tables, Catalog, Filter, InsertOutcome, Row, Table};
use crate::error::{IngestError, Result};
use crate::values::SqlValue;

/// Tables copied by [`MemoryCatalog::mirror`]. Facts are mirrored only for
/// the datasets a run can touch.
const MIRRORED_TABLES: &[&str] = &[
    tables::CLASSIFICATION_DEFINITION,
    tables::CLASSIFICATION_ITEMS,
    tables::UNITS,
    tables::ASPECTS,
    tables::DATASETS,
    tables::TYPES,
    tables::LAYERS,
    tables::PROVENANCE,
    tables::SOURCE_TYPE,
    tables::LICENCES,
    tables::USERS,
];

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    store: Mutex<Store>,
}

/// Tables plus one id sequence per table, so ids are never reused after a
/// delete.
#[derive(Debug, Default)]
struct Store {
    tables: BTreeMap<String, Table>,
    sequences: BTreeMap<String, i64>,
}

impl Store {
    fn insert(&mut self, table: &str, row: Row) -> i64 {
        let t = self.tables.entry(table.to_string()).or_default();
        let seq = self.sequences.entry(table.to_string()).or_default();
        let id = (*seq).max(t.keys().next_back().copied().unwrap_or(0)) + 1;
        *seq = id;
        t.insert(id, row);
        id
    }
}

fn same_value(a: &SqlValue, b: &SqlValue) -> bool {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => true,
        (SqlValue::Null, _) | (_, SqlValue::Null) => false,
        _ => a.as_text() == b.as_text(),
    }
}

fn matches(id: i64, row: &Row, filter: &Filter) -> bool {
    let value_of = |column: &str| {
        if column == "id" {
            SqlValue::Int(id)
        } else {
            row.get(column).cloned().unwrap_or_default()
        }
    };
    match filter {
        Filter::All => true,
        Filter::Eq(column, value) => same_value(&value_of(column), value),
        Filter::In(column, values) => {
            let actual = value_of(column);
            values.iter().any(|v| same_value(&actual, v))
        }
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds rows with fresh ids and returns the ids.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Row>) -> Vec<i64> {
        let mut store = self.lock();
        rows.into_iter().map(|r| store.insert(table, r)).collect()
    }

    /// Adds a row under a given id, replacing any existing one.
    pub fn seed_with_id(&self, table: &str, id: i64, row: Row) {
        self.lock().tables.entry(table.to_string()).or_default().insert(id, row);
    }

    pub fn table(&self, table: &str) -> Table {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    pub fn tables(&self) -> BTreeMap<String, Table> {
        self.lock().tables.clone()
    }

    /// Copies the catalog tables of `source`, plus the fact rows of the
    /// datasets called `dataset_name`, so a full ingestion can run without
    /// writing to `source`.
    pub async fn mirror(source: &dyn Catalog, dataset_name: &str) -> Result<Self> {
        let mirror = Self::new();
        for table in MIRRORED_TABLES.iter().copied().chain([tables::DATA]) {
            if let Some(last) = source.last_id(table).await? {
                mirror.lock().sequences.insert(table.to_string(), last);
            }
        }
        for table in MIRRORED_TABLES {
            let rows = source.fetch_table(table, None, &Filter::All).await?;
            mirror.lock().tables.insert(table.to_string(), rows);
        }

        let dataset_ids: Vec<i64> = mirror
            .table(tables::DATASETS)
            .iter()
            .filter(|(_, r)| r.get("dataset_name").and_then(SqlValue::as_text).as_deref() == Some(dataset_name))
            .map(|(id, _)| *id)
            .collect();
        if !dataset_ids.is_empty() {
            let facts = source
                .fetch_table(
                    tables::DATA,
                    Some(&["dataset_id"]),
                    &Filter::any_of("dataset_id", dataset_ids.iter().copied()),
                )
                .await?;
            mirror.lock().tables.insert(tables::DATA.to_string(), facts);
        }
        info!(tables = MIRRORED_TABLES.len(), ?dataset_ids, "mirrored catalog into memory");
        Ok(mirror)
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn fetch_table(&self, table: &str, columns: Option<&[&str]>, filter: &Filter) -> Result<Table> {
        let store = self.lock();
        let Some(t) = store.tables.get(table) else {
            return Ok(Table::new());
        };
        Ok(t.iter()
            .filter(|(id, row)| matches(**id, row, filter))
            .map(|(id, row)| {
                let projected = match columns {
                    Some(cols) => row
                        .iter()
                        .filter(|(k, _)| cols.contains(&k.as_str()))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    None => row.clone(),
                };
                (*id, projected)
            })
            .collect())
    }

    async fn insert_row(&self, table: &str, fields: &Row) -> Result<i64> {
        Ok(self.lock().insert(table, fields.clone()))
    }

    async fn insert_row_if_absent(&self, table: &str, key: &Row, fields: &Row) -> Result<InsertOutcome> {
        let mut store = self.lock();
        let existing = store.tables.get(table).and_then(|t| {
            t.iter().find(|(_, row)| {
                key.iter()
                    .all(|(k, v)| same_value(row.get(k).unwrap_or(&SqlValue::Null), v))
            })
        });
        if let Some((id, _)) = existing {
            return Ok(InsertOutcome::AlreadyPresent(*id));
        }
        Ok(InsertOutcome::Inserted(store.insert(table, fields.clone())))
    }

    async fn bulk_insert(&self, table: &str, columns: &[String], rows: &[Vec<SqlValue>]) -> Result<u64> {
        if let Some(values) = rows.iter().find(|v| v.len() != columns.len()) {
            return Err(IngestError::ShapeMismatch {
                sheet: table.to_string(),
                detail: format!("{} values for {} columns", values.len(), columns.len()),
            });
        }
        let mut store = self.lock();
        for values in rows {
            store.insert(table, columns.iter().cloned().zip(values.iter().cloned()).collect());
        }
        Ok(rows.len() as u64)
    }

    async fn update_row(&self, table: &str, id: i64, fields: &Row) -> Result<()> {
        let mut store = self.lock();
        if let Some(row) = store.tables.get_mut(table).and_then(|t| t.get_mut(&id)) {
            row.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(())
    }

    async fn delete_rows(&self, table: &str, filter: &Filter) -> Result<u64> {
        let mut store = self.lock();
        let Some(t) = store.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = t.len();
        t.retain(|id, row| !matches(*id, row, filter));
        Ok((before - t.len()) as u64)
    }

    async fn count_rows(&self, table: &str, filter: &Filter) -> Result<u64> {
        let store = self.lock();
        Ok(store.tables.get(table).map_or(0, |t| {
            t.iter().filter(|(id, row)| matches(**id, row, filter)).count() as u64
        }))
    }

    async fn last_id(&self, table: &str) -> Result<Option<i64>> {
        let store = self.lock();
        let seq = store.sequences.get(table).copied();
        let max_key = store.tables.get(table).and_then(|t| t.keys().next_back().copied());
        Ok(seq.max(max_key))
    }
}
