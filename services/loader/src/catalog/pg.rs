//! PostgreSQL [`Catalog`] over a `sqlx` pool.
//!
//! Rows are read as `jsonb` so any table can be fetched without a static
//! row type. Values are bound as text and cast to the column's declared type,
//! which is read once per table from `pg_attribute`. Identifiers are
//! validated and quoted; nothing from a candidate file is interpolated.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::{PgPool, QueryBuilder};
use tracing::debug;

use super::{quote_ident, Catalog, Filter, InsertOutcome, Row, Table};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::values::SqlValue;

/// PostgreSQL accepts at most 65535 bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

type ColumnTypes = HashMap<String, String>;

pub struct PgCatalog {
    pool: PgPool,
    schema: Option<String>,
    column_types: Mutex<HashMap<String, ColumnTypes>>,
}

fn bind_text(value: &SqlValue) -> Option<String> {
    value.as_text()
}

fn sql_value_from_json(value: serde_json::Value) -> SqlValue {
    use serde_json::Value;
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Float),
        },
        Value::String(s) => SqlValue::Text(s),
        other => SqlValue::Text(other.to_string()),
    }
}

fn column_type<'a>(types: &'a ColumnTypes, table: &str, column: &str) -> Result<&'a str> {
    types
        .get(column)
        .map(String::as_str)
        .ok_or_else(|| IngestError::InvalidIdentifier(format!("{table}.{column}")))
}

/// Appends `CAST($n AS <type>)` binding `value` as text.
fn push_cast(qb: &mut QueryBuilder<'_, Postgres>, value: Option<String>, ty: &str) {
    qb.push("CAST(");
    qb.push_bind(value);
    qb.push(" AS ");
    qb.push(ty);
    qb.push(")");
}

impl PgCatalog {
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.db_url)
            .await?;
        Self::new(pool, config.schema.clone())
    }

    pub fn new(pool: PgPool, schema: Option<String>) -> Result<Self> {
        if let Some(schema) = &schema {
            quote_ident(schema)?;
        }
        Ok(Self {
            pool,
            schema,
            column_types: Mutex::new(HashMap::new()),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn qualified(&self, table: &str) -> Result<String> {
        let table = quote_ident(table)?;
        match &self.schema {
            Some(schema) => Ok(format!("{}.{table}", quote_ident(schema)?)),
            None => Ok(table),
        }
    }

    async fn column_types(&self, table: &str) -> Result<ColumnTypes> {
        let cached = self
            .column_types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned();
        if let Some(types) = cached {
            return Ok(types);
        }

        let qualified = self.qualified(table)?;
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT attname::text, format_type(atttypid, atttypmod) FROM pg_attribute \
             WHERE attrelid = to_regclass($1) AND attnum > 0 AND NOT attisdropped",
        )
        .bind(&qualified)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            return Err(IngestError::InvalidIdentifier(format!("{qualified} (no such table)")));
        }
        let types: ColumnTypes = rows.into_iter().collect();
        debug!(table, columns = types.len(), "loaded column types");
        self.column_types
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string(), types.clone());
        Ok(types)
    }

    fn push_filter(
        qb: &mut QueryBuilder<'_, Postgres>,
        types: &ColumnTypes,
        table: &str,
        filter: &Filter,
    ) -> Result<()> {
        let Some(column) = filter.column() else {
            return Ok(());
        };
        let ty = column_type(types, table, column)?;
        let quoted = quote_ident(column)?;
        qb.push(" WHERE t.");
        qb.push(&quoted);
        match filter {
            Filter::All => {}
            Filter::Eq(_, value) if value.is_null() => {
                qb.push(" IS NULL");
            }
            Filter::Eq(_, value) => {
                qb.push(" = ");
                push_cast(qb, bind_text(value), ty);
            }
            Filter::In(_, values) => {
                let texts: Vec<String> = values.iter().filter_map(SqlValue::as_text).collect();
                qb.push(" = ANY(CAST(");
                qb.push_bind(texts);
                qb.push(" AS ");
                qb.push(ty);
                qb.push("[]))");
                if values.iter().any(SqlValue::is_null) {
                    qb.push(" OR t.");
                    qb.push(&quoted);
                    qb.push(" IS NULL");
                }
            }
        }
        Ok(())
    }

    fn push_insert<'a>(
        qb: &mut QueryBuilder<'a, Postgres>,
        types: &ColumnTypes,
        table: &str,
        fields: &Row,
    ) -> Result<()> {
        if fields.is_empty() {
            qb.push(" DEFAULT VALUES");
            return Ok(());
        }
        let columns = fields
            .keys()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        qb.push(" (");
        qb.push(columns.join(", "));
        qb.push(") VALUES (");
        for (i, (column, value)) in fields.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_cast(qb, bind_text(value), column_type(types, table, column)?);
        }
        qb.push(")");
        Ok(())
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn fetch_table(&self, table: &str, columns: Option<&[&str]>, filter: &Filter) -> Result<Table> {
        let types = self.column_types(table).await?;
        let qualified = self.qualified(table)?;

        let projection = match columns {
            None => "to_jsonb(t)".to_string(),
            Some(cols) => {
                let mut parts = vec!["'id', t.\"id\"".to_string()];
                for col in cols.iter().filter(|c| **c != "id") {
                    column_type(&types, table, col)?;
                    parts.push(format!("'{col}', t.{}", quote_ident(col)?));
                }
                format!("jsonb_build_object({})", parts.join(", "))
            }
        };

        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT {projection} FROM {qualified} AS t"));
        Self::push_filter(&mut qb, &types, table, filter)?;
        let rows: Vec<serde_json::Value> = qb.build_query_scalar().fetch_all(&self.pool).await?;

        let mut out = Table::new();
        for value in rows {
            let serde_json::Value::Object(map) = value else {
                continue;
            };
            let mut row: Row = map
                .into_iter()
                .map(|(k, v)| (k, sql_value_from_json(v)))
                .collect();
            let id = row
                .remove("id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| IngestError::MissingColumn {
                    sheet: table.to_string(),
                    column: "id".to_string(),
                })?;
            out.insert(id, row);
        }
        debug!(table, rows = out.len(), "fetched rows");
        Ok(out)
    }

    async fn insert_row(&self, table: &str, fields: &Row) -> Result<i64> {
        let types = self.column_types(table).await?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {}", self.qualified(table)?));
        Self::push_insert(&mut qb, &types, table, fields)?;
        qb.push(" RETURNING id::bigint");
        let id: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(id)
    }

    async fn insert_row_if_absent(&self, table: &str, key: &Row, fields: &Row) -> Result<InsertOutcome> {
        let types = self.column_types(table).await?;
        let qualified = self.qualified(table)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT t.id::bigint FROM {qualified} AS t WHERE TRUE"));
        for (column, value) in key {
            let ty = column_type(&types, table, column)?;
            select.push(" AND t.");
            select.push(quote_ident(column)?);
            if value.is_null() {
                select.push(" IS NULL");
            } else {
                select.push(" = ");
                push_cast(&mut select, bind_text(value), ty);
            }
        }
        select.push(" LIMIT 1");
        let existing: Option<i64> = select.build_query_scalar().fetch_optional(&mut *tx).await?;
        if let Some(id) = existing {
            tx.commit().await?;
            return Ok(InsertOutcome::AlreadyPresent(id));
        }

        let mut insert = QueryBuilder::<Postgres>::new(format!("INSERT INTO {qualified}"));
        Self::push_insert(&mut insert, &types, table, fields)?;
        insert.push(" RETURNING id::bigint");
        let id: i64 = insert.build_query_scalar().fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(InsertOutcome::Inserted(id))
    }

    async fn bulk_insert(&self, table: &str, columns: &[String], rows: &[Vec<SqlValue>]) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        let types = self.column_types(table).await?;
        let qualified = self.qualified(table)?;
        let quoted = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        let casts = columns
            .iter()
            .map(|c| column_type(&types, table, c).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;

        let per_chunk = (MAX_BIND_PARAMS / columns.len()).max(1);
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for chunk in rows.chunks(per_chunk) {
            let mut qb = QueryBuilder::<Postgres>::new(format!("INSERT INTO {qualified} ({}) VALUES ", quoted.join(", ")));
            for (r, values) in chunk.iter().enumerate() {
                if values.len() != columns.len() {
                    return Err(IngestError::ShapeMismatch {
                        sheet: table.to_string(),
                        detail: format!("{} values for {} columns", values.len(), columns.len()),
                    });
                }
                if r > 0 {
                    qb.push(", ");
                }
                qb.push("(");
                for (i, (value, ty)) in values.iter().zip(&casts).enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    push_cast(&mut qb, bind_text(value), ty);
                }
                qb.push(")");
            }
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        debug!(table, inserted, "bulk insert committed");
        Ok(inserted)
    }

    async fn update_row(&self, table: &str, id: i64, fields: &Row) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let types = self.column_types(table).await?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("UPDATE {} AS t SET ", self.qualified(table)?));
        for (i, (column, value)) in fields.iter().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(quote_ident(column)?);
            qb.push(" = ");
            push_cast(&mut qb, bind_text(value), column_type(&types, table, column)?);
        }
        qb.push(" WHERE t.id = ");
        qb.push_bind(id);
        qb.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_rows(&self, table: &str, filter: &Filter) -> Result<u64> {
        let types = self.column_types(table).await?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("DELETE FROM {} AS t", self.qualified(table)?));
        Self::push_filter(&mut qb, &types, table, filter)?;
        Ok(qb.build().execute(&self.pool).await?.rows_affected())
    }

    async fn count_rows(&self, table: &str, filter: &Filter) -> Result<u64> {
        let types = self.column_types(table).await?;
        let mut qb = QueryBuilder::<Postgres>::new(format!("SELECT count(*) FROM {} AS t", self.qualified(table)?));
        Self::push_filter(&mut qb, &types, table, filter)?;
        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn last_id(&self, table: &str) -> Result<Option<i64>> {
        let last: Option<i64> =
            sqlx::query_scalar("SELECT pg_sequence_last_value(pg_get_serial_sequence($1, 'id')::regclass)")
                .bind(self.qualified(table)?)
                .fetch_one(&self.pool)
                .await?;
        Ok(last)
    }
}
