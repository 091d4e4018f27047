//! Fact normalization and upload.
//!
//! Both layouts end up as a [`FactBatch`]: one [`FactRow`] per observation
//! with every aspect value replaced by its classification item id and every
//! unit code by its unit id. Substitutions must be 1:1; a value that is
//! missing from the catalog or matches several items aborts the batch.

use std::collections::HashMap;
use std::io;

use tracing::{debug, info, warn};

use crate::aspects::{AspectTable, Position};
use crate::catalog::{tables, Catalog, CatalogSnapshot, Filter, UnitEntry};
use crate::consistency::{check_classification_items, resolve_classification_id, AspectFilter, CheckOptions};
use crate::error::{IngestError, Result};
use crate::metadata::{DataInfo, FileMetadata, Scope};
use crate::names::ClassificationName;
use crate::source::{
    TabularSource, COMMENT_SHEET, DATA_SHEET, STATS_ARRAY_SHEET, UNIT_DENOMINATOR_SHEET, UNIT_NOMINATOR_SHEET,
};
use crate::table::{FactTable, ListTable, PivotTable};
use crate::values::{format_number, is_null_sentinel, CellValue, SqlValue};

pub const STATS_ARRAY_FIELDS: usize = 4;

/// Distribution descriptor: type, then three parameters.
pub type StatsArray = [Option<f64>; STATS_ARRAY_FIELDS];

/// LIST fact sheet columns besides the aspects.
const VALUE_COLUMN: &str = "value";
const UNIT_NOMINATOR_COLUMN: &str = "unit_nominator";
const UNIT_DENOMINATOR_COLUMN: &str = "unit_denominator";
const STATS_ARRAY_COLUMN: &str = "stats_array_string";
const COMMENT_COLUMN: &str = "comment";

// -----------------------------------------------------------------------------
// Field parsing
// -----------------------------------------------------------------------------

/// Parses `"3;10;3.0;none;"`-style strings. One trailing `;` is ignored;
/// exactly four fields must remain. Null cells and `none` give four nulls.
pub fn parse_stats_array(cell: &CellValue) -> Result<StatsArray> {
    if cell.is_null() {
        return Ok([None; STATS_ARRAY_FIELDS]);
    }
    let text = cell.to_catalog_string().unwrap_or_default();
    let trimmed = text.strip_suffix(';').unwrap_or(&text);
    let fields: Vec<&str> = trimmed.split(';').collect();
    if fields.len() != STATS_ARRAY_FIELDS {
        return Err(IngestError::InvalidStatsArray(text));
    }
    let mut out = [None; STATS_ARRAY_FIELDS];
    for (slot, field) in out.iter_mut().zip(fields) {
        if is_null_sentinel(field) {
            continue;
        }
        *slot = Some(
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| IngestError::InvalidStatsArray(text.clone()))?,
        );
    }
    Ok(out)
}

fn parse_value(cell: &CellValue, location: impl FnOnce() -> String) -> Result<Option<f64>> {
    cell.to_number().map_err(|value| IngestError::InvalidValue {
        column: VALUE_COLUMN.to_string(),
        value,
        location: location(),
    })
}

fn ensure_row_count(stage: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(IngestError::RowCountChanged {
            stage: stage.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Catalog substitution
// -----------------------------------------------------------------------------

/// Unit code → unit id, trying `unitcode`, `alt_unitcode` and
/// `alt_unitcode2` in that order.
struct UnitResolver<'a> {
    units: &'a [UnitEntry],
    cache: HashMap<String, i64>,
}

impl<'a> UnitResolver<'a> {
    fn new(units: &'a [UnitEntry]) -> Self {
        Self {
            units,
            cache: HashMap::new(),
        }
    }

    fn resolve(&mut self, code: Option<&str>) -> Result<Option<i64>> {
        let Some(code) = code.map(str::trim).filter(|c| !is_null_sentinel(c)) else {
            return Ok(None);
        };
        if let Some(id) = self.cache.get(code) {
            return Ok(Some(*id));
        }

        let matches_per_column: Vec<Vec<i64>> = (0..3)
            .map(|col| {
                self.units
                    .iter()
                    .filter(|u| u.codes[col].as_deref() == Some(code))
                    .map(|u| u.id)
                    .collect()
            })
            .collect();
        let Some((col, ids)) = matches_per_column.iter().enumerate().find(|(_, ids)| !ids.is_empty()) else {
            return Err(IngestError::UnitNotFound(code.to_string()));
        };
        if ids.len() > 1 {
            return Err(IngestError::AmbiguousMatch {
                what: "unit".to_string(),
                value: code.to_string(),
                ids: ids.clone(),
            });
        }
        let id = ids[0];
        let shadowed: Vec<i64> = matches_per_column[col + 1..]
            .iter()
            .flatten()
            .copied()
            .filter(|other| *other != id)
            .collect();
        if !shadowed.is_empty() {
            warn!(code, id, ?shadowed, "unit code matches several unit columns; using the first by priority");
        }
        self.cache.insert(code.to_string(), id);
        Ok(Some(id))
    }
}

/// Aspect value → classification item id.
struct ItemResolver<'a> {
    name: &'a ClassificationName,
    index: HashMap<String, Vec<i64>>,
}

impl<'a> ItemResolver<'a> {
    fn new(name: &'a ClassificationName, snapshot: &CatalogSnapshot) -> Result<Self> {
        let classification_id = resolve_classification_id(snapshot, name)?;
        Ok(Self {
            name,
            index: snapshot.item_index(classification_id, name.aspect.attribute_slot),
        })
    }

    /// Ids for `labels`, one per label. Unknown values are reported all at
    /// once; a value matching several items is a catalog error.
    fn substitute(&self, labels: &[Option<String>]) -> Result<Vec<i64>> {
        let mut missing: Vec<String> = Vec::new();
        let mut joined = 0;
        let mut ids = Vec::with_capacity(labels.len());
        for label in labels {
            let key = label.as_deref().unwrap_or_default();
            match self.index.get(key) {
                Some(matches) => {
                    joined += matches.len();
                    ids.push(matches[0]);
                }
                None => {
                    if !missing.iter().any(|m| m == key) {
                        missing.push(key.to_string());
                    }
                }
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(IngestError::ItemsMissing {
                aspect: self.name.aspect.name.clone(),
                classification: self.name.custom_name.clone(),
                slot: self.name.aspect.attribute_slot,
                values: missing,
            });
        }
        ensure_row_count(&self.name.custom_name, labels.len(), joined)?;
        Ok(ids)
    }
}

// -----------------------------------------------------------------------------
// Batches
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FactRow {
    /// Item ids ordered as [`FactBatch::aspect_columns`].
    pub aspects: Vec<i64>,
    pub value: Option<f64>,
    pub unit_nominator: Option<i64>,
    pub unit_denominator: Option<i64>,
    pub stats_array: StatsArray,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FactBatch {
    pub dataset_id: i64,
    pub aspect_columns: Vec<String>,
    pub rows: Vec<FactRow>,
    /// Rows dropped because their value was empty.
    pub dropped_empty: usize,
}

impl FactBatch {
    /// Column order of the `data` table insert.
    pub fn columns(&self) -> Vec<String> {
        let mut cols = vec!["dataset_id".to_string()];
        cols.extend(self.aspect_columns.iter().cloned());
        cols.extend(
            [VALUE_COLUMN, UNIT_NOMINATOR_COLUMN, UNIT_DENOMINATOR_COLUMN]
                .iter()
                .map(|c| c.to_string()),
        );
        cols.extend((1..=STATS_ARRAY_FIELDS).map(|i| format!("stats_array_{i}")));
        cols.push(COMMENT_COLUMN.to_string());
        cols
    }

    pub fn sql_rows(&self) -> Vec<Vec<SqlValue>> {
        self.rows
            .iter()
            .map(|r| {
                let mut values = vec![SqlValue::Int(self.dataset_id)];
                values.extend(r.aspects.iter().map(|id| SqlValue::Int(*id)));
                values.push(r.value.into());
                values.push(r.unit_nominator.into());
                values.push(r.unit_denominator.into());
                values.extend(r.stats_array.iter().map(|s| SqlValue::from(*s)));
                values.push(r.comment.clone().into());
                values
            })
            .collect()
    }

    /// Writes the batch as CSV with the `data` table's column names.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns())?;
        for row in self.sql_rows() {
            wtr.write_record(row.iter().map(|v| v.as_text().unwrap_or_default()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-cell side sheets of a TABLE file, present for each field whose scope
/// is `TABLE`.
#[derive(Debug, Clone, Default)]
pub struct SideTables {
    pub unit_nominator: Option<PivotTable>,
    pub unit_denominator: Option<PivotTable>,
    pub stats_array: Option<PivotTable>,
    pub comment: Option<PivotTable>,
}

impl SideTables {
    pub fn read(source: &mut dyn TabularSource, info: &DataInfo, aspects: &AspectTable) -> Result<Self> {
        let (rows, cols) = (aspects.row_levels(), aspects.col_levels());
        let mut read = |scope: &Scope, sheet: &str| -> Result<Option<PivotTable>> {
            match scope {
                Scope::Table => {
                    debug!(sheet, "reading side table");
                    source.read_side_table(sheet, rows, cols).map(Some)
                }
                Scope::Global(_) => Ok(None),
            }
        };
        Ok(Self {
            unit_nominator: read(&info.unit_nominator, UNIT_NOMINATOR_SHEET)?,
            unit_denominator: read(&info.unit_denominator, UNIT_DENOMINATOR_SHEET)?,
            stats_array: read(&info.stats_array, STATS_ARRAY_SHEET)?,
            comment: read(&info.comment, COMMENT_SHEET)?,
        })
    }
}

/// One field of a TABLE file: a global value or a keyed side table.
enum CellSource<'a> {
    Global(CellValue),
    Table(HashMap<(Vec<String>, Vec<String>), &'a CellValue>),
}

impl<'a> CellSource<'a> {
    fn new(scope: &Scope, side: Option<&'a PivotTable>, sheet: &str) -> Result<Self> {
        match scope {
            Scope::Global(value) => Ok(Self::Global(
                value.as_deref().map(CellValue::from).unwrap_or_default(),
            )),
            Scope::Table => {
                let table = side.ok_or_else(|| IngestError::MissingSheet(sheet.to_string()))?;
                Ok(Self::Table(table.keyed(sheet)?))
            }
        }
    }

    /// Left join: cells absent from the side table read as empty.
    fn get(&self, key: &(Vec<String>, Vec<String>)) -> CellValue {
        match self {
            Self::Global(v) => v.clone(),
            Self::Table(map) => map.get(key).map(|v| (*v).clone()).unwrap_or_default(),
        }
    }
}

fn normalize_table(
    meta: &FileMetadata,
    names: &[ClassificationName],
    snapshot: &CatalogSnapshot,
    table: &PivotTable,
    side: &SideTables,
) -> Result<Vec<FactRow>> {
    let melted = table.melt();
    let n = melted.len();

    let mut aspect_ids = Vec::with_capacity(names.len());
    for name in names {
        if name.aspect.position == Position::List {
            return Err(IngestError::PositionNotFound {
                aspect: name.aspect.name.clone(),
                detail: "LIST position on a TABLE data sheet".to_string(),
            });
        }
        let labels: Vec<Option<String>> = melted
            .iter()
            .map(|m| {
                let label = match name.aspect.position {
                    Position::Row(k) => table.rows.label(k, m.row),
                    Position::Col(k) => table.cols.label(k, m.col),
                    Position::List => None,
                };
                label.and_then(CellValue::to_optional_text)
            })
            .collect();
        let ids = ItemResolver::new(name, snapshot)?.substitute(&labels)?;
        ensure_row_count(&name.aspect.name, n, ids.len())?;
        aspect_ids.push(ids);
    }

    let info = &meta.data_info;
    let nominators = CellSource::new(&info.unit_nominator, side.unit_nominator.as_ref(), UNIT_NOMINATOR_SHEET)?;
    let denominators = CellSource::new(&info.unit_denominator, side.unit_denominator.as_ref(), UNIT_DENOMINATOR_SHEET)?;
    let stats = CellSource::new(&info.stats_array, side.stats_array.as_ref(), STATS_ARRAY_SHEET)?;
    let comments = CellSource::new(&info.comment, side.comment.as_ref(), COMMENT_SHEET)?;
    let mut units = UnitResolver::new(snapshot.units());

    let mut rows = Vec::with_capacity(n);
    for (i, m) in melted.iter().enumerate() {
        let key = (table.rows.key(m.row), table.cols.key(m.col));
        let location = || format!("{DATA_SHEET} row {} col {}", m.row + 1, m.col + 1);
        rows.push(FactRow {
            aspects: aspect_ids.iter().map(|ids| ids[i]).collect(),
            value: parse_value(&m.value, location)?,
            unit_nominator: units.resolve(nominators.get(&key).to_optional_text().as_deref())?,
            unit_denominator: units.resolve(denominators.get(&key).to_optional_text().as_deref())?,
            stats_array: parse_stats_array(&stats.get(&key))?,
            comment: comments.get(&key).to_optional_text(),
        });
    }
    Ok(rows)
}

fn normalize_list(names: &[ClassificationName], snapshot: &CatalogSnapshot, table: &ListTable) -> Result<Vec<FactRow>> {
    let n = table.len();
    let mut aspect_ids = Vec::with_capacity(names.len());
    for name in names {
        let col = table.require_column(DATA_SHEET, &name.aspect.name)?;
        let labels: Vec<Option<String>> = (0..n).map(|r| table.get(r, col).to_optional_text()).collect();
        let ids = ItemResolver::new(name, snapshot)?.substitute(&labels)?;
        ensure_row_count(&name.aspect.name, n, ids.len())?;
        aspect_ids.push(ids);
    }

    let value_col = table.require_column(DATA_SHEET, VALUE_COLUMN)?;
    let optional = |name: &str| table.column(name);
    let (nom_col, den_col) = (optional(UNIT_NOMINATOR_COLUMN), optional(UNIT_DENOMINATOR_COLUMN));
    let (stats_col, comment_col) = (optional(STATS_ARRAY_COLUMN), optional(COMMENT_COLUMN));
    let cell = |r: usize, col: Option<usize>| col.map_or(CellValue::Empty, |c| table.get(r, c).clone());
    let mut units = UnitResolver::new(snapshot.units());

    let mut rows = Vec::with_capacity(n);
    for r in 0..n {
        let location = || format!("{DATA_SHEET} row {}", r + 2);
        rows.push(FactRow {
            aspects: aspect_ids.iter().map(|ids| ids[r]).collect(),
            value: parse_value(table.get(r, value_col), location)?,
            unit_nominator: units.resolve(cell(r, nom_col).to_optional_text().as_deref())?,
            unit_denominator: units.resolve(cell(r, den_col).to_optional_text().as_deref())?,
            stats_array: parse_stats_array(&cell(r, stats_col))?,
            comment: cell(r, comment_col).to_optional_text(),
        });
    }
    Ok(rows)
}

/// Builds the fact rows of a file for `dataset_id`. The snapshot must hold
/// the items of every aspect's classification.
pub fn normalize(
    meta: &FileMetadata,
    names: &[ClassificationName],
    snapshot: &CatalogSnapshot,
    data: &FactTable,
    side: &SideTables,
    dataset_id: i64,
) -> Result<FactBatch> {
    let mut names: Vec<ClassificationName> = names.to_vec();
    names.sort_by_key(|n| n.aspect.number);

    let rows = match data {
        FactTable::List(table) => normalize_list(&names, snapshot, table)?,
        FactTable::Pivot(table) => normalize_table(meta, &names, snapshot, table, side)?,
    };
    ensure_row_count("normalization", data.len(), rows.len())?;

    let total = rows.len();
    let rows: Vec<FactRow> = if meta.data_info.insert_empty_cells_as_null {
        rows
    } else {
        rows.into_iter().filter(|r| r.value.is_some()).collect()
    };
    let dropped_empty = total - rows.len();
    if dropped_empty > 0 {
        debug!(dropped_empty, "dropped rows with empty values");
    }

    Ok(FactBatch {
        dataset_id,
        aspect_columns: names.iter().map(|n| n.aspect.data_column()).collect(),
        rows,
        dropped_empty,
    })
}

pub async fn count_facts(catalog: &dyn Catalog, dataset_id: i64) -> Result<u64> {
    catalog
        .count_rows(tables::DATA, &Filter::eq("dataset_id", dataset_id))
        .await
}

async fn ensure_no_facts(catalog: &dyn Catalog, dataset_id: i64) -> Result<()> {
    let rows = count_facts(catalog, dataset_id).await?;
    if rows > 0 {
        return Err(IngestError::FactsAlreadyPresent {
            dataset_id,
            rows: rows as usize,
        });
    }
    Ok(())
}

/// Inserts a batch into `data`. Refuses if the dataset already has facts.
pub async fn upload_facts(catalog: &dyn Catalog, batch: &FactBatch) -> Result<u64> {
    ensure_no_facts(catalog, batch.dataset_id).await?;
    if batch.is_empty() {
        warn!(dataset_id = batch.dataset_id, "no fact rows to insert");
        return Ok(0);
    }
    let inserted = catalog
        .bulk_insert(tables::DATA, &batch.columns(), &batch.sql_rows())
        .await?;
    info!(dataset_id = batch.dataset_id, inserted, "inserted facts");
    Ok(inserted)
}

/// Checks, normalizes and uploads the facts of one file.
///
/// `crash` makes a missing item in any classification fail before
/// normalization starts; without it the gaps are only logged. The
/// duplicate-facts guard applies either way.
#[allow(clippy::too_many_arguments)]
pub async fn upload_data(
    catalog: &dyn Catalog,
    snapshot: &CatalogSnapshot,
    meta: &FileMetadata,
    names: &[ClassificationName],
    data: &FactTable,
    side: &SideTables,
    dataset_id: i64,
    crash: bool,
) -> Result<(FactBatch, u64)> {
    ensure_no_facts(catalog, dataset_id).await?;
    let opts = CheckOptions {
        crash,
        warn: true,
        filter: AspectFilter::All,
    };
    check_classification_items(names, data, snapshot, opts)?;

    let batch = normalize(meta, names, snapshot, data, side, dataset_id)?;
    debug!(
        rows = batch.len(),
        first_value = batch.rows.first().and_then(|r| r.value).map(format_number),
        "normalized facts"
    );
    let inserted = upload_facts(catalog, &batch).await?;
    Ok((batch, inserted))
}
