//! Fact data shapes.
//!
//! LIST files give one observation per row ([`ListTable`]). TABLE files give
//! a matrix whose row and column headers each carry one or more aspect
//! levels ([`PivotTable`]). An axis with a single level is [`Axis::Flat`];
//! everything that extracts values from an axis is defined once per variant.

use std::collections::{BTreeSet, HashMap};

use crate::error::{IngestError, Result};
use crate::values::CellValue;

#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub name: Option<String>,
    pub labels: Vec<CellValue>,
}

impl Level {
    pub fn new(name: Option<&str>, labels: Vec<CellValue>) -> Self {
        Self {
            name: name.map(str::to_string),
            labels,
        }
    }
}

/// Row or column header of a pivoted table.
#[derive(Debug, Clone, PartialEq)]
pub enum Axis {
    Flat(Level),
    Leveled(Vec<Level>),
}

impl Axis {
    /// Builds an axis from its levels, outermost first. A single level
    /// becomes [`Axis::Flat`].
    pub fn new(sheet: &str, mut levels: Vec<Level>) -> Result<Self> {
        let Some(first) = levels.first() else {
            return Err(IngestError::ShapeMismatch {
                sheet: sheet.to_string(),
                detail: "axis without header levels".to_string(),
            });
        };
        let len = first.labels.len();
        if let Some(bad) = levels.iter().find(|l| l.labels.len() != len) {
            return Err(IngestError::ShapeMismatch {
                sheet: sheet.to_string(),
                detail: format!("header level {:?} has {} labels, expected {len}", bad.name, bad.labels.len()),
            });
        }
        if levels.len() == 1 {
            Ok(Self::Flat(levels.remove(0)))
        } else {
            Ok(Self::Leveled(levels))
        }
    }

    pub fn flat(labels: Vec<CellValue>) -> Self {
        Self::Flat(Level::new(None, labels))
    }

    pub fn depth(&self) -> usize {
        match self {
            Self::Flat(_) => 1,
            Self::Leveled(levels) => levels.len(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Flat(level) => level.labels.len(),
            Self::Leveled(levels) => levels.first().map_or(0, |l| l.labels.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn levels(&self) -> &[Level] {
        match self {
            Self::Flat(level) => std::slice::from_ref(level),
            Self::Leveled(levels) => levels,
        }
    }

    /// Labels of entry `i`, outermost level first.
    pub fn labels_at(&self, i: usize) -> Vec<CellValue> {
        self.levels()
            .iter()
            .map(|l| l.labels.get(i).cloned().unwrap_or_default())
            .collect()
    }

    /// Catalog string forms of entry `i`; used to align side tables with
    /// the data matrix.
    pub fn key(&self, i: usize) -> Vec<String> {
        self.labels_at(i)
            .iter()
            .map(|v| v.to_catalog_string().unwrap_or_default())
            .collect()
    }

    /// Distinct catalog strings found at header level `level`. A flat axis
    /// has one level and returns its whole index whatever `level` is.
    pub fn distinct_values(&self, level: usize) -> BTreeSet<String> {
        let labels = match self {
            Self::Flat(l) => &l.labels,
            Self::Leveled(levels) => match levels.get(level) {
                Some(l) => &l.labels,
                None => return BTreeSet::new(),
            },
        };
        labels.iter().filter_map(CellValue::to_optional_text).collect()
    }

    /// Label of entry `i` at `level`, with the same flat-axis rule as
    /// [`Axis::distinct_values`].
    pub fn label(&self, level: usize, i: usize) -> Option<&CellValue> {
        match self {
            Self::Flat(l) => l.labels.get(i),
            Self::Leveled(levels) => levels.get(level)?.labels.get(i),
        }
    }
}

/// One cell of a melted pivot table.
#[derive(Debug, Clone, PartialEq)]
pub struct MeltedCell {
    pub row: usize,
    pub col: usize,
    pub row_labels: Vec<CellValue>,
    pub col_labels: Vec<CellValue>,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotTable {
    pub rows: Axis,
    pub cols: Axis,
    /// `cells[r][c]`.
    cells: Vec<Vec<CellValue>>,
}

impl PivotTable {
    pub fn new(sheet: &str, rows: Axis, cols: Axis, cells: Vec<Vec<CellValue>>) -> Result<Self> {
        if cells.len() != rows.len() {
            return Err(IngestError::ShapeMismatch {
                sheet: sheet.to_string(),
                detail: format!("{} data rows for {} row labels", cells.len(), rows.len()),
            });
        }
        if let Some((r, row)) = cells.iter().enumerate().find(|(_, row)| row.len() != cols.len()) {
            return Err(IngestError::ShapeMismatch {
                sheet: sheet.to_string(),
                detail: format!("data row {r} has {} cells for {} column labels", row.len(), cols.len()),
            });
        }
        Ok(Self { rows, cols, cells })
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.cells.get(row)?.get(col)
    }

    pub fn len(&self) -> usize {
        self.rows.len() * self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row-major list of every cell with its header labels.
    pub fn melt(&self) -> Vec<MeltedCell> {
        let mut out = Vec::with_capacity(self.len());
        for (r, row) in self.cells.iter().enumerate() {
            let row_labels = self.rows.labels_at(r);
            for (c, value) in row.iter().enumerate() {
                out.push(MeltedCell {
                    row: r,
                    col: c,
                    row_labels: row_labels.clone(),
                    col_labels: self.cols.labels_at(c),
                    value: value.clone(),
                });
            }
        }
        out
    }

    /// Cells keyed by `(row key, col key)`. Two cells under one key would
    /// make a join on this table ambiguous.
    pub fn keyed(&self, sheet: &str) -> Result<HashMap<(Vec<String>, Vec<String>), &CellValue>> {
        let mut out = HashMap::with_capacity(self.len());
        for (r, row) in self.cells.iter().enumerate() {
            let row_key = self.rows.key(r);
            for (c, value) in row.iter().enumerate() {
                if out.insert((row_key.clone(), self.cols.key(c)), value).is_some() {
                    return Err(IngestError::RowCountChanged {
                        stage: sheet.to_string(),
                        expected: self.len(),
                        actual: self.len() + 1,
                    });
                }
            }
        }
        Ok(out)
    }
}

/// LIST fact sheet: header row plus one observation per row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ListTable {
    /// Index of column `name`; exact match first, then case-insensitive.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .or_else(|| self.headers.iter().position(|h| h.eq_ignore_ascii_case(name)))
    }

    pub fn require_column(&self, sheet: &str, name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| IngestError::MissingColumn {
            sheet: sheet.to_string(),
            column: name.to_string(),
        })
    }

    pub fn get(&self, row: usize, col: usize) -> &CellValue {
        const EMPTY: &CellValue = &CellValue::Empty;
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(EMPTY)
    }

    pub fn distinct_values(&self, col: usize) -> BTreeSet<String> {
        (0..self.rows.len())
            .filter_map(|r| self.get(r, col).to_optional_text())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactTable {
    List(ListTable),
    Pivot(PivotTable),
}

impl FactTable {
    /// Number of observations before null filtering.
    pub fn len(&self) -> usize {
        match self {
            Self::List(t) => t.len(),
            Self::Pivot(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
