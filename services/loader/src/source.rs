//! Candidate-file reader.
//!
//! Candidate files are `.xlsx` workbooks built from a fixed template: a
//! `Cover` sheet with metadata tables at known positions, a `Data` sheet,
//! and for TABLE files optional side sheets shaped like `Data`. All cell
//! positions below are 0-based `(row, col)`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};
use crate::metadata::{DataLayout, FileMetadata, RawMetadata};
use crate::table::{Axis, FactTable, Level, ListTable, PivotTable};
use crate::values::CellValue;

pub const COVER_SHEET: &str = "Cover";
pub const DATA_SHEET: &str = "Data";
pub const UNIT_NOMINATOR_SHEET: &str = "Unit_nominator";
pub const UNIT_DENOMINATOR_SHEET: &str = "Unit_denominator";
pub const STATS_ARRAY_SHEET: &str = "stats_array_string";
pub const COMMENT_SHEET: &str = "Comment";

const CANDIDATE_EXTENSION: &str = ".xlsx";
const HIDDEN_PREFIXES: &[char] = &['.', '~'];

/// `Cover!G10`.
const LAYOUT_CELL: (u32, u32) = (9, 6);
/// `Cover!H7` and `Cover!I7`, TABLE only.
const UNIT_NOMINATOR_CELL: (u32, u32) = (6, 7);
const UNIT_DENOMINATOR_CELL: (u32, u32) = (6, 8);

/// Two-column key/value table on the Cover sheet.
struct KeyValueBlock {
    header_row: u32,
    key_col: u32,
    header: &'static str,
}

const DATASET_INFO: KeyValueBlock = KeyValueBlock {
    header_row: 2,
    key_col: 2,
    header: "Column name",
};
const TABLE_ROW_DESCRIPTORS: KeyValueBlock = KeyValueBlock {
    header_row: 10,
    key_col: 5,
    header: "Row Aspects classification",
};
const TABLE_COL_DESCRIPTORS: KeyValueBlock = KeyValueBlock {
    header_row: 10,
    key_col: 7,
    header: "Col Aspects classification",
};
const TABLE_DATA_INFO: KeyValueBlock = KeyValueBlock {
    header_row: 10,
    key_col: 9,
    header: "DATA",
};
const LIST_DESCRIPTORS: KeyValueBlock = KeyValueBlock {
    header_row: 10,
    key_col: 5,
    header: "Aspects_classifications",
};
const LIST_DATA_INFO: KeyValueBlock = KeyValueBlock {
    header_row: 10,
    key_col: 7,
    header: "DATA",
};

/// How the `Data` sheet is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutHint {
    List,
    Pivot { row_levels: usize, col_levels: usize },
}

/// Access to one candidate file.
pub trait TabularSource {
    fn read_metadata(&mut self) -> Result<FileMetadata>;

    fn read_fact_data(&mut self, hint: LayoutHint) -> Result<FactTable>;

    /// A per-cell side sheet (units, stats arrays, comments) read with the
    /// same header geometry as the `Data` matrix.
    fn read_side_table(&mut self, sheet: &str, row_levels: usize, col_levels: usize) -> Result<PivotTable>;
}

/// `.xlsx` files in `dir`, hidden and lock files excluded, sorted by name.
pub fn list_candidate_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(HIDDEN_PREFIXES) || !name.ends_with(CANDIDATE_EXTENSION) {
            continue;
        }
        files.push(name);
    }
    files.sort();
    debug!(dir = %dir.display(), count = files.len(), "listed candidate files");
    Ok(files)
}

pub struct WorkbookSource {
    path: PathBuf,
    workbook: Sheets<BufReader<File>>,
}

impl WorkbookSource {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let workbook = open_workbook_auto(&path)?;
        Ok(Self { path, workbook })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sheet(&mut self, name: &str) -> Result<Range<Data>> {
        if !self.workbook.sheet_names().iter().any(|s| s == name) {
            return Err(IngestError::MissingSheet(name.to_string()));
        }
        Ok(self.workbook.worksheet_range(name)?)
    }

    /// Cover-sheet tables before validation.
    pub fn read_raw_metadata(&mut self) -> Result<RawMetadata> {
        let cover = self.sheet(COVER_SHEET)?;
        let data_type = cell(&cover, LAYOUT_CELL);
        let layout = data_type.to_catalog_string().unwrap_or_default();

        let mut raw = RawMetadata {
            data_type,
            dataset_info: read_pairs(&cover, &DATASET_INFO),
            ..RawMetadata::default()
        };
        match layout.parse::<DataLayout>() {
            Ok(DataLayout::Table) => {
                raw.row_classifications = read_pairs(&cover, &TABLE_ROW_DESCRIPTORS);
                raw.col_classifications = read_pairs(&cover, &TABLE_COL_DESCRIPTORS);
                raw.data_info = read_pairs(&cover, &TABLE_DATA_INFO);
                raw.unit_nominator = cell(&cover, UNIT_NOMINATOR_CELL);
                raw.unit_denominator = cell(&cover, UNIT_DENOMINATOR_CELL);
            }
            Ok(DataLayout::List) => {
                raw.row_classifications = read_pairs(&cover, &LIST_DESCRIPTORS);
                raw.data_info = read_pairs(&cover, &LIST_DATA_INFO);
            }
            // reported by FileMetadata::parse
            Err(_) => {}
        }
        Ok(raw)
    }
}

impl TabularSource for WorkbookSource {
    fn read_metadata(&mut self) -> Result<FileMetadata> {
        FileMetadata::parse(self.read_raw_metadata()?)
    }

    fn read_fact_data(&mut self, hint: LayoutHint) -> Result<FactTable> {
        let range = self.sheet(DATA_SHEET)?;
        let grid = grid(&range);
        match hint {
            LayoutHint::List => Ok(FactTable::List(list_from_grid(grid))),
            LayoutHint::Pivot { row_levels, col_levels } => Ok(FactTable::Pivot(pivot_from_grid(
                DATA_SHEET, grid, row_levels, col_levels,
            )?)),
        }
    }

    fn read_side_table(&mut self, sheet: &str, row_levels: usize, col_levels: usize) -> Result<PivotTable> {
        let range = self.sheet(sheet)?;
        pivot_from_grid(sheet, grid(&range), row_levels, col_levels)
    }
}

// -----------------------------------------------------------------------------
// Cell access
// -----------------------------------------------------------------------------

fn cell_value(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) if s.trim().is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::Float(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

fn cell(range: &Range<Data>, pos: (u32, u32)) -> CellValue {
    range.get_value(pos).map(cell_value).unwrap_or_default()
}

fn read_pairs(range: &Range<Data>, block: &KeyValueBlock) -> Vec<(String, CellValue)> {
    let header = cell(range, (block.header_row, block.key_col));
    if header.to_catalog_string().as_deref() != Some(block.header) {
        warn!(expected = block.header, found = %header, "unexpected Cover table header");
    }
    let Some((last_row, _)) = range.end() else {
        return Vec::new();
    };
    ((block.header_row + 1)..=last_row)
        .filter_map(|r| {
            let key = cell(range, (r, block.key_col)).to_catalog_string()?;
            if key.is_empty() {
                return None;
            }
            Some((key, cell(range, (r, block.key_col + 1))))
        })
        .collect()
}

/// Dense copy of the sheet anchored at `A1`.
fn grid(range: &Range<Data>) -> Vec<Vec<CellValue>> {
    let Some((last_row, last_col)) = range.end() else {
        return Vec::new();
    };
    (0..=last_row)
        .map(|r| (0..=last_col).map(|c| cell(range, (r, c))).collect())
        .collect()
}

fn is_blank(row: &[CellValue]) -> bool {
    row.iter().all(|c| matches!(c, CellValue::Empty))
}

/// Width of the grid once trailing all-empty columns are dropped.
fn used_width(grid: &[Vec<CellValue>]) -> usize {
    grid.iter()
        .filter_map(|row| row.iter().rposition(|c| !matches!(c, CellValue::Empty)))
        .max()
        .map_or(0, |last| last + 1)
}

/// Merged header cells only carry their value in the first cell.
fn forward_fill(labels: &mut [CellValue]) {
    let mut last = CellValue::Empty;
    for label in labels.iter_mut() {
        if matches!(label, CellValue::Empty) {
            label.clone_from(&last);
        } else {
            last.clone_from(label);
        }
    }
}

fn list_from_grid(grid: Vec<Vec<CellValue>>) -> ListTable {
    let width = used_width(&grid);
    let mut rows = grid.into_iter();
    let headers = rows
        .next()
        .map(|h| {
            h.into_iter()
                .take(width)
                .map(|c| c.to_catalog_string().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();
    let rows = rows
        .map(|mut r| {
            r.truncate(width);
            r
        })
        .filter(|r| !is_blank(r))
        .collect();
    ListTable { headers, rows }
}

fn pivot_from_grid(
    sheet: &str,
    grid: Vec<Vec<CellValue>>,
    row_levels: usize,
    col_levels: usize,
) -> Result<PivotTable> {
    let shape_error = |detail: String| IngestError::ShapeMismatch {
        sheet: sheet.to_string(),
        detail,
    };
    if row_levels == 0 || col_levels == 0 {
        return Err(shape_error(format!(
            "{row_levels} row and {col_levels} column header levels"
        )));
    }
    let width = used_width(&grid);
    if grid.len() < col_levels || width <= row_levels {
        return Err(shape_error(format!(
            "sheet is {}x{width}, too small for {col_levels} header rows and {row_levels} index columns",
            grid.len()
        )));
    }
    let at = |r: usize, c: usize| grid[r].get(c).cloned().unwrap_or_default();

    // An index-names row sits between multi-level headers and the data and
    // has no values in the data columns. With one header row the index names
    // share that row, so a blank first data row is data.
    let names_row = grid.get(col_levels).filter(|row| {
        if col_levels == 1 {
            return false;
        }
        let (index, data) = row.split_at(row_levels.min(row.len()));
        !is_blank(index) && is_blank(&data[..data.len().min(width - row_levels)])
    });
    let data_start = if names_row.is_some() { col_levels + 1 } else { col_levels };
    let row_names: Vec<Option<String>> = (0..row_levels)
        .map(|k| match names_row {
            Some(row) => row.get(k).and_then(CellValue::to_optional_text),
            None if col_levels == 1 => at(0, k).to_optional_text(),
            None => None,
        })
        .collect();

    let mut col_axis = Vec::with_capacity(col_levels);
    for k in 0..col_levels {
        let mut labels: Vec<CellValue> = (row_levels..width).map(|c| at(k, c)).collect();
        if col_levels > 1 {
            forward_fill(&mut labels);
        }
        let name = if col_levels > 1 {
            at(k, row_levels - 1).to_optional_text()
        } else {
            None
        };
        col_axis.push(Level { name, labels });
    }

    let data_rows: Vec<&Vec<CellValue>> = grid[data_start..]
        .iter()
        .filter(|row| !is_blank(&row[..row.len().min(width)]))
        .collect();
    let mut row_axis = Vec::with_capacity(row_levels);
    for (k, name) in row_names.into_iter().enumerate() {
        let mut labels: Vec<CellValue> = data_rows
            .iter()
            .map(|row| row.get(k).cloned().unwrap_or_default())
            .collect();
        if row_levels > 1 {
            forward_fill(&mut labels);
        }
        row_axis.push(Level { name, labels });
    }

    let cells = data_rows
        .iter()
        .map(|row| {
            (row_levels..width)
                .map(|c| row.get(c).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    PivotTable::new(
        sheet,
        Axis::new(sheet, row_axis)?,
        Axis::new(sheet, col_axis)?,
        cells,
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rust_xlsxwriter::{Workbook, Worksheet, XlsxError};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    pub(crate) const TABLE_DATASET: &str = "1_F_steel_SankeyFlows_2008_Global";

    fn cover_common(ws: &mut Worksheet, layout: &str, aspects: &[(&str, &str)]) -> std::result::Result<(), XlsxError> {
        ws.set_name(COVER_SHEET)?;
        ws.write_string(9, 6, layout)?;
        ws.write_string(2, 2, "Column name")?;
        ws.write_string(2, 3, "Dataset entries")?;
        let mut entries: Vec<(&str, &str)> = vec![
            ("dataset_id", "auto"),
            ("dataset_name", TABLE_DATASET),
            ("data_type", "flow"),
            ("license", "CC BY 4.0"),
            ("submitting_user", "jdoe"),
            ("dataset_description", "Steel flows"),
        ];
        entries.extend_from_slice(aspects);
        for (i, (k, v)) in entries.iter().enumerate() {
            let r = 3 + i as u32;
            ws.write_string(r, 2, *k)?;
            ws.write_string(r, 3, *v)?;
        }
        let version_row = 3 + entries.len() as u32;
        ws.write_string(version_row, 2, "dataset_version")?;
        ws.write_number(version_row, 3, 1.0)?;
        Ok(())
    }

    /// TABLE template: custom row aspect `process`, column aspect `time`
    /// bound to classification 1 attribute 1, global unit `Mt`, per-cell
    /// comments.
    pub(crate) fn write_table_template(dir: &Path) -> PathBuf {
        let path = dir.join("table.xlsx");
        let mut workbook = Workbook::new();

        let mut cover = Worksheet::new();
        cover_common(
            &mut cover,
            "TABLE",
            &[
                ("aspect_1", "process"),
                ("aspect_1_classification", "custom"),
                ("aspect_2", "time"),
                ("aspect_2_classification", "1"),
                ("aspect_3", "none"),
                ("aspect_3_classification", "none"),
            ],
        )
        .unwrap();
        cover.write_string(6, 7, "Mt").unwrap();
        cover.write_string(10, 5, "Row Aspects classification").unwrap();
        cover.write_string(10, 6, "Row_Aspects_Attribute_No").unwrap();
        cover.write_string(11, 5, "process").unwrap();
        cover.write_string(11, 6, "custom").unwrap();
        cover.write_string(10, 7, "Col Aspects classification").unwrap();
        cover.write_string(10, 8, "Col_Aspects_Attribute_No").unwrap();
        cover.write_string(11, 7, "time").unwrap();
        cover.write_number(11, 8, 1.0).unwrap();
        cover.write_string(10, 9, "DATA").unwrap();
        cover.write_string(10, 10, "value").unwrap();
        for (i, (k, v)) in [
            ("Unit_nominator", "GLOBAL"),
            ("Unit_denominator", "GLOBAL"),
            ("Stats_array_string", "none"),
            ("Comment", "TABLE"),
        ]
        .iter()
        .enumerate()
        {
            cover.write_string(11 + i as u32, 9, *k).unwrap();
            cover.write_string(11 + i as u32, 10, *v).unwrap();
        }
        workbook.push_worksheet(cover);

        let mut data = Worksheet::new();
        data.set_name(DATA_SHEET).unwrap();
        data.write_string(0, 0, "process").unwrap();
        data.write_number(0, 1, 2010.0).unwrap();
        data.write_number(0, 2, 2011.0).unwrap();
        data.write_string(1, 0, "smelting").unwrap();
        data.write_number(1, 1, 1.5).unwrap();
        data.write_number(1, 2, 2.5).unwrap();
        data.write_string(2, 0, "rolling").unwrap();
        data.write_number(2, 1, 3.0).unwrap();
        workbook.push_worksheet(data);

        let mut comment = Worksheet::new();
        comment.set_name(COMMENT_SHEET).unwrap();
        comment.write_string(0, 0, "process").unwrap();
        comment.write_string(0, 1, "2010").unwrap();
        comment.write_string(0, 2, "2011").unwrap();
        comment.write_string(1, 0, "smelting").unwrap();
        comment.write_string(1, 1, "estimate").unwrap();
        comment.write_string(1, 2, "none").unwrap();
        comment.write_string(2, 0, "rolling").unwrap();
        comment.write_string(2, 1, "measured").unwrap();
        workbook.push_worksheet(comment);

        workbook.save(&path).unwrap();
        path
    }

    /// LIST template: aspect `region` bound to classification 2 attribute 1.
    pub(crate) fn write_list_template(dir: &Path) -> PathBuf {
        let path = dir.join("list.xlsx");
        let mut workbook = Workbook::new();

        let mut cover = Worksheet::new();
        cover_common(
            &mut cover,
            "LIST",
            &[("aspect_1", "region"), ("aspect_1_classification", "2")],
        )
        .unwrap();
        cover.write_string(10, 5, "Aspects_classifications").unwrap();
        cover.write_string(10, 6, "Aspects_Attribute_No").unwrap();
        cover.write_string(11, 5, "region").unwrap();
        cover.write_number(11, 6, 1.0).unwrap();
        cover.write_string(10, 7, "DATA").unwrap();
        cover.write_string(10, 8, "value").unwrap();
        cover.write_string(11, 7, "Insert_Empty_Cells_as_NULL").unwrap();
        cover.write_boolean(11, 8, false).unwrap();
        workbook.push_worksheet(cover);

        let mut data = Worksheet::new();
        data.set_name(DATA_SHEET).unwrap();
        for (c, h) in ["region", "value", "unit_nominator", "unit_denominator", "stats_array_string", "comment"]
            .iter()
            .enumerate()
        {
            data.write_string(0, c as u16, *h).unwrap();
        }
        data.write_string(1, 0, "AT").unwrap();
        data.write_number(1, 1, 10.0).unwrap();
        data.write_string(1, 2, "kg").unwrap();
        data.write_string(1, 4, "3;10;3.0;none;").unwrap();
        data.write_string(2, 0, "DE").unwrap();
        data.write_string(2, 2, "kg").unwrap();
        data.write_string(2, 4, "none").unwrap();
        data.write_string(2, 5, "missing value").unwrap();
        workbook.push_worksheet(data);

        workbook.save(&path).unwrap();
        path
    }

    fn labels(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::from(*v)).collect()
    }

    // -------------------------------------------------------------------------
    // CANDIDATE LISTING
    // -------------------------------------------------------------------------

    #[test]
    fn test_list_candidate_files_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.xlsx", "a.xlsx", "~$a.xlsx", ".hidden.xlsx", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.xlsx")).unwrap();
        let files = list_candidate_files(dir.path()).unwrap();
        assert_eq!(files, vec!["a.xlsx", "b.xlsx"]);
    }

    // -------------------------------------------------------------------------
    // GRID PARSING
    // -------------------------------------------------------------------------

    #[test]
    fn test_pivot_with_index_names_row_and_merged_headers() {
        // two column levels (year, unit) with the year merged across two cells
        let grid = vec![
            vec![CellValue::Empty, "year".into(), CellValue::Int(2010), CellValue::Empty],
            vec![CellValue::Empty, "unit".into(), "t".into(), "kt".into()],
            vec!["region".into(), "process".into(), CellValue::Empty, CellValue::Empty],
            vec!["AT".into(), "smelting".into(), CellValue::Float(1.0), CellValue::Float(2.0)],
            vec![CellValue::Empty, "rolling".into(), CellValue::Float(3.0), CellValue::Empty],
        ];
        let table = pivot_from_grid("Data", grid, 2, 2).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cols.len(), 2);
        assert_eq!(table.rows.levels()[0].name.as_deref(), Some("region"));
        assert_eq!(table.rows.distinct_values(0), BTreeSet::from(["AT".to_string()]));
        assert_eq!(table.cols.distinct_values(0), BTreeSet::from(["2010".to_string()]));
        assert_eq!(table.cell(1, 0), Some(&CellValue::Float(3.0)));
    }

    #[test]
    fn test_pivot_drops_blank_rows_and_columns() {
        let grid = vec![
            vec!["process".into(), "X".into(), CellValue::Empty],
            vec!["A".into(), CellValue::Int(1), CellValue::Empty],
            vec![CellValue::Empty, CellValue::Empty, CellValue::Empty],
        ];
        let table = pivot_from_grid("Data", grid, 1, 1).unwrap();
        assert_eq!(table.rows, Axis::Flat(Level::new(Some("process"), labels(&["A"]))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_single_header_keeps_unmeasured_first_row() {
        let grid = vec![
            vec!["process".into(), "X".into(), "Y".into()],
            vec!["A".into(), CellValue::Empty, CellValue::Empty],
            vec!["B".into(), CellValue::Int(1), CellValue::Int(2)],
        ];
        let table = pivot_from_grid("Data", grid, 1, 1).unwrap();
        assert_eq!(table.rows, Axis::Flat(Level::new(Some("process"), labels(&["A", "B"]))));
        assert_eq!(table.cell(0, 0), Some(&CellValue::Empty));
        assert_eq!(table.cell(1, 1), Some(&CellValue::Int(2)));
    }

    #[test]
    fn test_pivot_too_small_fails() {
        let grid = vec![vec!["only".into()]];
        assert!(matches!(
            pivot_from_grid("Data", grid, 1, 1),
            Err(IngestError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_forward_fill() {
        let mut l = vec![CellValue::Int(1), CellValue::Empty, CellValue::Int(2), CellValue::Empty];
        forward_fill(&mut l);
        assert_eq!(l, vec![CellValue::Int(1), CellValue::Int(1), CellValue::Int(2), CellValue::Int(2)]);
    }

    // -------------------------------------------------------------------------
    // WORKBOOK
    // -------------------------------------------------------------------------

    #[test]
    fn test_read_table_template() {
        let dir = TempDir::new().unwrap();
        let mut source = WorkbookSource::open(write_table_template(dir.path())).unwrap();
        let meta = source.read_metadata().unwrap();
        assert_eq!(meta.data_type, DataLayout::Table);
        assert_eq!(meta.dataset.name, TABLE_DATASET);
        assert_eq!(meta.dataset.version.as_deref(), Some("1"));
        assert_eq!(meta.row_classifications.len(), 1);
        assert_eq!(meta.col_classifications[0].aspect, "time");

        let FactTable::Pivot(data) = source
            .read_fact_data(LayoutHint::Pivot { row_levels: 1, col_levels: 1 })
            .unwrap()
        else {
            panic!("expected a pivot table");
        };
        assert_eq!(data.len(), 4);
        assert_eq!(data.cell(1, 1), Some(&CellValue::Empty));

        let comments = source.read_side_table(COMMENT_SHEET, 1, 1).unwrap();
        assert_eq!(comments.cell(0, 0), Some(&CellValue::from("estimate")));
    }

    #[test]
    fn test_read_list_template() {
        let dir = TempDir::new().unwrap();
        let mut source = WorkbookSource::open(write_list_template(dir.path())).unwrap();
        let meta = source.read_metadata().unwrap();
        assert_eq!(meta.data_type, DataLayout::List);
        assert!(!meta.data_info.insert_empty_cells_as_null);

        let FactTable::List(data) = source.read_fact_data(LayoutHint::List).unwrap() else {
            panic!("expected a list table");
        };
        assert_eq!(data.len(), 2);
        assert_eq!(data.column("stats_array_string"), Some(4));
    }

    #[test]
    fn test_missing_side_sheet() {
        let dir = TempDir::new().unwrap();
        let mut source = WorkbookSource::open(write_table_template(dir.path())).unwrap();
        assert!(matches!(
            source.read_side_table(STATS_ARRAY_SHEET, 1, 1),
            Err(IngestError::MissingSheet(ref s)) if s == STATS_ARRAY_SHEET
        ));
    }
}
