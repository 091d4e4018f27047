//! Candidate-file metadata.
//!
//! The Cover sheet of a template is a set of loosely typed key/value tables.
//! [`RawMetadata`] is what the spreadsheet reader hands over; [`FileMetadata`]
//! is the validated, typed form every later stage works with. All template
//! mistakes that can be detected without the catalog are reported here.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::catalog::{is_identifier, ATTRIBUTE_SLOTS};
use crate::error::{IngestError, Result};
use crate::values::{is_null_sentinel, CellValue};

/// `dataset_id` value a template must carry; ids are assigned on insert.
pub const AUTO_DATASET_ID: &str = "auto";

/// Layout marker from `Cover!G10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLayout {
    List,
    Table,
}

impl FromStr for DataLayout {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "LIST" => Ok(Self::List),
            "TABLE" => Ok(Self::Table),
            other => Err(IngestError::UnknownLayout(other.to_string())),
        }
    }
}

impl fmt::Display for DataLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "LIST"),
            Self::Table => write!(f, "TABLE"),
        }
    }
}

/// Value of an `aspect_<k>_classification` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationSelector {
    Existing(i64),
    Custom,
    /// `none`: the aspect slot is not used by this dataset.
    Unused,
}

/// Attribute number column of a classification descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeSpec {
    Slot(u8),
    /// Brand-new classification, stored in attribute slot 1.
    Custom,
}

impl AttributeSpec {
    pub fn slot(self) -> u8 {
        match self {
            Self::Slot(n) => n,
            Self::Custom => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationDescriptor {
    pub aspect: String,
    pub attribute: AttributeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AspectDeclaration {
    /// The `<k>` of `aspect_<k>`; also names the `aspect<k>` data column.
    pub number: usize,
    pub name: String,
    pub classification: ClassificationSelector,
}

/// Whether a unit, stats array or comment applies to the whole dataset or
/// comes from a side sheet shaped like the data matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global(Option<String>),
    Table,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInfo {
    pub unit_nominator: Scope,
    pub unit_denominator: Scope,
    pub stats_array: Scope,
    pub comment: Scope,
    pub insert_empty_cells_as_null: bool,
}

impl Default for DataInfo {
    fn default() -> Self {
        Self {
            unit_nominator: Scope::Global(None),
            unit_denominator: Scope::Global(None),
            stats_array: Scope::Global(None),
            comment: Scope::Global(None),
            insert_empty_cells_as_null: true,
        }
    }
}

/// Dataset information table (`Cover!C:D`).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetInfo {
    pub dataset_id: String,
    pub name: String,
    pub version: Option<String>,
    pub data_type: Option<String>,
    pub data_layer: Option<String>,
    pub data_provenance: Option<String>,
    pub source_type: Option<String>,
    pub license: Option<String>,
    pub submitting_user: Option<String>,
    /// Declared aspects ordered by number, including unused ones.
    pub aspects: Vec<AspectDeclaration>,
    /// Remaining columns, copied verbatim into the datasets row.
    pub descriptive: BTreeMap<String, Option<String>>,
}

impl DatasetInfo {
    pub fn used_aspects(&self) -> impl Iterator<Item = &AspectDeclaration> {
        self.aspects
            .iter()
            .filter(|a| a.classification != ClassificationSelector::Unused)
    }
}

/// Cover-sheet tables as read from the workbook, before validation.
#[derive(Debug, Clone, Default)]
pub struct RawMetadata {
    pub data_type: CellValue,
    pub dataset_info: Vec<(String, CellValue)>,
    pub row_classifications: Vec<(String, CellValue)>,
    pub col_classifications: Vec<(String, CellValue)>,
    pub data_info: Vec<(String, CellValue)>,
    pub unit_nominator: CellValue,
    pub unit_denominator: CellValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub data_type: DataLayout,
    pub dataset: DatasetInfo,
    pub row_classifications: Vec<ClassificationDescriptor>,
    /// Empty for LIST files.
    pub col_classifications: Vec<ClassificationDescriptor>,
    pub data_info: DataInfo,
}

impl FileMetadata {
    pub fn parse(raw: RawMetadata) -> Result<Self> {
        let layout_text = raw.data_type.to_catalog_string().unwrap_or_default();
        let data_type: DataLayout = layout_text.parse()?;

        let dataset = parse_dataset_info(&raw.dataset_info)?;
        let row_classifications = parse_descriptors("row classifications", &raw.row_classifications)?;
        let col_classifications = match data_type {
            DataLayout::Table => parse_descriptors("col classifications", &raw.col_classifications)?,
            DataLayout::List => Vec::new(),
        };
        let data_info = parse_data_info(data_type, &raw)?;

        Ok(Self {
            data_type,
            dataset,
            row_classifications,
            col_classifications,
            data_info,
        })
    }

    pub fn dataset_name(&self) -> &str {
        &self.dataset.name
    }
}

fn text_of(value: &CellValue) -> Option<String> {
    value.to_optional_text()
}

fn parse_dataset_info(entries: &[(String, CellValue)]) -> Result<DatasetInfo> {
    let mut info = DatasetInfo::default();
    let mut aspect_names: BTreeMap<usize, Option<String>> = BTreeMap::new();
    let mut aspect_classes: BTreeMap<usize, ClassificationSelector> = BTreeMap::new();

    for (key, value) in entries {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        match key {
            "dataset_id" => {
                info.dataset_id = value.to_catalog_string().unwrap_or_default();
            }
            "dataset_name" => {
                info.name = text_of(value)
                    .ok_or_else(|| IngestError::malformed(key, "dataset name is empty"))?;
            }
            "dataset_version" => info.version = text_of(value),
            "data_type" => info.data_type = text_of(value),
            "data_layer" => info.data_layer = text_of(value),
            "data_provenance" => info.data_provenance = text_of(value),
            "dataset_source_type" => info.source_type = text_of(value),
            "license" => info.license = text_of(value),
            "submitting_user" => info.submitting_user = text_of(value),
            _ => {
                if let Some(number) = aspect_number(key, "") {
                    aspect_names.insert(number, text_of(value));
                } else if let Some(number) = aspect_number(key, "_classification") {
                    aspect_classes.insert(number, parse_selector(key, value)?);
                } else {
                    if !is_identifier(key) {
                        return Err(IngestError::malformed(key, "not a valid column name"));
                    }
                    info.descriptive.insert(key.to_string(), text_of(value));
                }
            }
        }
    }

    if info.name.is_empty() {
        return Err(IngestError::malformed("dataset_name", "missing"));
    }

    for (number, name) in aspect_names {
        let classification = aspect_classes
            .remove(&number)
            .unwrap_or(ClassificationSelector::Unused);
        match (name, classification) {
            (None, ClassificationSelector::Unused) => {}
            (None, _) => {
                return Err(IngestError::malformed(
                    format!("aspect_{number}"),
                    "classification given for an aspect without a name",
                ))
            }
            (Some(name), classification) => info.aspects.push(AspectDeclaration {
                number,
                name,
                classification,
            }),
        }
    }
    if let Some((number, _)) = aspect_classes
        .iter()
        .find(|(_, c)| **c != ClassificationSelector::Unused)
    {
        return Err(IngestError::malformed(
            format!("aspect_{number}_classification"),
            "classification given but aspect_{k} is missing",
        ));
    }

    Ok(info)
}

/// `aspect_<k><suffix>` → `k`.
fn aspect_number(key: &str, suffix: &str) -> Option<usize> {
    key.strip_prefix("aspect_")?
        .strip_suffix(suffix)?
        .parse()
        .ok()
}

fn parse_selector(key: &str, value: &CellValue) -> Result<ClassificationSelector> {
    if value.is_null() {
        return Ok(ClassificationSelector::Unused);
    }
    let text = value.to_catalog_string().unwrap_or_default();
    if text.eq_ignore_ascii_case("custom") {
        return Ok(ClassificationSelector::Custom);
    }
    text.parse::<i64>()
        .map(ClassificationSelector::Existing)
        .map_err(|_| IngestError::malformed(key, format!("expected a classification id, 'custom' or 'none', got '{text}'")))
}

fn parse_descriptors(table: &str, entries: &[(String, CellValue)]) -> Result<Vec<ClassificationDescriptor>> {
    let mut out: Vec<ClassificationDescriptor> = Vec::new();
    for (aspect, value) in entries {
        let aspect = aspect.trim();
        if aspect.is_empty() || value.is_null() {
            continue;
        }
        if out.iter().any(|d| d.aspect == aspect) {
            return Err(IngestError::malformed(table, format!("aspect '{aspect}' listed twice")));
        }
        let text = value.to_catalog_string().unwrap_or_default();
        let attribute = if text.eq_ignore_ascii_case("custom") {
            AttributeSpec::Custom
        } else {
            match text.parse::<u8>() {
                Ok(n) if (1..=ATTRIBUTE_SLOTS).contains(&n) => AttributeSpec::Slot(n),
                _ => {
                    return Err(IngestError::malformed(
                        table,
                        format!("attribute number of '{aspect}' must be 1..={ATTRIBUTE_SLOTS} or 'custom', got '{text}'"),
                    ))
                }
            }
        };
        out.push(ClassificationDescriptor {
            aspect: aspect.to_string(),
            attribute,
        });
    }
    Ok(out)
}

fn parse_data_info(layout: DataLayout, raw: &RawMetadata) -> Result<DataInfo> {
    let lookup = |name: &str| {
        raw.data_info
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    };

    let mut info = DataInfo::default();
    if layout == DataLayout::Table {
        info.unit_nominator = parse_unit_scope("Unit_nominator", lookup("Unit_nominator"), &raw.unit_nominator)?;
        info.unit_denominator =
            parse_unit_scope("Unit_denominator", lookup("Unit_denominator"), &raw.unit_denominator)?;
        info.stats_array = parse_value_scope(lookup("Stats_array_string"));
        info.comment = parse_value_scope(lookup("Comment"));
    }
    if let Some(flag) = lookup("Insert_Empty_Cells_as_NULL") {
        info.insert_empty_cells_as_null = parse_flag("Insert_Empty_Cells_as_NULL", flag)?;
    }
    Ok(info)
}

fn parse_unit_scope(field: &str, directive: Option<&CellValue>, global: &CellValue) -> Result<Scope> {
    let directive = directive.and_then(CellValue::to_optional_text);
    match directive.as_deref().map(str::to_uppercase).as_deref() {
        None | Some("GLOBAL") => Ok(Scope::Global(global.to_optional_text())),
        Some("TABLE") => Ok(Scope::Table),
        Some(other) => Err(IngestError::malformed(
            field,
            format!("expected 'GLOBAL' or 'TABLE', got '{other}'"),
        )),
    }
}

fn parse_value_scope(directive: Option<&CellValue>) -> Scope {
    match directive.and_then(CellValue::to_optional_text) {
        Some(s) if s.eq_ignore_ascii_case("TABLE") => Scope::Table,
        other => Scope::Global(other),
    }
}

fn parse_flag(field: &str, value: &CellValue) -> Result<bool> {
    match value {
        CellValue::Bool(b) => Ok(*b),
        CellValue::Int(i) => Ok(*i != 0),
        CellValue::Float(f) => Ok(*f != 0.0),
        CellValue::Empty => Ok(true),
        CellValue::Text(s) if is_null_sentinel(s) => Ok(true),
        CellValue::Text(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Ok(true),
            "false" | "no" => Ok(false),
            _ => Err(IngestError::malformed(field, format!("expected True or False, got '{s}'"))),
        },
    }
}
