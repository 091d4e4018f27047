//! Error taxonomy for candidate-file ingestion.
//!
//! Every variant carries the key values involved (aspect name, classification,
//! unit code, dataset) so an operator can fix the template or the catalog
//! without re-running with extra logging.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    // -------------------------------------------------------------------------
    // Malformed input
    // -------------------------------------------------------------------------
    #[error("Unknown data type or malformed Excel file. Cell Cover!G10 should be 'LIST' or 'TABLE', but is '{0}'")]
    UnknownLayout(String),

    #[error("Malformed metadata field '{field}': {detail}")]
    MalformedMetadata { field: String, detail: String },

    #[error("No attribute number found for aspect '{aspect}' in the classification descriptor tables")]
    MissingAttributeSlot { aspect: String },

    #[error("Could not determine the table position of aspect '{aspect}': {detail}")]
    PositionNotFound { aspect: String, detail: String },

    #[error("Invalid stats array string '{0}': expected 4 ';'-separated fields or 'none'")]
    InvalidStatsArray(String),

    #[error("Invalid {column} value '{value}' at {location}")]
    InvalidValue {
        column: String,
        value: String,
        location: String,
    },

    #[error("Sheet '{0}' not found in workbook")]
    MissingSheet(String),

    #[error("Column '{column}' not found in sheet '{sheet}'")]
    MissingColumn { sheet: String, column: String },

    #[error("Sheet '{sheet}' does not match the data matrix: {detail}")]
    ShapeMismatch { sheet: String, detail: String },

    // -------------------------------------------------------------------------
    // Catalog integrity
    // -------------------------------------------------------------------------
    #[error("Classification '{0}' not found in classification_definition")]
    ClassificationNotFound(String),

    #[error("Ambiguous match for {what} '{value}': catalog ids {ids:?}")]
    AmbiguousMatch {
        what: String,
        value: String,
        ids: Vec<i64>,
    },

    #[error("Join on '{stage}' changed the row count from {expected} to {actual}")]
    RowCountChanged {
        stage: String,
        expected: usize,
        actual: usize,
    },

    // -------------------------------------------------------------------------
    // Pre-existing state
    // -------------------------------------------------------------------------
    #[error("Classification(s) already in classification_definition: {0:?}")]
    ClassificationExists(Vec<String>),

    #[error("Classification '{classification}' already holds items {values:?}")]
    ItemsExist {
        classification: String,
        values: Vec<String>,
    },

    #[error("Dataset already in DB: '{name}' version {version:?} (id {id})")]
    DatasetExists {
        name: String,
        version: Option<String>,
        id: i64,
    },

    #[error("Dataset '{name}' version {version:?} not found in datasets")]
    DatasetMissing {
        name: String,
        version: Option<String>,
    },

    #[error("Dataset id {dataset_id} already has {rows} row(s) in the data table")]
    FactsAlreadyPresent { dataset_id: i64, rows: usize },

    #[error("dataset_id must be 'auto' in the template, found '{0}'")]
    ExplicitDatasetId(String),

    #[error("Dataset id {dataset_id} has facts; aspect column '{column}' cannot change from {old:?} to {new:?}")]
    DatasetAspectsChanged {
        dataset_id: i64,
        column: String,
        old: Option<String>,
        new: Option<String>,
    },

    // -------------------------------------------------------------------------
    // Values not in catalog
    // -------------------------------------------------------------------------
    #[error("Values of aspect '{aspect}' missing from classification '{classification}' (attribute{slot}_oto): {values:?}")]
    ItemsMissing {
        aspect: String,
        classification: String,
        slot: u8,
        values: Vec<String>,
    },

    #[error("Unit code '{0}' not found in units (unitcode, alt_unitcode, alt_unitcode2)")]
    UnitNotFound(String),

    #[error("{kind} '{value}' not found in table '{table}'")]
    LookupNotFound {
        kind: String,
        table: String,
        value: String,
    },

    // -------------------------------------------------------------------------
    // Infrastructure
    // -------------------------------------------------------------------------
    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Spreadsheet(#[from] calamine::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl IngestError {
    /// True for conditions that point at a broken catalog rather than a bad
    /// candidate file.
    pub fn is_fatal_catalog_bug(&self) -> bool {
        matches!(
            self,
            Self::ClassificationNotFound(_) | Self::AmbiguousMatch { .. } | Self::RowCountChanged { .. }
        )
    }

    pub(crate) fn malformed(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedMetadata {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
