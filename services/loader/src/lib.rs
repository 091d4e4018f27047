//! Ingestion of IEDC candidate spreadsheets into the dataset catalog.
//!
//! A candidate file declares its aspects (classification dimensions) on the
//! Cover sheet and carries its observations either as a flat LIST or as a
//! pivoted TABLE. Ingestion maps every aspect onto a catalog
//! classification, creates custom classifications on demand, registers the
//! dataset and loads the facts with all labels replaced by catalog ids.
//!
//! The stages, leaf first:
//! - [`aspects`]: aspect table from the file metadata
//! - [`names`]: catalog names of the aspects' classifications
//! - [`consistency`]: definition and item existence checks
//! - [`writer`]: custom classification definitions and items
//! - [`registrar`]: the `datasets` row, users and licences
//! - [`facts`]: normalization and upload of the fact rows
//!
//! [`pipeline::ingest_file`] runs them in order for one file.

pub mod aspects;
pub mod catalog;
pub mod config;
pub mod consistency;
pub mod error;
pub mod facts;
pub mod metadata;
pub mod names;
pub mod pipeline;
pub mod registrar;
pub mod source;
pub mod table;
pub mod values;
pub mod writer;

pub use error::{IngestError, Result};
