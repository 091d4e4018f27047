//! Catalog names of the classifications behind each aspect.

use crate::aspects::{Aspect, AspectTable, ClassificationRef};
use crate::catalog::CatalogSnapshot;
use crate::error::{IngestError, Result};

/// Separator between aspect and dataset in a custom classification name.
pub const CUSTOM_NAME_SEPARATOR: &str = "__";

/// An aspect with the catalog-wide name of its classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationName {
    pub aspect: Aspect,
    pub custom_name: String,
}

impl ClassificationName {
    pub fn is_custom(&self) -> bool {
        self.aspect.is_custom()
    }
}

pub fn custom_classification_name(aspect: &str, dataset: &str) -> String {
    format!("{aspect}{CUSTOM_NAME_SEPARATOR}{dataset}")
}

/// Existing classifications keep their catalog name; custom ones are named
/// `<aspect>__<dataset>`.
pub fn get_class_names(aspects: &AspectTable, dataset_name: &str, snapshot: &CatalogSnapshot) -> Result<Vec<ClassificationName>> {
    aspects
        .iter()
        .map(|aspect| {
            let custom_name = match aspect.classification {
                ClassificationRef::Existing(id) => snapshot
                    .definition(id)
                    .map(|d| d.name.clone())
                    .ok_or_else(|| IngestError::ClassificationNotFound(format!("id {id} (aspect '{}')", aspect.name)))?,
                ClassificationRef::Custom => custom_classification_name(&aspect.name, dataset_name),
            };
            Ok(ClassificationName {
                aspect: aspect.clone(),
                custom_name,
            })
        })
        .collect()
}
