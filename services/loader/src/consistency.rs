//! Catalog consistency checks.
//!
//! Both checks return one existence flag per checked entry instead of
//! failing on the first gap, so callers can either assert (`crash`) or use
//! the flags to decide what to create.

use std::collections::BTreeSet;

use tracing::warn;

use crate::aspects::{Aspect, Position};
use crate::catalog::{CatalogSnapshot, Lookup};
use crate::error::{IngestError, Result};
use crate::names::ClassificationName;
use crate::source::DATA_SHEET;
use crate::table::FactTable;

/// Which aspects a check looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectFilter {
    #[default]
    All,
    CustomOnly,
    NonCustomOnly,
}

impl AspectFilter {
    pub fn accepts(self, name: &ClassificationName) -> bool {
        match self {
            Self::All => true,
            Self::CustomOnly => name.is_custom(),
            Self::NonCustomOnly => !name.is_custom(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOptions {
    /// Fail when anything is missing.
    pub crash: bool,
    /// Log every missing entry.
    pub warn: bool,
    pub filter: AspectFilter,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            crash: true,
            warn: true,
            filter: AspectFilter::All,
        }
    }
}

impl CheckOptions {
    pub fn report(filter: AspectFilter) -> Self {
        Self {
            crash: false,
            warn: false,
            filter,
        }
    }
}

/// Classification id registered under `custom_name`. Missing or duplicate
/// definitions are catalog errors.
pub fn resolve_classification_id(snapshot: &CatalogSnapshot, name: &ClassificationName) -> Result<i64> {
    snapshot
        .definition_by_name(&name.custom_name)
        .require("classification", &name.custom_name, || {
            IngestError::ClassificationNotFound(name.custom_name.clone())
        })
}

/// Whether each selected aspect's classification name is already defined.
pub fn check_classification_definition(
    names: &[ClassificationName],
    snapshot: &CatalogSnapshot,
    opts: CheckOptions,
) -> Result<Vec<bool>> {
    let mut flags = Vec::new();
    let mut missing = Vec::new();
    for name in names.iter().filter(|n| opts.filter.accepts(n)) {
        let exists = match snapshot.definition_by_name(&name.custom_name) {
            Lookup::Found(_) => true,
            Lookup::NotFound => false,
            Lookup::Ambiguous(ids) => {
                return Err(IngestError::AmbiguousMatch {
                    what: "classification".to_string(),
                    value: name.custom_name.clone(),
                    ids,
                })
            }
        };
        if !exists {
            if opts.warn {
                warn!(aspect = %name.aspect.name, classification = %name.custom_name, "classification not in catalog");
            }
            missing.push(name.custom_name.clone());
        }
        flags.push(exists);
    }
    if opts.crash && !missing.is_empty() {
        return Err(IngestError::ClassificationNotFound(missing.join(", ")));
    }
    Ok(flags)
}

/// Distinct string values an aspect takes in the fact data. Pivot axes are
/// read per header level; a flat axis yields its whole index.
pub fn distinct_values(aspect: &Aspect, data: &FactTable) -> Result<BTreeSet<String>> {
    match (data, aspect.position) {
        (FactTable::List(table), _) => {
            let col = table.require_column(DATA_SHEET, &aspect.name)?;
            Ok(table.distinct_values(col))
        }
        (FactTable::Pivot(table), Position::Row(k)) => Ok(table.rows.distinct_values(k)),
        (FactTable::Pivot(table), Position::Col(k)) => Ok(table.cols.distinct_values(k)),
        (FactTable::Pivot(_), Position::List) => Err(IngestError::PositionNotFound {
            aspect: aspect.name.clone(),
            detail: "LIST position on a TABLE data sheet".to_string(),
        }),
    }
}

/// Per-aspect result of [`check_classification_items`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemCheck {
    pub custom_name: String,
    pub classification_id: i64,
    /// `(value, exists)`, sorted by value.
    pub values: Vec<(String, bool)>,
}

impl ItemCheck {
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter(|(_, e)| !e).map(|(v, _)| v.as_str())
    }

    pub fn present(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter(|(_, e)| *e).map(|(v, _)| v.as_str())
    }
}

/// Existence of every distinct fact value among the items of its aspect's
/// classification, per aspect. The snapshot must hold the items of every
/// checked classification.
pub fn check_item_details(
    names: &[ClassificationName],
    data: &FactTable,
    snapshot: &CatalogSnapshot,
    opts: CheckOptions,
) -> Result<Vec<ItemCheck>> {
    let mut checks = Vec::new();
    for name in names.iter().filter(|n| opts.filter.accepts(n)) {
        let classification_id = resolve_classification_id(snapshot, name)?;
        let index = snapshot.item_index(classification_id, name.aspect.attribute_slot);
        let values: Vec<(String, bool)> = distinct_values(&name.aspect, data)?
            .into_iter()
            .map(|v| {
                let exists = index.contains_key(&v);
                (v, exists)
            })
            .collect();
        let check = ItemCheck {
            custom_name: name.custom_name.clone(),
            classification_id,
            values,
        };
        if opts.warn {
            for value in check.missing() {
                warn!(
                    aspect = %name.aspect.name,
                    classification = %name.custom_name,
                    slot = name.aspect.attribute_slot,
                    value,
                    "value not among classification items"
                );
            }
        }
        checks.push(check);
    }

    if opts.crash {
        let failing = names
            .iter()
            .filter(|n| opts.filter.accepts(n))
            .zip(&checks)
            .find(|(_, c)| c.missing().next().is_some());
        if let Some((name, check)) = failing {
            return Err(IngestError::ItemsMissing {
                aspect: name.aspect.name.clone(),
                classification: name.custom_name.clone(),
                slot: name.aspect.attribute_slot,
                values: check.missing().map(str::to_string).collect(),
            });
        }
    }
    Ok(checks)
}

/// Flat form of [`check_item_details`]: one flag per distinct value, in
/// aspect order.
pub fn check_classification_items(
    names: &[ClassificationName],
    data: &FactTable,
    snapshot: &CatalogSnapshot,
    opts: CheckOptions,
) -> Result<Vec<bool>> {
    Ok(check_item_details(names, data, snapshot, opts)?
        .iter()
        .flat_map(|c| c.values.iter().map(|(_, e)| *e))
        .collect())
}
