//! Aspect table: which classification, attribute slot and header position
//! each declared aspect of a file maps to.

use std::fmt;

use crate::error::{IngestError, Result};
use crate::metadata::{AttributeSpec, ClassificationSelector, DataLayout, FileMetadata};
use crate::source::LayoutHint;

/// Where an aspect's values sit in the fact data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Position {
    /// Column of a LIST fact sheet named after the aspect.
    List,
    /// Row header level, outermost first.
    Row(usize),
    /// Column header level, outermost first.
    Col(usize),
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "row"),
            Self::Row(k) => write!(f, "row{k}"),
            Self::Col(k) => write!(f, "col{k}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationRef {
    Existing(i64),
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aspect {
    /// `<k>` of `aspect_<k>`.
    pub number: usize,
    pub name: String,
    pub classification: ClassificationRef,
    pub attribute_slot: u8,
    pub position: Position,
}

impl Aspect {
    pub fn is_custom(&self) -> bool {
        self.classification == ClassificationRef::Custom
    }

    /// Column of the `data` table holding this aspect's item ids.
    pub fn data_column(&self) -> String {
        format!("aspect{}", self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AspectTable {
    aspects: Vec<Aspect>,
}

impl AspectTable {
    pub fn iter(&self) -> impl Iterator<Item = &Aspect> {
        self.aspects.iter()
    }

    pub fn len(&self) -> usize {
        self.aspects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aspects.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Aspect> {
        self.aspects.iter().find(|a| a.name == name)
    }

    pub fn row_levels(&self) -> usize {
        self.aspects
            .iter()
            .filter(|a| matches!(a.position, Position::Row(_)))
            .count()
    }

    pub fn col_levels(&self) -> usize {
        self.aspects
            .iter()
            .filter(|a| matches!(a.position, Position::Col(_)))
            .count()
    }

    pub fn layout_hint(&self, layout: DataLayout) -> LayoutHint {
        match layout {
            DataLayout::List => LayoutHint::List,
            DataLayout::Table => LayoutHint::Pivot {
                row_levels: self.row_levels(),
                col_levels: self.col_levels(),
            },
        }
    }
}

/// Builds the aspect table of a file. Aspects declared `none` are skipped.
pub fn create_aspects_table(meta: &FileMetadata) -> Result<AspectTable> {
    let declared: Vec<&str> = meta.dataset.used_aspects().map(|a| a.name.as_str()).collect();
    for descriptor in meta.row_classifications.iter().chain(&meta.col_classifications) {
        if !declared.contains(&descriptor.aspect.as_str()) {
            return Err(IngestError::malformed(
                "classification descriptors",
                format!("aspect '{}' is not declared in the dataset information", descriptor.aspect),
            ));
        }
    }

    let mut aspects = Vec::new();
    for decl in meta.dataset.used_aspects() {
        let row_pos = meta.row_classifications.iter().position(|d| d.aspect == decl.name);
        let col_pos = meta.col_classifications.iter().position(|d| d.aspect == decl.name);

        let spec = row_pos
            .map(|k| meta.row_classifications[k].attribute)
            .or_else(|| col_pos.map(|k| meta.col_classifications[k].attribute))
            .ok_or_else(|| IngestError::MissingAttributeSlot {
                aspect: decl.name.clone(),
            })?;

        let classification = match decl.classification {
            ClassificationSelector::Existing(id) => ClassificationRef::Existing(id),
            ClassificationSelector::Custom => ClassificationRef::Custom,
            ClassificationSelector::Unused => continue,
        };
        // new classifications keep their items in slot 1
        let attribute_slot = match (classification, spec) {
            (ClassificationRef::Custom, _) | (_, AttributeSpec::Custom) => 1,
            (_, AttributeSpec::Slot(n)) => n,
        };

        let position = match meta.data_type {
            DataLayout::List => Position::List,
            DataLayout::Table => match (row_pos, col_pos) {
                (Some(k), None) => Position::Row(k),
                (None, Some(k)) => Position::Col(k),
                (Some(_), Some(_)) => {
                    return Err(IngestError::PositionNotFound {
                        aspect: decl.name.clone(),
                        detail: "listed as both a row and a column classification".to_string(),
                    })
                }
                (None, None) => {
                    return Err(IngestError::PositionNotFound {
                        aspect: decl.name.clone(),
                        detail: "not listed in the row or column classifications".to_string(),
                    })
                }
            },
        };

        aspects.push(Aspect {
            number: decl.number,
            name: decl.name.clone(),
            classification,
            attribute_slot,
            position,
        });
    }
    Ok(AspectTable { aspects })
}
