use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use super::{attribute_column, tables, Catalog, Filter, Lookup, Row, Table, ATTRIBUTE_SLOTS};
use crate::error::Result;
use crate::values::SqlValue;

/// Small name → id tables resolved during dataset registration.
const LOOKUP_TABLES: &[&str] = &[
    tables::TYPES,
    tables::LAYERS,
    tables::PROVENANCE,
    tables::SOURCE_TYPE,
    tables::LICENCES,
    tables::USERS,
];

const LOOKUP_NAME_COLUMN: &str = "name";

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationDefinition {
    pub id: i64,
    pub name: String,
    pub dimension: SqlValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationItem {
    pub id: i64,
    pub classification_id: i64,
    /// `attribute1_oto ..= attribute<ATTRIBUTE_SLOTS>_oto`.
    pub attributes: Vec<Option<String>>,
}

impl ClassificationItem {
    pub fn attribute(&self, slot: u8) -> Option<&str> {
        self.attributes
            .get(usize::from(slot).checked_sub(1)?)
            .and_then(|a| a.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitEntry {
    pub id: i64,
    /// `unitcode`, `alt_unitcode`, `alt_unitcode2`, in priority order.
    pub codes: [Option<String>; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct AspectEntry {
    pub id: i64,
    pub aspect: String,
    pub dimension: SqlValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetEntry {
    pub id: i64,
    pub name: String,
    pub version: Option<String>,
    pub fields: Row,
}

/// Read-only view of the catalog taken once per ingested file.
///
/// Writers call the `record_*` methods with what they inserted so later
/// stages see their rows without re-querying.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    definitions: Vec<ClassificationDefinition>,
    items: Vec<ClassificationItem>,
    units: Vec<UnitEntry>,
    aspects: Vec<AspectEntry>,
    lookups: BTreeMap<String, Vec<(i64, String)>>,
    datasets: Vec<DatasetEntry>,
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(SqlValue::as_text)
}

impl CatalogSnapshot {
    /// Fetches everything except classification items, which depend on the
    /// file being ingested (see [`CatalogSnapshot::load_items`]).
    pub async fn load(catalog: &dyn Catalog) -> Result<Self> {
        let mut fetched = BTreeMap::new();
        for table in [
            tables::CLASSIFICATION_DEFINITION,
            tables::UNITS,
            tables::ASPECTS,
            tables::DATASETS,
        ]
        .iter()
        .chain(LOOKUP_TABLES)
        {
            let rows = catalog.fetch_table(table, None, &Filter::All).await?;
            debug!(table, rows = rows.len(), "fetched catalog table");
            fetched.insert(table.to_string(), rows);
        }
        Ok(Self::from_tables(&fetched))
    }

    /// Builds a snapshot from already fetched tables; missing tables are
    /// treated as empty.
    pub fn from_tables(fetched: &BTreeMap<String, Table>) -> Self {
        let empty = Table::new();
        let get = |name: &str| fetched.get(name).unwrap_or(&empty);

        let definitions = get(tables::CLASSIFICATION_DEFINITION)
            .iter()
            .map(|(id, row)| ClassificationDefinition {
                id: *id,
                name: text(row, "classification_name").unwrap_or_default(),
                dimension: row.get("dimension").cloned().unwrap_or_default(),
            })
            .collect();

        let items = get(tables::CLASSIFICATION_ITEMS)
            .iter()
            .filter_map(|(id, row)| item_from_row(*id, row))
            .collect();

        let units = get(tables::UNITS)
            .iter()
            .map(|(id, row)| UnitEntry {
                id: *id,
                codes: [
                    text(row, "unitcode"),
                    text(row, "alt_unitcode"),
                    text(row, "alt_unitcode2"),
                ],
            })
            .collect();

        let aspects = get(tables::ASPECTS)
            .iter()
            .map(|(id, row)| AspectEntry {
                id: *id,
                aspect: text(row, "aspect").unwrap_or_default(),
                dimension: row.get("dimension").cloned().unwrap_or_default(),
            })
            .collect();

        let datasets = get(tables::DATASETS)
            .iter()
            .map(|(id, row)| DatasetEntry {
                id: *id,
                name: text(row, "dataset_name").unwrap_or_default(),
                version: text(row, "dataset_version"),
                fields: row.clone(),
            })
            .collect();

        let lookups = LOOKUP_TABLES
            .iter()
            .map(|table| {
                let entries = get(table)
                    .iter()
                    .filter_map(|(id, row)| text(row, LOOKUP_NAME_COLUMN).map(|n| (*id, n)))
                    .collect();
                (table.to_string(), entries)
            })
            .collect();

        Self {
            definitions,
            items,
            units,
            aspects,
            lookups,
            datasets,
        }
    }

    /// Replaces the cached items of `classification_ids` with the catalog's.
    pub async fn load_items(&mut self, catalog: &dyn Catalog, classification_ids: &[i64]) -> Result<()> {
        if classification_ids.is_empty() {
            return Ok(());
        }
        let filter = Filter::any_of("classification_id", classification_ids.iter().copied());
        let rows = catalog
            .fetch_table(tables::CLASSIFICATION_ITEMS, None, &filter)
            .await?;
        debug!(rows = rows.len(), ?classification_ids, "fetched classification items");
        self.items
            .retain(|item| !classification_ids.contains(&item.classification_id));
        self.items
            .extend(rows.iter().filter_map(|(id, row)| item_from_row(*id, row)));
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Classifications
    // -------------------------------------------------------------------------

    pub fn definition(&self, id: i64) -> Option<&ClassificationDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    pub fn definition_by_name(&self, name: &str) -> Lookup<i64> {
        Lookup::from_matches(
            self.definitions
                .iter()
                .filter(|d| d.name == name)
                .map(|d| d.id)
                .collect(),
        )
    }

    pub fn items_of(&self, classification_id: i64) -> impl Iterator<Item = &ClassificationItem> {
        self.items
            .iter()
            .filter(move |i| i.classification_id == classification_id)
    }

    /// Item ids of one classification keyed by their value in `slot`.
    /// More than one id under a key means the slot is not unique.
    pub fn item_index(&self, classification_id: i64, slot: u8) -> HashMap<String, Vec<i64>> {
        let mut index: HashMap<String, Vec<i64>> = HashMap::new();
        for item in self.items_of(classification_id) {
            if let Some(value) = item.attribute(slot) {
                index.entry(value.to_string()).or_default().push(item.id);
            }
        }
        index
    }

    pub fn record_definition(&mut self, definition: ClassificationDefinition) {
        self.definitions.push(definition);
    }

    pub fn record_items(&mut self, items: impl IntoIterator<Item = ClassificationItem>) {
        self.items.extend(items);
    }

    // -------------------------------------------------------------------------
    // Units, aspects, lookups
    // -------------------------------------------------------------------------

    pub fn units(&self) -> &[UnitEntry] {
        &self.units
    }

    pub fn aspect(&self, name: &str) -> Lookup<&AspectEntry> {
        Lookup::from_matches(self.aspects.iter().filter(|a| a.aspect == name).collect())
    }

    /// Id of `name` in one of the small lookup tables (`types`, `licences`…).
    pub fn lookup_id(&self, table: &str, name: &str) -> Lookup<i64> {
        let matches = self
            .lookups
            .get(table)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, n)| n == name)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default();
        Lookup::from_matches(matches)
    }

    pub fn record_lookup(&mut self, table: &str, id: i64, name: &str) {
        self.lookups
            .entry(table.to_string())
            .or_default()
            .push((id, name.to_string()));
    }

    // -------------------------------------------------------------------------
    // Datasets
    // -------------------------------------------------------------------------

    pub fn dataset(&self, name: &str, version: Option<&str>) -> Lookup<i64> {
        Lookup::from_matches(
            self.datasets
                .iter()
                .filter(|d| d.name == name && d.version.as_deref() == version)
                .map(|d| d.id)
                .collect(),
        )
    }

    pub fn dataset_by_id(&self, id: i64) -> Option<&DatasetEntry> {
        self.datasets.iter().find(|d| d.id == id)
    }

    pub fn record_dataset(&mut self, entry: DatasetEntry) {
        self.forget_dataset(entry.id);
        self.datasets.push(entry);
    }

    pub fn forget_dataset(&mut self, id: i64) {
        self.datasets.retain(|d| d.id != id);
    }
}

fn item_from_row(id: i64, row: &Row) -> Option<ClassificationItem> {
    let classification_id = row.get("classification_id")?.as_i64()?;
    let attributes = (1..=ATTRIBUTE_SLOTS)
        .map(|slot| text(row, &attribute_column(slot)))
        .collect();
    Some(ClassificationItem {
        id,
        classification_id,
        attributes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::row;

    fn snapshot() -> CatalogSnapshot {
        let mut fetched = BTreeMap::new();
        fetched.insert(
            tables::CLASSIFICATION_DEFINITION.to_string(),
            Table::from([
                (1, row([("classification_name", "regions_iso")])),
                (2, row([("classification_name", "years")])),
            ]),
        );
        fetched.insert(
            tables::CLASSIFICATION_ITEMS.to_string(),
            Table::from([
                (10, row([("classification_id", SqlValue::Int(1)), ("attribute1_oto", "AT".into()), ("attribute2_oto", "Austria".into())])),
                (11, row([("classification_id", SqlValue::Int(1)), ("attribute1_oto", "DE".into()), ("attribute2_oto", "Germany".into())])),
                (12, row([("classification_id", SqlValue::Int(1)), ("attribute1_oto", "XX".into()), ("attribute2_oto", "Germany".into())])),
            ]),
        );
        fetched.insert(
            tables::LICENCES.to_string(),
            Table::from([(5, row([("name", "CC BY 4.0")]))]),
        );
        CatalogSnapshot::from_tables(&fetched)
    }

    #[test]
    fn test_definition_lookups() {
        let snap = snapshot();
        assert_eq!(snap.definition_by_name("years"), Lookup::Found(2));
        assert_eq!(snap.definition_by_name("nope"), Lookup::NotFound);
        assert_eq!(snap.definition(1).map(|d| d.name.as_str()), Some("regions_iso"));
    }

    #[test]
    fn test_item_index_exposes_duplicates() {
        let snap = snapshot();
        let by_code = snap.item_index(1, 1);
        assert_eq!(by_code.get("AT"), Some(&vec![10]));
        let by_name = snap.item_index(1, 2);
        assert_eq!(by_name.get("Germany").map(Vec::len), Some(2));
    }

    #[test]
    fn test_lookup_tables() {
        let mut snap = snapshot();
        assert_eq!(snap.lookup_id(tables::LICENCES, "CC BY 4.0"), Lookup::Found(5));
        assert_eq!(snap.lookup_id(tables::USERS, "jdoe"), Lookup::NotFound);
        snap.record_lookup(tables::USERS, 9, "jdoe");
        assert_eq!(snap.lookup_id(tables::USERS, "jdoe"), Lookup::Found(9));
    }
}
