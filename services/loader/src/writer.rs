//! Creation of custom classifications and their items.

use tracing::{info, warn};

use crate::catalog::{
    attribute_column, row, tables, Catalog, CatalogSnapshot, ClassificationDefinition, InsertOutcome, Lookup,
};
use crate::consistency::{
    check_classification_definition, check_item_details, distinct_values, resolve_classification_id, AspectFilter,
    CheckOptions,
};
use crate::error::{IngestError, Result};
use crate::names::ClassificationName;
use crate::table::FactTable;
use crate::values::SqlValue;

/// Slot holding the values of classifications created from a dataset.
pub const CUSTOM_ATTRIBUTE_SLOT: u8 = 1;

fn definition_description(aspect: &str, dataset: &str) -> String {
    format!("Custom classification of aspect '{aspect}' created from dataset '{dataset}'")
}

fn item_description(aspect: &str, value: &str) -> String {
    format!("{aspect}: {value}")
}

/// Inserts a definition for every custom aspect.
///
/// Fails with [`IngestError::ClassificationExists`] when one of them is
/// already defined, unless `skip_existing` is set, in which case those are
/// left alone. Returns the ids of the definitions it created.
pub async fn create_db_class_defs(
    catalog: &dyn Catalog,
    snapshot: &mut CatalogSnapshot,
    names: &[ClassificationName],
    dataset_name: &str,
    skip_existing: bool,
) -> Result<Vec<i64>> {
    let custom: Vec<&ClassificationName> = names.iter().filter(|n| n.is_custom()).collect();
    let flags = check_classification_definition(names, snapshot, CheckOptions::report(AspectFilter::CustomOnly))?;
    let existing: Vec<String> = custom
        .iter()
        .zip(&flags)
        .filter(|(_, exists)| **exists)
        .map(|(n, _)| n.custom_name.clone())
        .collect();
    if !existing.is_empty() && !skip_existing {
        return Err(IngestError::ClassificationExists(existing));
    }

    let mut created = Vec::new();
    for (name, _) in custom.iter().zip(&flags).filter(|(_, exists)| !**exists) {
        let dimension = match snapshot.aspect(&name.aspect.name) {
            Lookup::Found(entry) => entry.dimension.clone(),
            Lookup::NotFound => {
                return Err(IngestError::LookupNotFound {
                    kind: "aspect".to_string(),
                    table: tables::ASPECTS.to_string(),
                    value: name.aspect.name.clone(),
                })
            }
            Lookup::Ambiguous(entries) => {
                return Err(IngestError::AmbiguousMatch {
                    what: "aspect".to_string(),
                    value: name.aspect.name.clone(),
                    ids: entries.iter().map(|e| e.id).collect(),
                })
            }
        };

        let key = row([("classification_name", name.custom_name.as_str())]);
        let mut fields = key.clone();
        fields.insert("dimension".into(), dimension.clone());
        fields.insert(
            "description".into(),
            definition_description(&name.aspect.name, dataset_name).into(),
        );
        fields.insert("mutually_exclusive".into(), true.into());
        fields.insert("collectively_exhaustive".into(), false.into());
        fields.insert("created_from_dataset".into(), true.into());
        fields.insert("general".into(), false.into());

        match catalog
            .insert_row_if_absent(tables::CLASSIFICATION_DEFINITION, &key, &fields)
            .await?
        {
            InsertOutcome::Inserted(id) => {
                info!(id, classification = %name.custom_name, "created classification definition");
                snapshot.record_definition(ClassificationDefinition {
                    id,
                    name: name.custom_name.clone(),
                    dimension,
                });
                created.push(id);
            }
            InsertOutcome::AlreadyPresent(id) if skip_existing => {
                warn!(id, classification = %name.custom_name, "classification appeared concurrently, skipped");
            }
            InsertOutcome::AlreadyPresent(_) => {
                return Err(IngestError::ClassificationExists(vec![name.custom_name.clone()]));
            }
        }
    }
    Ok(created)
}

/// Inserts one item per distinct fact value for every custom aspect.
///
/// Refuses with [`IngestError::ItemsExist`] if any of those values is
/// already an item of its classification. Returns the number of items
/// inserted; the snapshot is refreshed with their ids.
pub async fn create_db_class_items(
    catalog: &dyn Catalog,
    snapshot: &mut CatalogSnapshot,
    names: &[ClassificationName],
    data: &FactTable,
    dataset_name: &str,
) -> Result<u64> {
    let checks = check_item_details(names, data, snapshot, CheckOptions::report(AspectFilter::CustomOnly))?;
    if let Some(check) = checks.iter().find(|c| c.present().next().is_some()) {
        return Err(IngestError::ItemsExist {
            classification: check.custom_name.clone(),
            values: check.present().map(str::to_string).collect(),
        });
    }

    let columns = vec![
        "classification_id".to_string(),
        "description".to_string(),
        "reference".to_string(),
        attribute_column(CUSTOM_ATTRIBUTE_SLOT),
    ];
    let mut inserted = 0;
    let mut refreshed = Vec::new();
    for name in names.iter().filter(|n| n.is_custom()) {
        let classification_id = resolve_classification_id(snapshot, name)?;
        let values = distinct_values(&name.aspect, data)?;
        let rows: Vec<Vec<SqlValue>> = values
            .iter()
            .map(|v| {
                vec![
                    classification_id.into(),
                    item_description(&name.aspect.name, v).into(),
                    dataset_name.into(),
                    v.as_str().into(),
                ]
            })
            .collect();
        let n = catalog
            .bulk_insert(tables::CLASSIFICATION_ITEMS, &columns, &rows)
            .await?;
        info!(classification = %name.custom_name, items = n, "created classification items");
        inserted += n;
        refreshed.push(classification_id);
    }
    snapshot.load_items(catalog, &refreshed).await?;
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::catalog::Filter;
    use crate::consistency::tests::names;
    use crate::table::tests::two_by_two;

    async fn catalog() -> (MemoryCatalog, CatalogSnapshot) {
        let catalog = MemoryCatalog::new();
        catalog.seed_with_id(tables::CLASSIFICATION_DEFINITION, 1, row([("classification_name", "letters")]));
        catalog.seed(
            tables::CLASSIFICATION_ITEMS,
            [
                row([("classification_id", SqlValue::Int(1)), ("attribute1_oto", "A".into())]),
                row([("classification_id", SqlValue::Int(1)), ("attribute1_oto", "B".into())]),
            ],
        );
        catalog.seed(
            tables::ASPECTS,
            [row([("aspect", SqlValue::from("axis")), ("dimension", SqlValue::Int(7))])],
        );
        let mut snapshot = CatalogSnapshot::load(&catalog).await.unwrap();
        snapshot.load_items(&catalog, &[1]).await.unwrap();
        (catalog, snapshot)
    }

    #[tokio::test]
    async fn test_create_definition_with_fixed_flags() {
        let (catalog, mut snapshot) = catalog().await;
        let ids = create_db_class_defs(&catalog, &mut snapshot, &names(), "demo", false)
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        let row = &catalog.table(tables::CLASSIFICATION_DEFINITION)[&ids[0]];
        assert_eq!(row["classification_name"], SqlValue::from("axis__demo"));
        assert_eq!(row["dimension"], SqlValue::Int(7));
        assert_eq!(row["mutually_exclusive"], SqlValue::Bool(true));
        assert_eq!(row["collectively_exhaustive"], SqlValue::Bool(false));
        assert_eq!(row["created_from_dataset"], SqlValue::Bool(true));
        assert_eq!(row["general"], SqlValue::Bool(false));
        assert_eq!(snapshot.definition_by_name("axis__demo"), Lookup::Found(ids[0]));
    }

    #[tokio::test]
    async fn test_second_run_fails_on_duplicate_name() {
        let (catalog, mut snapshot) = catalog().await;
        create_db_class_defs(&catalog, &mut snapshot, &names(), "demo", false)
            .await
            .unwrap();

        let mut fresh = CatalogSnapshot::load(&catalog).await.unwrap();
        let err = create_db_class_defs(&catalog, &mut fresh, &names(), "demo", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ClassificationExists(ref n) if n == &vec!["axis__demo".to_string()]));
        assert_eq!(catalog.table(tables::CLASSIFICATION_DEFINITION).len(), 2);

        let skipped = create_db_class_defs(&catalog, &mut fresh, &names(), "demo", true)
            .await
            .unwrap();
        assert!(skipped.is_empty());
    }

    #[tokio::test]
    async fn test_missing_aspect_dimension() {
        let (catalog, _) = catalog().await;
        catalog.delete_rows(tables::ASPECTS, &Filter::All).await.unwrap();
        let mut snapshot = CatalogSnapshot::load(&catalog).await.unwrap();
        let err = create_db_class_defs(&catalog, &mut snapshot, &names(), "demo", false)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::LookupNotFound { ref value, .. } if value == "axis"));
    }

    #[tokio::test]
    async fn test_items_created_from_observed_values() {
        let (catalog, mut snapshot) = catalog().await;
        let data = FactTable::Pivot(two_by_two());
        let ids = create_db_class_defs(&catalog, &mut snapshot, &names(), "demo", false)
            .await
            .unwrap();
        let n = create_db_class_items(&catalog, &mut snapshot, &names(), &data, "demo")
            .await
            .unwrap();
        assert_eq!(n, 2);

        let index = snapshot.item_index(ids[0], CUSTOM_ATTRIBUTE_SLOT);
        assert_eq!(index.len(), 2);
        assert!(index.contains_key("X") && index.contains_key("Y"));

        let items = catalog
            .fetch_table(tables::CLASSIFICATION_ITEMS, None, &Filter::eq("classification_id", ids[0]))
            .await
            .unwrap();
        assert!(items.values().all(|r| r["reference"] == SqlValue::from("demo")));

        let err = create_db_class_items(&catalog, &mut snapshot, &names(), &data, "demo")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ItemsExist { ref values, .. } if values.len() == 2));
    }
}
