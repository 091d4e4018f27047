//! Dataset registration: the `datasets` row of a candidate file and the
//! users and licences it references.

use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{row, tables, Catalog, CatalogSnapshot, DatasetEntry, Filter, InsertOutcome, Lookup, Row};
use crate::consistency::resolve_classification_id;
use crate::error::{IngestError, Result};
use crate::facts::count_facts;
use crate::metadata::{FileMetadata, AUTO_DATASET_ID};
use crate::names::ClassificationName;
use crate::values::{is_null_sentinel, SqlValue};

/// What to do about the `datasets` row of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetPolicy {
    /// Create the entry when it is absent.
    pub create: bool,
    /// Fail when the entry is present. Checked before `update` and `replace`.
    pub crash_on_exist: bool,
    pub update: bool,
    pub replace: bool,
}

impl Default for DatasetPolicy {
    fn default() -> Self {
        Self {
            create: true,
            crash_on_exist: true,
            update: false,
            replace: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DatasetStatus {
    Created { id: i64 },
    Replaced { old: i64, new: i64 },
    Updated { id: i64 },
    AlreadyExists { id: i64 },
}

impl DatasetStatus {
    pub fn id(self) -> i64 {
        match self {
            Self::Created { id } | Self::Updated { id } | Self::AlreadyExists { id } => id,
            Self::Replaced { new, .. } => new,
        }
    }
}

fn dataset_lookup(snapshot: &CatalogSnapshot, meta: &FileMetadata) -> Result<Option<i64>> {
    let ds = &meta.dataset;
    match snapshot.dataset(&ds.name, ds.version.as_deref()) {
        Lookup::Found(id) => Ok(Some(id)),
        Lookup::NotFound => Ok(None),
        Lookup::Ambiguous(ids) => Err(IngestError::AmbiguousMatch {
            what: "dataset".to_string(),
            value: format!("{} (version {:?})", ds.name, ds.version),
            ids,
        }),
    }
}

/// Whether the file's dataset `(name, version)` is already registered.
/// With `crash`, presence is an error.
pub fn ds_in_db(snapshot: &CatalogSnapshot, meta: &FileMetadata, crash: bool) -> Result<bool> {
    match dataset_lookup(snapshot, meta)? {
        Some(id) if crash => Err(IngestError::DatasetExists {
            name: meta.dataset.name.clone(),
            version: meta.dataset.version.clone(),
            id,
        }),
        Some(_) => Ok(true),
        None => Ok(false),
    }
}

/// Catalog id of a free-text field; nullish values map to null.
fn lookup_field(snapshot: &CatalogSnapshot, kind: &str, table: &str, value: Option<&str>) -> Result<SqlValue> {
    let Some(value) = value.filter(|v| !is_null_sentinel(v)) else {
        return Ok(SqlValue::Null);
    };
    let value = value.trim();
    snapshot
        .lookup_id(table, value)
        .require(kind, value, || IngestError::LookupNotFound {
            kind: kind.to_string(),
            table: table.to_string(),
            value: value.to_string(),
        })
        .map(SqlValue::Int)
}

fn aspect_id(snapshot: &CatalogSnapshot, name: &str) -> Result<i64> {
    match snapshot.aspect(name) {
        Lookup::Found(entry) => Ok(entry.id),
        Lookup::NotFound => Err(IngestError::LookupNotFound {
            kind: "aspect".to_string(),
            table: tables::ASPECTS.to_string(),
            value: name.to_string(),
        }),
        Lookup::Ambiguous(entries) => Err(IngestError::AmbiguousMatch {
            what: "aspect".to_string(),
            value: name.to_string(),
            ids: entries.iter().map(|e| e.id).collect(),
        }),
    }
}

/// The `datasets` row for a file, every free-text reference replaced by
/// its catalog id. Custom aspects point at their created classification.
pub fn dataset_fields(snapshot: &CatalogSnapshot, meta: &FileMetadata, names: &[ClassificationName]) -> Result<Row> {
    let ds = &meta.dataset;
    let mut fields = row([
        ("dataset_name", SqlValue::from(ds.name.as_str())),
        ("dataset_version", SqlValue::nullable_text(ds.version.as_deref())),
    ]);
    for (column, kind, table, value) in [
        ("data_type", "data type", tables::TYPES, &ds.data_type),
        ("data_layer", "data layer", tables::LAYERS, &ds.data_layer),
        ("data_provenance", "provenance", tables::PROVENANCE, &ds.data_provenance),
        ("dataset_source_type", "source type", tables::SOURCE_TYPE, &ds.source_type),
        ("license", "licence", tables::LICENCES, &ds.license),
        ("submitting_user", "user", tables::USERS, &ds.submitting_user),
    ] {
        fields.insert(column.to_string(), lookup_field(snapshot, kind, table, value.as_deref())?);
    }

    for decl in &ds.aspects {
        let name = names.iter().find(|n| n.aspect.number == decl.number);
        let (aspect, classification) = match name {
            Some(name) => (
                SqlValue::Int(aspect_id(snapshot, &name.aspect.name)?),
                SqlValue::Int(resolve_classification_id(snapshot, name)?),
            ),
            None => (SqlValue::Null, SqlValue::Null),
        };
        fields.insert(format!("aspect_{}", decl.number), aspect);
        fields.insert(format!("aspect_{}_classification", decl.number), classification);
    }

    for (column, value) in &ds.descriptive {
        fields.insert(column.clone(), SqlValue::nullable_text(value.as_deref()));
    }
    Ok(fields)
}

fn record(snapshot: &mut CatalogSnapshot, id: i64, meta: &FileMetadata, fields: Row) {
    snapshot.record_dataset(DatasetEntry {
        id,
        name: meta.dataset.name.clone(),
        version: meta.dataset.version.clone(),
        fields,
    });
}

/// Inserts the `datasets` row of a file. The template must leave
/// `dataset_id` as `auto`.
pub async fn create_dataset_entry(
    catalog: &dyn Catalog,
    snapshot: &mut CatalogSnapshot,
    meta: &FileMetadata,
    names: &[ClassificationName],
) -> Result<i64> {
    if meta.dataset.dataset_id != AUTO_DATASET_ID {
        return Err(IngestError::ExplicitDatasetId(meta.dataset.dataset_id.clone()));
    }
    let fields = dataset_fields(snapshot, meta, names)?;
    let id = catalog.insert_row(tables::DATASETS, &fields).await?;
    info!(id, dataset = %meta.dataset.name, "created dataset entry");
    record(snapshot, id, meta, fields);
    Ok(id)
}

/// Rewrites the `datasets` row `id` from the file. Aspect and
/// classification columns may only change while the dataset has no facts.
pub async fn update_dataset_entry(
    catalog: &dyn Catalog,
    snapshot: &mut CatalogSnapshot,
    meta: &FileMetadata,
    names: &[ClassificationName],
    id: i64,
) -> Result<()> {
    let fields = dataset_fields(snapshot, meta, names)?;
    if count_facts(catalog, id).await? > 0 {
        let old = snapshot.dataset_by_id(id).map(|d| d.fields.clone()).unwrap_or_default();
        let changed = fields
            .iter()
            .filter(|(column, _)| column.starts_with("aspect_"))
            .find(|(column, new)| old.get(*column).unwrap_or(&SqlValue::Null).as_text() != new.as_text());
        if let Some((column, new)) = changed {
            return Err(IngestError::DatasetAspectsChanged {
                dataset_id: id,
                column: column.clone(),
                old: old.get(column).and_then(SqlValue::as_text),
                new: new.as_text(),
            });
        }
    }
    catalog.update_row(tables::DATASETS, id, &fields).await?;
    info!(id, dataset = %meta.dataset.name, "updated dataset entry");
    let mut merged = snapshot.dataset_by_id(id).map(|d| d.fields.clone()).unwrap_or_default();
    merged.extend(fields);
    record(snapshot, id, meta, merged);
    Ok(())
}

/// Brings the `datasets` row of a file in line with `policy`.
pub async fn check_datasets_entry(
    catalog: &dyn Catalog,
    snapshot: &mut CatalogSnapshot,
    meta: &FileMetadata,
    names: &[ClassificationName],
    policy: DatasetPolicy,
) -> Result<DatasetStatus> {
    let ds = &meta.dataset;
    match dataset_lookup(snapshot, meta)? {
        Some(id) if policy.crash_on_exist => Err(IngestError::DatasetExists {
            name: ds.name.clone(),
            version: ds.version.clone(),
            id,
        }),
        Some(id) if policy.update => {
            update_dataset_entry(catalog, snapshot, meta, names, id).await?;
            Ok(DatasetStatus::Updated { id })
        }
        Some(old) if policy.replace => {
            // Facts of the old entry go with it.
            if count_facts(catalog, old).await? > 0 {
                let removed = catalog
                    .delete_rows(tables::DATA, &Filter::eq("dataset_id", old))
                    .await?;
                warn!(old, removed, "deleted facts of replaced dataset entry");
            }
            catalog
                .delete_rows(tables::DATASETS, &Filter::eq("id", old))
                .await?;
            snapshot.forget_dataset(old);
            let new = create_dataset_entry(catalog, snapshot, meta, names).await?;
            info!(old, new, dataset = %ds.name, "replaced dataset entry");
            Ok(DatasetStatus::Replaced { old, new })
        }
        Some(id) => {
            info!(id, dataset = %ds.name, "dataset already exists, left unchanged");
            Ok(DatasetStatus::AlreadyExists { id })
        }
        None if policy.create => {
            let id = create_dataset_entry(catalog, snapshot, meta, names).await?;
            Ok(DatasetStatus::Created { id })
        }
        None => Err(IngestError::DatasetMissing {
            name: ds.name.clone(),
            version: ds.version.clone(),
        }),
    }
}

async fn add_lookup(catalog: &dyn Catalog, snapshot: &mut CatalogSnapshot, table: &str, name: Option<&str>) -> Result<Option<i64>> {
    let SqlValue::Text(name) = SqlValue::nullable_text(name) else {
        return Ok(None);
    };
    if let Some(id) = snapshot.lookup_id(table, &name).found() {
        return Ok(Some(id));
    }
    let key = row([("name", name.as_str())]);
    let outcome = catalog.insert_row_if_absent(table, &key, &key).await?;
    if let InsertOutcome::Inserted(id) = outcome {
        info!(table, id, name = %name, "registered");
    }
    snapshot.record_lookup(table, outcome.id(), &name);
    Ok(Some(outcome.id()))
}

/// Registers the submitting user if absent.
pub async fn add_user(catalog: &dyn Catalog, snapshot: &mut CatalogSnapshot, meta: &FileMetadata) -> Result<Option<i64>> {
    add_lookup(catalog, snapshot, tables::USERS, meta.dataset.submitting_user.as_deref()).await
}

/// Registers the licence if absent.
pub async fn add_license(catalog: &dyn Catalog, snapshot: &mut CatalogSnapshot, meta: &FileMetadata) -> Result<Option<i64>> {
    add_lookup(catalog, snapshot, tables::LICENCES, meta.dataset.license.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aspects::create_aspects_table;
    use crate::catalog::memory::MemoryCatalog;
    use crate::metadata::tests::raw_table;
    use crate::names::get_class_names;

    /// Catalog matching `raw_table`: classification 3 for `process`, the
    /// custom `time` classification, both aspects and the `flow` type.
    async fn fixture() -> (MemoryCatalog, CatalogSnapshot, FileMetadata, Vec<ClassificationName>) {
        let catalog = MemoryCatalog::new();
        catalog.seed_with_id(tables::CLASSIFICATION_DEFINITION, 3, row([("classification_name", "processes_mfa")]));
        catalog.seed_with_id(
            tables::CLASSIFICATION_DEFINITION,
            4,
            row([("classification_name", "time__1_F_steel_SankeyFlows_2008_Global")]),
        );
        catalog.seed(tables::ASPECTS, [row([("aspect", "process")]), row([("aspect", "time")])]);
        catalog.seed(tables::TYPES, [row([("name", "flow")])]);
        let meta = FileMetadata::parse(raw_table()).unwrap();
        let mut snapshot = CatalogSnapshot::load(&catalog).await.unwrap();
        add_user(&catalog, &mut snapshot, &meta).await.unwrap();
        add_license(&catalog, &mut snapshot, &meta).await.unwrap();
        let aspects = create_aspects_table(&meta).unwrap();
        let names = get_class_names(&aspects, meta.dataset_name(), &snapshot).unwrap();
        (catalog, snapshot, meta, names)
    }

    // -------------------------------------------------------------------------
    // CREATE
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_maps_fields_to_ids() {
        let (catalog, mut snapshot, meta, names) = fixture().await;
        let status = check_datasets_entry(&catalog, &mut snapshot, &meta, &names, DatasetPolicy::default())
            .await
            .unwrap();
        let DatasetStatus::Created { id } = status else {
            panic!("unexpected status {status:?}");
        };
        let row = &catalog.table(tables::DATASETS)[&id];
        assert_eq!(row["dataset_name"], SqlValue::from("1_F_steel_SankeyFlows_2008_Global"));
        assert_eq!(row["data_type"], SqlValue::Int(1));
        assert_eq!(row["data_layer"], SqlValue::Null);
        assert_eq!(row["license"], SqlValue::Int(1));
        assert_eq!(row["aspect_1"], SqlValue::Int(1));
        assert_eq!(row["aspect_1_classification"], SqlValue::Int(3));
        assert_eq!(row["aspect_2_classification"], SqlValue::Int(4));
        assert!(!row.contains_key("aspect_3"));
        assert_eq!(row["dataset_description"], SqlValue::from("Steel flows"));
        assert_eq!(snapshot.dataset(&meta.dataset.name, Some("1")), Lookup::Found(id));
    }

    #[tokio::test]
    async fn test_explicit_dataset_id_rejected() {
        let (catalog, mut snapshot, mut meta, names) = fixture().await;
        meta.dataset.dataset_id = "17".into();
        let err = create_dataset_entry(&catalog, &mut snapshot, &meta, &names).await.unwrap_err();
        assert!(matches!(err, IngestError::ExplicitDatasetId(ref s) if s == "17"));
    }

    #[tokio::test]
    async fn test_unknown_lookup_value() {
        let (catalog, mut snapshot, mut meta, names) = fixture().await;
        meta.dataset.data_layer = Some("3".into());
        let err = create_dataset_entry(&catalog, &mut snapshot, &meta, &names).await.unwrap_err();
        assert!(matches!(err, IngestError::LookupNotFound { ref table, .. } if table == tables::LAYERS));
        meta.dataset.data_layer = Some("NaN".into());
        assert!(create_dataset_entry(&catalog, &mut snapshot, &meta, &names).await.is_ok());
    }

    #[tokio::test]
    async fn test_absent_without_create_fails() {
        let (catalog, mut snapshot, meta, names) = fixture().await;
        let policy = DatasetPolicy {
            create: false,
            ..DatasetPolicy::default()
        };
        let err = check_datasets_entry(&catalog, &mut snapshot, &meta, &names, policy)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DatasetMissing { .. }));
    }

    // -------------------------------------------------------------------------
    // PRESENT
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_present_policies() {
        let (catalog, mut snapshot, meta, names) = fixture().await;
        let id = create_dataset_entry(&catalog, &mut snapshot, &meta, &names).await.unwrap();
        assert!(ds_in_db(&snapshot, &meta, false).unwrap());
        assert!(matches!(ds_in_db(&snapshot, &meta, true), Err(IngestError::DatasetExists { .. })));

        let err = check_datasets_entry(&catalog, &mut snapshot, &meta, &names, DatasetPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DatasetExists { id: e, .. } if e == id));

        let skip = DatasetPolicy {
            crash_on_exist: false,
            ..DatasetPolicy::default()
        };
        let status = check_datasets_entry(&catalog, &mut snapshot, &meta, &names, skip).await.unwrap();
        assert_eq!(status, DatasetStatus::AlreadyExists { id });

        let replace = DatasetPolicy { replace: true, ..skip };
        let status = check_datasets_entry(&catalog, &mut snapshot, &meta, &names, replace).await.unwrap();
        let DatasetStatus::Replaced { old, new } = status else {
            panic!("unexpected status {status:?}");
        };
        assert_eq!(old, id);
        assert_ne!(new, id);
        assert_eq!(catalog.table(tables::DATASETS).keys().copied().collect::<Vec<_>>(), vec![new]);
        assert_eq!(snapshot.dataset(&meta.dataset.name, Some("1")), Lookup::Found(new));
    }

    #[tokio::test]
    async fn test_update_rewrites_descriptive_fields() {
        let (catalog, mut snapshot, mut meta, names) = fixture().await;
        let id = create_dataset_entry(&catalog, &mut snapshot, &meta, &names).await.unwrap();
        meta.dataset
            .descriptive
            .insert("dataset_description".into(), Some("Steel flows, revised".into()));
        let update = DatasetPolicy {
            crash_on_exist: false,
            update: true,
            ..DatasetPolicy::default()
        };
        let status = check_datasets_entry(&catalog, &mut snapshot, &meta, &names, update).await.unwrap();
        assert_eq!(status, DatasetStatus::Updated { id });
        assert_eq!(
            catalog.table(tables::DATASETS)[&id]["dataset_description"],
            SqlValue::from("Steel flows, revised")
        );
    }

    #[tokio::test]
    async fn test_update_refuses_aspect_change_with_facts() {
        let (catalog, mut snapshot, meta, names) = fixture().await;
        let id = create_dataset_entry(&catalog, &mut snapshot, &meta, &names).await.unwrap();
        catalog.seed(tables::DATA, [row([("dataset_id", SqlValue::Int(id))])]);

        let mut changed = names.clone();
        changed.retain(|n| n.aspect.number != 2);
        let err = update_dataset_entry(&catalog, &mut snapshot, &meta, &changed, id)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DatasetAspectsChanged { ref column, .. } if column == "aspect_2"));

        update_dataset_entry(&catalog, &mut snapshot, &meta, &names, id).await.unwrap();
    }

    // -------------------------------------------------------------------------
    // USERS AND LICENCES
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_add_user_is_idempotent() {
        let (catalog, mut snapshot, meta, _) = fixture().await;
        let again = add_user(&catalog, &mut snapshot, &meta).await.unwrap();
        assert_eq!(again, Some(1));
        assert_eq!(catalog.table(tables::USERS).len(), 1);

        let mut fresh = CatalogSnapshot::load(&catalog).await.unwrap();
        assert_eq!(add_user(&catalog, &mut fresh, &meta).await.unwrap(), Some(1));
        assert_eq!(catalog.table(tables::USERS).len(), 1);
    }

    #[tokio::test]
    async fn test_null_user_is_skipped() {
        let (catalog, mut snapshot, mut meta, _) = fixture().await;
        meta.dataset.submitting_user = Some("none".into());
        assert_eq!(add_user(&catalog, &mut snapshot, &meta).await.unwrap(), None);
    }
}
