//! One candidate file, end to end: metadata, aspect table, classification
//! names, custom classifications, dataset registration and facts.

use serde::Serialize;
use tracing::{field, info, instrument, warn, Span};
use uuid::Uuid;

use crate::aspects::create_aspects_table;
use crate::catalog::{Catalog, CatalogSnapshot};
use crate::consistency::{
    check_classification_definition, check_classification_items, check_item_details, AspectFilter, CheckOptions,
};
use crate::error::Result;
use crate::facts::{count_facts, upload_data, FactBatch, SideTables};
use crate::metadata::DataLayout;
use crate::names::get_class_names;
use crate::registrar::{add_license, add_user, check_datasets_entry, ds_in_db, DatasetPolicy, DatasetStatus};
use crate::source::TabularSource;
use crate::writer::{create_db_class_defs, create_db_class_items};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub policy: DatasetPolicy,
    /// Create missing custom classifications and their items.
    pub create_classifications: bool,
    /// Skip the item check of existing classifications.
    pub skip_item_check: bool,
    /// Fail on items missing from existing classifications instead of
    /// logging them. Fact substitution still fails on them later.
    pub crash: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            policy: DatasetPolicy::default(),
            create_classifications: true,
            skip_item_check: false,
            crash: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub file: String,
    pub dataset_name: String,
    pub dataset_version: Option<String>,
    pub dataset_id: i64,
    pub dataset: DatasetStatus,
    pub created_classifications: Vec<i64>,
    pub created_items: u64,
    pub facts_inserted: u64,
    pub facts_dropped_empty: usize,
}

/// Ingests one file into `catalog`. Returns the report and the normalized
/// facts (empty if none were uploaded).
#[instrument(skip_all, fields(file = %file_name, run_id = field::Empty))]
pub async fn ingest_file(
    catalog: &dyn Catalog,
    source: &mut dyn TabularSource,
    file_name: &str,
    options: IngestOptions,
) -> Result<(IngestReport, FactBatch)> {
    let run_id = Uuid::new_v4();
    Span::current().record("run_id", field::display(run_id));

    let meta = source.read_metadata()?;
    let aspects = create_aspects_table(&meta)?;
    info!(
        dataset = %meta.dataset_name(),
        layout = %meta.data_type,
        aspects = aspects.len(),
        "read metadata"
    );

    let mut snapshot = CatalogSnapshot::load(catalog).await?;
    if ds_in_db(&snapshot, &meta, false)? {
        info!(dataset = %meta.dataset_name(), "dataset already registered");
    }

    let names = get_class_names(&aspects, meta.dataset_name(), &snapshot)?;
    let data = source.read_fact_data(aspects.layout_hint(meta.data_type))?;
    let side = match meta.data_type {
        DataLayout::Table => SideTables::read(source, &meta.data_info, &aspects)?,
        DataLayout::List => SideTables::default(),
    };
    info!(rows = data.len(), "read fact data");

    // items of every classification already defined, custom ones included
    let defined: Vec<i64> = names
        .iter()
        .filter_map(|n| snapshot.definition_by_name(&n.custom_name).found())
        .collect();
    snapshot.load_items(catalog, &defined).await?;

    let mut created_classifications = Vec::new();
    let mut created_items = 0;
    if options.create_classifications {
        created_classifications =
            create_db_class_defs(catalog, &mut snapshot, &names, meta.dataset_name(), true).await?;
        let custom = check_item_details(&names, &data, &snapshot, CheckOptions::report(AspectFilter::CustomOnly))?;
        if custom.iter().all(|c| c.missing().next().is_none()) {
            if !custom.is_empty() {
                info!("custom classification items already present");
            }
        } else {
            created_items = create_db_class_items(catalog, &mut snapshot, &names, &data, meta.dataset_name()).await?;
        }
    } else {
        check_classification_definition(&names, &snapshot, CheckOptions::default())?;
    }

    if options.skip_item_check {
        warn!("item check of existing classifications skipped");
    } else {
        let opts = CheckOptions {
            crash: options.crash,
            warn: true,
            filter: AspectFilter::NonCustomOnly,
        };
        let flags = check_classification_items(&names, &data, &snapshot, opts)?;
        let missing = flags.iter().filter(|f| !**f).count();
        if missing > 0 {
            warn!(missing, "values missing from existing classifications");
        }
    }

    add_user(catalog, &mut snapshot, &meta).await?;
    add_license(catalog, &mut snapshot, &meta).await?;
    let status = check_datasets_entry(catalog, &mut snapshot, &meta, &names, options.policy).await?;
    let dataset_id = status.id();

    let keep_facts = matches!(status, DatasetStatus::Updated { .. }) && count_facts(catalog, dataset_id).await? > 0;
    let batch = if keep_facts {
        info!(dataset_id, "dataset entry updated, existing facts kept");
        FactBatch::default()
    } else {
        let (batch, _) = upload_data(
            catalog,
            &snapshot,
            &meta,
            &names,
            &data,
            &side,
            dataset_id,
            options.crash,
        )
        .await?;
        batch
    };

    let report = IngestReport {
        run_id,
        file: file_name.to_string(),
        dataset_name: meta.dataset.name.clone(),
        dataset_version: meta.dataset.version.clone(),
        dataset_id,
        dataset: status,
        created_classifications,
        created_items,
        facts_inserted: batch.len() as u64,
        facts_dropped_empty: batch.dropped_empty,
    };
    info!(dataset_id, facts = report.facts_inserted, "ingested file");
    Ok((report, batch))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::memory::MemoryCatalog;
    use crate::catalog::{row, tables};
    use crate::error::IngestError;
    use crate::source::tests::{write_list_template, write_table_template, TABLE_DATASET};
    use crate::source::WorkbookSource;
    use crate::values::SqlValue;
    use tempfile::TempDir;

    fn item(classification_id: i64, value: &str) -> crate::catalog::Row {
        row([
            ("classification_id", SqlValue::Int(classification_id)),
            ("attribute1_oto", value.into()),
        ])
    }

    /// Years (1), regions (2), aspects, units and the `flow` type.
    fn catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        catalog.seed_with_id(tables::CLASSIFICATION_DEFINITION, 1, row([("classification_name", "years")]));
        catalog.seed_with_id(tables::CLASSIFICATION_DEFINITION, 2, row([("classification_name", "regions_iso")]));
        catalog.seed(
            tables::CLASSIFICATION_ITEMS,
            [item(1, "2010"), item(1, "2011"), item(2, "AT"), item(2, "DE")],
        );
        catalog.seed(
            tables::ASPECTS,
            [
                row([("aspect", SqlValue::from("process")), ("dimension", SqlValue::Int(3))]),
                row([("aspect", SqlValue::from("time")), ("dimension", SqlValue::Int(1))]),
                row([("aspect", SqlValue::from("region")), ("dimension", SqlValue::Int(2))]),
            ],
        );
        catalog.seed(tables::UNITS, [row([("unitcode", "Mt")]), row([("unitcode", "kg")])]);
        catalog.seed(tables::TYPES, [row([("name", "flow")])]);
        catalog
    }

    async fn ingest(catalog: &MemoryCatalog, path: &std::path::Path, options: IngestOptions) -> Result<(IngestReport, FactBatch)> {
        let mut source = WorkbookSource::open(path)?;
        ingest_file(catalog, &mut source, "candidate.xlsx", options).await
    }

    // -------------------------------------------------------------------------
    // TABLE
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_table_file_end_to_end() {
        let dir = TempDir::new().unwrap();
        let path = write_table_template(dir.path());
        let catalog = catalog();

        let (report, batch) = ingest(&catalog, &path, IngestOptions::default()).await.unwrap();
        assert_eq!(report.dataset_name, TABLE_DATASET);
        assert!(matches!(report.dataset, DatasetStatus::Created { .. }));
        assert_eq!(report.created_classifications.len(), 1);
        assert_eq!(report.created_items, 2);
        assert_eq!(report.facts_inserted, 4);

        let custom_id = report.created_classifications[0];
        let definition = &catalog.table(tables::CLASSIFICATION_DEFINITION)[&custom_id];
        assert_eq!(
            definition["classification_name"],
            SqlValue::from(format!("process__{TABLE_DATASET}"))
        );
        assert_eq!(definition["dimension"], SqlValue::Int(3));

        let facts = catalog.table(tables::DATA);
        assert_eq!(facts.len(), 4);
        assert!(facts.values().all(|f| f["dataset_id"] == SqlValue::Int(report.dataset_id)));
        assert!(facts.values().all(|f| f["unit_nominator"] == SqlValue::Int(1)));
        let comments: Vec<Option<String>> = batch.rows.iter().map(|r| r.comment.clone()).collect();
        assert_eq!(
            comments,
            vec![Some("estimate".into()), None, Some("measured".into()), None]
        );
        assert_eq!(batch.rows[3].value, None);
    }

    #[tokio::test]
    async fn test_second_run_respects_dataset_policy() {
        let dir = TempDir::new().unwrap();
        let path = write_table_template(dir.path());
        let catalog = catalog();
        let (first, _) = ingest(&catalog, &path, IngestOptions::default()).await.unwrap();

        let err = ingest(&catalog, &path, IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, IngestError::DatasetExists { id, .. } if id == first.dataset_id));

        let keep = IngestOptions {
            policy: DatasetPolicy {
                crash_on_exist: false,
                ..DatasetPolicy::default()
            },
            crash: false,
            ..IngestOptions::default()
        };
        let err = ingest(&catalog, &path, keep).await.unwrap_err();
        assert!(matches!(err, IngestError::FactsAlreadyPresent { rows: 4, .. }));

        let replace = IngestOptions {
            policy: DatasetPolicy {
                crash_on_exist: false,
                replace: true,
                ..DatasetPolicy::default()
            },
            ..IngestOptions::default()
        };
        let (second, _) = ingest(&catalog, &path, replace).await.unwrap();
        assert!(matches!(second.dataset, DatasetStatus::Replaced { old, .. } if old == first.dataset_id));
        assert_eq!(second.facts_inserted, 4);
        let data = catalog.table(tables::DATA);
        assert_eq!(data.len(), 4);
        assert!(data
            .values()
            .all(|r| r.get("dataset_id") == Some(&SqlValue::Int(second.dataset_id))));
        assert_eq!(catalog.table(tables::DATASETS).len(), 1);
        assert!(second.created_classifications.is_empty());
        assert_eq!(second.created_items, 0);
        assert_eq!(catalog.table(tables::CLASSIFICATION_ITEMS).len(), 6);
    }

    #[tokio::test]
    async fn test_missing_existing_item_fails_before_writing_facts() {
        let dir = TempDir::new().unwrap();
        let path = write_table_template(dir.path());
        let catalog = catalog();
        catalog
            .delete_rows(tables::CLASSIFICATION_ITEMS, &crate::catalog::Filter::eq("attribute1_oto", "2011"))
            .await
            .unwrap();

        let err = ingest(&catalog, &path, IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, IngestError::ItemsMissing { ref values, .. } if values == &vec!["2011".to_string()]));
        assert!(catalog.table(tables::DATA).is_empty());
        assert!(catalog.table(tables::DATASETS).is_empty());
    }

    #[tokio::test]
    async fn test_no_create_requires_defined_classifications() {
        let dir = TempDir::new().unwrap();
        let path = write_table_template(dir.path());
        let catalog = catalog();
        let options = IngestOptions {
            create_classifications: false,
            ..IngestOptions::default()
        };
        let err = ingest(&catalog, &path, options).await.unwrap_err();
        assert!(matches!(err, IngestError::ClassificationNotFound(ref s) if s.starts_with("process__")));
    }

    // -------------------------------------------------------------------------
    // LIST
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_list_file_drops_empty_values() {
        let dir = TempDir::new().unwrap();
        let path = write_list_template(dir.path());
        let catalog = catalog();

        let (report, batch) = ingest(&catalog, &path, IngestOptions::default()).await.unwrap();
        assert_eq!(report.facts_inserted, 1);
        assert_eq!(report.facts_dropped_empty, 1);
        assert!(report.created_classifications.is_empty());
        let fact = &batch.rows[0];
        assert_eq!(fact.value, Some(10.0));
        assert_eq!(fact.unit_nominator, Some(2));
        assert_eq!(fact.stats_array, [Some(3.0), Some(10.0), Some(3.0), None]);

        let dataset = &catalog.table(tables::DATASETS)[&report.dataset_id];
        assert_eq!(dataset["aspect_1_classification"], SqlValue::Int(2));
        assert_eq!(dataset["submitting_user"], SqlValue::Int(1));
    }
}
