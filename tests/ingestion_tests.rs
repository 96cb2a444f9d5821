// Ingestion batch tests: allocation, atomic commit and history bookkeeping

use anyhow::Result;
use labeldb::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

async fn store_with_portal() -> Result<Arc<InMemoryCatalogStore>> {
    let store = Arc::new(InMemoryCatalogStore::new());
    store
        .insert_batch(&[NewCatalogEntry::new(
            SearchKey::new("portal00")?,
            EntityId(5),
            ExternalId(400),
            Title::new("Portal")?,
        )])
        .await?;
    Ok(store)
}

#[tokio::test]
async fn test_ingest_allocates_after_existing_catalog() -> Result<()> {
    init_logging()?;
    let dir = TempDir::new()?;
    let arrivals = dir.path().join("arrivals.txt");
    let history = dir.path().join("history.txt");
    tokio::fs::write(
        &arrivals,
        "620_Portal 2\n400_PORTAL\nnot a record\n\n70_Half-Life\n220_Half-Life 2\n",
    )
    .await?;

    let store = store_with_portal().await?;
    let options = IngestionOptions {
        history_file: Some(history.clone()),
        one_entry_only: Vec::new(),
    };
    let report = ingest_file(store.as_ref(), &arrivals, &options).await?;

    assert_eq!(report.inserted, 4);
    assert_eq!(report.skipped_lines, vec![3]);
    assert!(report.failures.is_empty());

    let mut labels = store.load_labels().await?;
    labels.sort_by_key(|l| l.entity_id);
    let allocated: Vec<(i64, &str)> = labels
        .iter()
        .map(|l| (l.entity_id.get(), l.search_key.as_str()))
        .collect();
    assert_eq!(
        allocated,
        vec![
            (5, "portal00"),
            (6, "portal200"),
            (7, "portal01"),
            (8, "halflife00"),
            (9, "halflife200"),
        ]
    );
    assert_eq!(labels[1].title.as_str(), "Portal 2");
    assert_eq!(labels[1].weight, 0);

    let detail = store.get_detail(EntityId(8)).await?.expect("detail inserted");
    assert_eq!(detail.external_id, ExternalId(70));
    assert!(!detail.verified);

    let history_content = tokio::fs::read_to_string(&history).await?;
    assert!(history_content.contains("70_Half-Life"));
    Ok(())
}

#[tokio::test]
async fn test_failed_commit_leaves_catalog_and_history_untouched() -> Result<()> {
    let dir = TempDir::new()?;
    let arrivals = dir.path().join("arrivals.txt");
    let history = dir.path().join("history.txt");
    tokio::fs::write(&arrivals, "1_Alpha\n2_Beta\n").await?;

    let store = store_with_portal().await?;
    let options = IngestionOptions {
        history_file: Some(history.clone()),
        one_entry_only: Vec::new(),
    };

    store.set_unavailable(true);
    let err = ingest_file(store.as_ref(), &arrivals, &options).await.unwrap_err();
    assert!(matches!(err, IngestionError::Store(ref e) if e.is_retryable()));
    assert!(!history.exists());

    // A retry after recovery commits the whole file
    store.set_unavailable(false);
    let report = ingest_file(store.as_ref(), &arrivals, &options).await?;
    assert_eq!(report.inserted, 2);
    assert_eq!(store.load_labels().await?.len(), 3);
    assert!(history.exists());
    Ok(())
}

#[tokio::test]
async fn test_history_is_appended_per_run() -> Result<()> {
    let dir = TempDir::new()?;
    let history = dir.path().join("history.txt");
    let store = Arc::new(InMemoryCatalogStore::new());
    let options = IngestionOptions {
        history_file: Some(history.clone()),
        one_entry_only: Vec::new(),
    };

    for (name, content) in [("a.txt", "1_First"), ("b.txt", "2_Second\n")] {
        let path = dir.path().join(name);
        tokio::fs::write(&path, content).await?;
        ingest_file(store.as_ref(), &path, &options).await?;
    }

    let lines: Vec<String> = tokio::fs::read_to_string(&history)
        .await?
        .lines()
        .map(str::to_string)
        .collect();
    assert_eq!(lines, vec!["1_First", "2_Second"]);
    assert_eq!(store.max_entity_id().await?, Some(EntityId(2)));
    Ok(())
}

#[tokio::test]
async fn test_denylist_and_exhaustion_are_reported() -> Result<()> {
    let dir = TempDir::new()?;
    let arrivals = dir.path().join("arrivals.txt");

    let mut content = String::new();
    for i in 0..3 {
        content.push_str(&format!("{}_Rocksmith® 2014 Edition – Remastered – Song {i}\n", 1000 + i));
    }
    for i in 0..101 {
        content.push_str(&format!("{}_Same Name\n", 2000 + i));
    }
    tokio::fs::write(&arrivals, content).await?;

    let store = Arc::new(InMemoryCatalogStore::new());
    let options = IngestionOptions {
        history_file: None,
        one_entry_only: OneEntryOnlyFilter::DEFAULT_BASES.iter().map(|b| b.to_string()).collect(),
    };
    let report = ingest_file(store.as_ref(), &arrivals, &options).await?;

    assert_eq!(report.suppressed, vec![ExternalId(1001), ExternalId(1002)]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].external_id, ExternalId(2100));
    assert!(matches!(
        report.failures[0].error,
        RecordError::Allocation(AllocationError::Exhausted { .. })
    ));
    assert_eq!(report.inserted, 101);
    assert_eq!(store.search_keys().await?.len(), 101);
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_a_read_error() -> Result<()> {
    let dir = TempDir::new()?;
    let store = InMemoryCatalogStore::new();
    let err = ingest_file(&store, dir.path().join("absent.txt"), &IngestionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::Read { .. }));
    Ok(())
}

#[tokio::test]
async fn test_ingested_entries_are_searchable_after_load() -> Result<()> {
    let dir = TempDir::new()?;
    let arrivals = dir.path().join("arrivals.txt");
    tokio::fs::write(&arrivals, "10_Counter-Strike\n80_Counter-Strike: Condition Zero\n").await?;

    let store = Arc::new(InMemoryCatalogStore::new());
    ingest_file(store.as_ref(), &arrivals, &IngestionOptions::default()).await?;

    struct Silent;
    #[async_trait::async_trait]
    impl MetadataAuthority for Silent {
        async fn fetch(&self, id: ExternalId) -> Result<AuthorityResponse, AuthorityError> {
            Err(AuthorityError::Unsuccessful(id))
        }
    }

    let service = CatalogService::load(store, Arc::new(Silent), ServiceConfig::default()).await?;
    assert_eq!(service.autocomplete("counter").len(), 2);
    assert_eq!(service.full_search("condition").len(), 1);
    Ok(())
}
