// Offline ingestion of new catalog entries
//
// Input is one entry per line, `externalId_rawTitle`. Each accepted line gets
// the next entity id and a freshly allocated search key; the whole batch is
// committed in one store transaction or not at all.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::allocator::{normalize_base, AllocationError, NameAllocator, OneEntryOnlyFilter};
use crate::contracts::{CatalogStore, StoreError};
use crate::observability::{log_operation, record_allocation_failure, Operation, OperationContext};
use crate::types::{EntityId, ExternalId, NewCatalogEntry, Title};
use crate::validation::ValidationError;

/// One well-formed input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestLine {
    pub external_id: ExternalId,
    pub raw_title: String,
}

/// Split `externalId_rawTitle` on the first underscore.
///
/// Lines without the separator or with a non-numeric id are rejected; the
/// title may itself contain underscores.
pub fn parse_line(line: &str) -> Option<IngestLine> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (id, title) = line.split_once('_')?;
    let id = id.trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(IngestLine {
        external_id: ExternalId(id.parse().ok()?),
        raw_title: title.to_string(),
    })
}

/// Why a single well-formed line was not turned into an entry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("invalid title: {0}")]
    Title(#[from] ValidationError),
}

/// Operator-visible report of one aborted record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub line_number: usize,
    pub external_id: ExternalId,
    pub raw_title: String,
    pub error: RecordError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    /// Entries prepared (and, after `ingest_file`, committed)
    pub inserted: usize,
    /// 1-based numbers of malformed lines
    pub skipped_lines: Vec<usize>,
    /// External ids dropped by the one-entry-only denylist
    pub suppressed: Vec<ExternalId>,
    /// Records aborted individually
    pub failures: Vec<RecordFailure>,
}

/// State of one allocation run: key allocator, denylist state and id counter
#[derive(Debug)]
pub struct IngestionRun {
    allocator: NameAllocator,
    filter: OneEntryOnlyFilter,
    next_id: EntityId,
    line_number: usize,
    entries: Vec<NewCatalogEntry>,
    report: IngestionReport,
}

impl IngestionRun {
    /// Start a run after the catalog's current state
    pub fn new<I, S>(existing_keys: I, max_entity_id: Option<EntityId>, filter: OneEntryOnlyFilter) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allocator: NameAllocator::with_existing(existing_keys),
            filter,
            next_id: max_entity_id.map_or(EntityId(1), EntityId::next),
            line_number: 0,
            entries: Vec::new(),
            report: IngestionReport::default(),
        }
    }

    /// Feed one raw input line
    pub fn push_line(&mut self, line: &str) {
        self.line_number += 1;
        if line.trim().is_empty() {
            return;
        }
        let Some(parsed) = parse_line(line) else {
            self.report.skipped_lines.push(self.line_number);
            return;
        };

        match self.admit(&parsed) {
            Ok(Some(entry)) => self.entries.push(entry),
            Ok(None) => self.report.suppressed.push(parsed.external_id),
            Err(error) => {
                record_allocation_failure();
                error!(
                    line = self.line_number,
                    external_id = %parsed.external_id,
                    title = %parsed.raw_title,
                    error = %error,
                    "Record aborted"
                );
                self.report.failures.push(RecordFailure {
                    line_number: self.line_number,
                    external_id: parsed.external_id,
                    raw_title: parsed.raw_title,
                    error,
                });
            }
        }
    }

    fn admit(&mut self, line: &IngestLine) -> Result<Option<NewCatalogEntry>, RecordError> {
        let title = Title::new(line.raw_title.as_str())?;

        let base = normalize_base(&line.raw_title);
        if !base.is_empty() && self.filter.should_skip(&base) {
            return Ok(None);
        }

        let key = self.allocator.allocate(&line.raw_title, line.external_id)?;
        let entity_id = self.next_id;
        self.next_id = entity_id.next();
        Ok(Some(NewCatalogEntry::new(key, entity_id, line.external_id, title)))
    }

    pub fn entries(&self) -> &[NewCatalogEntry] {
        &self.entries
    }

    pub fn finish(mut self) -> (Vec<NewCatalogEntry>, IngestionReport) {
        self.report.inserted = self.entries.len();
        (self.entries, self.report)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch not committed: {0}")]
    Store(#[from] StoreError),
}

/// Options of one `ingest_file` call
#[derive(Debug, Clone, Default)]
pub struct IngestionOptions {
    /// Appended with the processed file after a successful commit
    pub history_file: Option<PathBuf>,
    /// Bases that may only be admitted once per run
    pub one_entry_only: Vec<String>,
}

/// Ingest an arrival file into `store`.
///
/// # Postconditions
/// - Either every prepared entry is committed or none is
/// - The history file is only appended after a successful commit
pub async fn ingest_file(
    store: &dyn CatalogStore,
    path: impl AsRef<Path>,
    options: &IngestionOptions,
) -> Result<IngestionReport, IngestionError> {
    let path = path.as_ref();
    let ctx = OperationContext::new("ingestion.file");

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| IngestionError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let max_id = store.max_entity_id().await?;
    let existing = store.search_keys().await?;
    info!(
        start_id = %max_id.map_or(EntityId(1), EntityId::next),
        existing_keys = existing.len(),
        "Starting ingestion run"
    );

    let mut run = IngestionRun::new(
        existing,
        max_id,
        OneEntryOnlyFilter::new(options.one_entry_only.iter().cloned()),
    );
    for line in content.lines() {
        run.push_line(line);
    }
    let (entries, report) = run.finish();

    let op = Operation::Ingestion {
        inserted: report.inserted,
        skipped: report.skipped_lines.len() + report.suppressed.len(),
        failed: report.failures.len(),
    };

    if entries.is_empty() {
        info!("No new entries to commit");
        log_operation::<String>(&ctx, &op, &Ok(()));
        return Ok(report);
    }

    if let Err(err) = store.insert_batch(&entries).await {
        log_operation(&ctx, &op, &Err(err.to_string()));
        return Err(err.into());
    }
    log_operation::<String>(&ctx, &op, &Ok(()));

    if let Some(history) = &options.history_file {
        if let Err(err) = append_history(history, &content).await {
            warn!(
                history = %history.display(),
                error = %err,
                "Batch committed but history was not updated; check manually"
            );
        }
    }

    info!(
        inserted = report.inserted,
        skipped = report.skipped_lines.len(),
        suppressed = report.suppressed.len(),
        failed = report.failures.len(),
        "Ingestion committed"
    );
    Ok(report)
}

async fn append_history(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    if !content.ends_with('\n') {
        file.write_all(b"\n").await?;
    }
    file.flush().await
}
