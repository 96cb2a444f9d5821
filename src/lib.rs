// LabelDB - ranked autocomplete, boolean search and tiered detail resolution
// Root library module

pub mod observability;
pub mod contracts;
pub mod validation;
pub mod types;
pub mod query;
pub mod trie;
pub mod label_index;
pub mod metadata_cache;
pub mod authority;
pub mod allocator;
pub mod ingestion;
pub mod memory_store;
pub mod pg_store;
pub mod wrappers;
pub mod service;
pub mod config;

// Re-export key types
pub use observability::{
    init_logging,
    init_logging_with_level,
    Operation,
    MetricType,
    log_operation,
    record_metric,
    with_trace_id,
    get_metrics,
};

pub use contracts::{
    CatalogStore,
    MetadataAuthority,
    AuthorityResponse,
    AuthorityError,
    StoreError,
    WriteBack,
};

// Re-export validated types
pub use types::{
    SearchKey,
    EntityId,
    ExternalId,
    Title,
    ReleaseDate,
    Label,
    LabelRow,
    DetailRecord,
    NewCatalogEntry,
};
pub use validation::ValidationError;

// Re-export search structures
pub use query::BooleanQuery;
pub use trie::{AutocompleteTrie, TrieConfig};
pub use label_index::{IndexError, LabelIndex};
pub use metadata_cache::{CacheConfig, CacheStats, MetadataCache};

// Re-export ingestion
pub use allocator::{normalize_base, AllocationError, NameAllocator, OneEntryOnlyFilter};
pub use ingestion::{
    ingest_file,
    parse_line,
    IngestionError,
    IngestionOptions,
    IngestionReport,
    IngestionRun,
    RecordError,
};

// Re-export store and authority implementations
pub use memory_store::InMemoryCatalogStore;
pub use pg_store::PgCatalogStore;
pub use authority::{HttpAuthorityConfig, HttpMetadataAuthority};
pub use wrappers::RetryableStore;

pub use service::{CatalogService, LoadError, ServiceConfig};
pub use config::CatalogConfig;
