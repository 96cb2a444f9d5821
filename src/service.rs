// CatalogService - query surface shared by every transport
//
// Owns the label index, the autocomplete trie and the metadata cache. The
// trie is frozen after each build and swapped whole on rebuild, so readers
// never see a half-built structure.

use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::contracts::{CatalogStore, MetadataAuthority, StoreError};
use crate::label_index::{IndexError, LabelIndex};
use crate::metadata_cache::{CacheConfig, CacheStats, MetadataCache};
use crate::observability::{log_operation, record_metric, MetricType, Operation, OperationContext};
use crate::trie::{AutocompleteTrie, TrieConfig};
use crate::types::{DetailRecord, EntityId, Label};

/// Failure to bring the service up from the store
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("catalog snapshot is inconsistent: {0}")]
    Index(#[from] IndexError),
}

/// Tuning for one service instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    pub trie: TrieConfig,
    pub cache: CacheConfig,
}

pub struct CatalogService {
    labels: Arc<LabelIndex>,
    trie: RwLock<Arc<AutocompleteTrie>>,
    cache: MetadataCache,
    config: ServiceConfig,
}

impl CatalogService {
    /// Load every label from `store` and build the index and the trie
    pub async fn load(
        store: Arc<dyn CatalogStore>,
        authority: Arc<dyn MetadataAuthority>,
        config: ServiceConfig,
    ) -> Result<Self, LoadError> {
        let ctx = OperationContext::new("service.load");
        let rows = store.load_labels().await?;
        let labels = Arc::new(LabelIndex::from_rows(rows)?);

        let trie = AutocompleteTrie::build(config.trie, labels.labels());
        let op = Operation::IndexBuild {
            label_count: labels.len(),
            trie_nodes: trie.node_count(),
        };
        log_operation::<String>(&ctx, &op, &Ok(()));
        record_metric(MetricType::Gauge {
            name: "index.labels",
            value: labels.len() as f64,
        });
        info!(
            labels = labels.len(),
            trie_nodes = trie.node_count(),
            "Catalog loaded"
        );

        let cache = MetadataCache::new(store, authority, Arc::clone(&labels), config.cache);
        Ok(Self {
            labels,
            trie: RwLock::new(Arc::new(trie)),
            cache,
            config,
        })
    }

    pub fn config(&self) -> ServiceConfig {
        self.config
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Top-ranked labels whose key starts with `prefix`
    pub fn autocomplete(&self, prefix: &str) -> Vec<Arc<Label>> {
        let ctx = OperationContext::new("service.autocomplete");
        let trie = self.trie.read().clone();
        let results = trie.lookup(prefix);

        log_operation::<String>(
            &ctx,
            &Operation::Autocomplete {
                prefix: prefix.to_string(),
                result_count: results.len(),
            },
            &Ok(()),
        );
        results
    }

    /// Every label matching the boolean query, best weight first
    pub fn full_search(&self, query: &str) -> Vec<Arc<Label>> {
        self.labels.full_search(query)
    }

    pub fn get_by_entity_id(&self, id: EntityId) -> Option<Arc<Label>> {
        self.labels.by_entity_id(id)
    }

    /// Resolve the detail record of `id` through the cache tiers.
    ///
    /// `Ok(None)` means the entity is unknown; `Err` only surfaces store failures.
    pub async fn get_detail(&self, id: EntityId) -> Result<Option<DetailRecord>, StoreError> {
        self.cache.resolve(id).await
    }

    /// Rebuild the trie from the current live weights and swap it in.
    ///
    /// Node lists are ranked at insert time and do not follow later weight
    /// changes; this is what brings them back in line.
    pub fn rebuild_autocomplete(&self) -> usize {
        let ctx = OperationContext::new("service.rebuild_autocomplete");
        let trie = AutocompleteTrie::build(self.config.trie, self.labels.labels());
        let nodes = trie.node_count();

        *self.trie.write() = Arc::new(trie);

        log_operation::<String>(
            &ctx,
            &Operation::IndexBuild {
                label_count: self.labels.len(),
                trie_nodes: nodes,
            },
            &Ok(()),
        );
        info!(trie_nodes = nodes, elapsed_ms = ctx.elapsed().as_millis() as u64, "Autocomplete trie rebuilt");
        nodes
    }

    /// Rebuild the trie every `interval` until the service is dropped
    pub fn spawn_periodic_rebuild(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately and the trie is fresh
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    debug!("Catalog service dropped, stopping trie rebuilds");
                    break;
                };
                service.rebuild_autocomplete();
                service.cache.purge_expired();
            }
        })
    }
}
