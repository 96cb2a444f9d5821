// Metadata Cache - tiered detail resolution
//
// memory -> persistent store -> external authority, with the authority's
// answer written back to the store and to the live label weight.
//
// Concurrent misses for the same entity share one flight gate, so the store
// read, the authority call and the write-back happen once per entity. Other
// entities never wait on each other.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::contracts::{AuthorityError, CatalogStore, MetadataAuthority, StoreError, WriteBack};
use crate::label_index::LabelIndex;
use crate::observability::{
    log_operation, record_enrichment_failure, Operation, OperationContext,
};
use crate::types::{DetailRecord, EntityId};

/// Cache tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Idle time after which an entry expires; reset on every hit
    pub sliding_expiration: Duration,
    /// Soft cap on cached records
    pub max_entries: usize,
    /// Round-trip budget for one authority call
    pub authority_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sliding_expiration: Duration::from_secs(600),
            max_entries: 10_000,
            authority_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    record: DetailRecord,
    last_access: Instant,
}

/// Hit/miss/enrichment counters of one cache instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub enrichments: u64,
    pub enrichment_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    enrichments: AtomicU64,
    enrichment_failures: AtomicU64,
}

pub struct MetadataCache {
    store: Arc<dyn CatalogStore>,
    authority: Arc<dyn MetadataAuthority>,
    labels: Arc<LabelIndex>,
    config: CacheConfig,
    entries: DashMap<EntityId, CacheEntry>,
    in_flight: DashMap<EntityId, Arc<Mutex<()>>>,
    counters: Counters,
}

impl MetadataCache {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        authority: Arc<dyn MetadataAuthority>,
        labels: Arc<LabelIndex>,
        config: CacheConfig,
    ) -> Self {
        Self {
            store,
            authority,
            labels,
            config,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            enrichments: self.counters.enrichments.load(Ordering::Relaxed),
            enrichment_failures: self.counters.enrichment_failures.load(Ordering::Relaxed),
        }
    }

    /// Number of cached records, expired ones included until purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the detail record of `id`.
    ///
    /// # Postconditions
    /// - `Ok(None)` when the store has no record (nothing is cached)
    /// - `Err(StoreError)` only when the store failed; enrichment failures
    ///   degrade to the unenriched record
    /// - A returned record is cached with a sliding expiration
    pub async fn resolve(&self, id: EntityId) -> Result<Option<DetailRecord>, StoreError> {
        if let Some(record) = self.cached(id) {
            return Ok(Some(record));
        }

        let gate = self
            .in_flight
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _flight = gate.lock().await;
            // A caller we waited behind may have filled the cache already
            match self.cached(id) {
                Some(record) => Ok(Some(record)),
                None => self.load_and_enrich(id).await,
            }
        };

        // Last one through removes the gate; waiters still hold clones
        self.in_flight
            .remove_if(&id, |_, g| Arc::ptr_eq(g, &gate) && Arc::strong_count(g) <= 2);

        result
    }

    /// Memory tier: return a live entry and slide its expiration
    fn cached(&self, id: EntityId) -> Option<DetailRecord> {
        let now = Instant::now();
        let expired = match self.entries.get_mut(&id) {
            Some(mut entry) => {
                if now.duration_since(entry.last_access) < self.config.sliding_expiration {
                    entry.last_access = now;
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    let ctx = OperationContext::new("cache.hit");
                    log_operation::<String>(&ctx, &Operation::CacheHit { entity_id: id.get() }, &Ok(()));
                    return Some(entry.record.clone());
                }
                true
            }
            None => false,
        };

        if expired {
            self.entries.remove_if(&id, |_, entry| {
                now.duration_since(entry.last_access) >= self.config.sliding_expiration
            });
        }
        None
    }

    async fn load_and_enrich(&self, id: EntityId) -> Result<Option<DetailRecord>, StoreError> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let mut ctx = OperationContext::new("cache.resolve");
        ctx.add_attribute("entity_id", id.to_string());

        let Some(mut record) = self.store.get_detail(id).await? else {
            debug!(entity_id = %id, "No detail record in store");
            return Ok(None);
        };
        log_operation::<String>(&ctx, &Operation::CacheMiss { entity_id: id.get() }, &Ok(()));

        if record.needs_enrichment() {
            self.enrich(&mut record).await?;
        }

        self.populate(id, record.clone());
        Ok(Some(record))
    }

    /// Ask the authority once; on success merge, persist and propagate the weight.
    ///
    /// Only store failures during write-back escape; authority failures are logged.
    /// The live label weight changes only after the store committed it.
    async fn enrich(&self, record: &mut DetailRecord) -> Result<(), StoreError> {
        let id = record.entity_id;
        let external_id = record.external_id;
        let mut ctx = OperationContext::new("cache.enrich");
        ctx.add_attribute("entity_id", id.to_string());
        ctx.add_attribute("external_id", external_id.to_string());

        let outcome = match tokio::time::timeout(
            self.config.authority_timeout,
            self.authority.fetch(external_id),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(AuthorityError::Timeout(self.config.authority_timeout)),
        };

        let op = Operation::Enrichment {
            entity_id: id.get(),
            external_id: external_id.get(),
        };
        let response = match outcome {
            Ok(response) if response.success => response,
            Ok(_) => {
                self.enrichment_failed(&ctx, &op, AuthorityError::Unsuccessful(external_id));
                return Ok(());
            }
            Err(err) => {
                self.enrichment_failed(&ctx, &op, err);
                return Ok(());
            }
        };
        self.counters.enrichments.fetch_add(1, Ordering::Relaxed);
        log_operation::<String>(&ctx, &op, &Ok(()));

        let mut enriched = record.clone();
        response.apply_to(&mut enriched);
        let weight = response.ranking_signal();

        // Detail fields, verified flag and weight land together or not at all
        if self.store.write_back(&enriched, weight).await? == WriteBack::Blocked {
            info!(entity_id = %id, "Record was edited by an operator during enrichment, keeping its fields");
            if let Some(current) = self.store.get_detail(id).await? {
                *record = current;
            }
            return Ok(());
        }

        *record = enriched;
        if let Some(weight) = weight {
            if !self.labels.set_weight(id, weight) {
                warn!(entity_id = %id, "Enriched record has no live label");
            }
        }

        log_operation::<String>(
            &ctx,
            &Operation::WriteBack {
                entity_id: id.get(),
                weight,
            },
            &Ok(()),
        );
        info!(entity_id = %id, title = %record.title, "Detail record verified");
        Ok(())
    }

    fn enrichment_failed(&self, ctx: &OperationContext, op: &Operation, err: AuthorityError) {
        self.counters.enrichment_failures.fetch_add(1, Ordering::Relaxed);
        record_enrichment_failure();
        warn!(
            trace_id = %ctx.trace_id,
            error = %err,
            "Enrichment failed, serving unenriched record: {:?}", op
        );
    }

    fn populate(&self, id: EntityId, record: DetailRecord) {
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&id) {
            self.evict();
        }
        self.entries.insert(
            id,
            CacheEntry {
                record,
                last_access: Instant::now(),
            },
        );
    }

    /// Drop expired entries; if still full, drop the least recently used one
    fn evict(&self) {
        let removed = self.purge_expired();
        if removed > 0 || self.entries.len() < self.config.max_entries {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_access)
            .map(|entry| *entry.key());
        if let Some(oldest) = oldest {
            self.entries.remove(&oldest);
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.last_access) < self.config.sliding_expiration);
        before.saturating_sub(self.entries.len())
    }

    /// Forget one entity, e.g. after an out-of-band edit
    pub fn invalidate(&self, id: EntityId) {
        self.entries.remove(&id);
    }
}
