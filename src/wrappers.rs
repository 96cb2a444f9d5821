// Wrapper Components
// Store wrappers that layer retries on top of any CatalogStore.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::contracts::{CatalogStore, StoreError, WriteBack};
use crate::types::{DetailRecord, EntityId, LabelRow, NewCatalogEntry};

/// Retry a store call while it fails with a retryable error.
/// Rejections are returned immediately.
macro_rules! with_retries {
    ($self:ident, $name:literal, $call:expr) => {{
        let mut attempt = 0;
        let mut delay = $self.base_delay;

        loop {
            attempt += 1;

            match $call.await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("Operation {} succeeded after {} attempts", $name, attempt);
                    }
                    break Ok(value);
                }
                Err(e) if !e.is_retryable() => break Err(e),
                Err(e) if attempt >= $self.max_retries => {
                    error!("Operation {} failed after {} attempts: {}", $name, attempt, e);
                    break Err(e);
                }
                Err(e) => {
                    warn!(
                        "Operation {} failed (attempt {}/{}): {}",
                        $name, attempt, $self.max_retries, e
                    );

                    tokio::time::sleep(delay).await;

                    // Exponential backoff with jitter
                    delay = std::cmp::min(delay * 2, $self.max_delay);
                    let jitter = Duration::from_millis(rand::random::<u64>() % 100);
                    delay += jitter;
                }
            }
        }
    }};
}

/// Store wrapper that retries `StoreError::Unavailable` with exponential backoff
pub struct RetryableStore<S: CatalogStore> {
    inner: S,
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl<S: CatalogStore> RetryableStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }

    /// Configure retry parameters
    pub fn with_retry_config(mut self, max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: CatalogStore> CatalogStore for RetryableStore<S> {
    async fn load_labels(&self) -> Result<Vec<LabelRow>, StoreError> {
        with_retries!(self, "load_labels", self.inner.load_labels())
    }

    async fn load_details(&self) -> Result<Vec<DetailRecord>, StoreError> {
        with_retries!(self, "load_details", self.inner.load_details())
    }

    async fn get_detail(&self, id: EntityId) -> Result<Option<DetailRecord>, StoreError> {
        with_retries!(self, "get_detail", self.inner.get_detail(id))
    }

    async fn write_back(&self, record: &DetailRecord, weight: Option<u64>) -> Result<WriteBack, StoreError> {
        with_retries!(self, "write_back", self.inner.write_back(record, weight))
    }

    async fn update_weight(&self, id: EntityId, weight: u64) -> Result<(), StoreError> {
        with_retries!(self, "update_weight", self.inner.update_weight(id, weight))
    }

    async fn insert_batch(&self, entries: &[NewCatalogEntry]) -> Result<(), StoreError> {
        with_retries!(self, "insert_batch", self.inner.insert_batch(entries))
    }

    async fn max_entity_id(&self) -> Result<Option<EntityId>, StoreError> {
        with_retries!(self, "max_entity_id", self.inner.max_entity_id())
    }

    async fn search_keys(&self) -> Result<Vec<String>, StoreError> {
        with_retries!(self, "search_keys", self.inner.search_keys())
    }
}
