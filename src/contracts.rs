// Contract-First Design - External Collaborators
// This module defines the contracts for the two collaborators the catalog
// depends on: the persistent store and the external metadata authority.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{DetailRecord, EntityId, ExternalId, LabelRow, NewCatalogEntry};

/// Failures of the persistent store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the operation failed mid-flight.
    /// Retryable by the caller; never conflated with "not found".
    #[error("store unavailable during {operation}: {source}")]
    Unavailable {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The store refused the write (constraint violation). Not retryable.
    #[error("store rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

impl StoreError {
    pub fn unavailable(
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Unavailable {
            operation,
            source: source.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. })
    }
}

/// Outcome of an enrichment write-back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBack {
    Applied,
    /// An operator owns the record's detail fields
    Blocked,
}

/// Core persistent store contract
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Read every label row
    ///
    /// # Postconditions
    /// - Rows carry the weights currently persisted
    /// - No ordering guarantee
    async fn load_labels(&self) -> Result<Vec<LabelRow>, StoreError>;

    /// Read every detail record
    async fn load_details(&self) -> Result<Vec<DetailRecord>, StoreError>;

    /// Read one detail record
    ///
    /// # Postconditions
    /// - `Ok(None)` if no record exists for `id`
    /// - `Err(Unavailable)` only when the store itself failed
    async fn get_detail(&self, id: EntityId) -> Result<Option<DetailRecord>, StoreError>;

    /// Persist the enriched detail fields, the verified flag and, when given,
    /// the label weight of `record` as one unit
    ///
    /// # Preconditions
    /// - The record exists
    ///
    /// # Postconditions
    /// - `Ok(WriteBack::Applied)`: fields, flag and weight are all committed
    /// - `Ok(WriteBack::Blocked)`: the stored record is manually modified and
    ///   nothing was written
    /// - `Err(_)`: nothing was written
    /// - `manually_modified` is never changed
    async fn write_back(&self, record: &DetailRecord, weight: Option<u64>) -> Result<WriteBack, StoreError>;

    /// Persist a new ranking weight for the label of `id`
    async fn update_weight(&self, id: EntityId, weight: u64) -> Result<(), StoreError>;

    /// Insert label/detail pairs atomically
    ///
    /// # Postconditions
    /// - Either every entry is visible or none is
    /// - `Err(Rejected)` if any key or entity id already exists
    async fn insert_batch(&self, entries: &[NewCatalogEntry]) -> Result<(), StoreError>;

    /// Largest entity id in use, `None` for an empty catalog
    async fn max_entity_id(&self) -> Result<Option<EntityId>, StoreError>;

    /// Every search key already allocated
    async fn search_keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Failures talking to the external metadata authority.
///
/// All of these are treated uniformly as an enrichment failure.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("no answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("authority reported failure for {0}")]
    Unsuccessful(ExternalId),
}

/// Typed answer of the external authority for one entry.
///
/// Absent lists mean "the authority did not say"; they never clear a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityResponse {
    pub success: bool,
    pub developers: Option<Vec<String>>,
    pub publishers: Option<Vec<String>>,
    pub genres: Option<Vec<String>>,
    pub release_date: Option<crate::types::ReleaseDate>,
    pub recommendation_total: Option<u64>,
}

impl AuthorityResponse {
    /// Merge the returned fields into `record` and mark it verified
    pub fn apply_to(&self, record: &mut DetailRecord) {
        if let Some(developers) = &self.developers {
            record.developer = developers.join(", ");
        }
        if let Some(publishers) = &self.publishers {
            record.publisher = publishers.join(", ");
        }
        if let Some(genres) = &self.genres {
            record.genre = genres.join(", ");
        }
        if let Some(date) = self.release_date.filter(|d| d.is_known()) {
            record.release_date = date;
        }
        record.verified = true;
    }

    /// Ranking signal, only when positive
    pub fn ranking_signal(&self) -> Option<u64> {
        self.recommendation_total.filter(|total| *total > 0)
    }
}

/// External metadata authority contract
#[async_trait]
pub trait MetadataAuthority: Send + Sync {
    /// Look up one entry
    ///
    /// # Postconditions
    /// - `Ok(response)` has `success == true`; a non-success answer is
    ///   reported as `Err(AuthorityError::Unsuccessful)`
    async fn fetch(&self, external_id: ExternalId) -> Result<AuthorityResponse, AuthorityError>;
}
