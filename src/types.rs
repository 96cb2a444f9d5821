// Validated Types - Catalog Data Model
// Strongly-typed wrappers that enforce invariants at construction time.
// A `SearchKey` that exists is never blank, so the index never has to check.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::validation::{self, ValidationError};

/// Unique, normalized lookup key of a catalog entry (lowercase letters and digits)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SearchKey {
    inner: String,
}

impl SearchKey {
    /// Create a new search key
    ///
    /// # Invariants
    /// - Non-blank
    /// - Only lowercase letters and digits
    /// - At most 32 characters
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        validation::key::validate_search_key(&key)?;
        Ok(Self { inner: key })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl TryFrom<String> for SearchKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SearchKey> for String {
    fn from(key: SearchKey) -> Self {
        key.inner
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Catalog-wide unique entity number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub i64);

impl EntityId {
    pub fn get(self) -> i64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the entry at the external metadata authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalId(pub i64);

impl ExternalId {
    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Display title with enforced limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    inner: String,
}

impl Title {
    const MAX_LENGTH: usize = 1024;

    /// Create a new title
    ///
    /// # Invariants
    /// - Trimmed, no line breaks
    /// - Length <= 1024 bytes
    pub fn new(title: impl Into<String>) -> Result<Self, ValidationError> {
        let title = title.into();
        let cleaned: String = title.trim().chars().filter(|c| *c != '\n' && *c != '\r').collect();

        if cleaned.len() > Self::MAX_LENGTH {
            return Err(ValidationError::invalid(
                "title",
                format!("exceeds maximum length of {} bytes", Self::MAX_LENGTH),
            ));
        }
        Ok(Self { inner: cleaned })
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

/// Release date encoded as `YYYYMMDD`, 0 when unknown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseDate(u32);

impl ReleaseDate {
    pub const UNKNOWN: ReleaseDate = ReleaseDate(0);

    pub fn new(encoded: u32) -> Result<Self, ValidationError> {
        validation::date::validate_release_date(encoded)?;
        Ok(Self(encoded))
    }

    pub fn from_date(date: chrono::NaiveDate) -> Self {
        use chrono::Datelike;
        Self(date.year() as u32 * 10_000 + date.month() * 100 + date.day())
    }

    pub fn is_known(self) -> bool {
        self.0 != 0
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// A catalog entry as held by the in-memory index.
///
/// Everything except `weight` is immutable. The weight is only written by the
/// enrichment path and is read lock-free by search.
#[derive(Debug)]
pub struct Label {
    search_key: SearchKey,
    entity_id: EntityId,
    external_id: ExternalId,
    title: Title,
    weight: AtomicU64,
}

impl Label {
    pub fn new(
        search_key: SearchKey,
        entity_id: EntityId,
        external_id: ExternalId,
        title: Title,
        weight: u64,
    ) -> Self {
        Self {
            search_key,
            entity_id,
            external_id,
            title,
            weight: AtomicU64::new(weight),
        }
    }

    pub fn search_key(&self) -> &SearchKey {
        &self.search_key
    }

    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    pub fn external_id(&self) -> ExternalId {
        self.external_id
    }

    pub fn title(&self) -> &Title {
        &self.title
    }

    pub fn weight(&self) -> u64 {
        self.weight.load(Ordering::Acquire)
    }

    pub(crate) fn set_weight(&self, weight: u64) {
        self.weight.store(weight, Ordering::Release);
    }

    /// Owned copy of the current state, for returning across the transport boundary
    pub fn snapshot(&self) -> LabelRow {
        LabelRow {
            search_key: self.search_key.clone(),
            entity_id: self.entity_id,
            external_id: self.external_id,
            title: self.title.clone(),
            weight: self.weight(),
        }
    }
}

impl From<LabelRow> for Label {
    fn from(row: LabelRow) -> Self {
        Label::new(row.search_key, row.entity_id, row.external_id, row.title, row.weight)
    }
}

/// Plain label row as read from / written to the persistent store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRow {
    pub search_key: SearchKey,
    pub entity_id: EntityId,
    pub external_id: ExternalId,
    pub title: Title,
    pub weight: u64,
}

/// Per-entity detail record resolved through the metadata cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub entity_id: EntityId,
    pub external_id: ExternalId,
    pub title: Title,
    pub developer: String,
    pub publisher: String,
    pub genre: String,
    pub release_date: ReleaseDate,
    /// Monotonic: only ever goes from false to true
    pub verified: bool,
    /// Once set, automatic enrichment never overwrites the detail fields
    pub manually_modified: bool,
}

impl DetailRecord {
    /// Fresh, unverified record as created by ingestion
    pub fn unverified(entity_id: EntityId, external_id: ExternalId, title: Title) -> Self {
        Self {
            entity_id,
            external_id,
            title,
            developer: String::new(),
            publisher: String::new(),
            genre: String::new(),
            release_date: ReleaseDate::UNKNOWN,
            verified: false,
            manually_modified: false,
        }
    }

    /// Whether the external authority should be consulted for this record
    pub fn needs_enrichment(&self) -> bool {
        !self.verified && !self.manually_modified
    }
}

/// A label/detail pair produced by ingestion and committed as one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCatalogEntry {
    pub label: LabelRow,
    pub detail: DetailRecord,
}

impl NewCatalogEntry {
    pub fn new(search_key: SearchKey, entity_id: EntityId, external_id: ExternalId, title: Title) -> Self {
        Self {
            detail: DetailRecord::unverified(entity_id, external_id, title.clone()),
            label: LabelRow {
                search_key,
                entity_id,
                external_id,
                title,
                weight: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_key_rejects_blank() {
        assert!(SearchKey::new("").is_err());
        assert!(SearchKey::new("  ").is_err());
        assert_eq!(SearchKey::new("portal00").unwrap().as_str(), "portal00");
    }

    #[test]
    fn test_search_key_serde_validates() {
        let ok: SearchKey = serde_json::from_str("\"portal00\"").unwrap();
        assert_eq!(ok.as_str(), "portal00");
        assert!(serde_json::from_str::<SearchKey>("\"Bad Key\"").is_err());
    }

    #[test]
    fn test_title_strips_line_breaks() {
        let title = Title::new("  Half-Life\r\n").unwrap();
        assert_eq!(title.as_str(), "Half-Life");
    }

    #[test]
    fn test_release_date_from_date() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        assert_eq!(ReleaseDate::from_date(date).get(), 20240115);
        assert!(!ReleaseDate::UNKNOWN.is_known());
    }

    #[test]
    fn test_label_weight_is_mutable() {
        let label = Label::new(
            SearchKey::new("portal00").unwrap(),
            EntityId(1),
            ExternalId(400),
            Title::new("Portal").unwrap(),
            10,
        );
        label.set_weight(99);
        assert_eq!(label.weight(), 99);
        assert_eq!(label.snapshot().weight, 99);
    }

    #[test]
    fn test_needs_enrichment() {
        let mut record = DetailRecord::unverified(EntityId(1), ExternalId(2), Title::new("X").unwrap());
        assert!(record.needs_enrichment());
        record.manually_modified = true;
        assert!(!record.needs_enrichment());
        record.manually_modified = false;
        record.verified = true;
        assert!(!record.needs_enrichment());
    }
}
