// Name allocation for new catalog entries
//
// Produces the search key, the index's primary key, from a raw title:
// NFKC-fold, keep letters and digits of any script, lowercase, cut to 30
// characters, then append the first free two-digit counter (00..=99).

use std::collections::{HashMap, HashSet};
use tracing::warn;
use unicode_normalization::UnicodeNormalization;

use crate::types::{ExternalId, SearchKey};
use crate::validation::ValidationError;

/// Characters kept from the title before the counter suffix
pub const BASE_LENGTH: usize = 30;

/// Highest counter that fits the two-digit suffix
pub const MAX_SUFFIX: u32 = 99;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// Every counter 00..=99 is taken for this base; the record must be skipped
    #[error("all {} suffixes for base {base:?} are taken", MAX_SUFFIX + 1)]
    Exhausted { base: String },

    /// The base produced a key the index would not accept
    #[error("base {base:?} does not form a valid search key: {source}")]
    Invalid {
        base: String,
        #[source]
        source: ValidationError,
    },
}

/// Normalized base name of a title: may be empty if the title has no letters or digits
pub fn normalize_base(raw_title: &str) -> String {
    raw_title
        .nfkc()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .take(BASE_LENGTH)
        .collect()
}

/// Stand-in base for titles with nothing indexable in them
fn placeholder_base(external_id: ExternalId) -> String {
    format!("untitled{}", external_id.get().unsigned_abs())
        .chars()
        .take(BASE_LENGTH)
        .collect()
}

/// Hands out unique search keys for one ingestion run
#[derive(Debug, Default)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with keys already present in the store (compared case-insensitively)
    pub fn with_existing<I, S>(existing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            used: existing.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn is_used(&self, key: &str) -> bool {
        self.used.contains(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Allocate a key for `raw_title`, registering it as used.
    ///
    /// Fails when all 100 suffixes of the base are taken. The failure affects
    /// this record alone; the allocator stays usable.
    pub fn allocate(&mut self, raw_title: &str, external_id: ExternalId) -> Result<SearchKey, AllocationError> {
        let mut base = normalize_base(raw_title);
        if base.is_empty() {
            base = placeholder_base(external_id);
        }
        self.allocate_base(&base)
    }

    /// Allocate a key for an already normalized base
    pub fn allocate_base(&mut self, base: &str) -> Result<SearchKey, AllocationError> {
        for counter in 0..=MAX_SUFFIX {
            let candidate = format!("{base}{counter:02}");
            if self.used.contains(&candidate) {
                continue;
            }
            let key = SearchKey::new(candidate.clone()).map_err(|source| AllocationError::Invalid {
                base: base.to_string(),
                source,
            })?;
            self.used.insert(candidate);
            return Ok(key);
        }

        warn!(base, "Search key suffixes exhausted");
        Err(AllocationError::Exhausted {
            base: base.to_string(),
        })
    }
}

/// Narrow denylist for base names known to explode into huge families of
/// near-identical entries (e.g. one product with thousands of add-ons).
///
/// Only listed bases are affected: the first occurrence in a run is admitted,
/// later ones are suppressed. This is not a general duplicate detector; bases
/// not on the list are never suppressed. State belongs to one allocation run.
#[derive(Debug, Clone, Default)]
pub struct OneEntryOnlyFilter {
    admitted: HashMap<String, bool>,
}

impl OneEntryOnlyFilter {
    /// Families observed in the catalog source so far
    pub const DEFAULT_BASES: &'static [&'static str] = &[
        "rocksmith2014editionremastered",
        "jigsawpuzzlepackpixelpuzzlesul",
        "thelegendofheroestrailsofcolds",
        "fantasygroundspathfinderrpgpat",
    ];

    pub fn new<I, S>(bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            admitted: bases.into_iter().map(|b| (b.into(), false)).collect(),
        }
    }

    pub fn with_default_bases() -> Self {
        Self::new(Self::DEFAULT_BASES.iter().copied())
    }

    pub fn is_listed(&self, base: &str) -> bool {
        self.admitted.contains_key(base)
    }

    /// True if an entry with this normalized base must be dropped.
    /// The first listed occurrence is admitted and remembered.
    pub fn should_skip(&mut self, base: &str) -> bool {
        match self.admitted.get_mut(base) {
            None => false,
            Some(seen) if *seen => true,
            Some(seen) => {
                *seen = true;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_gets_next_counter() {
        let mut allocator = NameAllocator::new();
        let first = allocator.allocate("Foo Bar!!!", ExternalId(1)).unwrap();
        let second = allocator.allocate("foo*bar", ExternalId(2)).unwrap();
        assert_eq!(first.as_str(), "foobar00");
        assert_eq!(second.as_str(), "foobar01");
    }

    #[test]
    fn test_full_width_and_scripts() {
        assert_eq!(normalize_base("ＦＯＯ　ＢＡＲ"), "foobar");
        assert_eq!(normalize_base("디아블로 II: 레저렉션"), "디아블로ii레저렉션");
        assert_eq!(normalize_base("Café ²"), "café2");
    }

    #[test]
    fn test_letters_without_lowercase_form_are_kept() {
        assert_eq!(normalize_base("🅐🅑 Game"), "🅐🅑game");
        let mut allocator = NameAllocator::new();
        let key = allocator.allocate("🅐🅑 Game", ExternalId(1)).unwrap();
        assert_eq!(key.as_str(), "🅐🅑game00");
    }

    #[test]
    fn test_base_is_truncated() {
        let base = normalize_base(&"x".repeat(50));
        assert_eq!(base.chars().count(), BASE_LENGTH);
        let mut allocator = NameAllocator::new();
        let key = allocator.allocate(&"x".repeat(50), ExternalId(1)).unwrap();
        assert_eq!(key.as_str().chars().count(), BASE_LENGTH + 2);
    }

    #[test]
    fn test_empty_title_uses_placeholder() {
        let mut allocator = NameAllocator::new();
        let key = allocator.allocate("!!! ???", ExternalId(730)).unwrap();
        assert_eq!(key.as_str(), "untitled73000");
    }

    #[test]
    fn test_existing_keys_are_case_insensitive() {
        let mut allocator = NameAllocator::with_existing(["FooBar00"]);
        assert!(allocator.is_used("foobar00"));
        assert_eq!(allocator.allocate("foobar", ExternalId(1)).unwrap().as_str(), "foobar01");
    }

    #[test]
    fn test_exhaustion_after_hundred_keys() {
        let mut allocator = NameAllocator::new();
        for i in 0..=MAX_SUFFIX {
            let key = allocator.allocate("Same Name", ExternalId(i as i64)).unwrap();
            assert_eq!(key.as_str(), format!("samename{i:02}"));
        }
        let err = allocator.allocate("Same Name", ExternalId(500)).unwrap_err();
        assert_eq!(
            err,
            AllocationError::Exhausted {
                base: "samename".to_string()
            }
        );
        // Other bases are unaffected
        assert!(allocator.allocate("Other", ExternalId(501)).is_ok());
    }

    #[test]
    fn test_one_entry_only_filter() {
        let mut filter = OneEntryOnlyFilter::with_default_bases();
        let base = normalize_base("Rocksmith® 2014 Edition – Remastered – Some Song");
        assert_eq!(base, "rocksmith2014editionremastered");
        assert!(!filter.should_skip(&base));
        assert!(filter.should_skip(&base));
        assert!(filter.should_skip(&base));
        assert!(!filter.should_skip("portal"));
        assert!(!filter.should_skip("portal"));
    }

    #[test]
    fn test_filter_state_is_per_run() {
        let mut first = OneEntryOnlyFilter::new(["abc"]);
        assert!(!first.should_skip("abc"));
        assert!(first.should_skip("abc"));

        let mut second = OneEntryOnlyFilter::new(["abc"]);
        assert!(!second.should_skip("abc"));
    }
}
