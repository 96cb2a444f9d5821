// Label Index - authoritative in-memory catalog
//
// Keyed by search key and by entity id. Built once from a store snapshot and
// read-mostly afterwards; the only post-load write is a label's weight.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::observability::{log_operation, Operation, OperationContext};
use crate::query::BooleanQuery;
use crate::types::{EntityId, Label, LabelRow, SearchKey};

/// Snapshot violates the catalog's uniqueness invariants
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    #[error("search key {0} appears more than once")]
    DuplicateKey(SearchKey),

    #[error("entity id {0} appears more than once")]
    DuplicateEntity(EntityId),
}

#[derive(Debug, Default)]
pub struct LabelIndex {
    by_key: HashMap<SearchKey, Arc<Label>>,
    by_entity: HashMap<EntityId, Arc<Label>>,
}

impl LabelIndex {
    /// Build the index from store rows, rejecting duplicate keys or entity ids
    pub fn from_rows(rows: impl IntoIterator<Item = LabelRow>) -> Result<Self, IndexError> {
        let mut index = Self::default();
        for row in rows {
            index.insert(Arc::new(Label::from(row)))?;
        }
        Ok(index)
    }

    fn insert(&mut self, label: Arc<Label>) -> Result<(), IndexError> {
        if self.by_key.contains_key(label.search_key()) {
            return Err(IndexError::DuplicateKey(label.search_key().clone()));
        }
        if self.by_entity.contains_key(&label.entity_id()) {
            return Err(IndexError::DuplicateEntity(label.entity_id()));
        }
        self.by_entity.insert(label.entity_id(), Arc::clone(&label));
        self.by_key.insert(label.search_key().clone(), label);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn labels(&self) -> impl Iterator<Item = &Arc<Label>> {
        self.by_key.values()
    }

    /// Exact lookup by search key (case-insensitive on the input side)
    pub fn by_key(&self, key: &str) -> Option<Arc<Label>> {
        let key = SearchKey::new(key.trim().to_lowercase()).ok()?;
        self.by_key.get(&key).cloned()
    }

    pub fn by_entity_id(&self, id: EntityId) -> Option<Arc<Label>> {
        self.by_entity.get(&id).cloned()
    }

    /// Update the live weight of a label. Returns false if the id is unknown.
    pub fn set_weight(&self, id: EntityId, weight: u64) -> bool {
        match self.by_entity.get(&id) {
            Some(label) => {
                label.set_weight(weight);
                debug!(entity_id = %id, weight, "Label weight updated");
                true
            }
            None => false,
        }
    }

    /// Every label matching the boolean query, best weight first.
    ///
    /// Blank or empty queries return nothing. Ties are broken by ascending
    /// entity id so results are reproducible.
    pub fn full_search(&self, raw_query: &str) -> Vec<Arc<Label>> {
        let ctx = OperationContext::new("index.full_search");
        let Some(query) = BooleanQuery::parse(raw_query) else {
            return Vec::new();
        };

        // Read each weight once so the sort key is stable while weights move
        let mut hits: Vec<(u64, Arc<Label>)> = self
            .by_key
            .iter()
            .filter(|(key, _)| query.matches(key.as_str()))
            .map(|(_, label)| (label.weight(), Arc::clone(label)))
            .collect();
        hits.sort_by_key(|(weight, label)| (Reverse(*weight), label.entity_id()));

        log_operation::<String>(
            &ctx,
            &Operation::FullSearch {
                query: raw_query.to_string(),
                result_count: hits.len(),
            },
            &Ok(()),
        );

        hits.into_iter().map(|(_, label)| label).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExternalId, Title};

    fn row(key: &str, id: i64, weight: u64) -> LabelRow {
        LabelRow {
            search_key: SearchKey::new(key).unwrap(),
            entity_id: EntityId(id),
            external_id: ExternalId(id + 1000),
            title: Title::new(key).unwrap(),
            weight,
        }
    }

    fn sample() -> LabelIndex {
        LabelIndex::from_rows(vec![
            row("halflife00", 1, 90),
            row("halflife200", 2, 95),
            row("portal00", 3, 80),
            row("portal200", 4, 99),
            row("halfmoon00", 5, 10),
        ])
        .unwrap()
    }

    fn ids(labels: &[Arc<Label>]) -> Vec<i64> {
        labels.iter().map(|l| l.entity_id().get()).collect()
    }

    #[test]
    fn test_keyed_lookups() {
        let index = sample();
        assert_eq!(index.by_key("portal00").unwrap().entity_id(), EntityId(3));
        assert_eq!(index.by_key(" PORTAL00 ").unwrap().entity_id(), EntityId(3));
        assert!(index.by_key("missing00").is_none());
        assert!(index.by_key("").is_none());
        assert_eq!(index.by_entity_id(EntityId(5)).unwrap().search_key().as_str(), "halfmoon00");
        assert!(index.by_entity_id(EntityId(42)).is_none());
    }

    #[test]
    fn test_duplicates_rejected() {
        let err = LabelIndex::from_rows(vec![row("a00", 1, 0), row("a00", 2, 0)]).unwrap_err();
        assert!(matches!(err, IndexError::DuplicateKey(_)));
        let err = LabelIndex::from_rows(vec![row("a00", 1, 0), row("b00", 1, 0)]).unwrap_err();
        assert_eq!(err, IndexError::DuplicateEntity(EntityId(1)));
    }

    #[test]
    fn test_full_search_or_and_ordering() {
        let index = sample();
        assert_eq!(ids(&index.full_search("half life")), vec![2, 1]);
        assert_eq!(ids(&index.full_search("life, portal")), vec![4, 2, 1, 3]);
        assert_eq!(ids(&index.full_search("half")), vec![2, 1, 5]);
    }

    #[test]
    fn test_full_search_blank_is_empty() {
        let index = sample();
        assert!(index.full_search("").is_empty());
        assert!(index.full_search("   ").is_empty());
        assert!(index.full_search(",").is_empty());
    }

    #[test]
    fn test_weight_update_reorders_search() {
        let index = sample();
        assert!(index.set_weight(EntityId(5), 1000));
        assert_eq!(ids(&index.full_search("half")), vec![5, 2, 1]);
        assert!(!index.set_weight(EntityId(77), 1));
    }

    #[test]
    fn test_ties_break_by_entity_id() {
        let index = LabelIndex::from_rows(vec![row("zeta00", 9, 5), row("zeta01", 3, 5), row("zeta02", 6, 5)])
            .unwrap();
        assert_eq!(ids(&index.full_search("zeta")), vec![3, 6, 9]);
    }
}
