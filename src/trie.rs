// Autocomplete Trie - bounded-depth ranked prefix index
//
// Every node keeps its own capped top-K list of the labels whose key passes
// through it, so a lookup never walks below the node it lands on.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{EntityId, Label};
use crate::validation;

/// Depth and width limits of the trie
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrieConfig {
    /// Number of key characters that get their own node
    pub max_depth: usize,
    /// Size of each node's ranked list
    pub max_items: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_items: 5,
        }
    }
}

/// Label reference with the weight it was ranked under.
///
/// The weight is captured at insertion. Later weight changes do not reorder
/// existing lists until the trie is rebuilt.
#[derive(Debug, Clone)]
struct RankedEntry {
    weight: u64,
    label: Arc<Label>,
}

impl RankedEntry {
    fn rank_key(&self) -> (std::cmp::Reverse<u64>, EntityId) {
        (std::cmp::Reverse(self.weight), self.label.entity_id())
    }
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    top: Vec<RankedEntry>,
}

impl TrieNode {
    /// Offer a label to this node's ranked list
    fn offer(&mut self, entry: RankedEntry, max_items: usize) {
        // Same key again: only a better rank replaces it. Labels pruned from
        // a full node are gone, so a lower weight could not be ranked exactly.
        if let Some(existing) = self
            .top
            .iter_mut()
            .find(|e| e.label.search_key() == entry.label.search_key())
        {
            if entry.rank_key() < existing.rank_key() {
                *existing = entry;
                self.sort();
            }
            return;
        }

        if self.top.len() < max_items {
            self.top.push(entry);
            self.sort();
            return;
        }

        let beats_last = self
            .top
            .last()
            .is_some_and(|last| entry.rank_key() < last.rank_key());
        if beats_last {
            self.top.pop();
            self.top.push(entry);
            self.sort();
        }
    }

    fn sort(&mut self) {
        self.top.sort_by_key(RankedEntry::rank_key);
    }
}

/// Memory-bounded ranking trie answering prefix queries with a pre-ranked short list
#[derive(Debug)]
pub struct AutocompleteTrie {
    root: TrieNode,
    config: TrieConfig,
    node_count: usize,
    insert_count: usize,
}

impl Default for AutocompleteTrie {
    fn default() -> Self {
        Self::new(TrieConfig::default())
    }
}

impl AutocompleteTrie {
    pub fn new(config: TrieConfig) -> Self {
        Self {
            root: TrieNode::default(),
            config,
            node_count: 0,
            insert_count: 0,
        }
    }

    /// Build a trie from a set of labels, ranking each by its current weight
    pub fn build<'a>(config: TrieConfig, labels: impl IntoIterator<Item = &'a Arc<Label>>) -> Self {
        let mut trie = Self::new(config);
        for label in labels {
            trie.insert(Arc::clone(label));
        }
        trie
    }

    pub fn config(&self) -> TrieConfig {
        self.config
    }

    /// Number of nodes below the root
    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Number of insert calls served
    pub fn insert_count(&self) -> usize {
        self.insert_count
    }

    /// Insert a label.
    ///
    /// Every node on the path of the first `max_depth` key characters is offered
    /// the label, so each node holds the top-K of all labels sharing its prefix.
    /// Re-inserting a key never duplicates it. A higher weight moves it up; a
    /// lower weight is ignored and only takes effect through a rebuild.
    pub fn insert(&mut self, label: Arc<Label>) {
        let weight = label.weight();
        let max_items = self.config.max_items;
        let mut created = 0;

        let mut node = &mut self.root;
        for c in label.search_key().as_str().chars().take(self.config.max_depth) {
            node = node.children.entry(c).or_insert_with(|| {
                created += 1;
                TrieNode::default()
            });
            node.offer(
                RankedEntry {
                    weight,
                    label: Arc::clone(&label),
                },
                max_items,
            );
        }

        self.node_count += created;
        self.insert_count += 1;
    }

    /// Ranked labels for `prefix`, at most `max_items`, best first.
    ///
    /// The prefix is lowercased, trimmed and cut to `max_depth` characters, so
    /// a longer query cannot tell apart keys that only differ past that depth.
    /// Blank prefixes and unknown paths yield an empty list.
    pub fn lookup(&self, prefix: &str) -> Vec<Arc<Label>> {
        let Some(normalized) = validation::query::normalize(prefix) else {
            return Vec::new();
        };
        let key = validation::query::truncate_chars(&normalized, self.config.max_depth);

        let mut node = &self.root;
        for c in key.chars() {
            match node.children.get(&c) {
                Some(next) => node = next,
                None => return Vec::new(),
            }
        }

        node.top.iter().map(|e| Arc::clone(&e.label)).collect()
    }

    /// Check the per-node list invariants over the whole trie
    ///
    /// # Invariants
    /// - Every list has at most `max_items` entries
    /// - Every list is strictly ordered by (weight desc, entity id asc)
    /// - No key appears twice in one list
    pub fn verify_invariants(&self) -> Result<(), String> {
        let mut stack = vec![(String::new(), &self.root)];
        while let Some((path, node)) = stack.pop() {
            if node.top.len() > self.config.max_items {
                return Err(format!("node {path:?} holds {} entries", node.top.len()));
            }
            for pair in node.top.windows(2) {
                if pair[0].rank_key() >= pair[1].rank_key() {
                    return Err(format!(
                        "node {path:?} out of order: {} before {}",
                        pair[0].label.search_key(),
                        pair[1].label.search_key()
                    ));
                }
                if pair[0].label.search_key() == pair[1].label.search_key() {
                    return Err(format!("node {path:?} repeats {}", pair[0].label.search_key()));
                }
            }
            for (c, child) in &node.children {
                let mut child_path = path.clone();
                child_path.push(*c);
                stack.push((child_path, child));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExternalId, SearchKey, Title};

    fn label(key: &str, id: i64, weight: u64) -> Arc<Label> {
        Arc::new(Label::new(
            SearchKey::new(key).unwrap(),
            EntityId(id),
            ExternalId(id * 10),
            Title::new(key).unwrap(),
            weight,
        ))
    }

    fn keys(labels: &[Arc<Label>]) -> Vec<&str> {
        labels.iter().map(|l| l.search_key().as_str()).collect()
    }

    #[test]
    fn test_lookup_ranks_by_weight() {
        let mut trie = AutocompleteTrie::default();
        trie.insert(label("portal00", 1, 10));
        trie.insert(label("portal201", 2, 50));
        trie.insert(label("postal00", 3, 30));

        assert_eq!(keys(&trie.lookup("po")), vec!["portal201", "postal00", "portal00"]);
        assert_eq!(keys(&trie.lookup("por")), vec!["portal201", "portal00"]);
        assert!(trie.lookup("pz").is_empty());
    }

    #[test]
    fn test_lookup_normalizes_query() {
        let mut trie = AutocompleteTrie::default();
        trie.insert(label("portal00", 1, 10));
        assert_eq!(keys(&trie.lookup("  PoRt ")), vec!["portal00"]);
        assert!(trie.lookup("").is_empty());
        assert!(trie.lookup("   ").is_empty());
    }

    #[test]
    fn test_list_is_capped_and_keeps_best() {
        let mut trie = AutocompleteTrie::new(TrieConfig {
            max_depth: 8,
            max_items: 3,
        });
        for (i, w) in [5u64, 1, 9, 3, 7].iter().enumerate() {
            trie.insert(label(&format!("game{i}"), i as i64, *w));
        }
        let weights: Vec<u64> = trie.lookup("g").iter().map(|l| l.weight()).collect();
        assert_eq!(weights, vec![9, 7, 5]);
        trie.verify_invariants().unwrap();
    }

    #[test]
    fn test_equal_weight_replacement_needs_better_rank() {
        let mut trie = AutocompleteTrie::new(TrieConfig {
            max_depth: 8,
            max_items: 2,
        });
        trie.insert(label("aa", 5, 10));
        trie.insert(label("ab", 6, 10));
        // Same weight, lower id ranks first and displaces id 6
        trie.insert(label("ac", 1, 10));
        // Same weight, higher id is discarded
        trie.insert(label("ad", 9, 10));

        let ids: Vec<i64> = trie.lookup("a").iter().map(|l| l.entity_id().get()).collect();
        assert_eq!(ids, vec![1, 5]);
    }

    #[test]
    fn test_reinsert_does_not_duplicate() {
        let mut trie = AutocompleteTrie::default();
        let portal = label("portal00", 1, 10);
        trie.insert(Arc::clone(&portal));
        trie.insert(Arc::clone(&portal));
        trie.insert(portal);

        assert_eq!(trie.lookup("p").len(), 1);
        assert_eq!(trie.node_count(), 8);
        trie.verify_invariants().unwrap();
    }

    #[test]
    fn test_depth_truncation_conflates_long_queries() {
        let mut trie = AutocompleteTrie::default();
        trie.insert(label("abcdefghxx", 1, 1));
        trie.insert(label("abcdefghyy", 2, 2));

        // Both keys share the first 8 characters; the 9th is not indexed
        assert_eq!(keys(&trie.lookup("abcdefghx")), vec!["abcdefghyy", "abcdefghxx"]);
        assert_eq!(trie.node_count(), 8);
    }

    #[test]
    fn test_stale_weight_until_rebuild() {
        let a = label("alpha00", 1, 10);
        let b = label("alpine00", 2, 20);
        let trie = AutocompleteTrie::build(TrieConfig::default(), [&a, &b]);

        a.set_weight(100);
        assert_eq!(keys(&trie.lookup("al")), vec!["alpine00", "alpha00"]);

        let rebuilt = AutocompleteTrie::build(TrieConfig::default(), [&a, &b]);
        assert_eq!(keys(&rebuilt.lookup("al")), vec!["alpha00", "alpine00"]);
    }

    #[test]
    fn test_weight_decrease_waits_for_rebuild() {
        let config = TrieConfig {
            max_depth: 8,
            max_items: 2,
        };
        let mut trie = AutocompleteTrie::new(config);
        trie.insert(label("aa", 1, 10));
        trie.insert(label("ab", 2, 20));
        // Pruned from the full "a" node
        trie.insert(label("ac", 3, 5));

        let lowered = label("ab", 2, 1);
        trie.insert(Arc::clone(&lowered));
        assert_eq!(keys(&trie.lookup("a")), vec!["ab", "aa"]);
        trie.verify_invariants().unwrap();

        // A raise is applied in place
        trie.insert(label("aa", 1, 30));
        assert_eq!(keys(&trie.lookup("a")), vec!["aa", "ab"]);

        let rebuilt = AutocompleteTrie::build(config, [&label("aa", 1, 30), &lowered, &label("ac", 3, 5)]);
        assert_eq!(keys(&rebuilt.lookup("a")), vec!["aa", "ac"]);
    }
}
