// Boolean keyword query: comma-separated OR-groups of whitespace-separated AND-terms.
//
// `"half life, portal"` matches keys containing both "half" and "life", or
// keys containing "portal". Matching is plain substring containment against
// the normalized search key.

use crate::validation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BooleanQuery {
    groups: Vec<Vec<String>>,
}

impl BooleanQuery {
    /// Parse a raw query.
    ///
    /// Empty terms and empty groups are discarded. Returns `None` when nothing
    /// is left, so blank input never turns into "match everything".
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = validation::query::normalize(raw)?;

        let groups: Vec<Vec<String>> = normalized
            .split(',')
            .map(|group| {
                group
                    .split_whitespace()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|terms| !terms.is_empty())
            .collect();

        if groups.is_empty() {
            None
        } else {
            Some(Self { groups })
        }
    }

    pub fn groups(&self) -> &[Vec<String>] {
        &self.groups
    }

    /// True when every term of at least one group is a substring of `key`
    pub fn matches(&self, key: &str) -> bool {
        self.groups
            .iter()
            .any(|terms| terms.iter().all(|term| key.contains(term.as_str())))
    }
}
