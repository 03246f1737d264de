//! Normalized name sets for allowlists

use inventory::normalize_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Set of container names compared after one normalization rule
/// (trim, leading `/` stripped, lowercase), applied on insert and lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct NormalizedSet(BTreeSet<String>);

impl NormalizedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list
    pub fn from_csv(raw: &str) -> Self {
        raw.split(',').collect()
    }

    pub fn insert(&mut self, name: &str) -> bool {
        let name = normalize_name(name);
        if name.is_empty() {
            return false;
        }
        self.0.insert(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        let name = normalize_name(name);
        !name.is_empty() && self.0.contains(&name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for NormalizedSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = NormalizedSet::new();
        for name in iter {
            set.insert(name.as_ref());
        }
        set
    }
}

impl From<Vec<String>> for NormalizedSet {
    fn from(names: Vec<String>) -> Self {
        names.into_iter().collect()
    }
}

impl From<NormalizedSet> for Vec<String> {
    fn from(set: NormalizedSet) -> Self {
        set.0.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_on_both_sides() {
        let set = NormalizedSet::from_csv(" Batch-Job , /cron ,,");
        assert_eq!(set.len(), 2);
        assert!(set.contains("batch-job"));
        assert!(set.contains("/BATCH-JOB "));
        assert!(set.contains("Cron"));
        assert!(!set.contains(""));
    }
}
