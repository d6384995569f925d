use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Atomic fact attached to a key, with the chunk it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicFact {
    pub atom_fact: String,
    pub chunk_id: usize,
}

impl AtomicFact {
    pub fn new(atom_fact: impl Into<String>, chunk_id: usize) -> Self {
        Self {
            atom_fact: atom_fact.into(),
            chunk_id,
        }
    }
}

/// Key → fact list mapping that remembers key insertion order.
///
/// Merges are order sensitive (facts of a later key are appended after an
/// earlier one), so iteration always follows first insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactTable {
    keys: Vec<String>,
    facts: Vec<Vec<AtomicFact>>,
    index: HashMap<String, usize>,
}

impl FactTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&[AtomicFact]> {
        self.index.get(key).map(|&idx| self.facts[idx].as_slice())
    }

    /// Append one fact under `key`.
    pub fn push(&mut self, key: impl Into<String>, fact: AtomicFact) {
        let idx = self.slot(key.into());
        self.facts[idx].push(fact);
    }

    /// Append a list of facts under `key`, keeping their order.
    pub fn extend(&mut self, key: impl Into<String>, facts: impl IntoIterator<Item = AtomicFact>) {
        let idx = self.slot(key.into());
        self.facts[idx].extend(facts);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AtomicFact])> {
        self.keys
            .iter()
            .zip(self.facts.iter())
            .map(|(k, f)| (k.as_str(), f.as_slice()))
    }

    /// Total number of facts across all keys.
    pub fn fact_count(&self) -> usize {
        self.facts.iter().map(Vec::len).sum()
    }

    /// Re-key the table, merging fact lists of keys that map to the same new key.
    ///
    /// Keys mapped to an empty string are dropped.
    pub fn regroup(self, mut rekey: impl FnMut(&str) -> String) -> FactTable {
        let mut merged = FactTable::new();
        for (key, facts) in self.keys.into_iter().zip(self.facts) {
            let new_key = rekey(&key);
            if new_key.is_empty() {
                continue;
            }
            merged.extend(new_key, facts);
        }
        merged
    }

    fn slot(&mut self, key: String) -> usize {
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.keys.len();
        self.index.insert(key.clone(), idx);
        self.keys.push(key);
        self.facts.push(Vec::new());
        idx
    }
}

impl IntoIterator for FactTable {
    type Item = (String, Vec<AtomicFact>);
    type IntoIter = std::iter::Zip<std::vec::IntoIter<String>, std::vec::IntoIter<Vec<AtomicFact>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys.into_iter().zip(self.facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_insertion_order() {
        let mut table = FactTable::new();
        table.push("b", AtomicFact::new("one", 0));
        table.push("a", AtomicFact::new("two", 0));
        table.push("b", AtomicFact::new("three", 1));

        assert_eq!(table.keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(table.get("b").unwrap().len(), 2);
        assert_eq!(table.fact_count(), 3);
    }

    #[test]
    fn regroup_concatenates_in_processing_order() {
        let mut table = FactTable::new();
        table.push("apples", AtomicFact::new("first", 0));
        table.push("pear", AtomicFact::new("second", 0));
        table.push("apple", AtomicFact::new("third", 1));

        let merged = table.regroup(|k| k.trim_end_matches('s').to_string());

        let apple: Vec<&str> = merged
            .get("apple")
            .unwrap()
            .iter()
            .map(|f| f.atom_fact.as_str())
            .collect();
        assert_eq!(apple, vec!["first", "third"]);
        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["apple", "pear"]);
    }

    #[test]
    fn regroup_drops_empty_keys() {
        let mut table = FactTable::new();
        table.push("!!", AtomicFact::new("noise", 0));
        table.push("ok", AtomicFact::new("fact", 0));

        let merged = table.regroup(|k| k.replace('!', ""));
        assert_eq!(merged.len(), 1);
        assert!(merged.contains_key("ok"));
    }

    #[test]
    fn duplicate_facts_are_preserved() {
        let mut table = FactTable::new();
        table.push("k", AtomicFact::new("same", 0));
        table.push("k", AtomicFact::new("same", 0));
        assert_eq!(table.get("k").unwrap().len(), 2);
    }
}
