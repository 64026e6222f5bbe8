use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An immutable key→value tag mapping.
///
/// Every operation returns a new set; inputs are never mutated. Empty keys
/// are dropped at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet(BTreeMap<String, String>);

/// A key pattern for ignore rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagPattern {
    Exact(String),
    Prefix(String),
}

impl TagPattern {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            TagPattern::Exact(k) => key == k,
            TagPattern::Prefix(p) => key.starts_with(p.as_str()),
        }
    }
}

/// Result of diffing an old tag set against a new one.
///
/// Applying remove, then add, then update transforms the old set into the
/// new one (modulo keys ignored before diffing).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub remove: TagSet,
    pub add: TagSet,
    pub update: TagSet,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty() && self.update.is_empty()
    }
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct from any sequence of key/value pairs, dropping empty keys.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .filter(|(k, _)| !k.is_empty())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Right-biased merge: `other` overrides `self` on key collisions.
    pub fn merge(&self, other: &TagSet) -> TagSet {
        let mut merged = self.0.clone();
        for (k, v) in &other.0 {
            merged.insert(k.clone(), v.clone());
        }
        TagSet(merged)
    }

    /// Remove keys matching any of the patterns.
    pub fn ignore(&self, patterns: &[TagPattern]) -> TagSet {
        TagSet(
            self.0
                .iter()
                .filter(|(k, _)| !patterns.iter().any(|p| p.matches(k)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Remove keys reserved by the cloud provider (prefix-based).
    pub fn ignore_system(&self, prefixes: &[&str]) -> TagSet {
        TagSet(
            self.0
                .iter()
                .filter(|(k, _)| !prefixes.iter().any(|p| k.starts_with(p)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Diff `self` (old) against `new`.
    ///
    /// Keys present only in old go to `remove`; keys present only in new go
    /// to `add`; keys present in both with a changed value go to `update`
    /// (carrying the new value). Ignore rules are applied by the caller
    /// before diffing, so ignored keys are preserved on the remote.
    pub fn diff(&self, new: &TagSet) -> TagDiff {
        let mut out = TagDiff::default();
        for (k, old_v) in &self.0 {
            match new.0.get(k) {
                None => {
                    out.remove.0.insert(k.clone(), old_v.clone());
                }
                Some(new_v) if new_v != old_v => {
                    out.update.0.insert(k.clone(), new_v.clone());
                }
                Some(_) => {}
            }
        }
        for (k, v) in &new.0 {
            if !self.0.contains_key(k) {
                out.add.0.insert(k.clone(), v.clone());
            }
        }
        out
    }

    /// Provider defaults ⊕ explicit tags, minus per-resource ignores.
    pub fn map_with(&self, defaults: &TagSet, ignores: &[TagPattern]) -> TagSet {
        defaults.merge(self).ignore(ignores)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}
