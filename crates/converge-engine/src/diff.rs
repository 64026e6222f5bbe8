use std::collections::BTreeMap;
use std::fmt::Write as _;

use converge_core::value::set_eq;
use converge_core::{Kind, Schema, Value};

use crate::data::ResourceData;
use crate::resource::CustomizeDiffFn;

/// One attribute's pending change.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrChange {
    pub old: Value,
    pub new: Value,
    pub force_new: bool,
}

/// The set of attribute changes between observed and desired state.
#[derive(Debug, Clone, Default)]
pub struct InstanceDiff {
    changes: BTreeMap<String, AttrChange>,
}

impl InstanceDiff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// A ForceNew attribute changed: the whole diff is a replacement.
    pub fn requires_replace(&self) -> bool {
        self.changes.values().any(|c| c.force_new)
    }

    pub fn changes(&self) -> impl Iterator<Item = (&str, &AttrChange)> {
        self.changes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&AttrChange> {
        self.changes.get(name)
    }

    pub fn set_change(&mut self, name: impl Into<String>, old: Value, new: Value) {
        self.changes.insert(
            name.into(),
            AttrChange {
                old,
                new,
                force_new: false,
            },
        );
    }

    pub fn clear_change(&mut self, name: &str) {
        self.changes.remove(name);
    }

    /// Mark an existing change as identity-invalidating.
    pub fn set_force_new(&mut self, name: &str) {
        if let Some(change) = self.changes.get_mut(name) {
            change.force_new = true;
        }
    }

    /// Human-readable rendering; sensitive attributes are redacted.
    pub fn render(&self, schema: &Schema) -> String {
        let mut out = String::new();
        for (name, change) in &self.changes {
            let sensitive = schema.get(name).map(|e| e.sensitive).unwrap_or(false);
            let marker = if change.force_new { " # forces replacement" } else { "" };
            if sensitive {
                let _ = writeln!(out, "  {name}: (sensitive) -> (sensitive){marker}");
            } else {
                let _ = writeln!(
                    out,
                    "  {name}: {} -> {}{marker}",
                    change.old.to_json(),
                    change.new.to_json()
                );
            }
        }
        out
    }
}

/// Compare observed state against desired configuration, attribute by
/// attribute.
///
/// Both sides are normalized before comparison; sets compare by the
/// entry's set-hash, maps key-by-key, lists position-by-position. An
/// optional+computed attribute left unset in config keeps whatever the
/// provider chose. The customize hook runs once, after base computation.
pub fn compute_diff(
    schema: &Schema,
    data: &ResourceData,
    desired: &BTreeMap<String, Value>,
    customize: Option<&CustomizeDiffFn>,
) -> InstanceDiff {
    let mut diff = InstanceDiff::default();

    for (name, entry) in schema {
        if entry.read_only() {
            continue;
        }

        let new = match desired.get(name) {
            Some(v) => v.clone(),
            None => match &entry.default {
                Some(d) => d.clone(),
                None if entry.computed => continue,
                None => Value::Null,
            },
        };
        let old = data.get(name);

        let old = entry.normalize(old);
        let new = entry.normalize(new);

        let equal = match (&entry.kind, &old, &new) {
            (Kind::Set(_), Value::Set(a), Value::Set(b)) => match &entry.set_hash {
                Some(hash) => set_eq(a, b, &**hash),
                None => a == b,
            },
            _ => old == new,
        };
        if !equal {
            diff.changes.insert(
                name.clone(),
                AttrChange {
                    old,
                    new,
                    force_new: entry.force_new,
                },
            );
        }
    }

    if let Some(hook) = customize {
        hook(data, &mut diff);
    }

    diff
}
