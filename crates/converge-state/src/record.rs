//! Persisted instance state.
//!
//! Attributes are stored flattened: one string entry per leaf value, with
//! dotted paths for nesting (`tags.Name`, `zones.0`). Collections carry a
//! count marker (`zones.#` for lists and sets, `tags.%` for maps) so a
//! record can be walked without its schema. Expansion back into typed
//! values does use the schema, which is also what re-types scalars.

use std::collections::BTreeMap;

use converge_core::{Kind, Schema, Value};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Current state file format version. Files written by a newer build are
/// refused rather than guessed at.
pub const STATE_VERSION: u32 = 1;

/// One resource instance as persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub id: String,
    /// The resource type's schema version at write time. Binding crates
    /// use this to run their upgrade hooks on older records.
    pub schema_version: u32,
    pub attributes: BTreeMap<String, String>,
}

impl InstanceRecord {
    pub fn new(
        id: impl Into<String>,
        schema_version: u32,
        attrs: &BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            schema_version,
            attributes: flatten(attrs),
        }
    }

    /// Re-type the flattened attributes against `schema`.
    pub fn attrs(&self, schema: &Schema) -> Result<BTreeMap<String, Value>, StateError> {
        expand(schema, &self.attributes)
    }
}

/// The whole persisted state: every managed instance, keyed by resource
/// type then id, plus a serial that increments on every flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    pub serial: u64,
    pub resources: BTreeMap<String, BTreeMap<String, InstanceRecord>>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            resources: BTreeMap::new(),
        }
    }
}

impl StateFile {
    pub fn get(&self, resource_type: &str, id: &str) -> Option<&InstanceRecord> {
        self.resources.get(resource_type)?.get(id)
    }

    pub fn put(&mut self, resource_type: &str, record: InstanceRecord) {
        self.resources
            .entry(resource_type.to_string())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Remove an instance; empty type buckets are pruned.
    pub fn remove(&mut self, resource_type: &str, id: &str) -> Option<InstanceRecord> {
        let bucket = self.resources.get_mut(resource_type)?;
        let removed = bucket.remove(id);
        if bucket.is_empty() {
            self.resources.remove(resource_type);
        }
        removed
    }

    pub fn instances(&self, resource_type: &str) -> impl Iterator<Item = &InstanceRecord> {
        self.resources
            .get(resource_type)
            .into_iter()
            .flat_map(|bucket| bucket.values())
    }

    pub fn bump(&mut self) {
        self.serial += 1;
    }

    /// Refuse files written by a newer build.
    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version > STATE_VERSION {
            return Err(StateError::VersionAhead {
                found: self.version,
                supported: STATE_VERSION,
            });
        }
        Ok(())
    }
}

/// Flatten typed attributes into dotted-path string entries. Nulls are
/// omitted entirely.
pub fn flatten(attrs: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in attrs {
        flatten_into(name, value, &mut out);
    }
    out
}

fn flatten_into(key: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Null => {}
        Value::String(s) => {
            out.insert(key.to_string(), s.clone());
        }
        Value::Int(i) => {
            out.insert(key.to_string(), i.to_string());
        }
        Value::Bool(b) => {
            out.insert(key.to_string(), b.to_string());
        }
        Value::Float(f) => {
            out.insert(key.to_string(), f.to_string());
        }
        Value::List(items) | Value::Set(items) => {
            out.insert(format!("{key}.#"), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                flatten_into(&format!("{key}.{i}"), item, out);
            }
        }
        Value::Map(entries) => {
            out.insert(format!("{key}.%"), entries.len().to_string());
            for (k, v) in entries {
                flatten_into(&format!("{key}.{k}"), v, out);
            }
        }
        Value::Object(fields) => {
            for (k, v) in fields {
                flatten_into(&format!("{key}.{k}"), v, out);
            }
        }
    }
}

/// Re-type a flattened record against its schema. Attributes with no
/// entries in the record come back absent, not Null.
pub fn expand(
    schema: &Schema,
    flat: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, Value>, StateError> {
    let mut out = BTreeMap::new();
    for (name, entry) in schema {
        if let Some(value) = expand_value(&entry.kind, entry.object.as_deref(), name, flat)? {
            out.insert(name.clone(), value);
        }
    }
    Ok(out)
}

fn corrupt(key: &str, reason: impl Into<String>) -> StateError {
    StateError::Corrupt {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn expand_value(
    kind: &Kind,
    nested: Option<&Schema>,
    key: &str,
    flat: &BTreeMap<String, String>,
) -> Result<Option<Value>, StateError> {
    match kind {
        Kind::String => Ok(flat.get(key).map(|s| Value::String(s.clone()))),
        Kind::Int => flat
            .get(key)
            .map(|s| {
                s.parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| corrupt(key, format!("{s:?} is not an integer")))
            })
            .transpose(),
        Kind::Bool => flat
            .get(key)
            .map(|s| {
                s.parse::<bool>()
                    .map(Value::Bool)
                    .map_err(|_| corrupt(key, format!("{s:?} is not a bool")))
            })
            .transpose(),
        Kind::Float => flat
            .get(key)
            .map(|s| {
                s.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| corrupt(key, format!("{s:?} is not a float")))
            })
            .transpose(),
        Kind::List(elem) | Kind::Set(elem) => {
            let marker = format!("{key}.#");
            let Some(count) = flat.get(&marker) else {
                return Ok(None);
            };
            let count: usize = count
                .parse()
                .map_err(|_| corrupt(&marker, format!("{count:?} is not a count")))?;
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                let item_key = format!("{key}.{i}");
                match expand_value(elem, nested, &item_key, flat)? {
                    Some(item) => items.push(item),
                    None => return Err(corrupt(&item_key, "missing collection element")),
                }
            }
            Ok(Some(match kind {
                Kind::Set(_) => Value::Set(items),
                _ => Value::List(items),
            }))
        }
        Kind::Map(elem) => {
            let marker = format!("{key}.%");
            if !flat.contains_key(&marker) {
                return Ok(None);
            }
            let prefix = format!("{key}.");
            let mut entries = BTreeMap::new();
            if elem.is_collection() {
                // Nested collections nest their own markers; recurse per
                // distinct first path segment.
                let mut names: Vec<String> = Vec::new();
                for k in flat.range(prefix.clone()..) {
                    let Some(rest) = k.0.strip_prefix(&prefix) else {
                        break;
                    };
                    if rest == "%" {
                        continue;
                    }
                    let first = rest.split('.').next().unwrap_or(rest).to_string();
                    if names.last() != Some(&first) {
                        names.push(first);
                    }
                }
                for name in names {
                    if let Some(v) =
                        expand_value(elem, nested, &format!("{key}.{name}"), flat)?
                    {
                        entries.insert(name, v);
                    }
                }
            } else {
                // Scalar elements: the whole remainder is the map key, so
                // keys containing dots survive.
                for (k, _) in flat.range(prefix.clone()..) {
                    let Some(rest) = k.strip_prefix(&prefix) else {
                        break;
                    };
                    if rest == "%" {
                        continue;
                    }
                    if let Some(v) = expand_value(elem, nested, k, flat)? {
                        entries.insert(rest.to_string(), v);
                    }
                }
            }
            Ok(Some(Value::Map(entries)))
        }
        Kind::Object => {
            let Some(nested) = nested else {
                return Err(corrupt(key, "object attribute without a nested schema"));
            };
            let prefix = format!("{key}.");
            if !flat.range(prefix.clone()..).any(|(k, _)| k.starts_with(&prefix)) {
                return Ok(None);
            }
            let mut fields = BTreeMap::new();
            for (name, entry) in nested {
                if let Some(v) = expand_value(
                    &entry.kind,
                    entry.object.as_deref(),
                    &format!("{key}.{name}"),
                    flat,
                )? {
                    fields.insert(name.clone(), v);
                }
            }
            Ok(Some(Value::Object(fields)))
        }
    }
}
