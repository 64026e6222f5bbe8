use std::collections::BTreeMap;
use std::sync::Arc;

use converge_core::{CoreError, Schema, Value};

use crate::error::EngineError;

/// The runtime tuple of one resource instance: id, typed attribute state,
/// and the new-resource flag.
///
/// An empty id means the resource does not exist in state. Accessors
/// kind-check writes against the schema, so handler bugs surface at the
/// write site rather than in a later diff.
#[derive(Debug, Clone)]
pub struct ResourceData {
    schema: Arc<Schema>,
    id: String,
    attrs: BTreeMap<String, Value>,
    new_resource: bool,
}

impl ResourceData {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            id: String::new(),
            attrs: BTreeMap::new(),
            new_resource: false,
        }
    }

    pub fn from_state(schema: Arc<Schema>, id: impl Into<String>, attrs: BTreeMap<String, Value>) -> Self {
        Self {
            schema,
            id: id.into(),
            attrs,
            new_resource: false,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    /// True when the resource exists in state.
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    /// Mark the resource as gone: clears the id and all attribute state.
    pub fn clear(&mut self) {
        self.id.clear();
        self.attrs.clear();
    }

    /// Set right after Create, before the hydrating Read: a NotFound there
    /// is a bug, not drift.
    pub fn mark_new(&mut self) {
        self.new_resource = true;
    }

    pub fn clear_new(&mut self) {
        self.new_resource = false;
    }

    pub fn is_new(&self) -> bool {
        self.new_resource
    }

    /// The attribute value, falling back to the schema default, else Null.
    pub fn get(&self, name: &str) -> Value {
        if let Some(v) = self.attrs.get(name) {
            return v.clone();
        }
        self.schema
            .get(name)
            .and_then(|e| e.default.clone())
            .unwrap_or(Value::Null)
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).as_str().map(String::from)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).as_i64()
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).as_bool()
    }

    /// Kind-checked write. Unknown attributes and kind mismatches are
    /// rejected.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), EngineError> {
        let entry = self.schema.get(name).ok_or_else(|| {
            EngineError::Core(CoreError::Validation(format!(
                "unknown attribute {name:?}"
            )))
        })?;
        if !value.conforms_to(&entry.kind) {
            return Err(EngineError::Core(CoreError::Validation(format!(
                "{name}: expected {}, got {}",
                entry.kind.name(),
                value.kind_name()
            ))));
        }
        if value.is_null() {
            self.attrs.remove(name);
        } else {
            self.attrs.insert(name.to_string(), value);
        }
        Ok(())
    }

    pub fn state(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }

    pub fn into_state(self) -> BTreeMap<String, Value> {
        self.attrs
    }
}

#[cfg(test)]
mod tests {
    use converge_core::{Kind, SchemaEntry};

    use super::*;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::from([
            ("name".to_string(), SchemaEntry::required(Kind::String)),
            (
                "size".to_string(),
                SchemaEntry::optional(Kind::Int).with_default(Value::Int(1)),
            ),
        ]))
    }

    #[test]
    fn get_falls_back_to_schema_default() {
        let data = ResourceData::new(schema());
        assert_eq!(data.get("size"), Value::Int(1));
        assert_eq!(data.get("name"), Value::Null);
    }

    #[test]
    fn set_rejects_unknown_and_mistyped_attributes() {
        let mut data = ResourceData::new(schema());
        assert!(data.set("bogus", Value::Int(1)).is_err());
        assert!(data.set("size", Value::String("big".into())).is_err());
        assert!(data.set("size", Value::Int(3)).is_ok());
        assert_eq!(data.get_i64("size"), Some(3));
    }

    #[test]
    fn null_write_unsets_the_attribute() {
        let mut data = ResourceData::new(schema());
        data.set("size", Value::Int(3)).unwrap();
        data.set("size", Value::Null).unwrap();
        // Back to the default.
        assert_eq!(data.get_i64("size"), Some(1));
    }

    #[test]
    fn clear_marks_the_resource_gone() {
        let mut data = ResourceData::from_state(
            schema(),
            "r-1",
            BTreeMap::from([("name".to_string(), Value::String("a".into()))]),
        );
        assert!(data.exists());
        data.clear();
        assert!(!data.exists());
        assert!(data.state().is_empty());
    }
}
