use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;
use crate::value::{Kind, Value};

/// A resource type's schema: attribute name → entry.
pub type Schema = BTreeMap<String, SchemaEntry>;

pub type ValidateFn = Arc<dyn Fn(&Value) -> Validation + Send + Sync>;
pub type NormalizeFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;
pub type SetHashFn = Arc<dyn Fn(&Value) -> u64 + Send + Sync>;

/// Outcome of a user validator: warnings are surfaced, errors abort.
#[derive(Debug, Clone, Default)]
pub struct Validation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl Validation {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            warnings: vec![],
            errors: vec![msg.into()],
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: Validation) {
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }
}

/// Describes one attribute of a resource type.
///
/// Exactly one of Required or Optional must hold for configurable
/// attributes; a purely Computed entry is read-only (populated by Read).
#[derive(Clone)]
pub struct SchemaEntry {
    pub kind: Kind,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    /// Any change to this attribute invalidates the identity and triggers
    /// delete-then-create.
    pub force_new: bool,
    pub default: Option<Value>,
    pub validator: Option<ValidateFn>,
    /// Canonicalises the value before diffing.
    pub normalizer: Option<NormalizeFn>,
    /// Element identity for set kinds.
    pub set_hash: Option<SetHashFn>,
    /// Excluded from user-visible diff rendering.
    pub sensitive: bool,
    pub max_items: Option<usize>,
    /// Nested schema for `Kind::Object` values (including object elements
    /// of collections).
    pub object: Option<Arc<Schema>>,
}

impl fmt::Debug for SchemaEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaEntry")
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("computed", &self.computed)
            .field("force_new", &self.force_new)
            .field("sensitive", &self.sensitive)
            .finish_non_exhaustive()
    }
}

impl SchemaEntry {
    fn new(kind: Kind) -> Self {
        Self {
            kind,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            default: None,
            validator: None,
            normalizer: None,
            set_hash: None,
            sensitive: false,
            max_items: None,
            object: None,
        }
    }

    pub fn required(kind: Kind) -> Self {
        Self {
            required: true,
            ..Self::new(kind)
        }
    }

    pub fn optional(kind: Kind) -> Self {
        Self {
            optional: true,
            ..Self::new(kind)
        }
    }

    /// Optional in config, filled in by the provider when unset.
    pub fn optional_computed(kind: Kind) -> Self {
        Self {
            optional: true,
            computed: true,
            ..Self::new(kind)
        }
    }

    /// Read-only: populated by Read, never set from config.
    pub fn computed(kind: Kind) -> Self {
        Self {
            computed: true,
            ..Self::new(kind)
        }
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_validator(
        mut self,
        f: impl Fn(&Value) -> Validation + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(f));
        self
    }

    pub fn with_normalizer(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.normalizer = Some(Arc::new(f));
        self
    }

    pub fn with_set_hash(mut self, f: impl Fn(&Value) -> u64 + Send + Sync + 'static) -> Self {
        self.set_hash = Some(Arc::new(f));
        self
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    pub fn with_object(mut self, schema: Schema) -> Self {
        self.object = Some(Arc::new(schema));
        self
    }

    /// True when the attribute can never be set from configuration.
    pub fn read_only(&self) -> bool {
        self.computed && !self.optional && !self.required
    }

    /// Enforce the schema-entry invariants. Called at registration time.
    pub fn check(&self, name: &str) -> Result<(), CoreError> {
        let fail = |reason: &str| {
            Err(CoreError::Schema {
                attribute: name.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.required && self.optional {
            return fail("cannot be both required and optional");
        }
        if !self.required && !self.optional && !self.computed {
            return fail("must be required, optional, or computed");
        }
        if self.required && self.computed {
            return fail("required attributes cannot be computed");
        }
        if self.required && self.default.is_some() {
            return fail("required attributes cannot carry a default");
        }
        if self.force_new && self.computed && !self.optional {
            return fail("force-new on a purely computed attribute is meaningless");
        }
        if self.max_items.is_some() && !self.kind.is_collection() {
            return fail("max_items only applies to collection kinds");
        }
        if self.set_hash.is_some() && !matches!(self.kind, Kind::Set(_)) {
            return fail("set_hash only applies to set kinds");
        }
        if let Some(default) = &self.default {
            if !default.conforms_to(&self.kind) {
                return fail("default value does not conform to the declared kind");
            }
        }
        if matches!(self.kind, Kind::Object) && self.object.is_none() {
            return fail("object attributes require a nested schema");
        }
        Ok(())
    }

    /// Apply the normalizer, if any.
    pub fn normalize(&self, value: Value) -> Value {
        match &self.normalizer {
            Some(f) => f(value),
            None => value,
        }
    }

    /// Validate a configured value: kind conformance, max_items, then the
    /// user validator. Runs before any remote call; never retried.
    pub fn validate_value(&self, name: &str, value: &Value) -> Validation {
        let mut out = Validation::ok();

        if value.is_null() {
            if self.required {
                out.errors.push(format!("{name}: required attribute is not set"));
            }
            return out;
        }
        if !value.conforms_to(&self.kind) {
            out.errors.push(format!(
                "{name}: expected {}, got {}",
                self.kind.name(),
                value.kind_name()
            ));
            return out;
        }
        if let Some(max) = self.max_items {
            let len = match value {
                Value::List(v) | Value::Set(v) => Some(v.len()),
                Value::Map(m) => Some(m.len()),
                _ => None,
            };
            if let Some(len) = len {
                if len > max {
                    out.errors
                        .push(format!("{name}: at most {max} items allowed, got {len}"));
                }
            }
        }
        if let Some(validate) = &self.validator {
            out.merge(validate(value));
        }
        out
    }
}

/// Check every entry of a schema. Surfaced once, at registration.
pub fn check_schema(schema: &Schema) -> Result<(), CoreError> {
    for (name, entry) in schema {
        entry.check(name)?;
        if let Some(nested) = &entry.object {
            check_schema(nested)?;
        }
    }
    Ok(())
}
