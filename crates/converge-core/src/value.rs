use std::collections::BTreeMap;

/// The declared kind of an attribute value.
///
/// Collection kinds carry their element kind; `Object` values are shaped by
/// a nested schema at the schema layer, so the kind itself stays structural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    String,
    Int,
    Bool,
    Float,
    List(Box<Kind>),
    Set(Box<Kind>),
    Map(Box<Kind>),
    Object,
}

impl Kind {
    pub fn is_collection(&self) -> bool {
        matches!(self, Kind::List(_) | Kind::Set(_) | Kind::Map(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Int => "int",
            Kind::Bool => "bool",
            Kind::Float => "float",
            Kind::List(_) => "list",
            Kind::Set(_) => "set",
            Kind::Map(_) => "map",
            Kind::Object => "object",
        }
    }
}

/// A runtime attribute value, kept in lock-step with the schema's [`Kind`].
///
/// `Null` stands for an absent optional. Sets reuse `Vec` storage; element
/// identity is defined by the schema's set-hash function, not by position.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Bool(bool),
    Float(f64),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Object(BTreeMap<String, Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // Exact-bits comparison so state round-trips are stable.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Float(_) => "float",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }

    /// Recursive kind check. `Null` conforms to every kind (absent optional).
    pub fn conforms_to(&self, kind: &Kind) -> bool {
        match (self, kind) {
            (Value::Null, _) => true,
            (Value::String(_), Kind::String) => true,
            (Value::Int(_), Kind::Int) => true,
            (Value::Bool(_), Kind::Bool) => true,
            (Value::Float(_), Kind::Float) => true,
            (Value::List(items), Kind::List(elem)) => {
                items.iter().all(|v| v.conforms_to(elem))
            }
            (Value::Set(items), Kind::Set(elem)) => {
                items.iter().all(|v| v.conforms_to(elem))
            }
            (Value::Map(entries), Kind::Map(elem)) => {
                entries.values().all(|v| v.conforms_to(elem))
            }
            (Value::Object(_), Kind::Object) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) | Value::Object(m) => Some(m),
            _ => None,
        }
    }

    /// Convert to the JSON shape used in host-facing renderings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::List(items) | Value::Set(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) | Value::Object(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Parse a JSON value into a typed [`Value`], guided by the declared kind.
    pub fn from_json(kind: &Kind, json: &serde_json::Value) -> Option<Value> {
        match (kind, json) {
            (_, serde_json::Value::Null) => Some(Value::Null),
            (Kind::String, serde_json::Value::String(s)) => Some(Value::String(s.clone())),
            (Kind::Int, serde_json::Value::Number(n)) => n.as_i64().map(Value::Int),
            (Kind::Bool, serde_json::Value::Bool(b)) => Some(Value::Bool(*b)),
            (Kind::Float, serde_json::Value::Number(n)) => n.as_f64().map(Value::Float),
            (Kind::List(elem), serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| Value::from_json(elem, v))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            (Kind::Set(elem), serde_json::Value::Array(items)) => items
                .iter()
                .map(|v| Value::from_json(elem, v))
                .collect::<Option<Vec<_>>>()
                .map(Value::Set),
            (Kind::Map(elem), serde_json::Value::Object(entries)) => entries
                .iter()
                .map(|(k, v)| Value::from_json(elem, v).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Value::Map),
            _ => None,
        }
    }
}

/// Multiset equality for set values, with element identity defined by `hash`.
pub fn set_eq(a: &[Value], b: &[Value], hash: &dyn Fn(&Value) -> u64) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut counts: BTreeMap<u64, i64> = BTreeMap::new();
    for v in a {
        *counts.entry(hash(v)).or_default() += 1;
    }
    for v in b {
        *counts.entry(hash(v)).or_default() -= 1;
    }
    counts.values().all(|&n| n == 0)
}
