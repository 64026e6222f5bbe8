use std::fmt;

use crate::error::CoreError;

/// One position of a composite id, in the fixed order the resource type
/// declares. Empty components are allowed only in optional positions.
#[derive(Debug, Clone)]
pub struct IdSegment {
    pub name: String,
    pub optional: bool,
}

impl IdSegment {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optional: true,
        }
    }
}

/// Declares the primary-key layout of a resource type's id.
#[derive(Debug, Clone)]
pub struct IdSpec {
    pub segments: Vec<IdSegment>,
}

impl IdSpec {
    pub fn new(segments: Vec<IdSegment>) -> Self {
        Self { segments }
    }

    /// Single-segment id, the common case.
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            segments: vec![IdSegment::required(name)],
        }
    }

    /// Parse and validate a raw id against this layout.
    pub fn parse(&self, raw: &str) -> Result<CompositeId, CoreError> {
        let id = CompositeId::parse(raw)?;
        if id.parts.len() != self.segments.len() {
            return Err(CoreError::InvalidId {
                id: raw.to_string(),
                reason: format!(
                    "expected {} segments ({}), got {}",
                    self.segments.len(),
                    self.segment_names().join("|"),
                    id.parts.len()
                ),
            });
        }
        for (part, seg) in id.parts.iter().zip(&self.segments) {
            if part.is_empty() && !seg.optional {
                return Err(CoreError::InvalidId {
                    id: raw.to_string(),
                    reason: format!("segment {:?} must not be empty", seg.name),
                });
            }
        }
        Ok(id)
    }

    pub fn segment_names(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.name.as_str()).collect()
    }
}

/// A parsed composite id.
///
/// The canonical form concatenates the parts with `|`. A JSON-array form
/// (`["a","b"]`) is accepted on input only, for values containing `|`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeId {
    parts: Vec<String>,
}

impl CompositeId {
    pub fn new(parts: Vec<String>) -> Self {
        Self { parts }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') {
            let parts: Vec<String> =
                serde_json::from_str(trimmed).map_err(|e| CoreError::InvalidId {
                    id: raw.to_string(),
                    reason: format!("malformed JSON array id: {e}"),
                })?;
            return Ok(Self { parts });
        }
        Ok(Self {
            parts: raw.split('|').map(String::from).collect(),
        })
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The canonical pipe-delimited form, stable across re-imports.
    pub fn canonical(&self) -> String {
        self.parts.join("|")
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_spec() -> IdSpec {
        IdSpec::new(vec![
            IdSegment::required("table"),
            IdSegment::required("hash"),
            IdSegment::optional("range"),
        ])
    }

    #[test]
    fn pipe_form_round_trips() {
        let id = table_spec().parse("table1|hashA|rangeB").unwrap();
        assert_eq!(id.parts(), ["table1", "hashA", "rangeB"]);
        assert_eq!(id.canonical(), "table1|hashA|rangeB");
    }

    #[test]
    fn json_array_form_yields_same_canonical_id() {
        let spec = table_spec();
        let a = spec.parse("table1|hashA|rangeB").unwrap();
        let b = spec.parse(r#"["table1","hashA","rangeB"]"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(b.canonical(), "table1|hashA|rangeB");
    }

    #[test]
    fn empty_optional_segment_is_allowed() {
        let id = table_spec().parse("table1|hashA|").unwrap();
        assert_eq!(id.canonical(), "table1|hashA|");
    }

    #[test]
    fn empty_required_segment_is_rejected() {
        let err = table_spec().parse("table1||rangeB").unwrap_err();
        assert!(err.to_string().contains("hash"));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        assert!(table_spec().parse("table1|hashA|rangeB|extra").is_err());
        assert!(table_spec().parse("table1").is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(table_spec().parse(r#"["table1","#).is_err());
    }
}
