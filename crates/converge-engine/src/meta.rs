use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use converge_core::{TagPattern, TagSet};

use crate::error::EngineError;

/// Process-level context threaded into every handler.
///
/// Carries the per-subsystem client handles and default configuration.
/// Built once at startup and read-only afterwards — never a module-level
/// singleton.
#[derive(Clone, Default)]
pub struct ProviderMeta {
    pub region: String,
    pub account_id: String,
    pub default_tags: TagSet,
    pub ignore_tags: Vec<TagPattern>,
    clients: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ProviderMeta {
    pub fn new(region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: account_id.into(),
            ..Self::default()
        }
    }

    pub fn with_default_tags(mut self, tags: TagSet) -> Self {
        self.default_tags = tags;
        self
    }

    pub fn with_ignore_tags(mut self, patterns: Vec<TagPattern>) -> Self {
        self.ignore_tags = patterns;
        self
    }

    /// Register the shared client for a cloud subsystem (e.g. "s3").
    /// Clients are thread-safe by contract of the underlying SDK.
    pub fn with_client<T: Any + Send + Sync>(mut self, subsystem: &str, client: Arc<T>) -> Self {
        self.clients.insert(subsystem.to_string(), client);
        self
    }

    pub fn client<T: Any + Send + Sync>(&self, subsystem: &str) -> Result<Arc<T>, EngineError> {
        self.clients
            .get(subsystem)
            .and_then(|c| Arc::clone(c).downcast::<T>().ok())
            .ok_or_else(|| EngineError::MissingClient(subsystem.to_string()))
    }

    /// Defaults ⊕ explicit, minus the configured ignore patterns.
    pub fn effective_tags(&self, explicit: &TagSet) -> TagSet {
        explicit.map_with(&self.default_tags, &self.ignore_tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_lookup_is_typed() {
        let meta = ProviderMeta::new("us-east-1", "123456789012")
            .with_client("s3", Arc::new("client".to_string()));
        assert_eq!(*meta.client::<String>("s3").unwrap(), "client");
        assert!(matches!(
            meta.client::<u32>("s3"),
            Err(EngineError::MissingClient(_))
        ));
        assert!(meta.client::<String>("iam").is_err());
    }

    #[test]
    fn effective_tags_apply_defaults_and_ignores() {
        let meta = ProviderMeta::new("us-east-1", "123456789012")
            .with_default_tags(TagSet::from_pairs([("env", "prod")]))
            .with_ignore_tags(vec![TagPattern::Prefix("aws:".into())]);
        let tags = meta.effective_tags(&TagSet::from_pairs([
            ("name", "web"),
            ("aws:internal", "x"),
        ]));
        assert_eq!(tags.get("env"), Some("prod"));
        assert_eq!(tags.get("name"), Some("web"));
        assert!(!tags.contains_key("aws:internal"));
    }
}
