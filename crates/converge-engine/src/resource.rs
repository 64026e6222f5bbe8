use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use converge_core::schema::check_schema;
use converge_core::{IdSpec, Schema};

use crate::data::ResourceData;
use crate::diff::InstanceDiff;
use crate::error::EngineError;
use crate::meta::ProviderMeta;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A lifecycle handler. Boxed futures for dyn compatibility, the same
/// seam shape the syncer trait uses elsewhere in this workspace's lineage.
pub type HandlerFn = Arc<
    dyn for<'a> Fn(&'a mut ResourceData, &'a ProviderMeta) -> BoxFuture<'a, Result<(), EngineError>>
        + Send
        + Sync,
>;

/// Runs once after base diff computation; may add, clear, or force-new a
/// pending change.
pub type CustomizeDiffFn = Arc<dyn Fn(&ResourceData, &mut InstanceDiff) + Send + Sync>;

/// Wrap a closure into a [`HandlerFn`].
pub fn handler<F>(f: F) -> HandlerFn
where
    F: for<'a> Fn(&'a mut ResourceData, &'a ProviderMeta) -> BoxFuture<'a, Result<(), EngineError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Per-operation deadlines, overrideable per resource type.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(20 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(20 * 60),
            delete: Duration::from_secs(20 * 60),
        }
    }
}

/// A named resource type: schema plus lifecycle handlers.
///
/// Update may be absent only when every configurable attribute is
/// ForceNew — any change then replaces the resource outright.
#[derive(Clone)]
pub struct ResourceType {
    pub name: String,
    pub schema: Arc<Schema>,
    pub create: HandlerFn,
    pub read: HandlerFn,
    pub update: Option<HandlerFn>,
    pub delete: HandlerFn,
    /// Primary-key layout for import; absent means the type is not
    /// importable.
    pub importer: Option<IdSpec>,
    pub customize_diff: Option<CustomizeDiffFn>,
    pub timeouts: Timeouts,
}

impl ResourceType {
    pub fn new(
        name: impl Into<String>,
        schema: Schema,
        create: HandlerFn,
        read: HandlerFn,
        delete: HandlerFn,
    ) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            create,
            read,
            update: None,
            delete,
            importer: None,
            customize_diff: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_update(mut self, update: HandlerFn) -> Self {
        self.update = Some(update);
        self
    }

    pub fn with_importer(mut self, spec: IdSpec) -> Self {
        self.importer = Some(spec);
        self
    }

    pub fn with_customize_diff(
        mut self,
        f: impl Fn(&ResourceData, &mut InstanceDiff) + Send + Sync + 'static,
    ) -> Self {
        self.customize_diff = Some(Arc::new(f));
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Validate the schema and the structural rules. Runs at registration.
    pub fn check(&self) -> Result<(), EngineError> {
        check_schema(&self.schema)?;
        if self.update.is_none() {
            for (name, entry) in self.schema.iter() {
                let configurable = entry.required || entry.optional;
                if configurable && !entry.force_new {
                    return Err(EngineError::Core(converge_core::CoreError::Schema {
                        attribute: name.clone(),
                        reason: format!(
                            "resource type {:?} has no update handler, so every \
                             configurable attribute must be force-new",
                            self.name
                        ),
                    }));
                }
            }
        }
        if let Some(spec) = &self.importer {
            for seg in &spec.segments {
                if !self.schema.contains_key(&seg.name) {
                    return Err(EngineError::Core(converge_core::CoreError::Schema {
                        attribute: seg.name.clone(),
                        reason: "importer segment does not name a schema attribute".into(),
                    }));
                }
            }
        }
        Ok(())
    }
}

/// Process-wide mapping from type name to resource type.
///
/// Registered at init, frozen by the first apply, immutable thereafter.
#[derive(Default)]
pub struct Registry {
    types: HashMap<String, Arc<ResourceType>>,
    frozen: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ResourceType) -> Result<(), EngineError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(EngineError::RegistryFrozen);
        }
        def.check()?;
        if self.types.contains_key(&def.name) {
            return Err(EngineError::AlreadyRegistered(def.name));
        }
        tracing::debug!(resource_type = %def.name, "registered resource type");
        self.types.insert(def.name.clone(), Arc::new(def));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<ResourceType>, EngineError> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownType(name.to_string()))
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
