use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use converge_core::{CoreError, Value};

use crate::data::ResourceData;
use crate::diff::compute_diff;
use crate::error::EngineError;
use crate::meta::ProviderMeta;
use crate::resource::{HandlerFn, Registry, ResourceType};

/// The host-facing surface: a registry of resource types plus the
/// process-level context, dispatching Create/Read/Update/Delete per apply.
///
/// The provider is synchronous per resource instance; the host may run
/// many applies concurrently across distinct instances.
pub struct Provider {
    registry: Registry,
    meta: Arc<ProviderMeta>,
}

/// Result of one apply: the (possibly new) id and the reconciled state.
pub type Applied = (String, BTreeMap<String, Value>);

impl Provider {
    pub fn new(meta: ProviderMeta) -> Self {
        Self {
            registry: Registry::new(),
            meta: Arc::new(meta),
        }
    }

    /// Register a resource type. Rejected after the first apply.
    pub fn register(&mut self, def: ResourceType) -> Result<(), EngineError> {
        self.registry.register(def)
    }

    pub fn meta(&self) -> &ProviderMeta {
        &self.meta
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    /// One end-to-end reconciliation of one resource instance.
    ///
    /// `prior` is the persisted attribute state for the instance (empty
    /// when none). Dispatch:
    /// - empty id + desired config ⇒ Create (then a hydrating Read);
    /// - id + no desired config ⇒ Delete (idempotent);
    /// - id + changed attributes ⇒ Update, or Delete-then-Create when a
    ///   ForceNew attribute changed;
    /// - otherwise a no-op.
    pub async fn apply(
        &self,
        name: &str,
        id: &str,
        prior: BTreeMap<String, Value>,
        desired: Option<BTreeMap<String, Value>>,
    ) -> Result<Applied, EngineError> {
        self.registry.freeze();
        let rt = self.registry.get(name)?;

        match (id.is_empty(), desired) {
            (true, None) => Ok((String::new(), BTreeMap::new())),
            (true, Some(desired)) => self.create(&rt, desired).await,
            (false, None) => self.delete(&rt, id, prior).await,
            (false, Some(desired)) => self.update(&rt, id, prior, desired).await,
        }
    }

    /// Pure Read, used by drift detection. NotFound clears the id and
    /// returns empty state without error.
    pub async fn refresh(
        &self,
        name: &str,
        id: &str,
        state: BTreeMap<String, Value>,
    ) -> Result<Applied, EngineError> {
        self.registry.freeze();
        let rt = self.registry.get(name)?;
        let mut data = ResourceData::from_state(rt.schema.clone(), id, state);
        self.run_read(&rt, &mut data).await?;
        Ok((data.id().to_string(), data.into_state()))
    }

    async fn create(
        &self,
        rt: &ResourceType,
        desired: BTreeMap<String, Value>,
    ) -> Result<Applied, EngineError> {
        self.validate_config(rt, &desired)?;

        let mut data = ResourceData::new(rt.schema.clone());
        for (name, value) in desired {
            data.set(&name, value)?;
        }
        data.mark_new();

        tracing::info!(resource_type = %rt.name, "creating resource");
        self.run_mutation(rt, &rt.create, &mut data, "creating", rt.timeouts.create)
            .await?;
        if !data.exists() {
            return Err(EngineError::Core(CoreError::Validation(format!(
                "create handler for {:?} did not assign an id",
                rt.name
            ))));
        }

        // Hydrate computed attributes. The new-resource flag makes a
        // NotFound here an error: a just-created resource being absent is
        // a bug, not drift.
        if let Err(err) = self.run_read(rt, &mut data).await {
            return Err(with_partial(err, &data));
        }
        data.clear_new();

        tracing::info!(resource_type = %rt.name, id = %data.id(), "resource created");
        Ok((data.id().to_string(), data.into_state()))
    }

    async fn update(
        &self,
        rt: &ResourceType,
        id: &str,
        prior: BTreeMap<String, Value>,
        desired: BTreeMap<String, Value>,
    ) -> Result<Applied, EngineError> {
        let mut data = ResourceData::from_state(rt.schema.clone(), id, prior);

        // Reconcile with the remote before diffing, so drifted attributes
        // diff against reality rather than stale state.
        self.run_read(rt, &mut data).await?;
        if !data.exists() {
            tracing::info!(
                resource_type = %rt.name,
                id = %id,
                "resource vanished out-of-band, recreating"
            );
            return self.create(rt, desired).await;
        }

        self.validate_config(rt, &desired)?;
        let diff = compute_diff(&rt.schema, &data, &desired, rt.customize_diff.as_ref());
        if diff.is_empty() {
            tracing::debug!(resource_type = %rt.name, id = %data.id(), "in sync, no changes");
            return Ok((data.id().to_string(), data.into_state()));
        }
        tracing::debug!(
            resource_type = %rt.name,
            id = %data.id(),
            diff = %diff.render(&rt.schema),
            "attributes changed"
        );

        match (&rt.update, diff.requires_replace()) {
            (Some(update), false) => {
                for (name, change) in diff.changes() {
                    data.set(name, change.new.clone())?;
                }
                tracing::info!(resource_type = %rt.name, id = %data.id(), "updating resource");
                self.run_mutation(rt, update, &mut data, "updating", rt.timeouts.update)
                    .await?;
                if let Err(err) = self.run_read(rt, &mut data).await {
                    return Err(with_partial(err, &data));
                }
                Ok((data.id().to_string(), data.into_state()))
            }
            // ForceNew change (or no update handler): replace. Delete sees
            // the instance's reconciled state, not an empty one, so
            // handlers that read persisted attributes keep working.
            _ => {
                tracing::info!(
                    resource_type = %rt.name,
                    id = %data.id(),
                    "replacing resource (force-new change)"
                );
                let old_id = data.id().to_string();
                self.delete(rt, &old_id, data.into_state()).await?;
                self.create(rt, desired).await
            }
        }
    }

    async fn delete(
        &self,
        rt: &ResourceType,
        id: &str,
        prior: BTreeMap<String, Value>,
    ) -> Result<Applied, EngineError> {
        let mut data = ResourceData::from_state(rt.schema.clone(), id, prior);
        tracing::info!(resource_type = %rt.name, id = %id, "destroying resource");

        match self
            .run_mutation(rt, &rt.delete, &mut data, "deleting", rt.timeouts.delete)
            .await
        {
            Ok(()) => {}
            // Delete is idempotent: a missing remote is success.
            Err(err) if err.is_not_found() => {
                tracing::debug!(resource_type = %rt.name, id = %id, "resource already gone");
            }
            Err(err) => return Err(err),
        }
        data.clear();
        Ok((String::new(), BTreeMap::new()))
    }

    /// Run a handler under its operation deadline.
    async fn run_handler(
        &self,
        rt: &ResourceType,
        handler: &HandlerFn,
        data: &mut ResourceData,
        op: &'static str,
        deadline: Duration,
    ) -> Result<(), EngineError> {
        match tokio::time::timeout(deadline, handler(data, &self.meta)).await {
            Ok(result) => result.map_err(|e| e.in_operation(op, &rt.name, data.id())),
            Err(_) => Err(EngineError::Timeout {
                elapsed: deadline,
                last_state: None,
                source: None,
            }
            .in_operation(op, &rt.name, data.id())),
        }
    }

    /// Run a mutating handler; on failure (timeout included), Read is
    /// re-invoked once so whatever partial progress the remote made is
    /// recorded, and the observed id/state ride on the error.
    async fn run_mutation(
        &self,
        rt: &ResourceType,
        handler: &HandlerFn,
        data: &mut ResourceData,
        op: &'static str,
        deadline: Duration,
    ) -> Result<(), EngineError> {
        match self.run_handler(rt, handler, data, op, deadline).await {
            Ok(()) => Ok(()),
            // NotFound passes through untouched: delete idempotency and
            // the drift contract both key on it.
            Err(err) if err.is_not_found() => Err(err),
            Err(err) => {
                tracing::warn!(
                    resource_type = %rt.name,
                    id = %data.id(),
                    error = %err,
                    "mutation failed, re-reading to record partial progress"
                );
                if data.exists() {
                    if let Err(read_err) = (rt.read)(data, &self.meta).await {
                        tracing::debug!(error = %read_err, "post-failure read failed");
                    }
                }
                Err(with_partial(err, data))
            }
        }
    }

    /// Read with the NotFound contract applied centrally: absence clears
    /// the id (drift) unless the instance was just created.
    pub(crate) async fn run_read(
        &self,
        rt: &ResourceType,
        data: &mut ResourceData,
    ) -> Result<(), EngineError> {
        match self
            .run_handler(rt, &rt.read, data, "reading", rt.timeouts.read)
            .await
        {
            Ok(()) => {
                if data.is_new() && !data.exists() {
                    return Err(EngineError::NotFound(
                        converge_core::NotFoundError::new().with_message(format!(
                            "just-created {} reported absent by read",
                            rt.name
                        )),
                    )
                    .in_operation("reading", &rt.name, ""));
                }
                Ok(())
            }
            Err(err) if err.is_not_found() => {
                if data.is_new() {
                    return Err(err);
                }
                tracing::info!(
                    resource_type = %rt.name,
                    id = %data.id(),
                    "remote resource gone, clearing from state"
                );
                data.clear();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Surface schema violations before any remote call.
    fn validate_config(
        &self,
        rt: &ResourceType,
        desired: &BTreeMap<String, Value>,
    ) -> Result<(), EngineError> {
        let mut problems = Vec::new();

        for (name, value) in desired {
            match rt.schema.get(name) {
                None => problems.push(format!("unknown attribute {name:?}")),
                Some(entry) if entry.read_only() => {
                    problems.push(format!("{name}: attribute is read-only"));
                }
                Some(entry) => {
                    let outcome = entry.validate_value(name, value);
                    for warning in &outcome.warnings {
                        tracing::warn!(resource_type = %rt.name, %warning, "validation warning");
                    }
                    problems.extend(outcome.errors);
                }
            }
        }
        for (name, entry) in rt.schema.iter() {
            if entry.required && !desired.contains_key(name) {
                problems.push(format!("{name}: required attribute is not set"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Core(CoreError::Validation(problems.join("; "))))
        }
    }
}

/// Attach the observed id and attributes to a failure when a live
/// resource is left behind.
fn with_partial(err: EngineError, data: &ResourceData) -> EngineError {
    if !data.exists() {
        return err;
    }
    EngineError::Partial {
        id: data.id().to_string(),
        state: data.state().clone(),
        source: Box::new(err),
    }
}
