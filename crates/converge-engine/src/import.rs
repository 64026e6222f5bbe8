use converge_core::Value;

use crate::apply::Provider;
use crate::data::ResourceData;
use crate::error::EngineError;

impl Provider {
    /// Rehydrate a resource from the remote side given its canonical id.
    ///
    /// Accepts the pipe-delimited form or a JSON array of segments (for
    /// values containing `|`). The canonical pipe form is re-emitted on
    /// the returned instance so idempotent re-imports are stable. A
    /// NotFound from Read is fatal here — importing something that does
    /// not exist is an operator error, not drift.
    pub async fn import(&self, name: &str, raw_id: &str) -> Result<ResourceData, EngineError> {
        self.registry().freeze();
        let rt = self.registry().get(name)?;
        let spec = rt.importer.as_ref().ok_or_else(|| {
            EngineError::Import(format!("resource type {name:?} does not support import"))
        })?;

        let id = spec.parse(raw_id)?;
        let canonical = id.canonical();

        let mut data = ResourceData::new(rt.schema.clone());
        for (segment, part) in spec.segments.iter().zip(id.parts()) {
            if !part.is_empty() {
                data.set(&segment.name, Value::String(part.clone()))?;
            }
        }
        data.set_id(canonical.clone());

        tracing::info!(resource_type = %rt.name, id = %canonical, "importing resource");
        self.run_read(&rt, &mut data).await?;
        if !data.exists() {
            return Err(EngineError::Import(format!(
                "{name} {canonical:?} not found in the remote"
            )));
        }

        // Read handlers may rewrite the id; imports always hand back the
        // canonical form.
        data.set_id(canonical);
        Ok(data)
    }
}
