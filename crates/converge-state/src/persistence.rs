use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::error::StateError;
use crate::record::StateFile;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A remote copy of the state file. Binding crates implement this over
/// whatever durable store they have (an object store, typically).
pub trait RemoteBackend: Send + Sync {
    /// Fetch the raw state document. Absence is `StateError::NotFound`.
    fn load(&self) -> BoxFuture<'_, Result<Vec<u8>, StateError>>;

    fn save(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), StateError>>;
}

/// Dual-write state persistence: local disk (safety net) + remote
/// (authoritative).
pub struct StatePersistence {
    local_path: PathBuf,
    remote: Option<Box<dyn RemoteBackend>>,
}

impl StatePersistence {
    pub fn local_only(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            remote: None,
        }
    }

    pub fn with_remote(
        local_path: impl Into<PathBuf>,
        remote: Box<dyn RemoteBackend>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote: Some(remote),
        }
    }

    /// Write state to local disk first (atomic: tmp + rename), then push
    /// to the remote.
    ///
    /// Local write happens first so state is never lost even if the
    /// remote push fails; the next load picks up the local copy.
    pub async fn flush(&self, state: &mut StateFile) -> Result<(), StateError> {
        state.bump();
        let json = serde_json::to_vec_pretty(state)?;

        if let Some(parent) = self.local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.local_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &json)?;
        std::fs::rename(&tmp_path, &self.local_path)?;
        tracing::debug!(
            path = %self.local_path.display(),
            serial = state.serial,
            "state flushed to local disk"
        );

        if let Some(remote) = &self.remote {
            match remote.save(json).await {
                Ok(()) => {
                    tracing::debug!(serial = state.serial, "state flushed to remote");
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "failed to push state to remote (local copy is safe)"
                    );
                }
            }
        }
        Ok(())
    }

    /// Load state: remote first (authoritative), fall back to local,
    /// fresh state if neither exists.
    pub async fn load(&self) -> Result<StateFile, StateError> {
        if let Some(remote) = &self.remote {
            match remote.load().await {
                Ok(bytes) => {
                    let state: StateFile = serde_json::from_slice(&bytes)?;
                    state.check_version()?;
                    tracing::debug!(serial = state.serial, "state loaded from remote");
                    return Ok(state);
                }
                Err(StateError::NotFound { .. }) => {
                    tracing::debug!("no state in remote, trying local");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load state from remote, trying local");
                }
            }
        }

        if self.local_path.exists() {
            let json = std::fs::read(&self.local_path)?;
            let state: StateFile = serde_json::from_slice(&json)?;
            state.check_version()?;
            tracing::debug!(
                path = %self.local_path.display(),
                serial = state.serial,
                "state loaded from local disk"
            );
            return Ok(state);
        }

        tracing::debug!("no existing state found, starting fresh");
        Ok(StateFile::default())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use converge_core::Value;

    use crate::record::InstanceRecord;

    use super::*;

    #[derive(Default)]
    struct MemoryBackend {
        bytes: Mutex<Option<Vec<u8>>>,
        broken: bool,
    }

    impl RemoteBackend for MemoryBackend {
        fn load(&self) -> BoxFuture<'_, Result<Vec<u8>, StateError>> {
            Box::pin(async {
                if self.broken {
                    return Err(StateError::Remote("backend down".into()));
                }
                self.bytes
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or(StateError::NotFound {
                        key: "state.json".into(),
                    })
            })
        }

        fn save(&self, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), StateError>> {
            Box::pin(async move {
                if self.broken {
                    return Err(StateError::Remote("backend down".into()));
                }
                *self.bytes.lock().unwrap() = Some(bytes);
                Ok(())
            })
        }
    }

    fn sample_state() -> StateFile {
        let mut state = StateFile::default();
        let attrs = BTreeMap::from([("name".to_string(), Value::String("w".into()))]);
        state.put("widget", InstanceRecord::new("r-1", 1, &attrs));
        state
    }

    #[tokio::test]
    async fn local_round_trip_bumps_the_serial() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = StatePersistence::local_only(dir.path().join("state.json"));

        let mut state = sample_state();
        persistence.flush(&mut state).await.unwrap();
        assert_eq!(state.serial, 1);

        let loaded = persistence.load().await.unwrap();
        assert_eq!(loaded.serial, 1);
        assert_eq!(loaded.get("widget", "r-1"), state.get("widget", "r-1"));
    }

    #[tokio::test]
    async fn missing_everything_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = StatePersistence::local_only(dir.path().join("state.json"));
        let loaded = persistence.load().await.unwrap();
        assert_eq!(loaded.serial, 0);
        assert!(loaded.resources.is_empty());
    }

    #[tokio::test]
    async fn remote_is_authoritative_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        // Flush serial 5 to both copies, then roll the local file back to
        // serial 1. Load must still see the remote copy.
        let dual = StatePersistence::with_remote(&path, Box::new(MemoryBackend::default()));
        let mut state = sample_state();
        state.serial = 4;
        dual.flush(&mut state).await.unwrap();
        assert_eq!(state.serial, 5);

        let mut stale = sample_state();
        stale.serial = 1;
        std::fs::write(&path, serde_json::to_vec(&stale).unwrap()).unwrap();

        let loaded = dual.load().await.unwrap();
        assert_eq!(loaded.serial, 5);
    }

    #[tokio::test]
    async fn broken_remote_does_not_fail_flush_and_load_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let persistence = StatePersistence::with_remote(
            &path,
            Box::new(MemoryBackend {
                bytes: Mutex::new(None),
                broken: true,
            }),
        );

        let mut state = sample_state();
        persistence.flush(&mut state).await.unwrap();

        let loaded = persistence.load().await.unwrap();
        assert_eq!(loaded.serial, state.serial);
    }

    #[tokio::test]
    async fn version_ahead_refuses_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = sample_state();
        state.version += 1;
        std::fs::write(&path, serde_json::to_vec(&state).unwrap()).unwrap();

        let persistence = StatePersistence::local_only(&path);
        assert!(matches!(
            persistence.load().await,
            Err(StateError::VersionAhead { .. })
        ));
    }
}
