//! converge-state
//!
//! Persisted state for managed resources: flattened attribute records,
//! the versioned state file, and dual-write persistence (atomic local
//! file plus a pluggable remote backend).

pub mod error;
pub mod persistence;
pub mod record;

pub use crate::error::StateError;
pub use crate::persistence::{BoxFuture, RemoteBackend, StatePersistence};
pub use crate::record::{expand, flatten, InstanceRecord, StateFile, STATE_VERSION};
