use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use converge_core::{ApiError, CoreError, NotFoundError, Value};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    NotFound(#[from] NotFoundError),

    #[error("remote API error: {0}")]
    Api(#[from] ApiError),

    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("operation timed out after {elapsed:?}{}", .last_state.as_deref().map(|s| format!(" (last state: {s})")).unwrap_or_default())]
    Timeout {
        elapsed: Duration,
        last_state: Option<String>,
        #[source]
        source: Option<Box<EngineError>>,
    },

    #[error("unexpected state {state:?}, wanted target {target:?} (pending: {pending:?})")]
    UnexpectedState {
        state: String,
        pending: Vec<String>,
        target: Vec<String>,
    },

    #[error("couldn't find resource ({checks} consecutive NotFound checks exhausted)")]
    NotFoundChecksExhausted { checks: u32 },

    #[error("invalid waiter configuration: {0}")]
    InvalidWaiter(String),

    #[error("expected exactly one result, got {count}")]
    TooManyResults { count: usize },

    #[error("unknown resource type {0:?}")]
    UnknownType(String),

    #[error("no client registered for subsystem {0:?}")]
    MissingClient(String),

    #[error("resource type {0:?} already registered")]
    AlreadyRegistered(String),

    #[error("registry is frozen after first apply")]
    RegistryFrozen,

    #[error("import failed: {0}")]
    Import(String),

    #[error("error {op} {resource_type} ({id}): {source}")]
    Operation {
        op: &'static str,
        resource_type: String,
        id: String,
        #[source]
        source: Box<EngineError>,
    },

    /// A mutation failed after making remote progress. The last observed
    /// id and attributes ride along so the host can persist them instead
    /// of losing track of the resource.
    #[error("{source} (partial state recorded for {id:?})")]
    Partial {
        id: String,
        state: BTreeMap<String, Value>,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Prepend operation context, the way handlers surface failures.
    pub fn in_operation(
        self,
        op: &'static str,
        resource_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self::Operation {
            op,
            resource_type: resource_type.into(),
            id: id.into(),
            source: Box::new(self),
        }
    }

    /// True when the error chain ends in the NotFound sentinel.
    pub fn is_not_found(&self) -> bool {
        converge_core::is_not_found(self)
    }

    /// Recognises the deadline-elapsed final-attempt path of the retry
    /// driver and the waiter, through operation wrapping.
    pub fn is_timeout(&self) -> bool {
        match self {
            EngineError::Timeout { .. } => true,
            EngineError::Operation { source, .. } | EngineError::Partial { source, .. } => {
                source.is_timeout()
            }
            _ => false,
        }
    }

    /// The id and attributes observed before a mutation failed, if the
    /// failure left a live resource behind.
    pub fn partial_state(&self) -> Option<(&str, &BTreeMap<String, Value>)> {
        match self {
            EngineError::Partial { id, state, .. } => Some((id, state)),
            EngineError::Operation { source, .. } => source.partial_state(),
            _ => None,
        }
    }
}

pub use converge_core::error::format_err_chain;
