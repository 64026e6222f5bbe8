//! Shared contract for per-resource lookups.
//!
//! Every finder maps an identifier to exactly one domain entity: a unique
//! hit comes back as `Ok`, absence as the NotFound sentinel (so callers
//! test `is_not_found` rather than per-service error shapes), and anything
//! else propagates unchanged.

use converge_core::NotFoundError;

use crate::error::EngineError;

/// The NotFound sentinel for a lookup that came up empty.
pub fn not_found(request: impl Into<String>) -> EngineError {
    EngineError::NotFound(NotFoundError::for_request(request))
}

/// NotFound that preserves the remote error which implied absence.
pub fn not_found_with(
    source: impl std::error::Error + Send + Sync + 'static,
    request: impl Into<String>,
) -> EngineError {
    EngineError::NotFound(NotFoundError::for_request(request).with_last_error(Box::new(source)))
}

/// Reduce a listing to the single expected entity.
///
/// An empty listing is NotFound; more than one hit is an error, never a
/// silent pick.
pub fn single<T>(mut items: Vec<T>, request: &str) -> Result<T, EngineError> {
    match items.len() {
        0 => Err(not_found(request)),
        1 => Ok(items.remove(0)),
        count => Err(EngineError::TooManyResults { count }),
    }
}

/// Translate cloud states that mean logical non-existence into NotFound.
///
/// Services report `deleted` (and sometimes `deleting`) on entities that
/// still appear in listings; downstream code must be able to rely on
/// `is_not_found` instead of duplicating per-service state checks.
pub fn reject_terminal<T>(
    entity: T,
    status: &str,
    terminal_states: &[&str],
    request: &str,
) -> Result<T, EngineError> {
    if terminal_states.contains(&status) {
        return Err(EngineError::NotFound(
            NotFoundError::for_request(request)
                .with_message(format!("resource is in terminal state {status:?}")),
        ));
    }
    Ok(entity)
}
