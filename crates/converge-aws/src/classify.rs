//! Error classification for AWS SDK calls.
//!
//! Every SDK error is converted into the core [`ApiError`] carrier (code +
//! message, with the original error kept in the source chain) so the rest
//! of the workspace can classify by code without knowing service types.

use std::error::Error as StdError;

use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use converge_core::{error_code, ApiError};
use converge_engine::{Attempt, EngineError};

/// Codes that mean "back off and try again" on any AWS service.
pub const TRANSIENT_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "RequestTimeout",
    "SlowDown",
];

/// Convert a service (or `SdkError`) failure into an [`ApiError`].
///
/// The code and message come from the error metadata; the original error
/// stays in the source chain for `format_err_chain`.
pub fn service_error<E>(err: E) -> ApiError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
{
    let code = err.code().unwrap_or("Unknown").to_string();
    let message = err
        .message()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string());
    ApiError::new(code, message).with_source(Box::new(err))
}

/// True when the error's code is in the standard transient set.
pub fn retryable(err: &(dyn StdError + 'static)) -> bool {
    error_code(err).is_some_and(|code| TRANSIENT_CODES.contains(&code))
}

/// Classify an error into a retry [`Attempt`] under the default code set.
pub fn attempt<T>(err: EngineError) -> Attempt<T> {
    TransientCodes::default().attempt(err)
}

/// The transient code set, optionally widened with conflict codes.
///
/// Conflict codes (`OperationAborted`, service-specific `...Conflict`
/// codes) are only transient for operations known to be safely retryable,
/// so they are opt-in per call site.
#[derive(Debug, Clone, Default)]
pub struct TransientCodes {
    conflict_codes: Vec<String>,
}

impl TransientCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_conflicts<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conflict_codes.extend(codes.into_iter().map(Into::into));
        self
    }

    pub fn is_transient(&self, err: &(dyn StdError + 'static)) -> bool {
        error_code(err).is_some_and(|code| {
            TRANSIENT_CODES.contains(&code) || self.conflict_codes.iter().any(|c| c == code)
        })
    }

    pub fn attempt<T>(&self, err: EngineError) -> Attempt<T> {
        if self.is_transient(&err) {
            Attempt::Retry(err)
        } else {
            Attempt::Fatal(err)
        }
    }
}
