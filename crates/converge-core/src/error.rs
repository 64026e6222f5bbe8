use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors raised by the core vocabulary itself.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid schema for attribute {attribute:?}: {reason}")]
    Schema { attribute: String, reason: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid resource id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },
}

/// The canonical in-core representation of a remote-API error.
///
/// Cloud bindings convert their client's error shape into this before it
/// crosses into the engine; `is_code` walks the source chain looking for it.
#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: BoxError) -> Self {
        self.source = Some(source);
        self
    }
}

/// Distinguished sentinel for logical absence of a remote resource.
///
/// Downstream code tests `is_not_found`, never the message text. The
/// original error and request are preserved for diagnostics.
#[derive(Debug, Default)]
pub struct NotFoundError {
    pub message: Option<String>,
    pub last_request: Option<String>,
    pub last_error: Option<BoxError>,
}

impl NotFoundError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_request(request: impl Into<String>) -> Self {
        Self {
            last_request: Some(request.into()),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_last_error(mut self, err: BoxError) -> Self {
        self.last_error = Some(err);
        self
    }
}

impl fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.last_request) {
            (Some(msg), Some(req)) => write!(f, "resource not found: {msg} (request: {req})"),
            (Some(msg), None) => write!(f, "resource not found: {msg}"),
            (None, Some(req)) => write!(f, "resource not found (request: {req})"),
            (None, None) => f.write_str("resource not found"),
        }
    }
}

impl StdError for NotFoundError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.last_error
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

fn chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    let mut next = Some(err);
    std::iter::from_fn(move || {
        let current = next?;
        next = current.source();
        Some(current)
    })
}

/// True when the error (or anything it wraps) is the NotFound sentinel.
pub fn is_not_found(err: &(dyn StdError + 'static)) -> bool {
    chain(err).any(|e| e.downcast_ref::<NotFoundError>().is_some())
}

/// True when the error carries an exact remote-API code equal to `code`.
pub fn is_code(err: &(dyn StdError + 'static), code: &str) -> bool {
    chain(err).any(|e| {
        e.downcast_ref::<ApiError>()
            .is_some_and(|api| api.code == code)
    })
}

/// As [`is_code`], and the message contains `substr`.
pub fn is_code_message(err: &(dyn StdError + 'static), code: &str, substr: &str) -> bool {
    chain(err).any(|e| {
        e.downcast_ref::<ApiError>()
            .is_some_and(|api| api.code == code && api.message.contains(substr))
    })
}

/// The remote-API code carried by the error chain, if any.
pub fn error_code<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a str> {
    chain(err).find_map(|e| e.downcast_ref::<ApiError>().map(|api| api.code.as_str()))
}

/// Walk the full error chain and join all causes into one string.
///
/// Cloud SDK errors often have terse `Display` impls but useful detail in
/// the source chain.
pub fn format_err_chain(err: &dyn StdError) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
