//! converge-core
//!
//! Pure domain types for the converge reconciliation engine: the typed
//! attribute value model, schema entries, the tag algebra, composite-id
//! canonicalisation, and the error kinds every other crate branches on.
//! No AWS SDK dependency — this is the shared vocabulary of the system.

pub mod error;
pub mod id;
pub mod schema;
pub mod tags;
pub mod value;

pub use crate::error::{
    error_code, is_code, is_code_message, is_not_found, ApiError, CoreError, NotFoundError,
};
pub use crate::id::{CompositeId, IdSpec};
pub use crate::schema::{Schema, SchemaEntry, Validation};
pub use crate::tags::{TagDiff, TagPattern, TagSet};
pub use crate::value::{Kind, Value};
