//! converge-engine
//!
//! The reconciliation machinery: typed resource lifecycle dispatch, the
//! state-change waiter, the retry driver, paginated listing, and finder
//! helpers. Resource *data* (the dictionary of cloud types) plugs in from
//! binding crates; this crate is the machinery only.
//!
//! Public API:
//! - [`Provider`] — register resource types, then `apply` / `refresh` /
//!   `import` individual instances
//! - [`StateChangeConf`] — poll an external resource toward a target
//!   status set
//! - [`retry`] / [`retry_with`] — bounded-backoff retry of idempotent
//!   calls
//! - [`for_each_page`] — visitor-based paged listing
//! - [`finder`] — the NotFound contract for per-resource lookups

pub mod apply;
pub mod data;
pub mod diff;
pub mod error;
pub mod finder;
mod import;
pub mod meta;
pub mod pages;
pub mod resource;
pub mod retry;
pub mod waiter;

pub use crate::apply::{Applied, Provider};
pub use crate::data::ResourceData;
pub use crate::diff::{AttrChange, InstanceDiff};
pub use crate::error::EngineError;
pub use crate::meta::ProviderMeta;
pub use crate::pages::for_each_page;
pub use crate::resource::{
    handler, BoxFuture, HandlerFn, Registry, ResourceType, Timeouts,
};
pub use crate::retry::{retry, retry_with, Attempt, RetryPolicy};
pub use crate::waiter::StateChangeConf;
