//! Concurrency and data engine for a high-throughput code-hosting
//! notification inbox.
//!
//! `threadwatch` re-exports each independently-usable sub-crate under a
//! feature flag, so a caller that only needs the paginated fetcher isn't
//! forced to pull in the batch processor or the search index:
//!
//! ```toml
//! [dependencies]
//! threadwatch = { version = "0.1", features = ["fetch", "refresh"] }
//! ```
//!
//! This crate has no opinions about CLI, UI, output formatting, or
//! distribution packaging — see [`threadwatch_core`] for the data model
//! and collaborator traits (`Provider`, `ResponseCache`, `Clock`) every
//! sub-crate builds on.

pub use threadwatch_core as core;

#[cfg(feature = "ratelimiter")]
pub use threadwatch_ratelimiter as ratelimiter;

#[cfg(feature = "retry")]
pub use threadwatch_retry as retry;

#[cfg(feature = "backpressure")]
pub use threadwatch_backpressure as backpressure;

#[cfg(feature = "fetch")]
pub use threadwatch_fetch as fetch;

#[cfg(feature = "refresh")]
pub use threadwatch_refresh as refresh;

#[cfg(feature = "actions")]
pub use threadwatch_actions as actions;

#[cfg(feature = "search")]
pub use threadwatch_search as search;

#[cfg(feature = "group")]
pub use threadwatch_group as group;
