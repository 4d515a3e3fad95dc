//! Shared data model, error type, event system, and collaborator traits for
//! the threadwatch notification engine.
//!
//! This crate has no opinions about HTTP, storage, or scheduling — it only
//! defines the shapes every other `threadwatch-*` crate builds on:
//! the immutable [`Notification`]/[`Action`] data model, the
//! [`Provider`], [`ResponseCache`], and [`Clock`] traits a caller must
//! supply, and [`ThreadwatchError`], the unified error type used to avoid
//! hand-written `From` impls when composing multiple components.

pub mod cache;
pub mod cancel;
pub mod clock;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod model;
pub mod provider;
pub mod ratelimit;

pub use cache::ResponseCache;
pub use cancel::CancellationToken;
pub use clock::{Clock, SystemClock};
pub use error::ThreadwatchError;
pub use model::{Action, ActionResult, ActionType, Group, GroupType, Notification, SubjectType};
pub use provider::{Provider, SubscriptionUpdate};
pub use ratelimit::RateLimitSnapshot;
