//! Notification grouping strategies and the filter-expression parser
//! (spec sections 4.15-4.16).

mod filter;
mod grouper;

pub use filter::{FilterExpression, Predicate};
pub use grouper::{Grouper, GrouperOptions};
