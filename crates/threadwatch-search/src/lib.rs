//! In-memory inverted search index and ranked searcher (spec sections
//! 4.13-4.14).

mod index;
mod searcher;
mod tokenize;

pub use index::SearchIndex;
pub use searcher::{ScoredNotification, SearchField, SearchOutcome, Searcher, SearcherOptions};
