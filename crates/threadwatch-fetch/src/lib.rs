//! Concurrent paginated fetch (spec section 4.3), its streaming variant
//! (4.4), and per-notification detail enrichment (4.5).

mod detail;
mod paginated;
mod stream;

pub use detail::{fetch_details, DetailError};
pub use paginated::{fetch_all, FetchError};
pub use stream::{collect_stream, NotificationStream, StreamItem};
