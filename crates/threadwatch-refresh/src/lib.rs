//! Background polling (spec section 4.6) and adaptive-interval diffing
//! (spec section 4.7) over [`threadwatch_fetch`].

mod common;
mod refresher;
mod watcher;

pub use refresher::{BackgroundRefresher, RefreshUpdate, RefresherConfig, RefresherConfigBuilder};
pub use watcher::{DiffEvent, DiffKind, PreFilter, Watcher, WatcherConfig, WatcherConfigBuilder, WatcherStats};
