//! Bounded, most-recent-first log of recorded [`Action`]s (spec 4.11).

use std::sync::Arc;

use threadwatch_core::model::Action;
use tokio::sync::RwLock;

const DEFAULT_CAPACITY: usize = 100;

/// Concurrency-safe ring of the most recently recorded actions.
///
/// Entries are pushed front-first; trimming to [`Self::capacity`] happens
/// after every `add`, so the list never grows past capacity even under
/// concurrent writers.
pub struct ActionHistory {
    capacity: usize,
    entries: RwLock<Vec<Action>>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Prepends `action`, then trims to [`Self::capacity`].
    pub async fn add(&self, action: Action) {
        let mut entries = self.entries.write().await;
        entries.insert(0, action);
        entries.truncate(self.capacity);
    }

    /// Returns at most `min(n, size)` most-recent entries; `n <= 0` returns
    /// everything.
    pub async fn get_last(&self, n: i64) -> Vec<Action> {
        let entries = self.entries.read().await;
        if n <= 0 {
            entries.clone()
        } else {
            entries.iter().take(n as usize).cloned().collect()
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for ActionHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle to an [`ActionHistory`], the shape every consumer
/// (`ActionRunner`, `UndoEngine`) holds.
pub type SharedActionHistory = Arc<ActionHistory>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use threadwatch_core::model::ActionType;

    fn action(id: &str) -> Action {
        Action::success(ActionType::MarkAsRead, Utc::now()).with_notification_id(id)
    }

    #[tokio::test]
    async fn add_is_most_recent_first() {
        let history = ActionHistory::new();
        history.add(action("1")).await;
        history.add(action("2")).await;
        let last = history.get_last(-1).await;
        assert_eq!(last[0].notification_id.as_deref(), Some("2"));
        assert_eq!(last[1].notification_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn trims_to_capacity_after_every_add() {
        let history = ActionHistory::with_capacity(3);
        for i in 0..5 {
            history.add(action(&i.to_string())).await;
        }
        assert_eq!(history.len().await, 3);
        let last = history.get_last(-1).await;
        assert_eq!(last[0].notification_id.as_deref(), Some("4"));
        assert_eq!(last[2].notification_id.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn get_last_clamps_to_available_size() {
        let history = ActionHistory::new();
        history.add(action("1")).await;
        assert_eq!(history.get_last(10).await.len(), 1);
    }

    #[tokio::test]
    async fn non_positive_n_returns_everything() {
        let history = ActionHistory::new();
        history.add(action("1")).await;
        history.add(action("2")).await;
        assert_eq!(history.get_last(0).await.len(), 2);
    }
}
