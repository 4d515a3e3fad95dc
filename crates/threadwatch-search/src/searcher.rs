//! Ranked search over a provided notification set (spec 4.14).

use std::time::Duration;

use futures::{stream, StreamExt};
use regex::Regex;
use threadwatch_core::cancel::CancellationToken;
use threadwatch_core::model::SharedNotification;

/// The four fields a [`Searcher`] can match against, each with a fixed
/// weight (spec 4.14).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    Title,
    Repository,
    Reason,
    Type,
}

impl SearchField {
    fn weight(self) -> f64 {
        match self {
            Self::Title => 1.0,
            Self::Repository => 0.8,
            Self::Reason => 0.7,
            Self::Type => 0.6,
        }
    }

    fn text(self, notification: &SharedNotification) -> String {
        match self {
            Self::Title => notification.subject.title.clone(),
            Self::Repository => notification.repository.full_name.clone(),
            Self::Reason => notification.reason.clone(),
            Self::Type => notification.subject.subject_type.as_str().to_string(),
        }
    }
}

const SEQUENTIAL_THRESHOLD: usize = 100;

/// Options recognized by [`Searcher::search`].
#[derive(Clone)]
pub struct SearcherOptions {
    pub case_sensitive: bool,
    pub use_regex: bool,
    pub max_results: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub fields: Vec<SearchField>,
    pub highlight_prefix: String,
    pub highlight_suffix: String,
}

impl Default for SearcherOptions {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            use_regex: false,
            max_results: usize::MAX,
            concurrency: 8,
            timeout: Duration::from_secs(5),
            fields: vec![SearchField::Title, SearchField::Repository, SearchField::Reason, SearchField::Type],
            highlight_prefix: String::new(),
            highlight_suffix: String::new(),
        }
    }
}

/// One matched notification with its aggregate score.
pub struct ScoredNotification {
    pub notification: SharedNotification,
    pub score: f64,
    pub matches: Vec<(SearchField, Vec<(usize, usize)>)>,
}

/// Result of a [`Searcher::search`] call that may have been cut short by
/// the timeout or cancellation token.
pub struct SearchOutcome {
    pub results: Vec<ScoredNotification>,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Matches and ranks a notification set against a query (spec 4.14).
pub struct Searcher;

impl Searcher {
    /// Scores every notification against `query`, drops zero-score
    /// results, sorts descending by score, and truncates to
    /// `opts.max_results`.
    pub async fn search(
        notifications: &[SharedNotification],
        query: &str,
        opts: &SearcherOptions,
        cancel: &CancellationToken,
    ) -> SearchOutcome {
        let pattern = if opts.use_regex {
            let pattern = if opts.case_sensitive { query.to_string() } else { format!("(?i){query}") };
            match Regex::new(&pattern) {
                Ok(re) => Some(re),
                Err(_) => return SearchOutcome { results: Vec::new(), timed_out: false, cancelled: false },
            }
        } else {
            None
        };

        let collect = Self::collect(notifications, query, &pattern, opts, cancel);
        match tokio::time::timeout(opts.timeout, collect).await {
            Ok(mut results) => {
                results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                results.truncate(opts.max_results);
                SearchOutcome { results, timed_out: false, cancelled: cancel.is_cancelled() }
            }
            Err(_) => SearchOutcome { results: Vec::new(), timed_out: true, cancelled: false },
        }
    }

    async fn collect(
        notifications: &[SharedNotification],
        query: &str,
        pattern: &Option<Regex>,
        opts: &SearcherOptions,
        cancel: &CancellationToken,
    ) -> Vec<ScoredNotification> {
        if notifications.len() < SEQUENTIAL_THRESHOLD {
            let mut results = Vec::new();
            for notification in notifications {
                if cancel.is_cancelled() {
                    break;
                }
                if let Some(scored) = score_one(notification, query, pattern, opts) {
                    results.push(scored);
                }
            }
            return results;
        }

        let concurrency = opts.concurrency.max(1);
        stream::iter(notifications.iter().cloned())
            .map(|notification| {
                let query = query.to_string();
                let pattern = pattern.clone();
                let opts = opts.clone();
                let cancel = cancel.clone();
                async move {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    score_one(&notification, &query, &pattern, &opts)
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(|result| async move { result })
            .collect()
            .await
    }

    /// Wraps each of `matches` in `prefix`/`suffix`, assuming matches are
    /// non-overlapping and given in start order (spec 4.14).
    pub fn highlight_matches(text: &str, matches: &[(usize, usize)], prefix: &str, suffix: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for &(start, end) in matches {
            if start < cursor || end > text.len() || start > end {
                continue;
            }
            out.push_str(&text[cursor..start]);
            out.push_str(prefix);
            out.push_str(&text[start..end]);
            out.push_str(suffix);
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

fn find_matches(text: &str, query: &str, pattern: &Option<Regex>, case_sensitive: bool) -> Vec<(usize, usize)> {
    if let Some(re) = pattern {
        return re.find_iter(text).map(|m| (m.start(), m.end())).collect();
    }
    if query.is_empty() {
        return Vec::new();
    }
    if case_sensitive {
        text.match_indices(query).map(|(start, m)| (start, start + m.len())).collect()
    } else {
        let lower_text = text.to_lowercase();
        let lower_query = query.to_lowercase();
        lower_text.match_indices(lower_query.as_str()).map(|(start, m)| (start, start + m.len())).collect()
    }
}

fn score_one(
    notification: &SharedNotification,
    query: &str,
    pattern: &Option<Regex>,
    opts: &SearcherOptions,
) -> Option<ScoredNotification> {
    let mut score = 0.0;
    let mut matches = Vec::new();
    for &field in &opts.fields {
        let text = field.text(notification);
        let spans = find_matches(&text, query, pattern, opts.case_sensitive);
        if !spans.is_empty() {
            score += spans.len() as f64 * field.weight();
            matches.push((field, spans));
        }
    }
    if score == 0.0 {
        None
    } else {
        Some(ScoredNotification { notification: notification.clone(), score, matches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use threadwatch_core::model::{Notification, Repository, Subject, SubjectType};

    fn notification(id: &str, title: &str, repo: &str) -> SharedNotification {
        Arc::new(Notification {
            id: id.to_string(),
            unread: true,
            reason: "subscribed".to_string(),
            updated_at: Utc::now(),
            subject: Subject {
                subject_type: SubjectType::Issue,
                title: title.to_string(),
                url: format!("https://example.invalid/{id}"),
            },
            repository: Repository {
                full_name: repo.to_string(),
                owner_login: repo.split('/').next().unwrap_or_default().to_string(),
                private: false,
                url: format!("https://example.invalid/{repo}"),
            },
            detail_url: None,
        })
    }

    #[tokio::test]
    async fn discards_zero_match_notifications() {
        let notifications = vec![notification("1", "Race condition", "acme/widgets")];
        let outcome = Searcher::search(&notifications, "nonexistent", &SearcherOptions::default(), &CancellationToken::new()).await;
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn sorts_descending_by_score() {
        let notifications = vec![
            notification("1", "widgets widgets widgets", "acme/widgets"),
            notification("2", "widgets", "acme/widgets"),
        ];
        let outcome = Searcher::search(&notifications, "widgets", &SearcherOptions::default(), &CancellationToken::new()).await;
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.results[0].notification.id, "1");
    }

    #[tokio::test]
    async fn truncates_to_max_results() {
        let notifications = vec![
            notification("1", "widgets", "acme/widgets"),
            notification("2", "widgets", "acme/widgets"),
        ];
        let opts = SearcherOptions { max_results: 1, ..Default::default() };
        let outcome = Searcher::search(&notifications, "widgets", &opts, &CancellationToken::new()).await;
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn regex_mode_compiles_and_matches() {
        let notifications = vec![notification("1", "Issue #42 reported", "acme/widgets")];
        let opts = SearcherOptions { use_regex: true, ..Default::default() };
        let outcome = Searcher::search(&notifications, r"#\d+", &opts, &CancellationToken::new()).await;
        assert_eq!(outcome.results.len(), 1);
    }

    #[test]
    fn highlight_wraps_each_match() {
        let highlighted = Searcher::highlight_matches("race condition bug", &[(0, 4), (5, 14)], "[", "]");
        assert_eq!(highlighted, "[race] [condition] bug");
    }

    #[tokio::test]
    async fn already_cancelled_token_returns_no_results() {
        let notifications = vec![notification("1", "widgets", "acme/widgets")];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = Searcher::search(&notifications, "widgets", &SearcherOptions::default(), &cancel).await;
        assert!(outcome.results.is_empty());
    }
}
