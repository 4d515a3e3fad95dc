//! Parses a space-separated filter query into a conjunction of atomic
//! predicates (spec 4.16).

use chrono::NaiveDate;
use threadwatch_core::model::SharedNotification;

const FIELD_KEYS: &[&str] = &[
    "repo",
    "repository",
    "org",
    "type",
    "reason",
    "title",
    "is",
    "author",
    "involves",
    "label",
    "state",
    "created",
    "updated",
];

/// One atomic predicate parsed out of a filter query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `key:value`, for a key in [`FIELD_KEYS`].
    Field { key: String, value: String },
    /// A bare token, matched by case-insensitive substring against
    /// title, repository fullName, and subject type.
    Text(String),
}

/// A parsed filter query: predicates combine with implicit AND (spec
/// 4.16; OR/NOT/parentheses are documented future syntax, not required
/// here).
#[derive(Debug, Clone, Default)]
pub struct FilterExpression {
    predicates: Vec<Predicate>,
}

impl FilterExpression {
    /// Splits `query` on whitespace; each token is a `key:value` field
    /// predicate when its key is recognized, else a text predicate.
    pub fn parse(query: &str) -> Self {
        let predicates = query
            .split_whitespace()
            .map(|token| match token.split_once(':') {
                Some((key, value)) if FIELD_KEYS.contains(&key.to_lowercase().as_str()) => {
                    Predicate::Field { key: key.to_lowercase(), value: value.to_string() }
                }
                _ => Predicate::Text(token.to_string()),
            })
            .collect();
        Self { predicates }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// True if `notification` satisfies every parsed predicate.
    pub fn matches(&self, notification: &SharedNotification) -> bool {
        self.predicates.iter().all(|p| matches_one(p, notification))
    }
}

fn matches_one(predicate: &Predicate, n: &SharedNotification) -> bool {
    match predicate {
        Predicate::Text(text) => {
            let needle = text.to_lowercase();
            n.subject.title.to_lowercase().contains(&needle)
                || n.repository.full_name.to_lowercase().contains(&needle)
                || n.subject.subject_type.as_str().to_lowercase().contains(&needle)
        }
        Predicate::Field { key, value } => match key.as_str() {
            "repo" | "repository" => n.repository.full_name.eq_ignore_ascii_case(value),
            "org" => n.repository.owner().is_some_and(|o| o.eq_ignore_ascii_case(value)),
            "type" => n.subject.subject_type.as_str().eq_ignore_ascii_case(value),
            "reason" => n.reason.eq_ignore_ascii_case(value),
            "title" => n.subject.title.to_lowercase().contains(&value.to_lowercase()),
            "is" => match value.to_lowercase().as_str() {
                "read" => !n.unread,
                "unread" => n.unread,
                _ => false,
            },
            "created" | "updated" => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .is_ok_and(|date| n.updated_at.date_naive() == date),
            // `author`, `involves`, `label`, `state` are recognized by
            // the grammar but have no corresponding Notification field
            // until a Provider surfaces that data (spec section 9);
            // parsed, not evaluated.
            "author" | "involves" | "label" | "state" => true,
            _ => false,
        },
    }
}
