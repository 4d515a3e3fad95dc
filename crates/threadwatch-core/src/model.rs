//! The notification/action/group data model (spec section 3).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of thread a notification's subject refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    Issue,
    PullRequest,
    Commit,
    Release,
    Discussion,
}

impl SubjectType {
    /// The provider's on-the-wire spelling, used by [`Subject`] URL parsing
    /// and by the detail fetcher to pick an endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Issue => "Issue",
            Self::PullRequest => "PullRequest",
            Self::Commit => "Commit",
            Self::Release => "Release",
            Self::Discussion => "Discussion",
        }
    }
}

/// What a notification is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub subject_type: SubjectType,
    pub title: String,
    pub url: String,
}

/// The repository a notification belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// `"owner/name"`.
    pub full_name: String,
    pub owner_login: String,
    pub private: bool,
    pub url: String,
}

impl Repository {
    /// Splits [`Self::full_name`] on `/` and returns the first component,
    /// or `None` if there is no `/` in the name.
    ///
    /// Used by the owner post-filter (spec 4.3.1) and by the Grouper's
    /// `Owner` strategy (spec 4.15), both of which require this split to
    /// agree exactly.
    pub fn owner(&self) -> Option<&str> {
        self.full_name.split_once('/').map(|(owner, _)| owner)
    }
}

/// An immutable snapshot of one Provider notification.
///
/// `id` is the primary key in every index and diff: a notification
/// observed with a later `updated_at` than a previously seen notification
/// of the same id is considered "updated" regardless of other field
/// equality (spec section 3 invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub unread: bool,
    pub reason: String,
    pub updated_at: DateTime<Utc>,
    pub subject: Subject,
    pub repository: Repository,
    /// Derived endpoint URL attached by the detail fetcher (spec 4.5);
    /// absent on a freshly fetched notification.
    #[serde(default)]
    pub detail_url: Option<String>,
}

impl Notification {
    /// Returns a clone of `self` with [`Self::detail_url`] set.
    ///
    /// The detail fetcher never mutates any other field (spec 4.5).
    pub fn with_detail_url(&self, detail_url: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.detail_url = Some(detail_url.into());
        next
    }
}

/// A shared, reference-counted notification.
///
/// Groups and search results hold `Arc<Notification>` rather than cloning
/// the notification body (spec section 3: "Groups and search results
/// borrow notifications by reference; they never clone them"). An `Arc`
/// is the idiomatic stand-in for that borrow once notifications must be
/// shared across worker tasks and groups that outlive any single
/// borrow-checked scope.
pub type SharedNotification = Arc<Notification>;

/// The kind of mutation an [`Action`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    MarkAsRead,
    MarkAllAsRead,
    Archive,
    Unarchive,
    Subscribe,
    Unsubscribe,
    Mute,
    /// Never constructed directly; retained so `ActionType` lists the same
    /// eight members spec.md section 3 enumerates. At runtime, unmuting is
    /// always encoded as `ActionType::Mute` with `metadata["unmute"] ==
    /// "true"` (see [`Action::is_unmute`] and spec section 9's open
    /// question on promoting this to a first-class type).
    Unmute,
}

/// One recorded or attempted Provider mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub action_type: ActionType,
    pub notification_id: Option<String>,
    pub repository_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Action {
    /// Builds a successful action record with no metadata.
    pub fn success(action_type: ActionType, timestamp: DateTime<Utc>) -> Self {
        Self {
            action_type,
            notification_id: None,
            repository_name: None,
            timestamp,
            success: true,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Builds a failed action record carrying `error`.
    pub fn failure(action_type: ActionType, timestamp: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            action_type,
            notification_id: None,
            repository_name: None,
            timestamp,
            success: false,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_notification_id(mut self, id: impl Into<String>) -> Self {
        self.notification_id = Some(id.into());
        self
    }

    pub fn with_repository_name(mut self, name: impl Into<String>) -> Self {
        self.repository_name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True if this is the `Mute` encoding of an unmute request
    /// (`metadata["unmute"] == "true"`), per spec section 9.
    pub fn is_unmute(&self) -> bool {
        self.action_type == ActionType::Mute
            && self.metadata.get("unmute").map(String::as_str) == Some("true")
    }
}

/// The outcome of a single mutation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: Action,
    pub success: bool,
    pub error: Option<String>,
}

impl ActionResult {
    pub fn from_action(action: Action) -> Self {
        Self {
            success: action.success,
            error: action.error.clone(),
            action,
        }
    }
}

/// The strategy used to produce a [`Group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupType {
    Repository,
    Owner,
    Type,
    Reason,
    Thread,
    Time,
    Smart,
    /// Reserved; the Grouper returns no groups for this strategy until a
    /// scoring contract exists (spec section 4.15, "Score").
    Score,
    /// The synthetic tail produced when `maxGroups` collapses the
    /// lowest-count groups.
    Other,
}

/// One group of notifications produced by the Grouper.
///
/// `parent_id` is a lookup key into the owning grouper's group table, not
/// an owned back-reference — see spec section 9's note on cyclic
/// references between a group and its subgroups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub group_type: GroupType,
    pub count: usize,
    pub unread_count: usize,
    #[serde(skip)]
    pub notifications: Vec<SharedNotification>,
    #[serde(default)]
    pub subgroups: Option<Vec<Group>>,
    #[serde(skip)]
    pub parent_id: Option<String>,
}

impl Group {
    /// Builds a group from its member notifications, computing `count` and
    /// `unread_count` from the slice (spec section 8 universal invariant).
    pub fn from_notifications(
        id: impl Into<String>,
        name: impl Into<String>,
        group_type: GroupType,
        notifications: Vec<SharedNotification>,
    ) -> Self {
        let unread_count = notifications.iter().filter(|n| n.unread).count();
        Self {
            id: id.into(),
            name: name.into(),
            group_type,
            count: notifications.len(),
            unread_count,
            notifications,
            subgroups: None,
            parent_id: None,
        }
    }

    /// Flattens this group and all of its subgroups (if any) into a single
    /// list of notifications, used by the Grouper idempotence property
    /// (spec section 8).
    pub fn flatten(&self) -> Vec<SharedNotification> {
        if let Some(subgroups) = &self.subgroups {
            subgroups.iter().flat_map(Group::flatten).collect()
        } else {
            self.notifications.clone()
        }
    }
}
