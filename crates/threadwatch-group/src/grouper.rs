//! Groups a notification set by a primary strategy, with optional
//! two-level subdivision by a secondary strategy (spec 4.15).

use std::collections::{HashMap, HashSet};

use regex::Regex;
use threadwatch_core::clock::Clock;
use threadwatch_core::model::{Group, GroupType, SharedNotification};

/// Thresholds and knobs for [`Grouper::group`].
#[derive(Clone)]
pub struct GrouperOptions {
    pub primary: GroupType,
    pub secondary: Option<GroupType>,
    /// Groups smaller than this are dropped. Defaults to 1 (no drop).
    pub min_group_size: usize,
    /// `0` disables the "Other" tail collapse.
    pub max_groups: usize,
    pub smart_grouping_threshold: f64,
    pub today_threshold: chrono::Duration,
    pub week_threshold: chrono::Duration,
    pub month_threshold: chrono::Duration,
}

impl Default for GrouperOptions {
    fn default() -> Self {
        Self {
            primary: GroupType::Repository,
            secondary: None,
            min_group_size: 1,
            max_groups: 0,
            smart_grouping_threshold: 0.7,
            today_threshold: chrono::Duration::hours(24),
            week_threshold: chrono::Duration::days(7),
            month_threshold: chrono::Duration::days(30),
        }
    }
}

/// Groups notification snapshots by the strategies spec 4.15 describes.
pub struct Grouper;

impl Grouper {
    pub fn group(notifications: &[SharedNotification], opts: &GrouperOptions, clock: &dyn Clock) -> Vec<Group> {
        let groups = partition(notifications, opts.primary, opts, clock);
        let mut groups = post_process(groups, opts);

        if let Some(secondary) = opts.secondary {
            for group in &mut groups {
                if group.group_type == GroupType::Other {
                    continue;
                }
                let sub_opts = GrouperOptions { primary: secondary, secondary: None, ..opts.clone() };
                let subgroups = partition(&group.notifications, secondary, &sub_opts, clock);
                let subgroups = post_process(subgroups, &sub_opts);
                if !subgroups.is_empty() {
                    group.subgroups = Some(subgroups);
                }
            }
        }

        groups
    }
}

fn partition(
    notifications: &[SharedNotification],
    strategy: GroupType,
    opts: &GrouperOptions,
    clock: &dyn Clock,
) -> Vec<Group> {
    match strategy {
        GroupType::Repository => by_key(notifications, strategy, |n| Some((n.repository.full_name.clone(), n.repository.full_name.clone()))),
        GroupType::Owner => by_key(notifications, strategy, |n| n.repository.owner().map(|o| (o.to_string(), o.to_string()))),
        GroupType::Type => by_key(notifications, strategy, |n| {
            let key = n.subject.subject_type.as_str().to_string();
            Some((key.clone(), key))
        }),
        GroupType::Reason => by_key(notifications, strategy, |n| Some((n.reason.clone(), present_reason(&n.reason)))),
        GroupType::Thread => by_thread(notifications),
        GroupType::Time => by_time(notifications, opts, clock),
        GroupType::Smart => by_smart(notifications, opts.smart_grouping_threshold),
        GroupType::Score => Vec::new(),
        GroupType::Other => Vec::new(),
    }
}

fn by_key(
    notifications: &[SharedNotification],
    strategy: GroupType,
    key_of: impl Fn(&SharedNotification) -> Option<(String, String)>,
) -> Vec<Group> {
    let mut buckets: HashMap<String, (String, Vec<SharedNotification>)> = HashMap::new();
    for n in notifications {
        let Some((key, name)) = key_of(n) else { continue };
        buckets.entry(key).or_insert_with(|| (name, Vec::new())).1.push(n.clone());
    }
    buckets
        .into_iter()
        .map(|(key, (name, members))| Group::from_notifications(key, name, strategy, members))
        .collect()
}

/// `{ assign: "Assigned", mention: "Mentioned", ... }`; unknown reasons
/// are title-cased.
fn present_reason(reason: &str) -> String {
    match reason {
        "assign" => "Assigned".to_string(),
        "author" => "Author".to_string(),
        "comment" => "Commented".to_string(),
        "mention" => "Mentioned".to_string(),
        "review_requested" => "Review Requested".to_string(),
        "security_alert" => "Security Alert".to_string(),
        "state_change" => "State Changed".to_string(),
        "subscribed" => "Subscribed".to_string(),
        "team_mention" => "Team Mentioned".to_string(),
        other => title_case(other),
    }
}

fn title_case(s: &str) -> String {
    s.split(&['_', '-', ' '][..])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn thread_regex() -> Regex {
    Regex::new(r"/(issues|pull)/(\d+)$").expect("static thread regex is valid")
}

fn by_thread(notifications: &[SharedNotification]) -> Vec<Group> {
    let re = thread_regex();
    by_key(notifications, GroupType::Thread, |n| {
        re.captures(&n.subject.url).map(|caps| {
            let key = format!("{}/{}", &caps[1], &caps[2]);
            (key.clone(), key)
        })
    })
}

fn by_time(notifications: &[SharedNotification], opts: &GrouperOptions, clock: &dyn Clock) -> Vec<Group> {
    let now = clock.now_utc();
    by_key(notifications, GroupType::Time, |n| {
        let age = now - n.updated_at;
        let bucket = if age <= opts.today_threshold {
            "Today"
        } else if age <= opts.week_threshold {
            "This Week"
        } else if age <= opts.month_threshold {
            "This Month"
        } else {
            "Older"
        };
        Some((bucket.to_string(), bucket.to_string()))
    })
}

fn title_tokens(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// First pass: exact title match. Second pass: assigns any still-singleton
/// document to the most similar existing group by Jaccard similarity of
/// lowercased title tokens, falling back to a new singleton group when no
/// candidate clears `threshold` (spec 4.15).
fn by_smart(notifications: &[SharedNotification], threshold: f64) -> Vec<Group> {
    let mut exact: HashMap<String, Vec<SharedNotification>> = HashMap::new();
    for n in notifications {
        exact.entry(n.subject.title.clone()).or_default().push(n.clone());
    }

    let mut groups: Vec<(String, Vec<SharedNotification>)> = Vec::new();
    let mut leftovers: Vec<SharedNotification> = Vec::new();
    for (title, members) in exact {
        if members.len() > 1 {
            groups.push((title, members));
        } else {
            leftovers.extend(members);
        }
    }

    'outer: for n in leftovers {
        let tokens = title_tokens(&n.subject.title);
        let mut best: Option<(usize, f64)> = None;
        for (idx, (title, _)) in groups.iter().enumerate() {
            let score = jaccard(&tokens, &title_tokens(title));
            if score >= threshold && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((idx, score));
            }
        }
        if let Some((idx, _)) = best {
            groups[idx].1.push(n);
            continue 'outer;
        }
        groups.push((n.subject.title.clone(), vec![n]));
    }

    groups
        .into_iter()
        .enumerate()
        .map(|(i, (title, members))| Group::from_notifications(format!("smart-{i}"), title, GroupType::Smart, members))
        .collect()
}

/// Drops undersized groups, sorts by count descending, and collapses the
/// tail into a synthetic "Other" group once `max_groups` is exceeded.
fn post_process(mut groups: Vec<Group>, opts: &GrouperOptions) -> Vec<Group> {
    groups.retain(|g| g.count >= opts.min_group_size.max(1) || opts.min_group_size == 0);
    groups.sort_by(|a, b| b.count.cmp(&a.count));

    if opts.max_groups > 0 && groups.len() > opts.max_groups {
        let keep = opts.max_groups.saturating_sub(1);
        let tail = groups.split_off(keep);
        let mut tail_notifications = Vec::new();
        for g in tail {
            tail_notifications.extend(g.notifications);
        }
        let other = Group::from_notifications("other", "Other", GroupType::Other, tail_notifications);
        groups.push(other);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use threadwatch_core::clock::SystemClock;
    use threadwatch_core::model::{Notification, Repository, Subject, SubjectType};
    use std::sync::Arc;

    fn notification(id: &str, repo: &str, title: &str, reason: &str, url: &str) -> SharedNotification {
        Arc::new(Notification {
            id: id.to_string(),
            unread: true,
            reason: reason.to_string(),
            updated_at: Utc::now(),
            subject: Subject { subject_type: SubjectType::Issue, title: title.to_string(), url: url.to_string() },
            repository: Repository {
                full_name: repo.to_string(),
                owner_login: repo.split('/').next().unwrap_or_default().to_string(),
                private: false,
                url: format!("https://example.invalid/{repo}"),
            },
            detail_url: None,
        })
    }

    #[test]
    fn groups_by_repository() {
        let notifications = vec![
            notification("1", "acme/widgets", "a", "subscribed", "https://example.invalid/issues/1"),
            notification("2", "acme/widgets", "b", "subscribed", "https://example.invalid/issues/2"),
            notification("3", "other/repo", "c", "subscribed", "https://example.invalid/issues/3"),
        ];
        let groups = Grouper::group(&notifications, &GrouperOptions::default(), &SystemClock);
        assert_eq!(groups.len(), 2);
        let widgets = groups.iter().find(|g| g.id == "acme/widgets").unwrap();
        assert_eq!(widgets.count, 2);
    }

    #[test]
    fn owner_skips_documents_without_a_slash() {
        let mut n = (*notification("1", "no-slash", "a", "subscribed", "u")).clone();
        n.repository.full_name = "no-slash".to_string();
        let notifications = vec![Arc::new(n)];
        let opts = GrouperOptions { primary: GroupType::Owner, ..Default::default() };
        let groups = Grouper::group(&notifications, &opts, &SystemClock);
        assert!(groups.is_empty());
    }

    #[test]
    fn reason_uses_the_presentation_map_for_the_name() {
        let notifications = vec![notification("1", "acme/widgets", "a", "mention", "u")];
        let opts = GrouperOptions { primary: GroupType::Reason, ..Default::default() };
        let groups = Grouper::group(&notifications, &opts, &SystemClock);
        assert_eq!(groups[0].name, "Mentioned");
    }

    #[test]
    fn thread_extracts_type_and_number_from_url() {
        let notifications = vec![notification("1", "acme/widgets", "a", "subscribed", "https://example.invalid/acme/widgets/pull/42")];
        let opts = GrouperOptions { primary: GroupType::Thread, ..Default::default() };
        let groups = Grouper::group(&notifications, &opts, &SystemClock);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "pull/42");
    }

    #[test]
    fn thread_skips_unparseable_urls() {
        let notifications = vec![notification("1", "acme/widgets", "a", "subscribed", "https://example.invalid/not-a-thread")];
        let opts = GrouperOptions { primary: GroupType::Thread, ..Default::default() };
        assert!(Grouper::group(&notifications, &opts, &SystemClock).is_empty());
    }

    #[test]
    fn smart_groups_exact_titles_then_similar_ones() {
        let notifications = vec![
            notification("1", "acme/widgets", "Fix race condition in worker pool", "subscribed", "u1"),
            notification("2", "acme/widgets", "Fix race condition in worker pool", "subscribed", "u2"),
            notification("3", "acme/widgets", "Fix race condition in worker", "subscribed", "u3"),
            notification("4", "acme/widgets", "Completely unrelated", "subscribed", "u4"),
        ];
        let opts = GrouperOptions { primary: GroupType::Smart, smart_grouping_threshold: 0.6, ..Default::default() };
        let groups = Grouper::group(&notifications, &opts, &SystemClock);
        let biggest = groups.iter().max_by_key(|g| g.count).unwrap();
        assert!(biggest.count >= 2);
    }

    #[test]
    fn score_strategy_returns_no_groups() {
        let notifications = vec![notification("1", "acme/widgets", "a", "subscribed", "u")];
        let opts = GrouperOptions { primary: GroupType::Score, ..Default::default() };
        assert!(Grouper::group(&notifications, &opts, &SystemClock).is_empty());
    }

    #[test]
    fn min_group_size_drops_small_groups() {
        let notifications = vec![
            notification("1", "acme/widgets", "a", "subscribed", "u1"),
            notification("2", "acme/widgets", "b", "subscribed", "u2"),
            notification("3", "solo/repo", "c", "subscribed", "u3"),
        ];
        let opts = GrouperOptions { min_group_size: 2, ..Default::default() };
        let groups = Grouper::group(&notifications, &opts, &SystemClock);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "acme/widgets");
    }

    #[test]
    fn max_groups_collapses_the_tail_into_other() {
        let notifications = vec![
            notification("1", "repo-a", "a", "subscribed", "u1"),
            notification("2", "repo-a", "a2", "subscribed", "u1b"),
            notification("3", "repo-b", "b", "subscribed", "u2"),
            notification("4", "repo-c", "c", "subscribed", "u3"),
        ];
        let opts = GrouperOptions { max_groups: 2, min_group_size: 0, ..Default::default() };
        let groups = Grouper::group(&notifications, &opts, &SystemClock);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().any(|g| g.group_type == GroupType::Other));
    }

    #[test]
    fn secondary_strategy_subdivides_each_group() {
        let notifications = vec![
            notification("1", "acme/widgets", "a", "mention", "u1"),
            notification("2", "acme/widgets", "b", "assign", "u2"),
        ];
        let opts = GrouperOptions {
            primary: GroupType::Repository,
            secondary: Some(GroupType::Reason),
            ..Default::default()
        };
        let groups = Grouper::group(&notifications, &opts, &SystemClock);
        assert_eq!(groups.len(), 1);
        let subgroups = groups[0].subgroups.as_ref().unwrap();
        assert_eq!(subgroups.len(), 2);
    }

    proptest::proptest! {
        /// Spec section 8 idempotence property: grouping partitions every
        /// input notification into exactly one group, so summing counts
        /// back up always recovers the original total regardless of how
        /// many distinct repositories the input spans.
        #[test]
        fn repository_grouping_accounts_for_every_notification(repo_indexes in proptest::collection::vec(0u32..5, 0..30)) {
            let notifications: Vec<SharedNotification> = repo_indexes
                .iter()
                .enumerate()
                .map(|(i, repo_idx)| notification(&i.to_string(), &format!("acme/repo-{repo_idx}"), "t", "subscribed", "u"))
                .collect();
            let opts = GrouperOptions { min_group_size: 0, ..Default::default() };
            let groups = Grouper::group(&notifications, &opts, &SystemClock);
            let total: usize = groups.iter().map(|g| g.count).sum();
            prop_assert_eq!(total, notifications.len());
        }
    }
}
