//! Inverted index over four notification fields (spec 4.13).

use std::collections::{HashMap, HashSet};

use threadwatch_core::model::SharedNotification;
use tokio::sync::RwLock;

use crate::tokenize::tokenize;

#[derive(Default)]
struct IndexData {
    docs: HashMap<String, SharedNotification>,
    title: HashMap<String, HashSet<String>>,
    repository: HashMap<String, HashSet<String>>,
    subject_type: HashMap<String, HashSet<String>>,
    reason: HashMap<String, HashSet<String>>,
}

/// A read-write-locked inverted index rebuilt wholesale on every
/// [`SearchIndex::update`].
///
/// Reads never observe a half-built index: `update` swaps in a complete
/// [`IndexData`] under a single write-lock acquisition rather than
/// mutating the existing maps in place (spec 4.13: "Ties go to the
/// reader: readers never see a half-built index").
pub struct SearchIndex {
    data: RwLock<IndexData>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self { data: RwLock::new(IndexData::default()) }
    }

    /// Replaces the entire index with one built from `docs` (replace, not
    /// merge).
    pub async fn update(&self, docs: &[SharedNotification]) {
        let mut next = IndexData::default();
        for doc in docs {
            for token in tokenize(&doc.subject.title) {
                next.title.entry(token).or_default().insert(doc.id.clone());
            }
            for token in tokenize(&doc.repository.full_name) {
                next.repository.entry(token).or_default().insert(doc.id.clone());
            }
            next.subject_type
                .entry(doc.subject.subject_type.as_str().to_lowercase())
                .or_default()
                .insert(doc.id.clone());
            next.reason.entry(doc.reason.to_lowercase()).or_default().insert(doc.id.clone());
            next.docs.insert(doc.id.clone(), doc.clone());
        }
        *self.data.write().await = next;
    }

    /// Tokenizes `query`, looks each token up in every sub-index
    /// (requiring all tokens present within a single sub-index), then
    /// unions the per-field matches (OR across fields).
    pub async fn search(&self, query: &str) -> Vec<SharedNotification> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }

        let data = self.data.read().await;
        let mut matched: HashSet<String> = HashSet::new();
        matched.extend(docs_matching_all_tokens(&data.title, &tokens));
        matched.extend(docs_matching_all_tokens(&data.repository, &tokens));
        matched.extend(docs_matching_all_tokens(&data.subject_type, &tokens));
        matched.extend(docs_matching_all_tokens(&data.reason, &tokens));

        matched.into_iter().filter_map(|id| data.docs.get(&id).cloned()).collect()
    }

    pub async fn get_by_id(&self, id: &str) -> Option<SharedNotification> {
        self.data.read().await.docs.get(id).cloned()
    }

    pub async fn get_all(&self) -> Vec<SharedNotification> {
        self.data.read().await.docs.values().cloned().collect()
    }

    pub async fn size(&self) -> usize {
        self.data.read().await.docs.len()
    }
}

impl Default for SearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Docs present under every token in `tokens` within a single sub-index;
/// empty if any token is absent.
fn docs_matching_all_tokens(index: &HashMap<String, HashSet<String>>, tokens: &HashSet<String>) -> HashSet<String> {
    let mut tokens = tokens.iter();
    let Some(first) = tokens.next() else {
        return HashSet::new();
    };
    let Some(mut result) = index.get(first).cloned() else {
        return HashSet::new();
    };
    for token in tokens {
        match index.get(token) {
            Some(docs) => result = result.intersection(docs).cloned().collect(),
            None => return HashSet::new(),
        }
        if result.is_empty() {
            break;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use threadwatch_core::model::{Notification, Repository, Subject, SubjectType};
    use std::sync::Arc;

    fn notification(id: &str, title: &str, repo: &str, reason: &str) -> SharedNotification {
        Arc::new(Notification {
            id: id.to_string(),
            unread: true,
            reason: reason.to_string(),
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
    async fn search_matches_on_title_tokens() {
        let index = SearchIndex::new();
        index
            .update(&[
                notification("1", "Fix race condition", "acme/widgets", "subscribed"),
                notification("2", "Add docs", "acme/widgets", "subscribed"),
            ])
            .await;
        let results = index.search("race").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "1");
    }

    #[tokio::test]
    async fn search_unions_matches_across_fields() {
        let index = SearchIndex::new();
        index
            .update(&[
                notification("1", "Unrelated title", "acme/widgets", "subscribed"),
                notification("2", "Another title", "other/repo", "mentioned"),
            ])
            .await;
        let results = index.search("widgets").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "1");
    }

    #[tokio::test]
    async fn search_requires_all_tokens_within_a_sub_index() {
        let index = SearchIndex::new();
        index
            .update(&[notification("1", "race condition bug", "acme/widgets", "subscribed")])
            .await;
        assert_eq!(index.search("race nonexistent").await.len(), 0);
        assert_eq!(index.search("race condition").await.len(), 1);
    }

    #[tokio::test]
    async fn update_replaces_rather_than_merges() {
        let index = SearchIndex::new();
        index.update(&[notification("1", "first", "acme/widgets", "subscribed")]).await;
        index.update(&[notification("2", "second", "acme/widgets", "subscribed")]).await;
        assert_eq!(index.size().await, 1);
        assert!(index.get_by_id("1").await.is_none());
    }

    #[tokio::test]
    async fn get_all_and_size_reflect_the_current_index() {
        let index = SearchIndex::new();
        index
            .update(&[
                notification("1", "first", "acme/widgets", "subscribed"),
                notification("2", "second", "acme/widgets", "subscribed"),
            ])
            .await;
        assert_eq!(index.size().await, 2);
        assert_eq!(index.get_all().await.len(), 2);
    }

    proptest::proptest! {
        /// Spec section 8 rebuild-equivalence property: rebuilding the
        /// index from its own current contents (a no-op snapshot
        /// round-trip) always reproduces the same document set, since
        /// `update` replaces rather than merges.
        #[test]
        fn rebuilding_from_a_snapshot_reproduces_the_same_ids(ids in proptest::collection::hash_set(1u32..500, 0..20)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let index = SearchIndex::new();
                let docs: Vec<SharedNotification> = ids
                    .iter()
                    .map(|id| notification(&id.to_string(), "some title", "acme/widgets", "subscribed"))
                    .collect();
                index.update(&docs).await;
                let snapshot = index.get_all().await;
                index.update(&snapshot).await;

                let mut rebuilt_ids: Vec<String> = index.get_all().await.into_iter().map(|n| n.id.clone()).collect();
                let mut original_ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
                rebuilt_ids.sort();
                original_ids.sort();
                prop_assert_eq!(rebuilt_ids, original_ids);
                Ok(())
            })?;
        }
    }
}
