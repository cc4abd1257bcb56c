//! In-memory activity store.
//!
//! Backs tests and single-node deployments. A persistent deployment plugs a
//! KV-backed implementation in behind the same [`ActivityStore`] trait.

use std::collections::{HashMap, HashSet};

use anchornet_common::{AppError, AppResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use url::Url;

use crate::activity::Activity;
use crate::query::{Criteria, QueryOptions, ReferenceType, page_window};
use crate::store::{ActivityCursor, ActivityStore, ReferenceCursor};

#[derive(Debug, Default)]
struct Partition {
    next_order: u64,
    entries: Vec<RefEntry>,
}

#[derive(Debug, Clone)]
struct RefEntry {
    iri: Url,
    order: u64,
}

#[derive(Default)]
struct Inner {
    activities: HashMap<String, Activity>,
    // Activity ids in first-insert order, for queries without an index.
    insertion: Vec<String>,
    partitions: HashMap<(ReferenceType, String), Partition>,
}

/// In-memory [`ActivityStore`].
#[derive(Default)]
pub struct MemoryActivityStore {
    inner: RwLock<Inner>,
}

impl MemoryActivityStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deduplicated references for the matching partitions, ascending by
    /// insertion order, earliest entry winning for duplicates.
    fn collect_references(
        inner: &Inner,
        ref_type: ReferenceType,
        owner: Option<&Url>,
    ) -> Vec<Url> {
        let mut entries: Vec<RefEntry> = Vec::new();

        match owner {
            Some(owner) => {
                if let Some(partition) =
                    inner.partitions.get(&(ref_type, owner.as_str().to_string()))
                {
                    entries.extend(partition.entries.iter().cloned());
                }
            }
            None => {
                for ((rt, _), partition) in &inner.partitions {
                    if *rt == ref_type {
                        entries.extend(partition.entries.iter().cloned());
                    }
                }
                entries.sort_by_key(|e| e.order);
            }
        }

        let mut seen = HashSet::new();
        entries
            .into_iter()
            .filter(|e| seen.insert(e.iri.as_str().to_string()))
            .map(|e| e.iri)
            .collect()
    }

    fn matches_actor(inner: &Inner, iri: &Url, actor: &Url) -> bool {
        inner
            .activities
            .get(iri.as_str())
            .map_or_else(|| iri == actor, |a| &a.actor == actor)
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn put_activity(&self, activity: &Activity) -> AppResult<()> {
        let mut inner = self.inner.write();
        let key = activity.id.as_str().to_string();

        if !inner.activities.contains_key(&key) {
            inner.insertion.push(key.clone());
        }
        inner.activities.insert(key, activity.clone());

        Ok(())
    }

    async fn get_activity(&self, id: &Url) -> AppResult<Activity> {
        self.inner
            .read()
            .activities
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("activity [{id}]")))
    }

    async fn add_reference(
        &self,
        ref_type: ReferenceType,
        owner: &Url,
        iri: &Url,
    ) -> AppResult<()> {
        let mut inner = self.inner.write();
        let partition = inner
            .partitions
            .entry((ref_type, owner.as_str().to_string()))
            .or_default();

        let order = partition.next_order;
        partition.next_order += 1;
        partition.entries.push(RefEntry {
            iri: iri.clone(),
            order,
        });

        Ok(())
    }

    async fn delete_reference(
        &self,
        ref_type: ReferenceType,
        owner: &Url,
        iri: &Url,
    ) -> AppResult<()> {
        let mut inner = self.inner.write();
        if let Some(partition) = inner
            .partitions
            .get_mut(&(ref_type, owner.as_str().to_string()))
        {
            partition.entries.retain(|e| &e.iri != iri);
        }

        Ok(())
    }

    async fn query_activities(
        &self,
        criteria: &Criteria,
        opts: QueryOptions,
    ) -> AppResult<ActivityCursor> {
        let inner = self.inner.read();

        let mut activities: Vec<Activity> = match criteria.ref_type {
            Some(ref_type) => {
                Self::collect_references(&inner, ref_type, criteria.owner.as_ref())
                    .into_iter()
                    .filter_map(|iri| inner.activities.get(iri.as_str()).cloned())
                    .collect()
            }
            None => inner
                .insertion
                .iter()
                .filter_map(|id| inner.activities.get(id).cloned())
                .collect(),
        };

        if let Some(iri) = &criteria.activity_iri {
            activities.retain(|a| &a.id == iri);
        }
        if let Some(actor) = &criteria.actor {
            activities.retain(|a| &a.actor == actor);
        }

        let total = activities.len();
        Ok(ActivityCursor::new(
            apply_paging(activities, total, opts),
            total,
        ))
    }

    async fn query_references(
        &self,
        ref_type: ReferenceType,
        criteria: &Criteria,
        opts: QueryOptions,
    ) -> AppResult<ReferenceCursor> {
        let inner = self.inner.read();

        let mut refs = Self::collect_references(&inner, ref_type, criteria.owner.as_ref());

        if let Some(iri) = &criteria.activity_iri {
            refs.retain(|r| r == iri);
        }
        if let Some(actor) = &criteria.actor {
            refs.retain(|r| Self::matches_actor(&inner, r, actor));
        }

        let total = refs.len();
        Ok(ReferenceCursor::new(apply_paging(refs, total, opts), total))
    }
}

fn apply_paging<T>(mut items: Vec<T>, total: usize, opts: QueryOptions) -> Vec<T> {
    use crate::query::SortOrder;

    match opts.page_size {
        Some(page_size) => {
            let page_num = opts.page_num.unwrap_or(0);
            let (start, end) = page_window(total, page_size, page_num, opts.sort);
            let mut page: Vec<T> = items.drain(..).skip(start).take(end - start).collect();
            if opts.sort == SortOrder::Descending {
                page.reverse();
            }
            page
        }
        None => {
            if opts.sort == SortOrder::Descending {
                items.reverse();
            }
            items
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::activity::ActivityKind;
    use crate::query::SortOrder;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn service() -> Url {
        url("https://org1.example/services/anchor")
    }

    fn activity(n: usize) -> Activity {
        Activity::new(
            url(&format!(
                "https://org1.example/services/anchor/activities/{n}"
            )),
            ActivityKind::Create,
            service(),
        )
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = MemoryActivityStore::new();
        let a = activity(1);

        store.put_activity(&a).await.unwrap();
        store.put_activity(&a).await.unwrap();

        let cursor = store
            .query_activities(&Criteria::default(), QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(cursor.total_items(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryActivityStore::new();
        let err = store
            .get_activity(&url("https://org1.example/services/anchor/activities/none"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_references_collapse() {
        let store = MemoryActivityStore::new();
        let a = activity(1);
        store.put_activity(&a).await.unwrap();

        store
            .add_reference(ReferenceType::Inbox, &service(), &a.id)
            .await
            .unwrap();
        store
            .add_reference(ReferenceType::Inbox, &service(), &a.id)
            .await
            .unwrap();

        let cursor = store
            .query_references(
                ReferenceType::Inbox,
                &Criteria::for_index(ReferenceType::Inbox, service()),
                QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(cursor.total_items(), 1);
    }

    #[tokio::test]
    async fn test_delete_reference_removes_all_matches() {
        let store = MemoryActivityStore::new();
        let target = url("https://org2.example/services/anchor");

        store
            .add_reference(ReferenceType::Follower, &service(), &target)
            .await
            .unwrap();
        store
            .add_reference(ReferenceType::Follower, &service(), &target)
            .await
            .unwrap();
        store
            .delete_reference(ReferenceType::Follower, &service(), &target)
            .await
            .unwrap();

        let cursor = store
            .query_references(
                ReferenceType::Follower,
                &Criteria::for_index(ReferenceType::Follower, service()),
                QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(cursor.total_items(), 0);
    }

    #[tokio::test]
    async fn test_descending_paging_is_complete_and_ordered() {
        let store = MemoryActivityStore::new();

        for n in 0..25 {
            let a = activity(n);
            store.put_activity(&a).await.unwrap();
            store
                .add_reference(ReferenceType::Outbox, &service(), &a.id)
                .await
                .unwrap();
        }

        let mut collected = Vec::new();
        for page in 0..3 {
            let cursor = store
                .query_activities(
                    &Criteria::for_index(ReferenceType::Outbox, service()),
                    QueryOptions::page(10, page, SortOrder::Descending),
                )
                .await
                .unwrap();
            assert_eq!(cursor.total_items(), 25);
            collected.extend(cursor.map(|a| a.id));
        }

        let expected: Vec<Url> = (0..25).rev().map(|n| activity(n).id).collect();
        assert_eq!(collected, expected);
    }

    #[tokio::test]
    async fn test_insertion_order_is_stable_under_dedup() {
        let store = MemoryActivityStore::new();
        let first = url("https://org2.example/services/anchor");
        let second = url("https://org3.example/services/anchor");

        store
            .add_reference(ReferenceType::Follower, &service(), &first)
            .await
            .unwrap();
        store
            .add_reference(ReferenceType::Follower, &service(), &second)
            .await
            .unwrap();
        // Duplicate of the first entry collapses to the earliest position.
        store
            .add_reference(ReferenceType::Follower, &service(), &first)
            .await
            .unwrap();

        let refs: Vec<Url> = store
            .query_references(
                ReferenceType::Follower,
                &Criteria::for_index(ReferenceType::Follower, service()),
                QueryOptions::default(),
            )
            .await
            .unwrap()
            .collect();
        assert_eq!(refs, vec![first, second]);
    }

    #[tokio::test]
    async fn test_actor_filter_on_references() {
        let store = MemoryActivityStore::new();
        let a = activity(1);
        store.put_activity(&a).await.unwrap();
        store
            .add_reference(ReferenceType::Inbox, &service(), &a.id)
            .await
            .unwrap();

        let matching = store
            .query_references(
                ReferenceType::Inbox,
                &Criteria::for_index(ReferenceType::Inbox, service()).with_actor(service()),
                QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(matching.total_items(), 1);

        let other = store
            .query_references(
                ReferenceType::Inbox,
                &Criteria::for_index(ReferenceType::Inbox, service())
                    .with_actor(url("https://org9.example/services/anchor")),
                QueryOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(other.total_items(), 0);
    }
}
