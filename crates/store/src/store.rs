//! The activity store contract and its query cursors.

use anchornet_common::AppResult;
use async_trait::async_trait;
use url::Url;

use crate::activity::Activity;
use crate::query::{Criteria, QueryOptions, ReferenceType};

/// A materialized cursor over activities.
///
/// The total is a snapshot taken at query time; items appended afterwards
/// appear only on subsequent queries. Dropping the cursor releases it.
#[derive(Debug)]
pub struct ActivityCursor {
    items: std::vec::IntoIter<Activity>,
    total: usize,
}

impl ActivityCursor {
    /// Create a cursor over pre-paged items with the snapshot total.
    #[must_use]
    pub fn new(items: Vec<Activity>, total: usize) -> Self {
        Self {
            items: items.into_iter(),
            total,
        }
    }

    /// Total matching items at query time, before paging.
    #[must_use]
    pub fn total_items(&self) -> usize {
        self.total
    }
}

impl Iterator for ActivityCursor {
    type Item = Activity;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

/// A materialized cursor over reference IRIs.
#[derive(Debug)]
pub struct ReferenceCursor {
    items: std::vec::IntoIter<Url>,
    total: usize,
}

impl ReferenceCursor {
    /// Create a cursor over pre-paged references with the snapshot total.
    #[must_use]
    pub fn new(items: Vec<Url>, total: usize) -> Self {
        Self {
            items: items.into_iter(),
            total,
        }
    }

    /// Total matching references at query time, before paging.
    #[must_use]
    pub fn total_items(&self) -> usize {
        self.total
    }
}

impl Iterator for ReferenceCursor {
    type Item = Url;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next()
    }
}

/// Persists activities and maintains the reference indexes.
///
/// All operations are idempotent on activity `id`. Implementations must
/// serialize concurrent appends to the same `(ref_type, owner)` partition and
/// provide linearizable reads for an `id` previously returned from
/// [`put_activity`](Self::put_activity).
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Upsert an activity by `id`. Re-insertion is a no-op.
    async fn put_activity(&self, activity: &Activity) -> AppResult<()>;

    /// Fetch an activity by IRI; `NotFound` when absent.
    async fn get_activity(&self, id: &Url) -> AppResult<Activity>;

    /// Append an index entry. Duplicate `(ref_type, owner, iri)` triples are
    /// collapsed by readers.
    async fn add_reference(
        &self,
        ref_type: ReferenceType,
        owner: &Url,
        iri: &Url,
    ) -> AppResult<()>;

    /// Remove all entries matching `(ref_type, owner, iri)`.
    async fn delete_reference(
        &self,
        ref_type: ReferenceType,
        owner: &Url,
        iri: &Url,
    ) -> AppResult<()>;

    /// Materialized activities matching the criteria, in the requested order.
    async fn query_activities(
        &self,
        criteria: &Criteria,
        opts: QueryOptions,
    ) -> AppResult<ActivityCursor>;

    /// Reference IRIs in an index, in the requested order.
    async fn query_references(
        &self,
        ref_type: ReferenceType,
        criteria: &Criteria,
        opts: QueryOptions,
    ) -> AppResult<ReferenceCursor>;
}
