//! Query criteria, sort options, and the collection page math.

use url::Url;

/// Reference index type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    /// Activities received by a service.
    Inbox,
    /// Activities posted by a service.
    Outbox,
    /// Announce activities referencing an object.
    Share,
    /// Like activities referencing an object.
    Like,
    /// Like activities posted by a service.
    Liked,
    /// Services with an accepted Follow of the owner.
    Follower,
    /// Services the owner follows.
    Following,
    /// Witnesses the owner has enlisted.
    Witness,
    /// Services the owner witnesses for.
    Witnessing,
    /// Anchor credentials known to the owner.
    AnchorCredential,
}

impl ReferenceType {
    /// Stable name used in logs and storage keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Outbox => "outbox",
            Self::Share => "share",
            Self::Like => "like",
            Self::Liked => "liked",
            Self::Follower => "follower",
            Self::Following => "following",
            Self::Witness => "witness",
            Self::Witnessing => "witnessing",
            Self::AnchorCredential => "anchor-credential",
        }
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query filters; any subset may be set.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    /// Restrict to a reference index.
    pub ref_type: Option<ReferenceType>,
    /// The index owner.
    pub owner: Option<Url>,
    /// A specific activity IRI.
    pub activity_iri: Option<Url>,
    /// The producing actor.
    pub actor: Option<Url>,
}

impl Criteria {
    /// Criteria selecting one owner's reference index.
    #[must_use]
    pub fn for_index(ref_type: ReferenceType, owner: Url) -> Self {
        Self {
            ref_type: Some(ref_type),
            owner: Some(owner),
            ..Self::default()
        }
    }

    /// Add an activity IRI filter.
    #[must_use]
    pub fn with_activity(mut self, iri: Url) -> Self {
        self.activity_iri = Some(iri);
        self
    }

    /// Add an actor filter.
    #[must_use]
    pub fn with_actor(mut self, actor: Url) -> Self {
        self.actor = Some(actor);
        self
    }
}

/// Sort order over per-partition insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    Ascending,
    /// Newest first.
    Descending,
}

/// Paging and ordering options.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Items per page; `None` disables paging.
    pub page_size: Option<usize>,
    /// 0-based page number; `None` means the first page.
    pub page_num: Option<usize>,
    /// Sort order.
    pub sort: SortOrder,
}

impl QueryOptions {
    /// A specific page of the given size.
    #[must_use]
    pub const fn page(page_size: usize, page_num: usize, sort: SortOrder) -> Self {
        Self {
            page_size: Some(page_size),
            page_num: Some(page_num),
            sort,
        }
    }

    /// Everything in the given order.
    #[must_use]
    pub const fn all(sort: SortOrder) -> Self {
        Self {
            page_size: None,
            page_num: None,
            sort,
        }
    }
}

/// The number of the final page for a collection of `total` items.
///
/// Pages are numbered `0..=last` in presentation order for both sorts:
/// ascending page `k` holds items `[kP, kP+P)`, descending page `k` holds
/// items `[T-(k+1)P, T-kP)` clamped at zero, so page 0 is always the entry
/// page and the last page holds the boundary items.
#[must_use]
pub const fn last_page_num(total: usize, page_size: usize) -> usize {
    if total == 0 || page_size == 0 {
        0
    } else {
        (total - 1) / page_size
    }
}

/// The window of ascending item indexes covered by a page.
///
/// The returned range indexes the ascending sequence; descending pages
/// present their window in reverse.
#[must_use]
pub const fn page_window(
    total: usize,
    page_size: usize,
    page_num: usize,
    sort: SortOrder,
) -> (usize, usize) {
    if page_size == 0 {
        return (0, 0);
    }

    match sort {
        SortOrder::Ascending => {
            let start = page_num.saturating_mul(page_size);
            let end = start.saturating_add(page_size);
            (min(start, total), min(end, total))
        }
        SortOrder::Descending => {
            let end = total.saturating_sub(page_num.saturating_mul(page_size));
            let start = end.saturating_sub(page_size);
            (start, end)
        }
    }
}

const fn min(a: usize, b: usize) -> usize {
    if a < b { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_page_num() {
        assert_eq!(last_page_num(0, 10), 0);
        assert_eq!(last_page_num(10, 10), 0);
        assert_eq!(last_page_num(11, 10), 1);
        assert_eq!(last_page_num(25, 10), 2);
    }

    #[test]
    fn test_ascending_windows() {
        assert_eq!(page_window(25, 10, 0, SortOrder::Ascending), (0, 10));
        assert_eq!(page_window(25, 10, 1, SortOrder::Ascending), (10, 20));
        assert_eq!(page_window(25, 10, 2, SortOrder::Ascending), (20, 25));
        assert_eq!(page_window(25, 10, 3, SortOrder::Ascending), (25, 25));
    }

    #[test]
    fn test_descending_windows() {
        // 25 items, page size 10: page 0 holds items 24..15, page 1 holds
        // 14..5, page 2 holds 4..0.
        assert_eq!(page_window(25, 10, 0, SortOrder::Descending), (15, 25));
        assert_eq!(page_window(25, 10, 1, SortOrder::Descending), (5, 15));
        assert_eq!(page_window(25, 10, 2, SortOrder::Descending), (0, 5));
        assert_eq!(page_window(25, 10, 3, SortOrder::Descending), (0, 0));
    }

    #[test]
    fn test_descending_pages_cover_everything_once() {
        let total = 25;
        let page_size = 10;
        let mut seen = Vec::new();

        for page in 0..=last_page_num(total, page_size) {
            let (start, end) = page_window(total, page_size, page, SortOrder::Descending);
            let mut items: Vec<usize> = (start..end).collect();
            items.reverse();
            seen.extend(items);
        }

        let expected: Vec<usize> = (0..total).rev().collect();
        assert_eq!(seen, expected);
    }
}
