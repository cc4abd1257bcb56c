//! Collection REST handlers: inbox, outbox, liked, shares, likes, and the
//! single-activity endpoint.
//!
//! Collections are materialized from the reference indexes into ordered
//! collection envelopes. Without `page=true` the envelope carries only
//! `first`/`last`/`totalItems`; with it, one ordered-collection-page with
//! `prev`/`next` at the interior boundaries. The stream collections default
//! to descending order (newest first).

use std::sync::Arc;

use anchornet_common::{AppError, AppResult, ServiceIris};
use anchornet_store::{
    ActivityStore, CONTEXT_ACTIVITY_STREAMS, Criteria, QueryOptions, ReferenceType, SortOrder,
    last_page_num,
};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::verifier::{InboundRequest, SignatureVerifier};

/// Content type for collection and activity responses.
const CONTENT_TYPE: (&str, &str) = ("Content-Type", "application/activity+json; charset=utf-8");

/// State for the collection handlers.
#[derive(Clone)]
pub struct CollectionState {
    /// Activity store the collections are materialized from.
    pub store: Arc<dyn ActivityStore>,
    /// Verifier for read authentication.
    pub verifier: Arc<dyn SignatureVerifier>,
    /// This service's IRI.
    pub service_iri: Url,
    /// Page size.
    pub page_size: usize,
}

/// Query parameters accepted by the collection endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct CollectionQuery {
    /// Return an ordered-collection-page instead of the envelope.
    pub page: Option<bool>,
    /// 0-based page number.
    #[serde(rename = "page-num")]
    pub page_num: Option<usize>,
    /// Object IRI for the object-scoped collections (shares, likes).
    pub id: Option<Url>,
}

/// An `OrderedCollection` envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollection {
    /// JSON-LD context.
    #[serde(rename = "@context")]
    pub context: Value,
    /// Collection type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Collection IRI.
    pub id: Url,
    /// Total items at snapshot time.
    pub total_items: usize,
    /// First page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<Url>,
    /// Last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<Url>,
}

/// An `OrderedCollectionPage`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedCollectionPage {
    /// JSON-LD context.
    #[serde(rename = "@context")]
    pub context: Value,
    /// Page type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Page IRI.
    pub id: Url,
    /// The collection this page belongs to.
    pub part_of: Url,
    /// Previous page; absent on the first page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev: Option<Url>,
    /// Next page; absent on the final page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<Url>,
    /// Total items at snapshot time.
    pub total_items: usize,
    /// The page's items, in presentation order.
    pub ordered_items: Vec<Value>,
}

impl CollectionState {
    fn collection_iri(&self, owner: &Url, segment: &str) -> AppResult<Url> {
        let mut iri = owner.clone();
        iri.set_path(&format!("{}/{segment}", iri.path().trim_end_matches('/')));
        Ok(iri)
    }

    async fn authenticate(&self, path: &str, headers: &HeaderMap) -> Result<(), Response> {
        let request = InboundRequest::from_parts("GET", path, headers, &[]);
        match self.verifier.verify_request(&request).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                info!(path, "Collection request not authenticated");
                Err(StatusCode::UNAUTHORIZED.into_response())
            }
            Err(e) => {
                warn!(path, error = %e, "Verifying collection request");
                Err(e.into_response())
            }
        }
    }

    /// Build the envelope collection: no items, only totals and page links.
    pub(crate) async fn build_envelope(
        &self,
        ref_type: ReferenceType,
        owner: &Url,
        collection_iri: &Url,
    ) -> AppResult<OrderedCollection> {
        let refs = self
            .store
            .query_references(
                ref_type,
                &Criteria::for_index(ref_type, owner.clone()),
                QueryOptions::default(),
            )
            .await?;
        let total = refs.total_items();

        Ok(OrderedCollection {
            context: Value::String(CONTEXT_ACTIVITY_STREAMS.to_string()),
            kind: "OrderedCollection".to_string(),
            id: collection_iri.clone(),
            total_items: total,
            first: Some(page_url(collection_iri, 0)),
            last: Some(page_url(collection_iri, last_page_num(total, self.page_size))),
        })
    }

    /// Build one ordered-collection-page in descending order.
    pub(crate) async fn build_page(
        &self,
        ref_type: ReferenceType,
        owner: &Url,
        collection_iri: &Url,
        page_num: usize,
    ) -> AppResult<OrderedCollectionPage> {
        let cursor = self
            .store
            .query_activities(
                &Criteria::for_index(ref_type, owner.clone()),
                QueryOptions::page(self.page_size, page_num, SortOrder::Descending),
            )
            .await?;
        let total = cursor.total_items();
        let last = last_page_num(total, self.page_size);

        let mut items = Vec::new();
        for activity in cursor {
            items.push(
                serde_json::to_value(&activity)
                    .map_err(|e| AppError::Internal(format!("encoding activity: {e}")))?,
            );
        }

        Ok(OrderedCollectionPage {
            context: Value::String(CONTEXT_ACTIVITY_STREAMS.to_string()),
            kind: "OrderedCollectionPage".to_string(),
            id: page_url(collection_iri, page_num),
            part_of: collection_iri.clone(),
            prev: (page_num > 0 && page_num <= last).then(|| page_url(collection_iri, page_num - 1)),
            next: (page_num < last).then(|| page_url(collection_iri, page_num + 1)),
            total_items: total,
            ordered_items: items,
        })
    }

    async fn serve(
        &self,
        ref_type: ReferenceType,
        owner: Url,
        segment: &str,
        headers: &HeaderMap,
        query: &CollectionQuery,
    ) -> Response {
        let collection_iri = match self.collection_iri(&owner, segment) {
            Ok(iri) => iri,
            Err(e) => return e.into_response(),
        };

        // The signature covers the request path on this service, which for
        // the object-scoped collections differs from the collection IRI.
        let request_path = format!("{}/{segment}", self.service_iri.path());
        if let Err(response) = self.authenticate(&request_path, headers).await {
            return response;
        }

        if query.page == Some(true) {
            let page_num = query.page_num.unwrap_or(0);
            match self
                .build_page(ref_type, &owner, &collection_iri, page_num)
                .await
            {
                Ok(page) => (StatusCode::OK, [CONTENT_TYPE], Json(page)).into_response(),
                Err(e) => e.into_response(),
            }
        } else {
            match self.build_envelope(ref_type, &owner, &collection_iri).await {
                Ok(collection) => {
                    (StatusCode::OK, [CONTENT_TYPE], Json(collection)).into_response()
                }
                Err(e) => e.into_response(),
            }
        }
    }
}

fn page_url(collection_iri: &Url, page_num: usize) -> Url {
    let mut url = collection_iri.clone();
    url.set_query(Some(&format!("page=true&page-num={page_num}")));
    url
}

/// Handle `GET {service}/inbox`.
pub async fn inbox_collection(
    State(state): State<CollectionState>,
    headers: HeaderMap,
    Query(query): Query<CollectionQuery>,
) -> Response {
    let owner = state.service_iri.clone();
    state
        .serve(ReferenceType::Inbox, owner, "inbox", &headers, &query)
        .await
}

/// Handle `GET {service}/outbox`.
pub async fn outbox_collection(
    State(state): State<CollectionState>,
    headers: HeaderMap,
    Query(query): Query<CollectionQuery>,
) -> Response {
    let owner = state.service_iri.clone();
    state
        .serve(ReferenceType::Outbox, owner, "outbox", &headers, &query)
        .await
}

/// Handle `GET {service}/liked`.
pub async fn liked_collection(
    State(state): State<CollectionState>,
    headers: HeaderMap,
    Query(query): Query<CollectionQuery>,
) -> Response {
    let owner = state.service_iri.clone();
    state
        .serve(ReferenceType::Liked, owner, "liked", &headers, &query)
        .await
}

/// Handle `GET {service}/shares?id={objectIRI}`.
pub async fn shares_collection(
    State(state): State<CollectionState>,
    headers: HeaderMap,
    Query(query): Query<CollectionQuery>,
) -> Response {
    let Some(owner) = query.id.clone() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    state
        .serve(ReferenceType::Share, owner, "shares", &headers, &query)
        .await
}

/// Handle `GET {service}/likes?id={objectIRI}`.
pub async fn likes_collection(
    State(state): State<CollectionState>,
    headers: HeaderMap,
    Query(query): Query<CollectionQuery>,
) -> Response {
    let Some(owner) = query.id.clone() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    state
        .serve(ReferenceType::Like, owner, "likes", &headers, &query)
        .await
}

/// Handle `GET {service}/activities/{id}`.
pub async fn activity_resource(
    State(state): State<CollectionState>,
    Path(id): Path<String>,
) -> Response {
    let iris = ServiceIris::new(state.service_iri.clone());
    let iri = match iris.activity(&id) {
        Ok(iri) => iri,
        Err(e) => return e.into_response(),
    };

    match state.store.get_activity(&iri).await {
        Ok(activity) => (StatusCode::OK, [CONTENT_TYPE], Json(activity)).into_response(),
        Err(e @ AppError::NotFound(_)) => {
            info!(activity_id = %iri, "Activity not found");
            e.into_response()
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use anchornet_store::{Activity, ActivityKind, MemoryActivityStore};
    use async_trait::async_trait;

    struct AcceptAllVerifier;

    #[async_trait]
    impl SignatureVerifier for AcceptAllVerifier {
        async fn verify_request(&self, _request: &InboundRequest) -> AppResult<Option<Url>> {
            Ok(Some(Url::parse("https://peer.example/services/anchor").unwrap()))
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    async fn state_with_outbox(total: usize, page_size: usize) -> CollectionState {
        let store = Arc::new(MemoryActivityStore::new());
        let service = url("https://org1.example/services/anchor");

        for n in 0..total {
            let activity = Activity::new(
                url(&format!(
                    "https://org1.example/services/anchor/activities/{n}"
                )),
                ActivityKind::Create,
                service.clone(),
            );
            store.put_activity(&activity).await.unwrap();
            store
                .add_reference(ReferenceType::Outbox, &service, &activity.id)
                .await
                .unwrap();
        }

        CollectionState {
            store,
            verifier: Arc::new(AcceptAllVerifier),
            service_iri: service,
            page_size,
        }
    }

    #[tokio::test]
    async fn test_envelope_links_and_total() {
        let state = state_with_outbox(25, 10).await;
        let owner = state.service_iri.clone();
        let collection_iri = state.collection_iri(&owner, "outbox").unwrap();

        let envelope = state
            .build_envelope(ReferenceType::Outbox, &owner, &collection_iri)
            .await
            .unwrap();

        assert_eq!(envelope.total_items, 25);
        assert_eq!(
            envelope.first.unwrap().as_str(),
            "https://org1.example/services/anchor/outbox?page=true&page-num=0"
        );
        assert_eq!(
            envelope.last.unwrap().as_str(),
            "https://org1.example/services/anchor/outbox?page=true&page-num=2"
        );
    }

    #[tokio::test]
    async fn test_descending_pages() {
        let state = state_with_outbox(25, 10).await;
        let owner = state.service_iri.clone();
        let collection_iri = state.collection_iri(&owner, "outbox").unwrap();

        let page0 = state
            .build_page(ReferenceType::Outbox, &owner, &collection_iri, 0)
            .await
            .unwrap();
        assert_eq!(page0.ordered_items.len(), 10);
        assert_eq!(
            page0.ordered_items[0]["id"].as_str().unwrap(),
            "https://org1.example/services/anchor/activities/24"
        );
        assert!(page0.prev.is_none());
        assert!(page0.next.is_some());

        let page2 = state
            .build_page(ReferenceType::Outbox, &owner, &collection_iri, 2)
            .await
            .unwrap();
        assert_eq!(page2.ordered_items.len(), 5);
        assert_eq!(
            page2.ordered_items[4]["id"].as_str().unwrap(),
            "https://org1.example/services/anchor/activities/0"
        );
        assert!(page2.prev.is_some());
        assert!(page2.next.is_none());
    }

    #[tokio::test]
    async fn test_page_roundtrip_preserves_links() {
        let state = state_with_outbox(12, 5).await;
        let owner = state.service_iri.clone();
        let collection_iri = state.collection_iri(&owner, "outbox").unwrap();

        let page = state
            .build_page(ReferenceType::Outbox, &owner, &collection_iri, 1)
            .await
            .unwrap();

        let encoded = serde_json::to_string(&page).unwrap();
        let decoded: OrderedCollectionPage = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, page.id);
        assert_eq!(decoded.kind, "OrderedCollectionPage");
        assert_eq!(decoded.total_items, page.total_items);
        assert_eq!(decoded.prev, page.prev);
        assert_eq!(decoded.next, page.next);
        assert_eq!(decoded.ordered_items, page.ordered_items);

        // Field-for-field identical JSON under canonical encoding.
        assert_eq!(encoded, serde_json::to_string(&decoded).unwrap());
    }

    #[tokio::test]
    async fn test_empty_collection_envelope() {
        let state = state_with_outbox(0, 10).await;
        let owner = state.service_iri.clone();
        let collection_iri = state.collection_iri(&owner, "outbox").unwrap();

        let envelope = state
            .build_envelope(ReferenceType::Outbox, &owner, &collection_iri)
            .await
            .unwrap();
        assert_eq!(envelope.total_items, 0);
        assert_eq!(envelope.first, envelope.last);
    }
}
