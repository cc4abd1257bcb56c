//! Create activity processor.

use std::sync::Arc;

use anchornet_common::AppResult;
use anchornet_store::{Activity, ActivityStore, ReferenceType, is_anchor_credential};
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;

/// Processor for Create activities.
pub struct CreateProcessor {
    service_iri: Url,
    store: Arc<dyn ActivityStore>,
    subscribers: broadcast::Sender<Activity>,
}

impl CreateProcessor {
    /// Create a new create processor.
    #[must_use]
    pub fn new(
        service_iri: Url,
        store: Arc<dyn ActivityStore>,
        subscribers: broadcast::Sender<Activity>,
    ) -> Self {
        Self {
            service_iri,
            store,
            subscribers,
        }
    }

    /// Index an embedded anchor credential and notify local subscribers.
    /// The Inbox index entry was already appended by the intake pipeline.
    pub async fn process(&self, activity: &Activity) -> AppResult<()> {
        if let Some(object) = activity.object.as_ref().and_then(|o| o.object())
            && is_anchor_credential(object)
            && let Some(vc_iri) = activity.object_id()
        {
            self.store
                .add_reference(ReferenceType::AnchorCredential, &self.service_iri, &vc_iri)
                .await?;

            debug!(vc_id = %vc_iri, "Anchor credential indexed");
        }

        // Nobody listening is fine; subscribers come and go.
        let _ = self.subscribers.send(activity.clone());

        Ok(())
    }
}
