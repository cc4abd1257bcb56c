//! Announce activity processor.

use std::sync::Arc;

use anchornet_common::{AppError, AppResult};
use anchornet_store::{Activity, ActivityStore, ObjectProperty, ReferenceType};
use tracing::{debug, info};
use url::Url;

use crate::transport::Transport;

/// Processor for Announce activities (shares of another activity).
pub struct AnnounceProcessor {
    service_iri: Url,
    store: Arc<dyn ActivityStore>,
    transport: Arc<dyn Transport>,
}

impl AnnounceProcessor {
    /// Create a new announce processor.
    #[must_use]
    pub fn new(
        service_iri: Url,
        store: Arc<dyn ActivityStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            service_iri,
            store,
            transport,
        }
    }

    /// Record the share against the announced object and make sure the
    /// object itself is stored, fetching it from the origin if necessary.
    pub async fn process(&self, activity: &Activity) -> AppResult<()> {
        let object = activity.object.as_ref().ok_or_else(|| {
            AppError::Invalid(format!("Announce [{}] has no object", activity.id))
        })?;
        let object_iri = object.id().ok_or_else(|| {
            AppError::Invalid(format!("Announce [{}] object has no id", activity.id))
        })?;

        self.ensure_stored(object, &object_iri).await?;

        self.store
            .add_reference(ReferenceType::Share, &object_iri, &activity.id)
            .await?;

        info!(object = %object_iri, share = %activity.id, "Share recorded");

        Ok(())
    }

    async fn ensure_stored(&self, object: &ObjectProperty, iri: &Url) -> AppResult<()> {
        match object {
            ObjectProperty::Activity(embedded) => {
                self.store.put_activity(embedded).await?;
            }
            ObjectProperty::Iri(_) => {
                match self.store.get_activity(iri).await {
                    Ok(_) => {}
                    Err(AppError::NotFound(_)) => {
                        debug!(object = %iri, "Fetching announced object from origin");
                        let response = self.transport.get(iri).await?;
                        if !response.is_success() {
                            return Err(AppError::Transient(format!(
                                "fetching announced object [{iri}] returned status {}",
                                response.status
                            )));
                        }

                        let fetched: Activity =
                            serde_json::from_slice(&response.body).map_err(|e| {
                                AppError::Invalid(format!("announced object [{iri}]: {e}"))
                            })?;
                        self.store.put_activity(&fetched).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            ObjectProperty::Object(value) => {
                if anchornet_store::is_anchor_credential(value) {
                    self.store
                        .add_reference(ReferenceType::AnchorCredential, &self.service_iri, iri)
                        .await?;
                }
            }
        }

        Ok(())
    }
}
