//! Undo activity processor.

use std::sync::Arc;

use anchornet_common::{AppError, AppResult};
use anchornet_store::{Activity, ActivityKind, ActivityStore, ReferenceType};
use tracing::{debug, info};
use url::Url;

/// Processor for Undo activities.
pub struct UndoProcessor {
    service_iri: Url,
    store: Arc<dyn ActivityStore>,
}

impl UndoProcessor {
    /// Create a new undo processor.
    #[must_use]
    pub fn new(service_iri: Url, store: Arc<dyn ActivityStore>) -> Self {
        Self { service_iri, store }
    }

    /// Remove the reference-index entry created by the referenced activity.
    /// Undo of an unknown activity is a no-op.
    pub async fn process(&self, activity: &Activity) -> AppResult<()> {
        let Some(target_iri) = activity.object_id() else {
            return Err(AppError::Invalid(format!(
                "Undo [{}] has no object",
                activity.id
            )));
        };

        let referenced = match self.store.get_activity(&target_iri).await {
            Ok(a) => a,
            Err(AppError::NotFound(_)) => {
                debug!(target = %target_iri, "Undo of unknown activity, nothing to do");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if referenced.actor != activity.actor {
            return Err(AppError::Invalid(format!(
                "Undo [{}] actor does not match the referenced activity's actor",
                activity.id
            )));
        }

        match referenced.kind {
            ActivityKind::Follow => {
                self.store
                    .delete_reference(
                        ReferenceType::Follower,
                        &self.service_iri,
                        &referenced.actor,
                    )
                    .await?;

                info!(actor = %referenced.actor, "Follower removed");
            }
            ActivityKind::Like => {
                let object_iri = referenced.object_id().ok_or_else(|| {
                    AppError::Invalid(format!("Like [{}] has no object", referenced.id))
                })?;

                self.store
                    .delete_reference(ReferenceType::Like, &object_iri, &referenced.id)
                    .await?;
                self.store
                    .delete_reference(ReferenceType::Liked, &referenced.actor, &referenced.id)
                    .await?;

                info!(like = %referenced.id, "Like removed");
            }
            ActivityKind::Announce => {
                let object_iri = referenced.object_id().ok_or_else(|| {
                    AppError::Invalid(format!("Announce [{}] has no object", referenced.id))
                })?;

                self.store
                    .delete_reference(ReferenceType::Share, &object_iri, &referenced.id)
                    .await?;

                info!(share = %referenced.id, "Share removed");
            }
            other => {
                return Err(AppError::Invalid(format!(
                    "Undo of {other} is not supported"
                )));
            }
        }

        Ok(())
    }
}
