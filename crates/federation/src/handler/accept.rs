//! Accept activity processor.

use std::sync::Arc;

use anchornet_common::{AppError, AppResult};
use anchornet_store::{Activity, ActivityKind, ActivityStore, ReferenceType};
use tracing::info;
use url::Url;

/// Processor for Accept activities.
pub struct AcceptProcessor {
    service_iri: Url,
    store: Arc<dyn ActivityStore>,
}

impl AcceptProcessor {
    /// Create a new accept processor.
    #[must_use]
    pub fn new(service_iri: Url, store: Arc<dyn ActivityStore>) -> Self {
        Self { service_iri, store }
    }

    /// Verify the accepted Follow was issued by this service and record the
    /// accepted relationship in the Following index.
    pub async fn process(&self, activity: &Activity) -> AppResult<()> {
        let follow = self.resolve_follow(activity).await?;

        if follow.kind != ActivityKind::Follow {
            return Err(AppError::Invalid(format!(
                "Accept [{}] does not reference a Follow",
                activity.id
            )));
        }

        if follow.actor != self.service_iri {
            return Err(AppError::Invalid(format!(
                "Accept [{}] references a Follow issued by [{}], not this service",
                activity.id, follow.actor
            )));
        }

        self.store
            .add_reference(ReferenceType::Following, &self.service_iri, &activity.actor)
            .await?;

        info!(actor = %activity.actor, "Follow accepted by remote service");

        Ok(())
    }

    /// The accepted Follow: embedded in the Accept, or loaded by IRI.
    async fn resolve_follow(&self, activity: &Activity) -> AppResult<Activity> {
        let object = activity.object.as_ref().ok_or_else(|| {
            AppError::Invalid(format!("Accept [{}] has no object", activity.id))
        })?;

        if let Some(embedded) = object.activity() {
            return Ok(embedded.clone());
        }

        let iri = object.id().ok_or_else(|| {
            AppError::Invalid(format!("Accept [{}] object has no id", activity.id))
        })?;

        self.store.get_activity(&iri).await
    }
}
