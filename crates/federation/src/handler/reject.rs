//! Reject activity processor.

use anchornet_common::{AppError, AppResult};
use anchornet_store::{Activity, ActivityKind};
use tracing::info;
use url::Url;

/// Processor for Reject activities.
pub struct RejectProcessor {
    service_iri: Url,
}

impl RejectProcessor {
    /// Create a new reject processor.
    #[must_use]
    pub const fn new(service_iri: Url) -> Self {
        Self { service_iri }
    }

    /// Verify the rejected Follow was issued by this service. No index is
    /// updated; the Follow simply never becomes an accepted relationship.
    pub async fn process(&self, activity: &Activity) -> AppResult<()> {
        let follow = activity
            .object
            .as_ref()
            .and_then(|o| o.activity())
            .ok_or_else(|| {
                AppError::Invalid(format!("Reject [{}] embeds no activity", activity.id))
            })?;

        if follow.kind != ActivityKind::Follow || follow.actor != self.service_iri {
            return Err(AppError::Invalid(format!(
                "Reject [{}] does not reference a Follow issued by this service",
                activity.id
            )));
        }

        info!(actor = %activity.actor, "Follow rejected by remote service");

        Ok(())
    }
}
