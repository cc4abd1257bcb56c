//! Like activity processor.

use std::sync::Arc;
use std::time::Duration;

use anchornet_common::{AppError, AppResult};
use anchornet_store::{Activity, ActivityStore, ReferenceType};
use chrono::Utc;
use tracing::debug;

use crate::witness::WitnessProofHandler;

/// Processor for Like activities.
///
/// A Like both shares an object (Like and Liked indexes) and, when it
/// carries a `result`, delivers a witness proof for the liked anchor
/// credential to the proof coordinator.
pub struct LikeProcessor {
    store: Arc<dyn ActivityStore>,
    proof_handler: Arc<WitnessProofHandler>,
    max_witness_delay: Duration,
}

impl LikeProcessor {
    /// Create a new like processor.
    #[must_use]
    pub fn new(
        store: Arc<dyn ActivityStore>,
        proof_handler: Arc<WitnessProofHandler>,
        max_witness_delay: Duration,
    ) -> Self {
        Self {
            store,
            proof_handler,
            max_witness_delay,
        }
    }

    /// Update the object's Like index and the actor's Liked index, then
    /// forward any attached witness proof.
    pub async fn process(&self, activity: &Activity) -> AppResult<()> {
        let object_iri = activity.object_id().ok_or_else(|| {
            AppError::Invalid(format!("Like [{}] has no object", activity.id))
        })?;

        self.store
            .add_reference(ReferenceType::Like, &object_iri, &activity.id)
            .await?;
        self.store
            .add_reference(ReferenceType::Liked, &activity.actor, &activity.id)
            .await?;

        debug!(object = %object_iri, like = %activity.id, "Like recorded");

        if let Some(result) = &activity.result {
            let proof = serde_json::to_vec(result)
                .map_err(|e| AppError::Invalid(format!("Like [{}] result: {e}", activity.id)))?;

            let start = activity
                .start_time
                .or(activity.published)
                .unwrap_or_else(Utc::now);
            let end = activity
                .end_time
                .unwrap_or_else(|| start + self.witness_delay());

            self.proof_handler
                .handle_proof(&activity.actor, object_iri.as_str(), start, end, &proof)
                .await?;
        }

        Ok(())
    }

    fn witness_delay(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.max_witness_delay)
            .unwrap_or_else(|_| chrono::Duration::minutes(10))
    }
}
