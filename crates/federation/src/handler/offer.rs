//! Offer activity processor: witness requests.

use std::sync::Arc;
use std::time::Duration;

use anchornet_common::{AppError, AppResult};
use anchornet_store::{Activity, ActivityKind, ActivityStore, ReferenceType, is_anchor_credential};
use chrono::Utc;
use tracing::{debug, info};
use url::Url;

use crate::outbox::Outbox;
use crate::witness::CredentialWitness;

/// Processor for Offer activities.
///
/// An Offer asks this service to witness an anchor credential within the
/// activity's time window. If the node is configured as a witness it
/// produces a proof and replies with a Like carrying the proof in `result`.
pub struct OfferProcessor {
    service_iri: Url,
    store: Arc<dyn ActivityStore>,
    outbox: Arc<Outbox>,
    witness: Option<Arc<dyn CredentialWitness>>,
    max_witness_delay: Duration,
}

impl OfferProcessor {
    /// Create a new offer processor.
    #[must_use]
    pub fn new(
        service_iri: Url,
        store: Arc<dyn ActivityStore>,
        outbox: Arc<Outbox>,
        witness: Option<Arc<dyn CredentialWitness>>,
        max_witness_delay: Duration,
    ) -> Self {
        Self {
            service_iri,
            store,
            outbox,
            witness,
            max_witness_delay,
        }
    }

    /// Witness the offered anchor credential and reply with the proof.
    pub async fn process(&self, activity: &Activity) -> AppResult<()> {
        let credential = activity
            .object
            .as_ref()
            .and_then(|o| o.object())
            .ok_or_else(|| {
                AppError::Invalid(format!("Offer [{}] embeds no object", activity.id))
            })?;

        if !is_anchor_credential(credential) {
            return Err(AppError::Invalid(format!(
                "Offer [{}] object is not an anchor credential",
                activity.id
            )));
        }

        let vc_iri = activity.object_id().ok_or_else(|| {
            AppError::Invalid(format!("Offer [{}] credential has no id", activity.id))
        })?;

        let Some(witness) = &self.witness else {
            debug!(offer = %activity.id, "Not configured as a witness, ignoring Offer");
            return Ok(());
        };

        let start = activity.start_time.unwrap_or_else(Utc::now);
        let end = activity.end_time.unwrap_or_else(|| {
            start
                + chrono::Duration::from_std(self.max_witness_delay)
                    .unwrap_or_else(|_| chrono::Duration::minutes(10))
        });

        let proof = witness.witness(credential).await?;

        self.store
            .add_reference(ReferenceType::Witnessing, &self.service_iri, &activity.actor)
            .await?;

        let reply = Activity::new(
            activity.id.clone(),
            ActivityKind::Like,
            self.service_iri.clone(),
        )
        .with_object_iri(vc_iri.clone())
        .with_window(start, Some(end))
        .with_result(proof)
        .with_to(vec![activity.actor.clone()]);

        self.outbox.post(reply).await?;

        info!(vc_id = %vc_iri, requester = %activity.actor, "Witness proof issued");

        Ok(())
    }
}
