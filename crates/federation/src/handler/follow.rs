//! Follow activity processor.

use std::sync::Arc;

use anchornet_common::{AppError, AppResult};
use anchornet_store::{
    Activity, ActivityKind, ActivityStore, Criteria, QueryOptions, ReferenceType, SortOrder,
};
use async_trait::async_trait;
use tracing::{debug, info};
use url::Url;

use crate::outbox::Outbox;

/// Decides whether a Follow from the given actor is accepted.
#[async_trait]
pub trait FollowPolicy: Send + Sync {
    /// Whether to accept the follower.
    async fn accept(&self, actor: &Url) -> bool;
}

/// Policy that accepts every follower.
pub struct AcceptAllFollowPolicy;

#[async_trait]
impl FollowPolicy for AcceptAllFollowPolicy {
    async fn accept(&self, _actor: &Url) -> bool {
        true
    }
}

/// Processor for Follow activities.
pub struct FollowProcessor {
    service_iri: Url,
    store: Arc<dyn ActivityStore>,
    outbox: Arc<Outbox>,
    policy: Arc<dyn FollowPolicy>,
}

impl FollowProcessor {
    /// Create a new follow processor.
    #[must_use]
    pub fn new(
        service_iri: Url,
        store: Arc<dyn ActivityStore>,
        outbox: Arc<Outbox>,
        policy: Arc<dyn FollowPolicy>,
    ) -> Self {
        Self {
            service_iri,
            store,
            outbox,
            policy,
        }
    }

    /// Verify the Follow targets this service, update the Follower index and
    /// reply with Accept or Reject through the outbox.
    pub async fn process(&self, activity: &Activity) -> AppResult<()> {
        let target = activity.object_id().ok_or_else(|| {
            AppError::Invalid(format!("Follow [{}] has no object", activity.id))
        })?;

        if target != self.service_iri {
            return Err(AppError::Invalid(format!(
                "Follow [{}] targets [{target}], not this service",
                activity.id
            )));
        }

        let followers: Vec<Url> = self
            .store
            .query_references(
                ReferenceType::Follower,
                &Criteria::for_index(ReferenceType::Follower, self.service_iri.clone()),
                QueryOptions::all(SortOrder::Ascending),
            )
            .await?
            .collect();

        if followers.contains(&activity.actor) {
            debug!(actor = %activity.actor, "Already a follower, nothing to do");
            return Ok(());
        }

        if self.policy.accept(&activity.actor).await {
            self.store
                .add_reference(ReferenceType::Follower, &self.service_iri, &activity.actor)
                .await?;

            info!(actor = %activity.actor, "Follower accepted");

            let accept = Activity::new(
                activity.id.clone(),
                ActivityKind::Accept,
                self.service_iri.clone(),
            )
            .with_embedded_activity(activity.clone())
            .with_to(vec![activity.actor.clone()]);

            self.outbox.post(accept).await?;
        } else {
            info!(actor = %activity.actor, "Follower rejected by policy");

            let reject = Activity::new(
                activity.id.clone(),
                ActivityKind::Reject,
                self.service_iri.clone(),
            )
            .with_embedded_activity(activity.clone())
            .with_to(vec![activity.actor.clone()]);

            self.outbox.post(reject).await?;
        }

        Ok(())
    }
}
