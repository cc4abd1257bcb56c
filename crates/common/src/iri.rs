//! IRI construction for the service and its activities.

use url::Url;
use uuid::Uuid;

use crate::AppResult;

/// Builds the IRIs owned by a service: activity IDs, the inbox endpoint and
/// the well-known collections.
#[derive(Debug, Clone)]
pub struct ServiceIris {
    service: Url,
}

impl ServiceIris {
    /// Create a builder rooted at the service IRI.
    #[must_use]
    pub const fn new(service: Url) -> Self {
        Self { service }
    }

    /// The service IRI itself.
    #[must_use]
    pub const fn service(&self) -> &Url {
        &self.service
    }

    /// Mint a fresh activity IRI: `<serviceIRI>/activities/<uuid>`.
    pub fn new_activity_id(&self) -> AppResult<Url> {
        self.join(&format!("activities/{}", Uuid::new_v4()))
    }

    /// IRI of a named activity on this service.
    pub fn activity(&self, id: &str) -> AppResult<Url> {
        self.join(&format!("activities/{id}"))
    }

    /// The service's followers collection IRI.
    pub fn followers(&self) -> AppResult<Url> {
        self.join("followers")
    }

    /// The inbox endpoint of an arbitrary service.
    pub fn inbox_of(service: &Url) -> AppResult<Url> {
        let mut url = service.clone();
        let path = format!("{}/inbox", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }

    fn join(&self, suffix: &str) -> AppResult<Url> {
        let mut url = self.service.clone();
        let path = format!("{}/{suffix}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn iris() -> ServiceIris {
        ServiceIris::new(Url::parse("https://org1.example/services/anchor").unwrap())
    }

    #[test]
    fn test_new_activity_id_is_under_service() {
        let id = iris().new_activity_id().unwrap();
        assert!(
            id.as_str()
                .starts_with("https://org1.example/services/anchor/activities/")
        );

        // Two mints never collide.
        assert_ne!(id, iris().new_activity_id().unwrap());
    }

    #[test]
    fn test_followers_collection() {
        assert_eq!(
            iris().followers().unwrap().as_str(),
            "https://org1.example/services/anchor/followers"
        );
    }

    #[test]
    fn test_inbox_of() {
        let svc = Url::parse("https://org2.example/services/anchor").unwrap();
        assert_eq!(
            ServiceIris::inbox_of(&svc).unwrap().as_str(),
            "https://org2.example/services/anchor/inbox"
        );
    }
}
