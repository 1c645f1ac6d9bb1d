//! Narrow contracts for the external collaborators the engine consumes.
//!
//! Every lookup is optional: a missing collaborator or a lookup that stays
//! unavailable after retries makes the owning extractor abstain instead of
//! failing the analysis.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::debug;

/// Failure of an outbound lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExternalError {
    #[error("external service unavailable: {0}")]
    Unavailable(String),
    #[error("external service returned a malformed response: {0}")]
    Malformed(String),
}

/// One reverse-image hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMatch {
    pub source_url: String,
    pub similarity: f32,
}

/// Resolved coordinates for an address string.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeocodedAddress {
    pub lat: f64,
    pub lng: f64,
    pub verified: bool,
}

/// Identity of an authenticated voter, resolved by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoterId(pub String);

#[async_trait]
pub trait ImageIndex: Send + Sync {
    async fn find_matches(&self, image: &[u8]) -> Result<Vec<ImageMatch>, ExternalError>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the address does not resolve; that is a signal, not a
    /// failure.
    async fn resolve(&self, address: &str) -> Result<Option<GeocodedAddress>, ExternalError>;
}

#[async_trait]
pub trait AreaPriceIndex: Send + Sync {
    async fn average_rent(
        &self,
        area: &str,
        bedrooms: Option<u8>,
    ) -> Result<Option<u32>, ExternalError>;
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn account_age_days(&self, owner_id: &str) -> Result<Option<u32>, ExternalError>;
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn is_registered(&self, phone_or_email: &str) -> Result<Option<bool>, ExternalError>;
}

#[async_trait]
pub trait VoterAuthority: Send + Sync {
    async fn voter_id(&self, session_token: &str) -> Result<Option<VoterId>, ExternalError>;
}

/// The collaborators available to one engine instance, plus the shared permit
/// pool that caps concurrent outbound lookups (many-image bundles queue their
/// extra lookups instead of launching unbounded requests).
#[derive(Clone, Default)]
pub struct ExternalServices {
    pub image_index: Option<Arc<dyn ImageIndex>>,
    pub geocoder: Option<Arc<dyn Geocoder>>,
    pub prices: Option<Arc<dyn AreaPriceIndex>>,
    pub identity: Option<Arc<dyn IdentityDirectory>>,
    pub contacts: Option<Arc<dyn ContactDirectory>>,
    pub lookup_permits: Option<Arc<Semaphore>>,
}

impl ExternalServices {
    pub fn with_lookup_limit(mut self, max_concurrent_lookups: usize) -> Self {
        self.lookup_permits = Some(Arc::new(Semaphore::new(max_concurrent_lookups)));
        self
    }

    /// Permit pool for outbound lookups. Falls back to an effectively
    /// unbounded pool when no limit was configured.
    pub fn permit_pool(&self) -> Arc<Semaphore> {
        self.lookup_permits
            .clone()
            .unwrap_or_else(|| Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)))
    }
}

/// Retry policy for `ExternalError::Unavailable`: `attempts` retries with
/// exponential backoff starting at `base_delay`. Malformed responses are not
/// retried; the collaborator will not answer differently.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, ExternalError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExternalError>>,
{
    let mut delay = base_delay;
    let mut tried = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ ExternalError::Malformed(_)) => return Err(err),
            Err(err) => {
                if tried >= attempts {
                    return Err(err);
                }
                tried += 1;
                debug!(attempt = tried, ?delay, "external lookup unavailable, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}
