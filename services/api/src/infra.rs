use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use metrics_exporter_prometheus::PrometheusHandle;
use rentshield::engine::external::{
    AreaPriceIndex, ContactDirectory, ExternalError, ExternalServices, GeocodedAddress, Geocoder,
    IdentityDirectory, ImageIndex, ImageMatch, VoterAuthority, VoterId,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// One in-memory collaborator standing in for every external lookup the
/// engine consumes. Real integrations slot in behind the same traits.
#[derive(Default, Clone)]
pub(crate) struct FixtureDirectory {
    pub(crate) image_matches: HashMap<Vec<u8>, Vec<ImageMatch>>,
    pub(crate) geocoded: HashMap<String, GeocodedAddress>,
    pub(crate) average_rents: HashMap<String, u32>,
    pub(crate) account_ages: HashMap<String, u32>,
    pub(crate) registered_contacts: HashMap<String, bool>,
}

#[async_trait]
impl ImageIndex for FixtureDirectory {
    async fn find_matches(&self, image: &[u8]) -> Result<Vec<ImageMatch>, ExternalError> {
        Ok(self.image_matches.get(image).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Geocoder for FixtureDirectory {
    async fn resolve(&self, address: &str) -> Result<Option<GeocodedAddress>, ExternalError> {
        Ok(self.geocoded.get(address.trim()).copied())
    }
}

#[async_trait]
impl AreaPriceIndex for FixtureDirectory {
    async fn average_rent(
        &self,
        area: &str,
        _bedrooms: Option<u8>,
    ) -> Result<Option<u32>, ExternalError> {
        Ok(self.average_rents.get(area).copied())
    }
}

#[async_trait]
impl IdentityDirectory for FixtureDirectory {
    async fn account_age_days(&self, owner_id: &str) -> Result<Option<u32>, ExternalError> {
        Ok(self.account_ages.get(owner_id).copied())
    }
}

#[async_trait]
impl ContactDirectory for FixtureDirectory {
    async fn is_registered(&self, phone_or_email: &str) -> Result<Option<bool>, ExternalError> {
        Ok(self.registered_contacts.get(phone_or_email).copied())
    }
}

/// Pass-through voter identity: any non-empty session token is its own voter.
/// A real auth provider replaces this behind the same trait.
#[derive(Default, Clone)]
pub(crate) struct TokenVoterAuthority;

#[async_trait]
impl VoterAuthority for TokenVoterAuthority {
    async fn voter_id(&self, session_token: &str) -> Result<Option<VoterId>, ExternalError> {
        let token = session_token.trim();
        if token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(VoterId(format!("voter-{token}"))))
        }
    }
}

pub(crate) fn services_from(
    fixture: FixtureDirectory,
    max_concurrent_lookups: usize,
) -> ExternalServices {
    let shared = Arc::new(fixture);
    ExternalServices {
        image_index: Some(shared.clone()),
        geocoder: Some(shared.clone()),
        prices: Some(shared.clone()),
        identity: Some(shared.clone()),
        contacts: Some(shared),
        lookup_permits: None,
    }
    .with_lookup_limit(max_concurrent_lookups)
}

/// The canned high-risk listing used by the CLI demo and smoke tests: photos
/// found on three other sites, rent well below the area average, a two-day-old
/// owner account, urgency copy, and a carrier-registered phone number.
pub(crate) fn demo_fixture() -> FixtureDirectory {
    FixtureDirectory {
        image_matches: HashMap::from([(
            demo_photo_bytes(),
            vec![
                ImageMatch {
                    source_url: "https://rentals-a.example.com/listing/42".to_string(),
                    similarity: 0.99,
                },
                ImageMatch {
                    source_url: "https://rooms-b.example.net/7".to_string(),
                    similarity: 0.97,
                },
                ImageMatch {
                    source_url: "https://sublets-c.example.org/19".to_string(),
                    similarity: 0.94,
                },
            ],
        )]),
        geocoded: HashMap::from([(
            "123 Main St, Downtown".to_string(),
            GeocodedAddress {
                lat: 41.5868,
                lng: -93.625,
                verified: true,
            },
        )]),
        average_rents: HashMap::from([("Downtown".to_string(), 1800)]),
        account_ages: HashMap::from([("owner-demo".to_string(), 2)]),
        registered_contacts: HashMap::from([("+15155550142".to_string(), true)]),
    }
}

pub(crate) fn demo_photo_bytes() -> Vec<u8> {
    vec![0xAB; 256]
}
