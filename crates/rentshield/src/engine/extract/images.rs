use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use super::{Extraction, FactorKind, RiskExtractor, RiskFactor, Severity};
use crate::engine::evidence::EvidenceBundle;
use crate::engine::external::{ExternalError, ImageIndex, ImageMatch};

/// Flags listings whose photos circulate on other sites. Severity scales with
/// the number of distinct external sources the images are found on.
pub struct ImageAuthenticityExtractor {
    index: Arc<dyn ImageIndex>,
    permits: Arc<Semaphore>,
    weight: u32,
}

impl ImageAuthenticityExtractor {
    pub fn new(index: Arc<dyn ImageIndex>, permits: Arc<Semaphore>) -> Self {
        Self {
            index,
            permits,
            weight: 3,
        }
    }
}

#[async_trait]
impl RiskExtractor for ImageAuthenticityExtractor {
    fn kind(&self) -> FactorKind {
        FactorKind::ImageAuthenticity
    }

    async fn extract(&self, bundle: &EvidenceBundle) -> Result<Extraction, ExternalError> {
        if bundle.images.is_empty() {
            return Ok(Extraction::Abstain);
        }

        let mut lookups = JoinSet::new();
        for image in &bundle.images {
            let index = self.index.clone();
            let permits = self.permits.clone();
            let bytes = image.bytes.clone();
            lookups.spawn(async move {
                // Queue behind the shared permit pool rather than fanning out
                // one request per image unconditionally.
                let _permit = permits.acquire_owned().await;
                index.find_matches(&bytes).await
            });
        }

        let total = bundle.images.len();
        let mut succeeded = 0usize;
        let mut matches: Vec<ImageMatch> = Vec::new();
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok(Ok(found)) => {
                    succeeded += 1;
                    matches.extend(found);
                }
                Ok(Err(err)) => warn!(%err, "image lookup failed"),
                Err(err) => warn!(%err, "image lookup task failed"),
            }
        }

        if succeeded == 0 {
            return Ok(Extraction::Abstain);
        }

        let sources: BTreeSet<String> = matches
            .iter()
            .map(|m| source_host(&m.source_url))
            .collect();

        let (severity, description) = match sources.len() {
            0 => (
                Severity::Safe,
                "No copies of the photos found elsewhere".to_string(),
            ),
            1 | 2 => (
                Severity::Warning,
                "Photos found on other listing sites".to_string(),
            ),
            _ => (
                Severity::Danger,
                "Multiple images found on other listing sites".to_string(),
            ),
        };

        let confidence = succeeded as f32 / total as f32;
        let factor = RiskFactor::new(self.kind(), severity, self.weight, description)
            .with_details(format!(
                "{} match(es) across {} independent source(s)",
                matches.len(),
                sources.len()
            ))
            .with_confidence(confidence);

        Ok(Extraction::Factor(factor))
    }
}

fn source_host(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    stripped
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}
