use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::orchestrator::AnalysisConfig;

/// Identifier wrapper for normalized evidence bundles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceId(pub String);

static EVIDENCE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_evidence_id() -> EvidenceId {
    let id = EVIDENCE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    EvidenceId(format!("ev-{id:06}"))
}

/// One uploaded image as received from the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Structured listing details recovered from the submission. All optional;
/// extractors abstain for the signals they cannot derive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingDetails {
    pub listed_rent: Option<u32>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub bedrooms: Option<u8>,
    pub owner_id: Option<String>,
    pub contact: Option<String>,
}

/// Raw submission as it arrives over the wire, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSubmission {
    pub images: Vec<ImageUpload>,
    pub url: Option<String>,
    pub text: Option<String>,
    #[serde(default)]
    pub listing: ListingDetails,
}

/// Which of the three input modes carries the submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceMode {
    Images,
    Url,
    Text,
}

/// Canonicalized input describing one listing submission.
///
/// Invariant: at least one mode is populated and `primary` names exactly one
/// of them (precedence images > url > text when several are present).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub id: EvidenceId,
    pub images: Vec<ImageUpload>,
    pub url: Option<String>,
    pub text: Option<String>,
    pub listing: ListingDetails,
    pub primary: EvidenceMode,
    pub submitted_at: DateTime<Utc>,
}

/// Client-fixable rejection of a submission. Returned immediately, no retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("submission carries no images, url, or text")]
    NoEvidence,
    #[error("unsupported media '{file_name}': {reason}")]
    UnsupportedMedia { file_name: String, reason: String },
    #[error("malformed listing url '{url}'")]
    MalformedUrl { url: String },
}

/// Validate and canonicalize a submission. Pure and synchronous; the only
/// I/O-free step of the pipeline.
pub fn normalize(
    raw: RawSubmission,
    config: &AnalysisConfig,
) -> Result<EvidenceBundle, ValidationError> {
    let RawSubmission {
        images,
        url,
        text,
        listing,
    } = raw;

    let url = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty());
    let text = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());

    let primary = if !images.is_empty() {
        EvidenceMode::Images
    } else if url.is_some() {
        EvidenceMode::Url
    } else if text.is_some() {
        EvidenceMode::Text
    } else {
        return Err(ValidationError::NoEvidence);
    };

    for image in &images {
        check_image(image, config.max_image_bytes)?;
    }

    if let Some(candidate) = &url {
        if !is_well_formed_url(candidate) {
            return Err(ValidationError::MalformedUrl {
                url: candidate.clone(),
            });
        }
    }

    Ok(EvidenceBundle {
        id: next_evidence_id(),
        images,
        url,
        text,
        listing,
        primary,
        submitted_at: Utc::now(),
    })
}

fn check_image(image: &ImageUpload, max_bytes: usize) -> Result<(), ValidationError> {
    let mime: mime::Mime =
        image
            .content_type
            .parse()
            .map_err(|_| ValidationError::UnsupportedMedia {
                file_name: image.file_name.clone(),
                reason: format!("unparseable content type '{}'", image.content_type),
            })?;

    if mime.type_() != mime::IMAGE {
        return Err(ValidationError::UnsupportedMedia {
            file_name: image.file_name.clone(),
            reason: format!("content type '{mime}' is not an image"),
        });
    }

    if image.bytes.is_empty() {
        return Err(ValidationError::UnsupportedMedia {
            file_name: image.file_name.clone(),
            reason: "empty file".to_string(),
        });
    }

    if image.bytes.len() > max_bytes {
        return Err(ValidationError::UnsupportedMedia {
            file_name: image.file_name.clone(),
            reason: format!("{} bytes exceeds the {max_bytes} byte limit", image.bytes.len()),
        });
    }

    Ok(())
}

fn is_well_formed_url(candidate: &str) -> bool {
    let rest = candidate
        .strip_prefix("https://")
        .or_else(|| candidate.strip_prefix("http://"));

    match rest {
        Some(rest) => {
            let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
            !host.is_empty() && !host.contains(char::is_whitespace) && host.contains('.')
        }
        None => false,
    }
}
