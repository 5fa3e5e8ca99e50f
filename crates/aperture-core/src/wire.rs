//! Wire envelopes: the ordered multipart messages exchanged between stages.
//!
//! A capture message is `[metadata, image]`; a feature message is
//! `[metadata, image, feature-blob]`. The metadata part is UTF-8 JSON
//! ([`FrameMeta`]); the other parts are opaque bytes. Part counts are fixed
//! per hop and validated on receipt; a message with the wrong number of
//! parts is malformed and the receiving stage drops it.

use crate::error::{ApertureError, Result};
use crate::types::FrameMeta;

/// Part count of a Capture -> Extraction message.
pub const CAPTURE_ENVELOPE_PARTS: usize = 2;

/// Part count of an Extraction -> Persistence message.
pub const FEATURE_ENVELOPE_PARTS: usize = 3;

/// The two-part message sent by the Capture stage.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureEnvelope {
    pub meta: FrameMeta,
    pub image: Vec<u8>,
}

impl CaptureEnvelope {
    pub fn into_parts(self) -> Result<Vec<Vec<u8>>> {
        Ok(vec![self.meta.to_bytes()?, self.image])
    }

    pub fn from_parts(mut parts: Vec<Vec<u8>>) -> Result<Self> {
        if parts.len() != CAPTURE_ENVELOPE_PARTS {
            return Err(ApertureError::Envelope(format!(
                "expected {} parts, got {}",
                CAPTURE_ENVELOPE_PARTS,
                parts.len()
            )));
        }
        let image = parts.pop().unwrap_or_default();
        let meta = FrameMeta::from_bytes(&parts[0])?;
        Ok(Self { meta, image })
    }
}

/// The three-part message sent by the Extraction stage.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureEnvelope {
    pub meta: FrameMeta,
    pub image: Vec<u8>,
    /// Canonical feature blob (see [`crate::codec`]); may be the 9-byte
    /// empty encoding when the detector found nothing.
    pub features: Vec<u8>,
}

impl FeatureEnvelope {
    pub fn into_parts(self) -> Result<Vec<Vec<u8>>> {
        Ok(vec![self.meta.to_bytes()?, self.image, self.features])
    }

    pub fn from_parts(mut parts: Vec<Vec<u8>>) -> Result<Self> {
        if parts.len() != FEATURE_ENVELOPE_PARTS {
            return Err(ApertureError::Envelope(format!(
                "expected {} parts, got {}",
                FEATURE_ENVELOPE_PARTS,
                parts.len()
            )));
        }
        let features = parts.pop().unwrap_or_default();
        let image = parts.pop().unwrap_or_default();
        let meta = FrameMeta::from_bytes(&parts[0])?;
        Ok(Self { meta, image, features })
    }
}
