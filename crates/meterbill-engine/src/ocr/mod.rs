//! Meter value extraction from photos
//!
//! Text recognition itself is an external black box ([`TextRecognizer`]).
//! The engine only consumes an [`OcrCandidate`], which is advisory: the
//! admin's corrected value is what gets billed.

pub mod heuristics;

use async_trait::async_trait;
use meterbill_common::{OcrCandidate, Result};
use serde::{Deserialize, Serialize};

pub use heuristics::{parse_meter_value, HeuristicExtractor};

/// Raw recognizer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: Option<f64>,
}

/// Black-box text recognition over an image
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> Result<RecognizedText>;
}

/// Produces a numeric candidate from a meter photo
#[async_trait]
pub trait MeterValueExtractor: Send + Sync {
    async fn extract(&self, image: &[u8]) -> Result<OcrCandidate>;
}

/// Extractor used when no recognizer is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractor;

#[async_trait]
impl MeterValueExtractor for NoopExtractor {
    async fn extract(&self, _image: &[u8]) -> Result<OcrCandidate> {
        Ok(OcrCandidate::empty())
    }
}
