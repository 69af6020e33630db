//! Price Codec
//!
//! JSON encoding and decoding of `PriceUpdate` frames. One flat object per
//! frame; unknown fields are rejected. Both directions validate the update
//! against the configured price bounds.

use crate::domain::connection::ErrorKind;
use crate::domain::price::{PriceBounds, PriceError, PriceUpdate};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The update parsed but failed validation.
    #[error("invalid price update: {0}")]
    Invalid(#[from] PriceError),
}

impl CodecError {
    /// Classify as an inbound failure.
    #[must_use]
    pub fn into_decoding(self) -> ErrorKind {
        ErrorKind::DecodingFailed(self.to_string())
    }

    /// Classify as an outbound failure.
    #[must_use]
    pub fn into_encoding(self) -> ErrorKind {
        ErrorKind::EncodingFailed(self.to_string())
    }
}

/// JSON codec for price update frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriceCodec {
    bounds: PriceBounds,
}

impl PriceCodec {
    /// Create a codec validating against `bounds`.
    #[must_use]
    pub const fn new(bounds: PriceBounds) -> Self {
        Self { bounds }
    }

    /// Validate and encode an update.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the update fails validation, `Json` if
    /// serialization fails.
    pub fn encode(&self, update: &PriceUpdate) -> Result<Vec<u8>, CodecError> {
        update.validate(&self.bounds)?;
        Ok(serde_json::to_vec(update)?)
    }

    /// Decode and validate one frame.
    ///
    /// # Errors
    ///
    /// Returns `Json` for malformed frames or unknown fields, `Invalid` if the
    /// decoded update fails validation.
    pub fn decode(&self, frame: &[u8]) -> Result<PriceUpdate, CodecError> {
        let update: PriceUpdate = serde_json::from_slice(frame)?;
        update.validate(&self.bounds)?;
        Ok(update)
    }
}
