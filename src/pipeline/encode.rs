//! Page encoding: [`PageImage`] → base64 PNG [`EncodedPayload`].
//!
//! Vision APIs take images as base64 data-URIs embedded in the JSON request
//! body. PNG is lossless, so decoding the payload gives back the exact
//! pixels that were rendered; JPEG artefacts around small print (the ®
//! mark, fine-print disclaimers) would make the model's job harder.
//!
//! Each payload carries a SHA-256 fingerprint of its PNG bytes. The verdict
//! cache keys on it; PNG encoding is deterministic, so identical pages get
//! identical fingerprints.

use crate::error::PageError;
use crate::pipeline::render::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use tracing::debug;

/// A page ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub page_index: usize,
    /// Base64 (standard alphabet, padded) of the PNG bytes.
    pub data: String,
    pub mime_type: &'static str,
    fingerprint: String,
}

impl EncodedPayload {
    /// Hex SHA-256 of the encoded image bytes.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// `data:` URI for OpenAI-style `image_url` content parts.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Decode back into pixels.
    pub fn decode(&self) -> Result<DynamicImage, PageError> {
        let failure = |detail: String| PageError::EncodingFailure {
            page_index: self.page_index,
            detail,
        };
        let bytes = STANDARD
            .decode(&self.data)
            .map_err(|e| failure(e.to_string()))?;
        image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
            .map_err(|e| failure(e.to_string()))
    }

    /// The payload in edgequake-llm's image representation.
    pub fn to_image_data(&self) -> edgequake_llm::ImageData {
        edgequake_llm::ImageData::new(self.data.clone(), self.mime_type).with_detail("high")
    }
}

/// Encode a rasterised page as a base64 PNG ready for the inference API.
pub fn encode_page(page: &PageImage) -> Result<EncodedPayload, PageError> {
    let mut buf = Vec::new();
    page.image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PageError::EncodingFailure {
            page_index: page.page_index,
            detail: e.to_string(),
        })?;

    let fingerprint = format!("{:x}", Sha256::digest(&buf));
    let data = STANDARD.encode(&buf);
    debug!(
        "Encoded page {} → {} bytes base64",
        page.page_index + 1,
        data.len()
    );

    Ok(EncodedPayload {
        page_index: page.page_index,
        data,
        mime_type: "image/png",
        fingerprint,
    })
}
