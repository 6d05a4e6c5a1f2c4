//! Byte-capped JSON decoding for provider responses
//!
//! Provider bodies are untrusted. The body is read chunk by chunk and the read
//! stops as soon as the cap is exceeded, so an oversized body fails with
//! `ResponseTooLarge` without ever being parsed.

use serde::de::DeserializeOwned;

use crate::{ProviderError, Result};

/// Read at most `max` bytes of `response` and decode them as JSON.
pub async fn read_json_limited<T: DeserializeOwned>(
    mut response: reqwest::Response,
    max: usize,
) -> Result<T> {
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ProviderError::from_transport("reading response body", e))?
    {
        body.extend_from_slice(&chunk);
        if body.len() > max {
            return Err(ProviderError::ResponseTooLarge { limit: max });
        }
    }
    decode_limited(&body, max)
}

/// Decode an already-buffered body, enforcing the same cap.
pub fn decode_limited<T: DeserializeOwned>(body: &[u8], max: usize) -> Result<T> {
    if body.len() > max {
        return Err(ProviderError::ResponseTooLarge { limit: max });
    }
    serde_json::from_slice(body)
        .map_err(|e| ProviderError::Provider(format!("malformed response body: {e}")))
}
