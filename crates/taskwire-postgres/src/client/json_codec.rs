//! Pluggable JSON encoding for query parameters and decoding for result rows.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

type EncodeFn = dyn Fn(&Value) -> serde_json::Result<String> + Send + Sync;
type DecodeFn = dyn Fn(&str) -> serde_json::Result<Value> + Send + Sync;

/// JSON encode/decode functions used by the connector.
///
/// Structured query parameters go through [`JsonCodec::encode`] before being
/// sent, and every fetched row goes through [`JsonCodec::decode`]. Both default
/// to `serde_json`.
#[derive(Clone)]
pub struct JsonCodec {
    encode: Arc<EncodeFn>,
    decode: Arc<DecodeFn>,
}

impl JsonCodec {
    /// Replaces the encode function.
    pub fn with_encoder<F>(mut self, encode: F) -> Self
    where
        F: Fn(&Value) -> serde_json::Result<String> + Send + Sync + 'static,
    {
        self.encode = Arc::new(encode);
        self
    }

    /// Replaces the decode function.
    pub fn with_decoder<F>(mut self, decode: F) -> Self
    where
        F: Fn(&str) -> serde_json::Result<Value> + Send + Sync + 'static,
    {
        self.decode = Arc::new(decode);
        self
    }

    /// Encodes a structured value into its JSON text.
    #[inline]
    pub fn encode(&self, value: &Value) -> serde_json::Result<String> {
        (self.encode)(value)
    }

    /// Decodes JSON text produced by the server.
    #[inline]
    pub fn decode(&self, text: &str) -> serde_json::Result<Value> {
        (self.decode)(text)
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self {
            encode: Arc::new(encode_with_serde),
            decode: Arc::new(decode_with_serde),
        }
    }
}

fn encode_with_serde(value: &Value) -> serde_json::Result<String> {
    serde_json::to_string(value)
}

fn decode_with_serde(text: &str) -> serde_json::Result<Value> {
    serde_json::from_str(text)
}

impl fmt::Debug for JsonCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_default_codec() {
        let codec = JsonCodec::default();
        let value = json!({"a": 1, "b": [true, null]});
        let text = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&text).unwrap(), value);
    }

    #[test]
    fn test_custom_encoder_is_used() {
        let codec =
            JsonCodec::default().with_encoder(|value| serde_json::to_string_pretty(value));
        let text = codec.encode(&json!({"a": 1})).unwrap();
        assert!(text.contains('\n'));
    }

    #[test]
    fn test_custom_decoder_is_used() {
        let codec = JsonCodec::default().with_decoder(|_| Ok(json!("decoded")));
        assert_eq!(codec.decode("{}").unwrap(), json!("decoded"));
    }
}
