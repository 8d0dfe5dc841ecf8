//! Content-type keyed body codecs.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;

use crate::error::{RiakError, RiakResult};
use crate::types::Payload;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_HTML: &str = "text/html";

/// Encoder/decoder pair for one content type.
pub trait MimeCodec: Send + Sync {
    fn encode(&self, payload: &Payload) -> RiakResult<Bytes>;

    fn decode(&self, body: &Bytes) -> RiakResult<Payload>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl MimeCodec for JsonCodec {
    fn encode(&self, payload: &Payload) -> RiakResult<Bytes> {
        let encoded = match payload {
            Payload::Empty => return Ok(Bytes::new()),
            Payload::Raw(bytes) => return Ok(bytes.clone()),
            Payload::Json(value) => serde_json::to_vec(value),
            Payload::Text(text) => serde_json::to_vec(text),
        };
        encoded.map(Bytes::from).map_err(|error| RiakError::Decode {
            content_type: APPLICATION_JSON.to_string(),
            message: format!("encode failed: {error}"),
        })
    }

    fn decode(&self, body: &Bytes) -> RiakResult<Payload> {
        if body.is_empty() {
            return Ok(Payload::Empty);
        }
        serde_json::from_slice::<Value>(body)
            .map(Payload::Json)
            .map_err(|error| RiakError::Decode {
                content_type: APPLICATION_JSON.to_string(),
                message: error.to_string(),
            })
    }
}

/// UTF-8 text codec, registered for both `text/plain` and `text/html`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextCodec;

impl MimeCodec for TextCodec {
    fn encode(&self, payload: &Payload) -> RiakResult<Bytes> {
        Ok(match payload {
            Payload::Json(Value::String(text)) => Bytes::from(text.clone()),
            other => other.to_bytes(),
        })
    }

    fn decode(&self, body: &Bytes) -> RiakResult<Payload> {
        String::from_utf8(body.to_vec())
            .map(Payload::Text)
            .map_err(|error| RiakError::Decode {
                content_type: TEXT_PLAIN.to_string(),
                message: error.to_string(),
            })
    }
}

#[derive(Clone)]
pub struct MimeRegistry {
    codecs: HashMap<String, Arc<dyn MimeCodec>>,
}

impl Default for MimeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(APPLICATION_JSON, Arc::new(JsonCodec));
        registry.register(TEXT_PLAIN, Arc::new(TextCodec));
        registry.register(TEXT_HTML, Arc::new(TextCodec));
        registry
    }
}

impl std::fmt::Debug for MimeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.codecs.keys().collect();
        types.sort();
        f.debug_struct("MimeRegistry").field("types", &types).finish()
    }
}

impl MimeRegistry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register (or replace) the codec for a content type.
    pub fn register(&mut self, content_type: &str, codec: Arc<dyn MimeCodec>) {
        self.codecs.insert(essence(content_type), codec);
    }

    pub fn get(&self, content_type: &str) -> Option<&Arc<dyn MimeCodec>> {
        self.codecs.get(&essence(content_type))
    }

    pub fn contains(&self, content_type: &str) -> bool {
        self.get(content_type).is_some()
    }

    /// Encode with the matching codec, or pass the payload's raw bytes through.
    pub fn encode(&self, content_type: &str, payload: &Payload) -> RiakResult<Bytes> {
        match self.get(content_type) {
            Some(codec) => codec.encode(payload),
            None => Ok(payload.to_bytes()),
        }
    }

    /// Decode with the matching codec, or hand the bytes back as `Payload::Raw`.
    pub fn decode(&self, content_type: &str, body: &Bytes) -> RiakResult<Payload> {
        match self.get(content_type) {
            Some(codec) => codec.decode(body).map_err(|error| match error {
                RiakError::Decode { message, .. } => RiakError::Decode {
                    content_type: content_type.to_string(),
                    message,
                },
                other => other,
            }),
            None => Ok(Payload::Raw(body.clone())),
        }
    }
}

/// Media type without parameters, lower-cased: `Text/Plain; charset=utf-8` → `text/plain`.
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_registry_covers_baseline_formats() {
        let registry = MimeRegistry::default();
        assert!(registry.contains("application/json"));
        assert!(registry.contains("text/plain; charset=utf-8"));
        assert!(registry.contains("TEXT/HTML"));
        assert!(!registry.contains("image/png"));
    }

    #[test]
    fn json_encodes_values_and_quotes_text() {
        let registry = MimeRegistry::default();
        assert_eq!(
            registry
                .encode(APPLICATION_JSON, &Payload::Json(json!({"name": "ada"})))
                .unwrap(),
            Bytes::from_static(br#"{"name":"ada"}"#)
        );
        assert_eq!(
            registry
                .encode(APPLICATION_JSON, &Payload::Text("hi".to_string()))
                .unwrap(),
            Bytes::from_static(br#""hi""#)
        );
    }

    #[test]
    fn json_decode_failure_names_declared_type() {
        let registry = MimeRegistry::default();
        let error = registry
            .decode("application/json; charset=utf-8", &Bytes::from_static(b"{nope"))
            .unwrap_err();
        let RiakError::Decode { content_type, .. } = error else {
            panic!("expected decode error");
        };
        assert_eq!(content_type, "application/json; charset=utf-8");
    }

    #[test]
    fn unregistered_types_pass_through() {
        let registry = MimeRegistry::default();
        let raw = Bytes::from_static(&[0x89, 0x50, 0x4e, 0x47]);
        assert_eq!(
            registry.encode("image/png", &Payload::Raw(raw.clone())).unwrap(),
            raw
        );
        assert_eq!(
            registry.decode("image/png", &raw).unwrap(),
            Payload::Raw(raw)
        );
    }

    #[test]
    fn text_decode_rejects_invalid_utf8() {
        let registry = MimeRegistry::default();
        assert!(matches!(
            registry.decode(TEXT_PLAIN, &Bytes::from_static(&[0xff, 0xfe])),
            Err(RiakError::Decode { .. })
        ));
        assert_eq!(
            registry.decode(TEXT_PLAIN, &Bytes::from_static(b"OK")).unwrap(),
            Payload::Text("OK".to_string())
        );
    }

    struct CsvCodec;

    impl MimeCodec for CsvCodec {
        fn encode(&self, payload: &Payload) -> RiakResult<Bytes> {
            Ok(payload.to_bytes())
        }

        fn decode(&self, body: &Bytes) -> RiakResult<Payload> {
            let rows: Vec<Value> = String::from_utf8_lossy(body)
                .lines()
                .map(|line| Value::from(line.split(',').collect::<Vec<_>>()))
                .collect();
            Ok(Payload::Json(Value::from(rows)))
        }
    }

    #[test]
    fn registered_codecs_take_over_their_type() {
        let mut registry = MimeRegistry::default();
        registry.register("text/csv", Arc::new(CsvCodec));
        assert_eq!(
            registry
                .decode("text/csv", &Bytes::from_static(b"a,b\nc,d"))
                .unwrap(),
            Payload::Json(json!([["a", "b"], ["c", "d"]]))
        );
    }
}
