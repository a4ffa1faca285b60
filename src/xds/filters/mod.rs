//! Filter configuration utilities.
//!
//! Conversion glue between high-level configuration values and Envoy
//! protobuf `Any` payloads. Each HTTP filter lives in a dedicated submodule
//! under [`http`] and uses these helpers to produce its typed config.

pub mod http;

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine;
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use serde::{Deserialize, Serialize};

/// Wrapper for binary protobuf payloads serialized as base64 in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Base64Bytes(pub Vec<u8>);

impl Serialize for Base64Bytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&BASE64_ENGINE.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = BASE64_ENGINE
            .decode(encoded.as_bytes())
            .map_err(|err| serde::de::Error::custom(err.to_string()))?;
        Ok(Base64Bytes(decoded))
    }
}

/// Build an Envoy `Any` value from a prost message and its type URL.
pub fn any_from_message<M: Message>(type_url: impl Into<String>, msg: &M) -> Any {
    Any { type_url: type_url.into(), value: msg.encode_to_vec() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    struct TestMessage {
        #[prost(string, tag = "1")]
        field: String,
    }

    #[test]
    fn base64_round_trip() {
        let original = Base64Bytes(vec![1, 2, 3, 4]);
        let json = serde_json::to_string(&original).expect("serialize");
        assert_eq!(json, "\"AQIDBA==\"");

        let decoded: Base64Bytes = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(decoded, original);
    }

    #[test]
    fn any_from_prost_message() {
        let msg = TestMessage { field: "hello".into() };
        let any = any_from_message("type.googleapis.com/test.Message", &msg);
        assert_eq!(any.type_url, "type.googleapis.com/test.Message");
        assert!(!any.value.is_empty());
    }
}
