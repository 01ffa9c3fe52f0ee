//! The queue message format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A self-contained async invocation, as published to the message bus.
///
/// The body travels base64-encoded inside the JSON document so binary
/// payloads survive the trip byte-identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedInvocation {
    /// The call ID assigned at the gateway, preserved for tracing.
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub path: String,
    pub method: String,
    pub query_string: String,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    pub headers: HashMap<String, Vec<String>>,
    /// Where the queue worker should POST the function's result.
    pub callback_url: Option<String>,
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> QueuedInvocation {
        QueuedInvocation {
            id: "cid-123".to_string(),
            name: "work".to_string(),
            namespace: "fn".to_string(),
            path: "/function/work".to_string(),
            method: "POST".to_string(),
            query_string: "priority=high".to_string(),
            body: vec![0x00, 0xFF, 0x7F, 0x80],
            headers: HashMap::from([(
                "Content-Type".to_string(),
                vec!["application/octet-stream".to_string()],
            )]),
            callback_url: Some("http://cb/".to_string()),
        }
    }

    #[test]
    fn round_trips_binary_body() {
        let original = invocation();
        let json = serde_json::to_string(&original).unwrap();
        let decoded: QueuedInvocation = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.body, vec![0x00, 0xFF, 0x7F, 0x80]);
    }

    #[test]
    fn wire_keys_are_camel_case() {
        let json = serde_json::to_string(&invocation()).unwrap();
        assert!(json.contains(r#""queryString":"priority=high""#));
        assert!(json.contains(r#""callbackUrl":"http://cb/""#));
        assert!(json.contains(r#""id":"cid-123""#));
    }

    #[test]
    fn body_is_base64_on_the_wire() {
        let json = serde_json::to_string(&invocation()).unwrap();
        // base64([0x00, 0xFF, 0x7F, 0x80])
        assert!(json.contains(r#""body":"AP9/gA==""#));
    }
}
