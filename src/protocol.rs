//! Live channel wire format.
//!
//! Both directions carry the same JSON text payload, `{content, language}`.
//! There are no sequence numbers and no acknowledgements: the last message to
//! arrive wins.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The whole-document payload exchanged over the live channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub content: String,
    /// Older peers omit the language; the receiver substitutes its default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl WireMessage {
    pub fn new(content: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            language: Some(language.into()),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// WebSocket close code. Only [`CloseCode::NORMAL`] counts as deliberate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// 1000: deliberate disconnection, suppresses reconnection.
    pub const NORMAL: CloseCode = CloseCode(1000);
    /// 1001: the peer is going away (server restart, page unload).
    pub const GOING_AWAY: CloseCode = CloseCode(1001);
    /// 1005: a close frame arrived without a status code.
    pub const NO_STATUS: CloseCode = CloseCode(1005);
    /// 1006: reserved code for a connection lost without a close frame.
    pub const ABNORMAL: CloseCode = CloseCode(1006);

    pub fn is_deliberate(self) -> bool {
        self == Self::NORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit travelling over a [`crate::transport::Link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(CloseCode),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_uses_flat_content_language_object() {
        let text = WireMessage::new("hello", "rust").encode().unwrap();
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["content"], "hello");
        assert_eq!(v["language"], "rust");
        assert_eq!(v.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_decode_tolerates_missing_language() {
        let msg = WireMessage::decode(r#"{"content":"x"}"#).unwrap();
        assert_eq!(msg.content, "x");
        assert_eq!(msg.language, None);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let msg = WireMessage::decode(r#"{"content":"x","language":"go","cursor":3}"#).unwrap();
        assert_eq!(msg.language.as_deref(), Some("go"));
    }

    #[test]
    fn test_decode_rejects_missing_content() {
        assert!(WireMessage::decode(r#"{"language":"go"}"#).is_err());
        assert!(WireMessage::decode("not json").is_err());
    }

    #[test]
    fn test_only_normal_closure_is_deliberate() {
        assert!(CloseCode::NORMAL.is_deliberate());
        assert!(!CloseCode::GOING_AWAY.is_deliberate());
        assert!(!CloseCode::ABNORMAL.is_deliberate());
        assert!(!CloseCode(4000).is_deliberate());
    }
}
