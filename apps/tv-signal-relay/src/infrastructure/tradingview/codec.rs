//! Frame Codec
//!
//! Encoding and decoding for TradingView's socket framing.
//!
//! # Wire Format
//!
//! Every JSON message is prefixed with its byte length between two markers:
//!
//! ```text
//! ~m~52~m~{"m":"chart_create_session","p":["cs_1a2b3c4d5e6f",""]}
//! ```
//!
//! A single websocket text message may carry any number of frames back to
//! back. Keepalive pings use the same framing around a non-JSON body
//! (`~m~4~m~~h42`) and are recognised on the raw chunk before decoding.

use serde::Serialize;

/// Frame marker surrounding the length prefix.
pub const FRAME_MARKER: &str = "~m~";

/// Substring identifying a keepalive ping.
pub const KEEPALIVE_MARKER: &str = "~~h";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame body is not valid JSON.
    #[error("malformed frame: {source}")]
    MalformedFrame {
        /// Parse failure.
        #[source]
        source: serde_json::Error,
        /// Leading part of the offending frame.
        excerpt: String,
    },

    /// Message could not be serialized.
    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Codec for the `~m~<len>~m~<json>` framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Serialize a message compactly and wrap it in a frame.
    ///
    /// Non-ASCII characters are written literally; the length prefix counts
    /// UTF-8 bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: Serialize + ?Sized>(&self, message: &T) -> Result<String, CodecError> {
        let json = serde_json::to_string(message)?;
        Ok(Self::wrap(&json))
    }

    /// Wrap an already serialized payload in a frame.
    #[must_use]
    pub fn wrap(payload: &str) -> String {
        format!("{FRAME_MARKER}{}{FRAME_MARKER}{payload}", payload.len())
    }

    /// Split a raw chunk into its non-empty frame bodies, in order.
    ///
    /// Splits on every `~m~<digits>~m~` marker. Text that is not preceded by
    /// a marker is returned as its own segment.
    #[must_use]
    pub fn split<'a>(&self, chunk: &'a str) -> Vec<&'a str> {
        let mut segments = Vec::new();
        let mut segment_start = 0;
        let mut cursor = 0;

        while let Some(offset) = chunk[cursor..].find(FRAME_MARKER) {
            let marker_start = cursor + offset;
            match marker_len(&chunk[marker_start..]) {
                Some(len) => {
                    push_segment(&mut segments, &chunk[segment_start..marker_start]);
                    cursor = marker_start + len;
                    segment_start = cursor;
                }
                None => cursor = marker_start + FRAME_MARKER.len(),
            }
        }

        push_segment(&mut segments, &chunk[segment_start..]);
        segments
    }

    /// Decode every frame of a chunk.
    ///
    /// A malformed frame yields an error in its own slot; the other frames of
    /// the chunk are still decoded.
    #[must_use]
    pub fn decode(&self, chunk: &str) -> Vec<Result<serde_json::Value, CodecError>> {
        self.split(chunk)
            .into_iter()
            .map(|segment| {
                serde_json::from_str(segment).map_err(|source| CodecError::MalformedFrame {
                    source,
                    excerpt: segment.chars().take(50).collect(),
                })
            })
            .collect()
    }

    /// Check whether a raw chunk is a keepalive ping.
    #[must_use]
    pub fn is_keepalive(chunk: &str) -> bool {
        chunk.contains(KEEPALIVE_MARKER)
    }
}

/// Length of a complete `~m~<digits>~m~` marker at the start of `s`.
fn marker_len(s: &str) -> Option<usize> {
    let rest = s.strip_prefix(FRAME_MARKER)?;
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || !rest[digits..].starts_with(FRAME_MARKER) {
        return None;
    }
    Some(FRAME_MARKER.len() * 2 + digits)
}

fn push_segment<'a>(segments: &mut Vec<&'a str>, segment: &'a str) {
    if !segment.is_empty() {
        segments.push(segment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn encode_is_compact_and_prefixed() {
        let codec = FrameCodec::new();
        let frame = codec
            .encode(&json!({"m": "set_auth_token", "p": ["token"]}))
            .unwrap();
        assert_eq!(frame, r#"~m~36~m~{"m":"set_auth_token","p":["token"]}"#);
    }

    #[test]
    fn encode_keeps_non_ascii_and_counts_bytes() {
        let codec = FrameCodec::new();
        let frame = codec.encode(&json!({"s": "ціна"})).unwrap();
        let payload = r#"{"s":"ціна"}"#;
        assert_eq!(frame, format!("~m~{}~m~{payload}", payload.len()));
        assert_eq!(payload.len(), 16);
    }

    #[test]
    fn decode_recovers_concatenated_frames_in_order() {
        let codec = FrameCodec::new();
        let a = json!({"m": "qsd", "p": [1]});
        let b = json!({"m": "du", "p": ["cs_x", {}]});
        let chunk = codec.encode(&a).unwrap() + &codec.encode(&b).unwrap();

        let decoded: Vec<_> = codec.decode(&chunk).into_iter().map(Result::unwrap).collect();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn malformed_frame_only_fails_its_slot() {
        let codec = FrameCodec::new();
        let chunk = format!(
            "{}~m~5~m~{{oops{}",
            codec.encode(&json!({"a": 1})).unwrap(),
            codec.encode(&json!({"b": 2})).unwrap()
        );

        let decoded = codec.decode(&chunk);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().unwrap(), &json!({"a": 1}));
        assert!(matches!(decoded[1], Err(CodecError::MalformedFrame { .. })));
        assert_eq!(decoded[2].as_ref().unwrap(), &json!({"b": 2}));
    }

    #[test]
    fn empty_chunk_has_no_frames() {
        let codec = FrameCodec::new();
        assert!(codec.decode("").is_empty());
    }

    #[test]
    fn split_ignores_incomplete_markers() {
        let codec = FrameCodec::new();
        let segments = codec.split(r#"~m~11~m~{"x":"~m~"}"#);
        assert_eq!(segments, vec![r#"{"x":"~m~"}"#]);
    }

    #[test]
    fn keepalive_detection() {
        assert!(FrameCodec::is_keepalive("~m~4~m~~h42"));
        assert!(FrameCodec::is_keepalive("~~h42~~"));
        assert!(!FrameCodec::is_keepalive(r#"~m~9~m~{"m":"du"}"#));
    }

    fn json_leaf() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            Just(serde_json::Value::Null),
            any::<bool>().prop_map(serde_json::Value::from),
            any::<i64>().prop_map(serde_json::Value::from),
            "[a-zA-Z0-9 :._ії€-]{0,24}".prop_map(serde_json::Value::from),
        ]
    }

    fn json_value() -> impl Strategy<Value = serde_json::Value> {
        json_leaf().prop_recursive(3, 24, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(serde_json::Value::from),
                prop::collection::vec(("[a-z_]{1,8}", inner), 0..6).prop_map(|entries| {
                    serde_json::Value::Object(entries.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(message in json_value()) {
            let codec = FrameCodec::new();
            let frame = codec.encode(&message).unwrap();
            let decoded: Vec<_> = codec.decode(&frame).into_iter().map(Result::unwrap).collect();
            prop_assert_eq!(decoded, vec![message]);
        }

        #[test]
        fn decode_preserves_frame_order(a in json_value(), b in json_value()) {
            let codec = FrameCodec::new();
            let chunk = codec.encode(&a).unwrap() + &codec.encode(&b).unwrap();
            let decoded: Vec<_> = codec.decode(&chunk).into_iter().map(Result::unwrap).collect();
            prop_assert_eq!(decoded, vec![a, b]);
        }
    }
}
