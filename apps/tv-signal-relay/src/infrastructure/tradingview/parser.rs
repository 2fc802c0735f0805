//! Stream Parser
//!
//! Reconstructs indicator samples from raw socket chunks.
//!
//! # Data Update Shape
//!
//! ```json
//! {"m":"du","p":["cs_1a2b3c4d5e6f",{"st7":{"st":[{"i":299,"v":[1735135200,...,0,300,97250.5]}]}}]}
//! ```
//!
//! The last three plot values of the first row are, in order: long marker,
//! short marker, close. Anything that does not match this shape is ignored,
//! so new message types or unrelated series never break the stream.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::codec::{CodecError, FrameCodec};
use super::handshake::SessionKey;
use crate::domain::signal::IndicatorSample;

/// Method tag of data update messages.
pub const DATA_UPDATE_METHOD: &str = "du";

/// Result of parsing one raw chunk.
#[derive(Debug)]
pub enum ParsedChunk {
    /// Keepalive ping; the raw chunk must be echoed back unchanged.
    Keepalive,
    /// Regular frames.
    Frames {
        /// Samples addressed to this session's study, in arrival order.
        samples: Vec<IndicatorSample>,
        /// Frames that failed to decode.
        errors: Vec<CodecError>,
    },
}

/// Extracts indicator samples for one chart session's study slot.
#[derive(Debug, Clone)]
pub struct StreamParser {
    codec: FrameCodec,
    session_key: SessionKey,
    study_id: &'static str,
}

impl StreamParser {
    /// Create a parser for a session's study slot.
    #[must_use]
    pub const fn new(session_key: SessionKey, study_id: &'static str) -> Self {
        Self {
            codec: FrameCodec::new(),
            session_key,
            study_id,
        }
    }

    /// Parse a raw chunk received at `received_at`.
    #[must_use]
    pub fn parse(&self, chunk: &str, received_at: DateTime<Utc>) -> ParsedChunk {
        if FrameCodec::is_keepalive(chunk) {
            return ParsedChunk::Keepalive;
        }

        let mut samples = Vec::new();
        let mut errors = Vec::new();

        for frame in self.codec.decode(chunk) {
            match frame {
                Ok(message) => {
                    if let Some(sample) = self.extract_sample(&message, received_at) {
                        samples.push(sample);
                    }
                }
                Err(e) => errors.push(e),
            }
        }

        ParsedChunk::Frames { samples, errors }
    }

    /// Pull the study sample out of a decoded message, if it carries one.
    #[must_use]
    pub fn extract_sample(
        &self,
        message: &Value,
        received_at: DateTime<Utc>,
    ) -> Option<IndicatorSample> {
        if message.get("m").and_then(Value::as_str) != Some(DATA_UPDATE_METHOD) {
            return None;
        }

        let params = message.get("p")?.as_array()?;
        if let Some(key) = params.first().and_then(Value::as_str)
            && key != self.session_key.as_str()
        {
            tracing::trace!(key, "Data update for another chart session");
            return None;
        }

        let values = params
            .get(1)?
            .get(self.study_id)?
            .get("st")?
            .get(0)?
            .get("v")?
            .as_array()?;

        let [long, short, close] = values.len().checked_sub(3).map(|i| &values[i..])? else {
            return None;
        };

        Some(IndicatorSample {
            short_marker: short.as_f64()?,
            long_marker: long.as_f64()?,
            close: close.as_f64()?,
            received_at,
        })
    }
}
