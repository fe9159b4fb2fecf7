use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::types::StreamId;
use crate::util::now_ms;

// ════════════════════════════════════════════════════════════════
//  LogRecord
// ════════════════════════════════════════════════════════════════

/// One chunk of output read from a job stream.
///
/// A record is not line-bounded: `message` holds exactly the bytes of one
/// read, which may be several lines, a partial line or nothing at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub stream_id: StreamId,
    /// Timestamp in milliseconds (Unix epoch).
    pub ts_ms: i64,
    pub message: Vec<u8>,
}

impl LogRecord {
    /// Record stamped with the current time.
    pub fn new(stream_id: StreamId, message: impl Into<Vec<u8>>) -> Self {
        Self {
            stream_id,
            ts_ms: now_ms(),
            message: message.into(),
        }
    }

    pub fn with_timestamp(stream_id: StreamId, ts_ms: i64, message: impl Into<Vec<u8>>) -> Self {
        Self {
            stream_id,
            ts_ms,
            message: message.into(),
        }
    }

    /// Record time truncated to milliseconds.
    pub fn timestamp(&self) -> SystemTime {
        if self.ts_ms >= 0 {
            UNIX_EPOCH + Duration::from_millis(self.ts_ms as u64)
        } else {
            UNIX_EPOCH - Duration::from_millis(self.ts_ms.unsigned_abs())
        }
    }

    /// Encode as one newline-terminated line of the on-disk format.
    pub fn encode_line(&self) -> Result<Vec<u8>, CodecError> {
        let mut line = serde_json::to_vec(self).map_err(CodecError::Encode)?;
        line.push(b'\n');
        Ok(line)
    }

    /// Decode one line of the on-disk format. A trailing newline is allowed.
    pub fn decode_line(line: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(line).map_err(CodecError::Decode)
    }
}

// On-disk shape:
//   {"s":1,"t":1700000000000,"m":"text"}   valid UTF-8 message
//   {"s":1,"t":1700000000000,"b":"AAEC"}   anything else, base64

impl Serialize for LogRecord {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("LogRecord", 3)?;
        s.serialize_field("s", &self.stream_id)?;
        s.serialize_field("t", &self.ts_ms)?;
        match std::str::from_utf8(&self.message) {
            Ok(text) => s.serialize_field("m", text)?,
            Err(_) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&self.message);
                s.serialize_field("b", &encoded)?;
            }
        }
        s.end()
    }
}

impl<'de> Deserialize<'de> for LogRecord {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        #[derive(Deserialize)]
        struct Raw {
            s: StreamId,
            t: serde_json::Value,
            #[serde(default)]
            m: Option<String>,
            #[serde(default)]
            b: Option<String>,
        }
        let raw = Raw::deserialize(deserializer)?;

        let ts_ms = raw.t.as_i64().ok_or_else(|| D::Error::custom("invalid timestamp"))?;
        let message = match (raw.m, raw.b) {
            (Some(text), _) => text.into_bytes(),
            (None, Some(b64)) => base64::engine::general_purpose::STANDARD
                .decode(b64)
                .map_err(D::Error::custom)?,
            (None, None) => return Err(D::Error::missing_field("m")),
        };

        Ok(LogRecord {
            stream_id: raw.s,
            ts_ms,
            message,
        })
    }
}
