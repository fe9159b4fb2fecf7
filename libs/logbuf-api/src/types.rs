use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════
//  Streams
// ════════════════════════════════════════════════════════════════

/// Integer tag of one byte-stream source of a job.
pub type StreamId = i32;

/// Standard output of a supervised job.
pub const STDOUT: StreamId = 1;
/// Standard error of a supervised job.
pub const STDERR: StreamId = 2;

/// Registry key a listener is registered under.
///
/// `All` is the wildcard group: it receives every record regardless of its
/// stream. On the wire and on the command line it is spelled `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKey {
    All,
    Stream(StreamId),
}

impl StreamKey {
    pub const WILDCARD: StreamId = -1;

    /// Does a record of `stream` belong to this key?
    pub fn matches(&self, stream: StreamId) -> bool {
        match self {
            StreamKey::All => true,
            StreamKey::Stream(id) => *id == stream,
        }
    }
}

impl From<StreamId> for StreamKey {
    fn from(id: StreamId) -> Self {
        if id == Self::WILDCARD {
            StreamKey::All
        } else {
            StreamKey::Stream(id)
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKey::All => f.write_str("*"),
            StreamKey::Stream(id) => write!(f, "{id}"),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// What a broadcast does when a listener's bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): drop the record for this listener and log it.
    Drop,
    /// .send().await: wait for room. Cancelled when the buffer closes.
    #[serde(alias = "backpressure")]
    BackPressure,
    /// try_send(): unregister the listener, closing its channel.
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_sentinel_maps_to_all() {
        assert_eq!(StreamKey::from(-1), StreamKey::All);
        assert_eq!(StreamKey::from(STDERR), StreamKey::Stream(2));
    }

    #[test]
    fn key_matching() {
        assert!(StreamKey::All.matches(7));
        assert!(StreamKey::Stream(7).matches(7));
        assert!(!StreamKey::Stream(7).matches(STDOUT));
    }

    #[test]
    fn overflow_policy_accepts_lowercase_alias() {
        #[derive(Deserialize)]
        struct Wrap {
            policy: OverflowPolicy,
        }
        let w: Wrap = serde_json::from_str(r#"{"policy":"backpressure"}"#).unwrap();
        assert_eq!(w.policy, OverflowPolicy::BackPressure);
        let w: Wrap = serde_json::from_str(r#"{"policy":"disconnect"}"#).unwrap();
        assert_eq!(w.policy, OverflowPolicy::Disconnect);
    }
}
