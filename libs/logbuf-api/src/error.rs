/// Error produced by the record codec.
///
/// Both variants wrap the underlying `serde_json` error; a bad timestamp or a
/// line without a message surfaces as `Decode` with a descriptive message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode record: {0}")]
    Decode(#[source] serde_json::Error),
}
