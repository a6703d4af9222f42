use thiserror::Error;

/// Protocol decoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet too short: expected at least {expected} bytes, got {got}")]
    PacketTooShort { expected: usize, got: usize },

    #[error("invalid UTF-8 encoding")]
    InvalidUtf8,

    #[error("malformed JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame with op {op} is missing its payload")]
    MissingPayload { op: u8 },

    #[error("address is {0} bytes, discovery packets hold at most 64")]
    AddressTooLong(usize),
}
