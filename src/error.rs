use thiserror::Error;

/// Errors raised while framing or decoding wire data.
///
/// Every variant is a protocol violation: the reactor logs it and closes the
/// offending connection without attempting to resynchronize.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet truncated while reading {0}")]
    Truncated(&'static str),

    #[error("missing NUL terminator in {0}")]
    MissingTerminator(&'static str),

    #[error("invalid length-encoded integer tag 0xff")]
    InvalidLenencTag,

    #[error("packets larger than 16 MiB are not supported")]
    UnsupportedContinuation,

    #[error("unsupported protocol version {0}, only 10 is handled")]
    BadProtocolVersion(u8),

    #[error("server version string exceeds {0} bytes")]
    ServerVersionTooLong(usize),

    #[error("username exceeds {0} bytes")]
    UsernameTooLong(usize),

    #[error("error message exceeds {0} bytes")]
    ErrMessageTooLong(usize),

    #[error("auth scramble length must be 0 or 20, got {0}")]
    BadScrambleLength(u8),
}
