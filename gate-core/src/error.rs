use std::io;

/// Top level error for anything that can go wrong while servicing a connection.
///
/// Mirrors the teacher's hand rolled `NetworkError`/`ErrorType` split: a small closed set of
/// variants rather than a generic boxed error, so callers can match on recovery policy (see
/// `docs/../SPEC_FULL.md` §7).
#[derive(Debug)]
pub enum GateError {
    /// Not enough data was available yet; not a hard failure.
    Wait,
    /// Framed reader was used after `close()`.
    AlreadyClosed,
    /// Packet length was <= 0 or exceeded `MAX_BODY_SIZE`.
    PacketTooLarge(i32),
    /// `CSIndex` did not match the session's expected value.
    SequenceMismatch { expected: i64, got: i64 },
    /// Auth token was malformed or parsing otherwise failed.
    Protocol(&'static str),
    /// RSA/AES setup or encrypt/decrypt failure.
    Crypto(&'static str),
    /// Auth token had already expired.
    TokenExpired,
    /// The tunnel or worker was already stopping.
    Stopping(&'static str),
    /// A push was addressed to a uid/wid that isn't registered.
    NotFound(&'static str),
    /// A push or forward carried an empty payload.
    EmptyPayload,
    /// The backend stream returned an error on send/recv.
    Backend(String),
    Io(io::ErrorKind),
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateError::Wait => write!(f, "would block"),
            GateError::AlreadyClosed => write!(f, "already closed"),
            GateError::PacketTooLarge(n) => write!(f, "packet len {n} out of bounds"),
            GateError::SequenceMismatch { expected, got } => {
                write!(f, "sequence mismatch: expected {expected}, got {got}")
            }
            GateError::Protocol(msg) => write!(f, "protocol error: {msg}"),
            GateError::Crypto(msg) => write!(f, "crypto error: {msg}"),
            GateError::TokenExpired => write!(f, "auth token expired"),
            GateError::Stopping(msg) => write!(f, "{msg}"),
            GateError::NotFound(msg) => write!(f, "{msg}"),
            GateError::EmptyPayload => write!(f, "payload len <= 0"),
            GateError::Backend(msg) => write!(f, "backend stream error: {msg}"),
            GateError::Io(kind) => write!(f, "io error: {kind:?}"),
        }
    }
}

impl std::error::Error for GateError {}

impl From<io::Error> for GateError {
    #[inline]
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => GateError::Wait,
            kind => GateError::Io(kind),
        }
    }
}

pub type Result<T> = std::result::Result<T, GateError>;
