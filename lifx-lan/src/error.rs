use std::io;

use thiserror::Error;

use crate::color::InvalidColor;

/// Errors returned by bulb operations and discovery.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more HSBK components were out of range.  Nothing was sent to the bulb.
    #[error(transparent)]
    InvalidColor(#[from] InvalidColor),

    /// The request was sent, but no matching response arrived before the deadline.
    ///
    /// Retryable; indistinguishable from a network timeout.
    #[error("no response from bulb")]
    NoResponse,

    /// A socket failure, or a malformed or unexpected response.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A known payload decoded cleanly but violates a protocol invariant.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Causes for [Error::Transport].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] lifx_proto::Error),

    /// The bulb answered with a message type the caller was not expecting.
    #[error("expected {expected} reply, got message type {got}")]
    UnexpectedReply { expected: &'static str, got: u16 },
}

/// Whether a socket read failed because its timeout expired.
///
/// Reported as WouldBlock or TimedOut depending on the platform.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
