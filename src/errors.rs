use crate::StatusCode;
use std::{io, time::Duration};
use thiserror::Error;

/// Error type returned by [`Application`](crate::Application) implementations.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// Failures that end a connection or stop the server from starting.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed request line")]
    InvalidRequestLine,
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("malformed header line")]
    InvalidHeader,
    #[error("request line or header exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("more than {0} request headers")]
    TooManyHeaders(usize),
    #[error("request head is not valid UTF-8")]
    InvalidEncoding,
    #[error("invalid Content-Length {0:?}")]
    InvalidContentLength(String),
    #[error("unsupported request Transfer-Encoding {0:?}")]
    UnsupportedTransferEncoding(String),

    #[error("application failed: {0}")]
    Application(#[source] AppError),
    #[error("application panicked: {0}")]
    Panicked(String),
    #[error("application returned a reply that cannot be sent: {0}")]
    BadReturnValue(String),

    #[error("server is missing its {0}")]
    Incomplete(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Status of the best-effort response sent before the connection closes,
    /// or `None` when nothing should be written.
    pub(crate) fn status(&self) -> Option<StatusCode> {
        match self {
            Error::InvalidRequestLine | Error::InvalidHeader | Error::InvalidEncoding => {
                Some(StatusCode::BadRequest)
            }
            Error::LineTooLong(_) | Error::TooManyHeaders(_) => {
                Some(StatusCode::RequestHeaderFieldsTooLarge)
            }
            Error::UnsupportedVersion => Some(StatusCode::HttpVersionNotSupported),
            Error::UnsupportedTransferEncoding(_) => Some(StatusCode::NotImplemented),
            Error::InvalidContentLength(_)
            | Error::Application(_)
            | Error::Panicked(_)
            | Error::BadReturnValue(_) => Some(StatusCode::InternalServerError),
            Error::Incomplete(_) | Error::Io(_) => None,
        }
    }
}

/// Failures of the environment's body readers.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("no body data within {0:?}")]
    Timeout(Duration),
    #[error("connection closed after {received} of {expected} body bytes")]
    Closed { expected: usize, received: usize },
    #[error("I/O error while reading body: {0}")]
    Io(#[from] io::Error),
}

// Peer went away: the connection ends silently.
#[inline]
pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
    )
}
