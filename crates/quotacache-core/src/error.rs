//! Error types for the cache and account services.
//!
//! Every fallible operation in the workspace returns [`Error`], a tagged sum
//! over the failures a caller has to tell apart:
//!
//! - [`Error::App`]: a domain failure ([`AppError`]) raised by the store or the
//!   account directory. It carries a gRPC code, a message and a `temporary`
//!   flag, and crosses the RPC boundary inside the `rpc-error` trailer.
//! - [`Error::Rpc`]: a status that reached us without a decodable envelope
//!   (infrastructure failures, deadlines, malformed trailers).
//! - [`Error::Transport`]: the channel could not be built.
//!
//! `From<Error> for tonic::Status` attaches the envelope, and
//! `From<tonic::Status> for Error` decodes it again, so code on either side of
//! the wire matches on the variant instead of downcasting.

use crate::envelope;
use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// A structured application error.
///
/// `temporary` marks errors that are safe to retry without any action from
/// the caller, such as a cache miss that a concurrent `Store` may fill.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AppError {
    pub code: Code,
    pub message: String,
    pub temporary: bool,
}

impl AppError {
    pub fn new(code: Code, temporary: bool, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            temporary,
        }
    }
}

/// Unified error type for the cache service, its clients and the retry layer.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// Domain failure that travels inside the `rpc-error` trailer.
    #[error(transparent)]
    App(#[from] AppError),

    /// Status without a structured envelope.
    #[error("RPC failed ({code:?}): {message}", code = .0.code(), message = .0.message())]
    Rpc(Status),

    /// The channel to a remote service could not be configured.
    #[error("Transport error: {context}")]
    Transport { context: String },
}

impl Error {
    /// The gRPC code this error is reported with.
    pub fn code(&self) -> Code {
        match self {
            Error::App(app) => app.code,
            Error::Rpc(status) => status.code(),
            Error::Transport { .. } => Code::Unavailable,
        }
    }

    /// Whether a caller may retry the failed call as is.
    ///
    /// Only application errors can be temporary; everything else is fatal.
    pub fn is_temporary(&self) -> bool {
        matches!(self, Error::App(app) if app.temporary)
    }

    /// Human-readable message, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::App(app) => &app.message,
            Error::Rpc(status) => status.message(),
            Error::Transport { context } => context,
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        envelope::attach(err)
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match envelope::decode(status.metadata()) {
            Some(app) => Error::App(app),
            None => Error::Rpc(status),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport {
            context: err.to_string(),
        }
    }
}
