//! The `rpc-error` envelope.
//!
//! A gRPC status only carries a code and a message. To tell retryable
//! failures apart from fatal ones, the server serializes the full
//! [`AppError`] (code, message, temporary flag) as a protobuf `RpcError`,
//! base64-encodes it and stores it under [`METADATA_KEY`] in the status
//! metadata, which tonic sends as response trailers.
//!
//! Decoding never fails: an absent, non-ASCII, non-base64 or unparsable entry
//! all mean "no structured error available", and the caller falls back to the
//! bare status.

use crate::{AppError, Error, proto::RpcError};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use prost::Message;
use tonic::{
    Code, Status,
    metadata::{AsciiMetadataValue, MetadataMap},
};

/// Metadata key holding the base64-encoded envelope.
pub const METADATA_KEY: &str = "rpc-error";

impl From<&AppError> for RpcError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.code as i64,
            message: err.message.clone(),
            temporary: err.temporary,
        }
    }
}

impl From<RpcError> for AppError {
    fn from(wire: RpcError) -> Self {
        let code = i32::try_from(wire.code)
            .map(Code::from_i32)
            .unwrap_or(Code::Unknown);
        Self {
            code,
            message: wire.message,
            temporary: wire.temporary,
        }
    }
}

/// Serializes `err` if it is an application error; `None` otherwise.
pub fn encode(err: &Error) -> Option<Vec<u8>> {
    match err {
        Error::App(app) => Some(RpcError::from(app).encode_to_vec()),
        _ => None,
    }
}

/// Converts `err` into the status returned to the caller.
///
/// Application errors get their envelope attached under [`METADATA_KEY`];
/// the status code and message always come from the error itself, even if
/// the envelope cannot be built.
pub fn attach(err: Error) -> Status {
    let payload = encode(&err);
    let mut status = match err {
        Error::App(app) => Status::new(app.code, app.message),
        Error::Rpc(status) => return status,
        Error::Transport { context } => return Status::unavailable(context),
    };

    if let Some(payload) = payload {
        match STANDARD.encode(payload).parse::<AsciiMetadataValue>() {
            Ok(value) => {
                status.metadata_mut().insert(METADATA_KEY, value);
            }
            Err(e) => {
                tracing::warn!("Unable to set {METADATA_KEY} metadata: {e}");
            }
        }
    }

    status
}

/// Reads the envelope out of response metadata, if there is a valid one.
pub fn decode(metadata: &MetadataMap) -> Option<AppError> {
    let value = metadata.get(METADATA_KEY)?.to_str().ok()?;
    let raw = STANDARD.decode(value).ok()?;
    let wire = RpcError::decode(raw.as_slice()).ok()?;
    Some(wire.into())
}
