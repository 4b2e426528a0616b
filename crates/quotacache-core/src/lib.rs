#![doc = include_str!("../README.md")]

pub mod client;
pub mod envelope;
pub mod error;
pub mod metadata;
pub mod retry;

pub use error::{AppError, Error, Result};

/// gRPC service and message definitions generated from
/// `proto/quotacache.proto`.
///
/// ## Services
///
/// - `Cache` - `Get`, `Store` and `Dump` over the quota-bounded cache.
/// - `Accounts` - `GetByToken`, the account directory consulted by `Store`.
///
/// `RpcError` is not used by any RPC directly. It is the payload of the
/// `rpc-error` trailer, see [`crate::envelope`].
pub mod proto {
    tonic::include_proto!("quotacache");

    /// Encoded file descriptor set, served through gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("quotacache_descriptor");
}
