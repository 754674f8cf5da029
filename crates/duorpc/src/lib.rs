#![doc = include_str!("../README.md")]

pub mod compression;
mod context;
mod handler;
mod hooks;
pub mod lpm;
mod protocol;
pub mod proto;
pub mod reflection;
mod registrar;
mod status;

pub use crate::context::CallContext;
pub use crate::handler::{
    Handler, HandlerOptions, Implementation, ServerStream, StreamingImplementation,
    UnaryImplementation, bad_route, router,
};
pub use crate::hooks::{CallInfo, Hooks};
pub use crate::protocol::{Protocol, parse_grpc_timeout};
pub use crate::registrar::Registrar;
pub use crate::status::*;

/// Version of this crate, reported in the user agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest header block a server built on this crate should accept.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// gRPC with the default (protobuf) codec.
pub const TYPE_DEFAULT_GRPC: &str = "application/grpc";
/// gRPC with an explicit protobuf codec.
pub const TYPE_PROTO_GRPC: &str = "application/grpc+proto";
/// Twirp with binary protobuf bodies.
pub const TYPE_PROTO_TWIRP: &str = "application/protobuf";
/// Twirp with JSON bodies.
pub const TYPE_JSON: &str = "application/json";

pub const COMPRESSION_IDENTITY: &str = "identity";
pub const COMPRESSION_GZIP: &str = "gzip";

/// The `user-agent` clients built on this crate send, following the gRPC
/// convention of `grpc-<language>-<package>/<version>`.
pub fn user_agent() -> String {
    format!("grpc-rust-duorpc/{VERSION}")
}
