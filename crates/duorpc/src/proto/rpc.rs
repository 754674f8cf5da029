//! `google/rpc/status.proto`.

/// The `Status` type defines a logical error model suitable for REST and RPC
/// APIs. It carries an error code, a developer-facing message, and typed
/// details.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    /// The status code, an enum value of `google.rpc.Code`.
    #[prost(int32, tag = "1")]
    pub code: i32,
    /// A developer-facing error message.
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
    /// Messages carrying the error details.
    #[prost(message, repeated, tag = "3")]
    pub details: ::prost::alloc::vec::Vec<::prost_types::Any>,
}
