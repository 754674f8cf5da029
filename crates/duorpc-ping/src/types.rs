//! `duorpc.ping.v1` messages.
//!
//! Each type is described by [`DESCRIPTOR_POOL`](crate::DESCRIPTOR_POOL), which
//! is what Twirp JSON bodies are transcoded through: `int64` fields travel as
//! JSON strings and field names follow `ping.proto`.

use prost_reflect::ReflectMessage;

#[derive(Clone, PartialEq, ::prost::Message, ReflectMessage)]
#[prost_reflect(descriptor_pool = "crate::DESCRIPTOR_POOL", message_name = "duorpc.ping.v1.PingRequest")]
pub struct PingRequest {
    #[prost(int64, tag = "1")]
    pub number: i64,
}

#[derive(Clone, PartialEq, ::prost::Message, ReflectMessage)]
#[prost_reflect(descriptor_pool = "crate::DESCRIPTOR_POOL", message_name = "duorpc.ping.v1.PingResponse")]
pub struct PingResponse {
    #[prost(int64, tag = "1")]
    pub number: i64,
}

/// Asks the server to fail with a gRPC status code.
#[derive(Clone, PartialEq, ::prost::Message, ReflectMessage)]
#[prost_reflect(descriptor_pool = "crate::DESCRIPTOR_POOL", message_name = "duorpc.ping.v1.FailRequest")]
pub struct FailRequest {
    #[prost(int32, tag = "1")]
    pub code: i32,
}

/// Never actually sent: `Fail` always fails.
#[derive(Clone, PartialEq, ::prost::Message, ReflectMessage)]
#[prost_reflect(descriptor_pool = "crate::DESCRIPTOR_POOL", message_name = "duorpc.ping.v1.FailResponse")]
pub struct FailResponse {}
