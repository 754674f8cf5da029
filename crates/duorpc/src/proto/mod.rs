//! Protobuf messages `duorpc` speaks on the wire.
//!
//! These are checked in rather than generated at build time so that building
//! the crate never needs `protoc`. Field tags and oneof layouts match the
//! upstream `.proto` files exactly.
//!
//! - [`rpc`] - `google.rpc.Status`, carried in `grpc-status-details-bin`.
//! - [`reflection`] - the gRPC server reflection protocol. The `v1alpha` and
//!   `v1` packages share one message layout, so both services use these types.

pub mod reflection;
pub mod rpc;
