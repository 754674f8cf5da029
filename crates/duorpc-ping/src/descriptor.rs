use crate::error::Result;
use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
};
use std::sync::LazyLock;

/// Path of `ping.proto` in the descriptor pool.
pub const FILE_NAME: &str = "duorpc/ping/v1/ping.proto";
pub const PACKAGE: &str = "duorpc.ping.v1";
pub const SERVICE: &str = "duorpc.ping.v1.PingService";

/// The descriptor of `ping.proto`, equivalent to compiling:
///
/// ```proto
/// syntax = "proto3";
/// package duorpc.ping.v1;
///
/// message PingRequest { int64 number = 1; }
/// message PingResponse { int64 number = 1; }
/// message FailRequest { int32 code = 1; }
/// message FailResponse {}
///
/// service PingService {
///   rpc Ping(PingRequest) returns (PingResponse);
///   rpc Fail(FailRequest) returns (FailResponse);
/// }
/// ```
pub fn file_descriptor() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(FILE_NAME.to_owned()),
        package: Some(PACKAGE.to_owned()),
        message_type: vec![
            message("PingRequest", vec![scalar("number", 1, Type::Int64)]),
            message("PingResponse", vec![scalar("number", 1, Type::Int64)]),
            message("FailRequest", vec![scalar("code", 1, Type::Int32)]),
            message("FailResponse", Vec::new()),
        ],
        service: vec![ServiceDescriptorProto {
            name: Some("PingService".to_owned()),
            method: vec![
                method("Ping", "PingRequest", "PingResponse"),
                method("Fail", "FailRequest", "FailResponse"),
            ],
            ..Default::default()
        }],
        syntax: Some("proto3".to_owned()),
        ..Default::default()
    }
}

pub fn file_descriptor_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![file_descriptor()],
    }
}

/// A pool holding `ping.proto`, ready to back server reflection.
pub fn descriptor_pool() -> Result<DescriptorPool> {
    Ok(DescriptorPool::from_file_descriptor_set(file_descriptor_set())?)
}

/// The pool the message types describe themselves with.
///
/// `ping.proto` is assembled from constants in this module, so loading it
/// can only fail if they are edited inconsistently, which the tests below
/// catch.
pub static DESCRIPTOR_POOL: LazyLock<DescriptorPool> =
    LazyLock::new(|| descriptor_pool().expect("ping.proto is a valid file descriptor"));

fn message(name: &str, field: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_owned()),
        field,
        ..Default::default()
    }
}

fn scalar(name: &str, number: i32, kind: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_owned()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(kind as i32),
        json_name: Some(name.to_owned()),
        ..Default::default()
    }
}

fn method(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_owned()),
        input_type: Some(format!(".{PACKAGE}.{input}")),
        output_type: Some(format!(".{PACKAGE}.{output}")),
        ..Default::default()
    }
}
