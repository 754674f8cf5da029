#![allow(dead_code)]

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use duorpc::compression::{Compressor, Identity};
use duorpc::lpm::{decode_envelope, encode_message};
use http::{HeaderMap, Method, Request, Response, Version};
use http_body_util::BodyExt;
use prost::Message;
use prost_reflect::{DescriptorPool, MessageDescriptor, ReflectMessage};
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};
use std::sync::LazyLock;

#[derive(Clone, PartialEq, prost::Message)]
pub struct Number {
    #[prost(int32, tag = "1")]
    pub number: i32,
}

/// `duorpc/test/v1/number.proto`, holding `Number` and `NumberService`.
pub static NUMBER_POOL: LazyLock<DescriptorPool> = LazyLock::new(|| {
    let file = FileDescriptorProto {
        name: Some("duorpc/test/v1/number.proto".to_owned()),
        package: Some("duorpc.test.v1".to_owned()),
        message_type: vec![DescriptorProto {
            name: Some("Number".to_owned()),
            field: vec![FieldDescriptorProto {
                name: Some("number".to_owned()),
                number: Some(1),
                label: Some(Label::Optional as i32),
                r#type: Some(Type::Int32 as i32),
                json_name: Some("number".to_owned()),
                ..Default::default()
            }],
            ..Default::default()
        }],
        syntax: Some("proto3".to_owned()),
        ..Default::default()
    };
    DescriptorPool::from_file_descriptor_set(FileDescriptorSet { file: vec![file] })
        .expect("number pool")
});

impl ReflectMessage for Number {
    fn descriptor(&self) -> MessageDescriptor {
        NUMBER_POOL
            .get_message_by_name("duorpc.test.v1.Number")
            .expect("number descriptor")
    }
}

/// Frames messages back to back, uncompressed.
pub fn frames<M: Message>(messages: &[M]) -> Bytes {
    frames_with(messages, &Identity)
}

pub fn frames_with<M: Message>(messages: &[M], compressor: &dyn Compressor) -> Bytes {
    let mut out = BytesMut::new();
    for message in messages {
        out.extend_from_slice(&encode_message(message, compressor, 0).expect("encode"));
    }
    out.freeze()
}

pub fn grpc(path: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .version(Version::HTTP_2)
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .body(body.into())
        .expect("request")
}

pub fn twirp(path: &str, content_type: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("content-type", content_type)
        .body(body.into())
        .expect("request")
}

/// A fully read gRPC response.
pub struct GrpcReply {
    pub headers: HeaderMap,
    pub payloads: Vec<(bool, Bytes)>,
    pub trailers: HeaderMap,
}

impl GrpcReply {
    pub fn status(&self) -> Option<u32> {
        self.trailers
            .get("grpc-status")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
    }

    pub fn messages<M: Message + Default>(&self) -> Vec<M> {
        self.payloads
            .iter()
            .map(|(compressed, payload)| {
                assert!(!compressed, "expected uncompressed frames");
                M::decode(payload.clone()).expect("decode")
            })
            .collect()
    }
}

pub async fn read_grpc(response: Response<Body>) -> GrpcReply {
    let (parts, body) = response.into_parts();
    let collected = body.collect().await.expect("body");
    let trailers = collected.trailers().cloned().unwrap_or_default();
    let mut buf = BytesMut::from(&collected.to_bytes()[..]);
    let mut payloads = Vec::new();
    while let Some(envelope) = decode_envelope(&mut buf, 0).expect("frame") {
        payloads.push((envelope.compressed, envelope.payload));
    }
    assert!(buf.is_empty(), "trailing partial frame");
    GrpcReply {
        headers: parts.headers,
        payloads,
        trailers,
    }
}

pub async fn read_body(response: Response<Body>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
}

pub async fn read_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&read_body(response).await).expect("json")
}
