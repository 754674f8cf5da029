//! Wire protocol detection.

use crate::{TYPE_DEFAULT_GRPC, TYPE_JSON, TYPE_PROTO_GRPC, TYPE_PROTO_TWIRP};
use core::time::Duration;

/// The protocol a request is served with, chosen from its `Content-Type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// gRPC over HTTP/2: length-prefixed messages, status in trailers.
    Grpc,
    /// Twirp with a binary protobuf body.
    TwirpProto,
    /// Twirp with a JSON body.
    TwirpJson,
}

impl Protocol {
    /// Detects the protocol from a `Content-Type` value. Media type parameters
    /// such as `; charset=utf-8` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match media_type(content_type).as_str() {
            TYPE_DEFAULT_GRPC | TYPE_PROTO_GRPC => Some(Self::Grpc),
            TYPE_PROTO_TWIRP => Some(Self::TwirpProto),
            TYPE_JSON => Some(Self::TwirpJson),
            _ => None,
        }
    }

    /// The protocol whose error shape a rejected request is answered with:
    /// anything claiming to be gRPC gets trailers, everything else a Twirp
    /// JSON body.
    pub fn error_shape(content_type: &str) -> Self {
        if media_type(content_type).starts_with(TYPE_DEFAULT_GRPC) {
            Self::Grpc
        } else {
            Self::TwirpJson
        }
    }

    pub fn is_twirp(self) -> bool {
        matches!(self, Self::TwirpProto | Self::TwirpJson)
    }

    /// The `Content-Type` of successful responses.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Grpc => TYPE_DEFAULT_GRPC,
            Self::TwirpProto => TYPE_PROTO_TWIRP,
            Self::TwirpJson => TYPE_JSON,
        }
    }
}

fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Parses a `grpc-timeout` header: at most eight ASCII digits followed by a
/// unit of `H`, `M`, `S`, `m`, `u` or `n`.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
