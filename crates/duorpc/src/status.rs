//! Canonical status codes and the protocol-independent [`Error`] type.
//!
//! Every failure inside `duorpc` (framing, negotiation, or a handler
//! implementation returning an error) is expressed as an [`Error`] carrying a
//! [`Code`]. The code is the single source of truth; each wire protocol maps
//! it into its own representation:
//!
//! - **gRPC**: a small integer in the `grpc-status` trailer, a percent-encoded
//!   `grpc-message`, and an optional `grpc-status-details-bin` carrying a
//!   base64-encoded `google.rpc.Status`.
//! - **Twirp**: a JSON body `{"code": "...", "msg": "..."}` and an HTTP status
//!   derived from the code.
//!
//! Both mappings round-trip back to the same [`Code`].

use crate::proto::rpc;
use bytes::Bytes;
use core::fmt;
use http::{HeaderMap, HeaderValue, StatusCode};
use prost::Message;
use serde::{Deserialize, Serialize};

/// Trailer carrying the numeric gRPC status.
pub const GRPC_STATUS: &str = "grpc-status";
/// Trailer carrying the percent-encoded status message.
pub const GRPC_MESSAGE: &str = "grpc-message";
/// Trailer carrying a base64-encoded `google.rpc.Status`.
pub const GRPC_STATUS_DETAILS: &str = "grpc-status-details-bin";

/// Canonical error categories shared by every protocol `duorpc` speaks.
///
/// The discriminants are the gRPC status numbers. There is no `Ok` variant: a
/// successful call is the absence of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Code {
    /// The operation was cancelled, typically by the caller.
    Canceled = 1,
    /// Unknown error, and the default for unmapped codes.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// The entity a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission to execute the operation.
    PermissionDenied = 7,
    /// Some resource has been exhausted, including message size limits.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented or supported.
    Unimplemented = 12,
    /// An internal invariant was broken.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request lacks valid authentication credentials.
    Unauthenticated = 16,
}

impl Code {
    /// Every code, in gRPC numeric order.
    pub const ALL: [Self; 16] = [
        Self::Canceled,
        Self::Unknown,
        Self::InvalidArgument,
        Self::DeadlineExceeded,
        Self::NotFound,
        Self::AlreadyExists,
        Self::PermissionDenied,
        Self::ResourceExhausted,
        Self::FailedPrecondition,
        Self::Aborted,
        Self::OutOfRange,
        Self::Unimplemented,
        Self::Internal,
        Self::Unavailable,
        Self::DataLoss,
        Self::Unauthenticated,
    ];

    /// The numeric status sent in the `grpc-status` trailer.
    pub const fn grpc_status(self) -> u32 {
        self as u32
    }

    /// Maps a gRPC numeric status back to a [`Code`].
    ///
    /// `0` (OK) and anything outside the canonical range map to
    /// [`Code::Unknown`].
    pub fn from_grpc_status(status: u32) -> Self {
        Self::ALL
            .into_iter()
            .find(|code| code.grpc_status() == status)
            .unwrap_or(Self::Unknown)
    }

    /// The Twirp error code string.
    pub const fn twirp_name(self) -> &'static str {
        match self {
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid_argument",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::FailedPrecondition => "failed_precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out_of_range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data_loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }

    /// Maps a Twirp error code string back to a [`Code`].
    ///
    /// Twirp's `malformed` and `bad_route` narrow to
    /// [`Code::InvalidArgument`] and [`Code::NotFound`]; anything else
    /// unrecognized is [`Code::Unknown`].
    pub fn from_twirp_name(name: &str) -> Self {
        match name {
            "malformed" => Self::InvalidArgument,
            "bad_route" => Self::NotFound,
            other => Self::ALL
                .into_iter()
                .find(|code| code.twirp_name() == other)
                .unwrap_or(Self::Unknown),
        }
    }

    /// The HTTP status Twirp uses for this code.
    pub const fn http_status(self) -> StatusCode {
        match self {
            Self::Canceled | Self::DeadlineExceeded => StatusCode::REQUEST_TIMEOUT,
            Self::Unknown | Self::Internal | Self::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidArgument | Self::OutOfRange => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists | Self::Aborted => StatusCode::CONFLICT,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Self::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Self::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }

    /// Classifies an HTTP response that did not carry a Twirp error body,
    /// e.g. one produced by a proxy sitting between client and server.
    pub fn from_intermediary_status(status: StatusCode) -> Self {
        match status.as_u16() {
            300..=399 | 400 => Self::Internal,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            429 | 502..=504 => Self::Unavailable,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.twirp_name())
    }
}

/// A protocol-independent RPC error.
///
/// Immutable once constructed. Implementations signal failure by returning
/// one, usually built with [`errorf!`](crate::errorf).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    code: Code,
    message: String,
    details: Vec<prost_types::Any>,
}

/// Builds an [`Error`] from a [`Code`] and a format string.
///
/// ```
/// use duorpc::{Code, errorf};
///
/// let err = errorf!(Code::NotFound, "no file named {:?}", "a.proto");
/// assert_eq!(err.code(), Code::NotFound);
/// assert_eq!(err.message(), "no file named \"a.proto\"");
/// ```
#[macro_export]
macro_rules! errorf {
    ($code:expr, $($arg:tt)+) => {
        $crate::Error::new($code, ::std::format!($($arg)+))
    };
}

impl Error {
    /// Creates an error without details.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Creates an error carrying typed detail payloads.
    pub fn with_details(
        code: Code,
        message: impl Into<String>,
        details: impl IntoIterator<Item = prost_types::Any>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: details.into_iter().collect(),
        }
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &[prost_types::Any] {
        &self.details
    }

    fn to_rpc_status(&self) -> rpc::Status {
        rpc::Status {
            code: self.code.grpc_status() as i32,
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }

    /// Writes this error into a gRPC trailer map, encoded the way tonic
    /// encodes a [`tonic::Status`].
    pub fn write_grpc_trailers(&self, trailers: &mut HeaderMap) {
        if tonic::Status::from(self.clone()).add_header(trailers).is_err() {
            trailers.insert(GRPC_STATUS, HeaderValue::from(self.code.grpc_status()));
        }
    }

    /// Reads the outcome recorded in a gRPC trailer map.
    ///
    /// Returns `None` for `grpc-status: 0`. A missing status is reported as
    /// [`Code::Unknown`], as is an unparsable one.
    pub fn from_grpc_trailers(trailers: &HeaderMap) -> Option<Self> {
        match tonic::Status::from_header_map(trailers) {
            Some(status) if status.code() == tonic::Code::Ok => None,
            Some(status) => Some(Self::from(status)),
            None => Some(Self::new(Code::Unknown, "missing grpc-status trailer")),
        }
    }

    /// Serializes this error as a Twirp JSON error body.
    pub fn to_twirp_body(&self) -> Bytes {
        self.twirp_body_named(self.code.twirp_name())
    }

    /// Like [`Error::to_twirp_body`] with one of Twirp's own code names, such
    /// as `malformed`, standing in for the code's name.
    pub(crate) fn twirp_body_named(&self, name: &str) -> Bytes {
        let body = TwirpErrorBody {
            code: name.to_owned(),
            msg: self.message.clone(),
        };
        match serde_json::to_vec(&body) {
            Ok(encoded) => Bytes::from(encoded),
            Err(_) => Bytes::from_static(br#"{"code":"internal","msg":"can't marshal error"}"#),
        }
    }

    /// Parses a Twirp error response.
    ///
    /// Bodies that aren't Twirp JSON errors are classified by HTTP status with
    /// [`Code::from_intermediary_status`].
    pub fn from_twirp_body(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<TwirpErrorBody>(body) {
            Ok(parsed) => Self::new(Code::from_twirp_name(&parsed.code), parsed.msg),
            Err(_) => Self::new(
                Code::from_intermediary_status(status),
                format!("non-twirp response with HTTP status {status}"),
            ),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct TwirpErrorBody {
    code: String,
    #[serde(default)]
    msg: String,
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        let code = tonic::Code::from_i32(err.code.grpc_status() as i32);
        if err.details.is_empty() {
            Self::new(code, err.message)
        } else {
            let details = Bytes::from(err.to_rpc_status().encode_to_vec());
            Self::with_details(code, err.message, details)
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        let details = rpc::Status::decode(status.details())
            .map(|decoded| decoded.details)
            .unwrap_or_default();
        Self {
            code: Code::from_grpc_status(status.code() as u32),
            message: status.message().to_owned(),
            details,
        }
    }
}
