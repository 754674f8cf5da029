//! The per-method protocol handler.
//!
//! A [`Handler`] owns one RPC method and answers it over gRPC, Twirp with
//! protobuf bodies and Twirp with JSON bodies, choosing by `Content-Type`.
//! Implementations never see the protocol: unary ones get a decoded request
//! and return a response, streaming ones read and write through a
//! [`ServerStream`].
//!
//! gRPC calls run on their own task. Response frames flow through a bounded
//! channel into the response body, and the final status is always delivered
//! as trailers, so an error after messages were flushed still reaches the
//! client.

use crate::compression::{Compressor, Compressors};
use crate::context::CallContext;
use crate::errorf;
use crate::hooks::{CallInfo, Hooks};
use crate::lpm::{LpmReader, decode_message, encode_envelope};
use crate::protocol::{Protocol, parse_grpc_timeout};
use crate::registrar::Registrar;
use crate::status::{Code, Error, GRPC_STATUS};
use crate::{TYPE_DEFAULT_GRPC, TYPE_JSON};
use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use core::convert::Infallible;
use core::fmt;
use core::future::Future;
use core::task::{Context, Poll};
use futures::future::BoxFuture;
use http::header::{ACCEPT_ENCODING, ALLOW, AsHeaderName, CONTENT_ENCODING, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Version};
use http_body_util::{BodyExt, LengthLimitError, Limited, StreamBody};
use hyper::body::Frame;
use prost::Message;
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage, SerializeOptions};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const GRPC_ENCODING: &str = "grpc-encoding";
const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
const GRPC_TIMEOUT: &str = "grpc-timeout";

/// Twirp's code for a request body that doesn't decode. Clients read it as
/// `invalid_argument`.
const TWIRP_MALFORMED: &str = "malformed";
/// Twirp's code for a path no method is mounted at. Clients read it as
/// `not_found`.
const TWIRP_BAD_ROUTE: &str = "bad_route";

/// Response frames buffered between a call and its connection.
const STREAM_BUFFER_SIZE: usize = 8;

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type FrameSender = mpsc::Sender<Result<Frame<Bytes>, Infallible>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Codec {
    Proto,
    Json,
}

impl Codec {
    fn for_protocol(protocol: Protocol) -> Self {
        match protocol {
            Protocol::TwirpJson => Self::Json,
            Protocol::Grpc | Protocol::TwirpProto => Self::Proto,
        }
    }

    fn decode<M: ReflectMessage + Default>(self, payload: Bytes) -> Result<M, Error> {
        match self {
            Self::Proto => decode_message(payload),
            Self::Json => json_to_dynamic(M::default().descriptor(), &payload)
                .map_err(|e| errorf!(Code::InvalidArgument, "can't unmarshal JSON: {e}"))?
                .transcode_to()
                .map_err(|e| errorf!(Code::Internal, "can't transcode JSON request: {e}")),
        }
    }

    fn encode<M: ReflectMessage>(self, message: &M) -> Result<Bytes, Error> {
        match self {
            Self::Proto => Ok(Bytes::from(message.encode_to_vec())),
            Self::Json => dynamic_to_json(&message.transcode_to_dynamic())
                .map(Bytes::from)
                .map_err(|e| errorf!(Code::Internal, "can't marshal JSON: {e}")),
        }
    }
}

/// Parses the protobuf JSON mapping. Both the JSON and the original field
/// names are accepted, 64-bit integers may be strings, and unknown fields are
/// dropped.
fn json_to_dynamic(
    descriptor: MessageDescriptor,
    payload: &[u8],
) -> serde_json::Result<DynamicMessage> {
    let options = DeserializeOptions::new().deny_unknown_fields(false);
    let mut deserializer = serde_json::Deserializer::from_slice(payload);
    let message =
        DynamicMessage::deserialize_with_options(descriptor, &mut deserializer, &options)?;
    deserializer.end()?;
    Ok(message)
}

/// Writes the protobuf JSON mapping the way Twirp servers do: original field
/// names, default values included, 64-bit integers as strings.
fn dynamic_to_json(message: &DynamicMessage) -> serde_json::Result<Vec<u8>> {
    let options = SerializeOptions::new()
        .use_proto_field_name(true)
        .skip_default_fields(false);
    let mut serializer = serde_json::Serializer::new(Vec::new());
    message.serialize_with_options(&mut serializer, &options)?;
    Ok(serializer.into_inner())
}

/// Decodes the request up front, so a body that doesn't decode is told apart
/// from a failing call.
type UnaryFn = dyn Fn(CallContext, Codec, Bytes) -> Result<UnaryCall, Error> + Send + Sync;
type UnaryCall = BoxFuture<'static, Result<Bytes, Error>>;

/// A unary implementation with its message types erased.
#[derive(Clone)]
pub struct UnaryImplementation(Arc<UnaryFn>);

/// A streaming method body.
///
/// Unary methods should use [`Implementation::unary`] instead so they are
/// also reachable over Twirp.
#[async_trait]
pub trait StreamingImplementation: Send + Sync + 'static {
    /// Serves one call. Returning `Err` ends the stream with that status, even
    /// after responses were sent.
    async fn serve(&self, ctx: CallContext, stream: &mut ServerStream) -> Result<(), Error>;
}

/// The body of an RPC method: exactly one of unary or streaming.
#[derive(Clone)]
pub enum Implementation {
    Unary(UnaryImplementation),
    Streaming(Arc<dyn StreamingImplementation>),
}

impl Implementation {
    /// Wraps an async function taking one request and returning one response.
    ///
    /// Messages are decoded as protobuf or, for Twirp JSON, through the
    /// protobuf JSON mapping of their [`ReflectMessage::descriptor`].
    pub fn unary<Req, Res, F, Fut>(f: F) -> Self
    where
        Req: ReflectMessage + Default + 'static,
        Res: ReflectMessage + 'static,
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Error>> + Send + 'static,
    {
        let f = Arc::new(f);
        Self::Unary(UnaryImplementation(Arc::new(
            move |ctx: CallContext, codec: Codec, payload: Bytes| -> Result<UnaryCall, Error> {
                let request: Req = codec.decode(payload)?;
                let f = Arc::clone(&f);
                let call: UnaryCall = Box::pin(async move {
                    let response = f(ctx, request).await?;
                    codec.encode(&response)
                });
                Ok(call)
            },
        )))
    }

    pub fn streaming<S: StreamingImplementation>(implementation: S) -> Self {
        Self::Streaming(Arc::new(implementation))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }
}

impl fmt::Debug for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unary(_) => "Implementation::Unary",
            Self::Streaming(_) => "Implementation::Streaming",
        })
    }
}

/// The server half of a gRPC stream.
///
/// Reads and writes fail with [`Code::Canceled`] once the client has gone
/// away.
pub struct ServerStream {
    reader: LpmReader<Body>,
    sender: FrameSender,
    compressor: Arc<dyn Compressor>,
    max_bytes: usize,
    cancellation: CancellationToken,
}

impl ServerStream {
    /// Receives the next request message. `Ok(None)` means the client closed
    /// its side of the stream.
    pub async fn receive<M: Message + Default>(&mut self) -> Result<Option<M>, Error> {
        self.receive_payload().await?.map(decode_message).transpose()
    }

    /// Sends one response message.
    pub async fn send<M: Message>(&mut self, message: &M) -> Result<(), Error> {
        self.send_payload(&message.encode_to_vec()).await
    }

    pub(crate) async fn receive_payload(&mut self) -> Result<Option<Bytes>, Error> {
        tokio::select! {
            result = self.reader.next_payload() => result,
            () = self.cancellation.cancelled() => Err(canceled()),
        }
    }

    pub(crate) async fn send_payload(&mut self, payload: &[u8]) -> Result<(), Error> {
        let envelope = encode_envelope(payload, self.compressor.as_ref(), self.max_bytes)?;
        tokio::select! {
            result = self.sender.send(Ok(Frame::data(envelope))) => result.map_err(|_| canceled()),
            () = self.cancellation.cancelled() => Err(canceled()),
        }
    }
}

fn canceled() -> Error {
    errorf!(Code::Canceled, "client disconnected")
}

/// Per-handler settings.
#[derive(Clone, Debug)]
pub struct HandlerOptions {
    registrar: Option<Registrar>,
    serve_twirp: bool,
    compressors: Compressors,
    hooks: Hooks,
    max_request_bytes: usize,
    max_response_bytes: usize,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            registrar: None,
            serve_twirp: true,
            compressors: Compressors::default(),
            hooks: Hooks::default(),
            max_request_bytes: 0,
            max_response_bytes: 0,
        }
    }
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the handler's service in `registrar` when it is built.
    pub fn registrar(mut self, registrar: &Registrar) -> Self {
        self.registrar = Some(registrar.clone());
        self
    }

    /// Whether Twirp requests are served. On by default; when off, Twirp
    /// content types are rejected like any other unsupported type.
    pub fn serve_twirp(mut self, enabled: bool) -> Self {
        self.serve_twirp = enabled;
        self
    }

    /// Adds a compressor, replacing one with the same name.
    pub fn compressor(mut self, compressor: Arc<dyn Compressor>) -> Self {
        self.compressors.insert(compressor);
        self
    }

    /// Replaces the whole compressor table.
    pub fn compressors(mut self, compressors: Compressors) -> Self {
        self.compressors = compressors;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Largest request message accepted, after decompression. `0` is
    /// unbounded.
    pub fn max_request_bytes(mut self, max_bytes: usize) -> Self {
        self.max_request_bytes = max_bytes;
        self
    }

    /// Largest response message sent, before compression. `0` is unbounded.
    pub fn max_response_bytes(mut self, max_bytes: usize) -> Self {
        self.max_response_bytes = max_bytes;
        self
    }
}

/// Serves one RPC method over every supported protocol.
///
/// Cloning is cheap; clones share the same method.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<Inner>,
}

struct Inner {
    method: String,
    service: String,
    package: String,
    path: String,
    implementation: Implementation,
    options: HandlerOptions,
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("method", &self.inner.method)
            .field("path", &self.inner.path)
            .field("implementation", &self.inner.implementation)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl Handler {
    /// Builds a handler for `method`, e.g. `acme.user.v1.UserService.GetUser`
    /// in service `acme.user.v1.UserService` of package `acme.user.v1`.
    ///
    /// The names must nest: the service is one segment below the package and
    /// the method one segment below the service. The service is registered
    /// with the options' registrar, if any.
    pub fn new(
        method: impl Into<String>,
        service: impl Into<String>,
        package: impl Into<String>,
        implementation: Implementation,
        options: HandlerOptions,
    ) -> Result<Self, Error> {
        let (method, service, package) = (method.into(), service.into(), package.into());
        let method_name = validate_names(&method, &service, &package)?;
        let path = format!("/{service}/{method_name}");

        if let Some(registrar) = &options.registrar {
            registrar.register(&service);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(%method, %path, streaming = implementation.is_streaming(), "handler built");

        Ok(Self {
            inner: Arc::new(Inner {
                method,
                service,
                package,
                path,
                implementation,
                options,
            }),
        })
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn package(&self) -> &str {
        &self.inner.package
    }

    /// The HTTP path, `/<service>/<method name>`.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// The path Twirp clients using the default prefix call.
    pub fn twirp_path(&self) -> String {
        format!("/twirp{}", self.inner.path)
    }

    pub fn serves_twirp(&self) -> bool {
        self.inner.options.serve_twirp
    }

    /// Answers one HTTP request.
    ///
    /// Transport misuse (a method other than POST, gRPC below HTTP/2) is
    /// answered with a bare HTTP status. Everything else ends with an RPC
    /// status in the protocol's error shape and is reported to the hooks.
    pub async fn serve(&self, request: Request<Body>) -> Response<Body> {
        if request.method() != Method::POST {
            let mut response = plain_response(StatusCode::METHOD_NOT_ALLOWED, "RPCs must use POST");
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static("POST"));
            return response;
        }

        let content_type = header_str(request.headers(), CONTENT_TYPE)
            .unwrap_or_default()
            .to_owned();
        let protocol = Protocol::from_content_type(&content_type)
            .filter(|p| !p.is_twirp() || self.inner.options.serve_twirp);

        match protocol {
            Some(Protocol::Grpc) => self.serve_grpc(request),
            Some(protocol) => self.serve_twirp(protocol, request).await,
            None => {
                let shape = Protocol::error_shape(&content_type);
                let err = errorf!(
                    Code::InvalidArgument,
                    "unsupported content-type {content_type:?}"
                );
                self.finish(shape, Some(&err));
                match shape {
                    Protocol::Grpc => grpc_error_response(&err, &self.inner.options.compressors),
                    Protocol::TwirpProto | Protocol::TwirpJson => {
                        twirp_error_response(&err, err.code().twirp_name())
                    }
                }
            }
        }
    }

    fn serve_grpc(&self, request: Request<Body>) -> Response<Body> {
        if request.version() < Version::HTTP_2 {
            return plain_response(StatusCode::HTTP_VERSION_NOT_SUPPORTED, "gRPC requires HTTP/2");
        }

        let options = &self.inner.options;
        let headers = request.headers();
        let request_compressor = match options
            .compressors
            .negotiate_request(header_str(headers, GRPC_ENCODING))
        {
            Ok(compressor) => compressor,
            Err(err) => {
                self.finish(Protocol::Grpc, Some(&err));
                return grpc_error_response(&err, &options.compressors);
            }
        };
        let response_compressor = options
            .compressors
            .negotiate_response(&request_compressor, header_str(headers, GRPC_ACCEPT_ENCODING));
        let deadline = header_str(headers, GRPC_TIMEOUT)
            .and_then(parse_grpc_timeout)
            .map(|timeout| Instant::now() + timeout);

        let (parts, body) = request.into_parts();
        let ctx = CallContext::new(parts.headers, Protocol::Grpc, deadline);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER_SIZE);
        let stream = ServerStream {
            reader: LpmReader::new(body, request_compressor, options.max_request_bytes),
            sender: tx.clone(),
            compressor: Arc::clone(&response_compressor),
            max_bytes: options.max_response_bytes,
            cancellation: ctx.cancellation_token().clone(),
        };

        let handler = self.clone();
        let call = async move {
            let result = handler.run_grpc(ctx, stream, &tx).await;
            let mut trailers = HeaderMap::new();
            match &result {
                Ok(()) => {
                    trailers.insert(GRPC_STATUS, HeaderValue::from_static("0"));
                }
                Err(err) => err.write_grpc_trailers(&mut trailers),
            }
            // A vanished client can't receive trailers; the outcome is still
            // reported below.
            let _ = tx.send(Ok(Frame::trailers(trailers))).await;
            handler.finish(Protocol::Grpc, result.as_ref().err());
        };

        #[cfg(feature = "tracing")]
        let call = {
            use tracing::Instrument;
            call.instrument(tracing::info_span!("grpc_call", method = %self.inner.method))
        };

        tokio::spawn(call);

        let mut response = Response::new(Body::new(StreamBody::new(ReceiverStream::new(rx))));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TYPE_DEFAULT_GRPC));
        if !response_compressor.is_identity() {
            if let Ok(value) = HeaderValue::from_str(response_compressor.name()) {
                headers.insert(GRPC_ENCODING, value);
            }
        }
        insert_grpc_accept_encoding(headers, &options.compressors);
        response
    }

    async fn run_grpc(
        &self,
        ctx: CallContext,
        mut stream: ServerStream,
        tx: &FrameSender,
    ) -> Result<(), Error> {
        let cancellation = ctx.cancellation_token().clone();
        let deadline = ctx.deadline();
        let call = with_deadline(deadline, self.dispatch_grpc(ctx, &mut stream));
        tokio::select! {
            result = call => result,
            () = tx.closed() => {
                cancellation.cancel();
                Err(canceled())
            }
        }
    }

    async fn dispatch_grpc(&self, ctx: CallContext, stream: &mut ServerStream) -> Result<(), Error> {
        match &self.inner.implementation {
            Implementation::Streaming(implementation) => implementation.serve(ctx, stream).await,
            Implementation::Unary(unary) => {
                let request = stream.receive_payload().await?.ok_or_else(|| {
                    errorf!(Code::InvalidArgument, "unary request has no message")
                })?;
                if stream.receive_payload().await?.is_some() {
                    return Err(errorf!(
                        Code::InvalidArgument,
                        "unary request has more than one message"
                    ));
                }
                let response = (unary.0)(ctx, Codec::Proto, request)?.await?;
                stream.send_payload(&response).await
            }
        }
    }

    async fn serve_twirp(&self, protocol: Protocol, request: Request<Body>) -> Response<Body> {
        let result = self.call_twirp(protocol, request).await;
        self.finish(protocol, result.as_ref().err().map(|failure| &failure.error));
        match result {
            Ok(reply) => reply.into_response(protocol),
            Err(failure) => twirp_error_response(&failure.error, failure.name),
        }
    }

    async fn call_twirp(
        &self,
        protocol: Protocol,
        request: Request<Body>,
    ) -> Result<TwirpReply, TwirpFailure> {
        let Implementation::Unary(unary) = &self.inner.implementation else {
            return Err(errorf!(
                Code::Unimplemented,
                "{} is a streaming method, which Twirp doesn't support",
                self.inner.method
            )
            .into());
        };

        let options = &self.inner.options;
        let request_compressor = options
            .compressors
            .negotiate_request(header_str(request.headers(), CONTENT_ENCODING))?;
        let response_compressor = options
            .compressors
            .negotiate_accept(header_str(request.headers(), ACCEPT_ENCODING));

        let (parts, body) = request.into_parts();
        let raw = read_body(body, options.max_request_bytes).await?;
        let payload = if request_compressor.is_identity() {
            raw
        } else {
            Bytes::from(request_compressor.decompress(&raw, options.max_request_bytes)?)
        };

        let ctx = CallContext::new(parts.headers, protocol, None);
        let call = (unary.0)(ctx, Codec::for_protocol(protocol), payload)
            .map_err(TwirpFailure::undecodable)?;
        let response = call.await?;
        if options.max_response_bytes > 0 && response.len() > options.max_response_bytes {
            return Err(errorf!(
                Code::ResourceExhausted,
                "response size {} exceeds sending limit {}",
                response.len(),
                options.max_response_bytes
            )
            .into());
        }

        if response_compressor.is_identity() {
            return Ok(TwirpReply {
                body: response,
                encoding: None,
            });
        }
        let encoding = HeaderValue::from_str(response_compressor.name())
            .map_err(|e| errorf!(Code::Internal, "invalid encoding name: {e}"))?;
        let compressed = response_compressor
            .compress(&response)
            .map_err(|e| errorf!(Code::Internal, "can't compress response: {e}"))?;
        Ok(TwirpReply {
            body: Bytes::from(compressed),
            encoding: Some(encoding),
        })
    }

    fn finish(&self, protocol: Protocol, err: Option<&Error>) {
        #[cfg(feature = "tracing")]
        {
            match err {
                Some(err) => tracing::debug!(
                    method = %self.inner.method,
                    ?protocol,
                    code = %err.code(),
                    "call failed: {}",
                    err.message()
                ),
                None => tracing::trace!(method = %self.inner.method, ?protocol, "call succeeded"),
            }
        }

        let info = CallInfo {
            method: self.inner.method.clone(),
            protocol,
        };
        self.inner.options.hooks.call_result(&info, err);
    }
}

impl<B> tower::Service<Request<B>> for Handler
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.serve(request.map(Body::new)).await) })
    }
}

/// A failed Twirp call and the Twirp code it's reported with.
struct TwirpFailure {
    error: Error,
    name: &'static str,
}

impl TwirpFailure {
    /// A request body that didn't decode is `malformed` in Twirp's terms.
    fn undecodable(error: Error) -> Self {
        if error.code() == Code::InvalidArgument {
            Self {
                error,
                name: TWIRP_MALFORMED,
            }
        } else {
            Self::from(error)
        }
    }
}

impl From<Error> for TwirpFailure {
    fn from(error: Error) -> Self {
        Self {
            name: error.code().twirp_name(),
            error,
        }
    }
}

struct TwirpReply {
    body: Bytes,
    encoding: Option<HeaderValue>,
}

impl TwirpReply {
    fn into_response(self, protocol: Protocol) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(protocol.content_type()));
        if let Some(encoding) = self.encoding {
            headers.insert(CONTENT_ENCODING, encoding);
        }
        response
    }
}

/// Fails the call with `DeadlineExceeded` once `deadline` passes.
async fn with_deadline<T>(
    deadline: Option<Instant>,
    call: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    let Some(deadline) = deadline else {
        return call.await;
    };
    tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), call)
        .await
        .unwrap_or_else(|_| Err(errorf!(Code::DeadlineExceeded, "deadline exceeded")))
}

async fn read_body(body: Body, max_bytes: usize) -> Result<Bytes, Error> {
    let collected = if max_bytes == 0 {
        body.collect().await.map_err(BoxError::from)
    } else {
        Limited::new(body, max_bytes).collect().await
    };
    match collected {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.is::<LengthLimitError>() => Err(errorf!(
            Code::ResourceExhausted,
            "request body is larger than configured max {max_bytes}"
        )),
        Err(err) => Err(errorf!(Code::Unknown, "can't read request body: {err}")),
    }
}

fn header_str<K: AsHeaderName>(headers: &HeaderMap, name: K) -> Option<&str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn insert_grpc_accept_encoding(headers: &mut HeaderMap, compressors: &Compressors) {
    if let Ok(value) = HeaderValue::try_from(compressors.accept_header()) {
        headers.insert(GRPC_ACCEPT_ENCODING, value);
    }
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// A gRPC response carrying nothing but the error status in trailers.
fn grpc_error_response(err: &Error, compressors: &Compressors) -> Response<Body> {
    let mut trailers = HeaderMap::new();
    err.write_grpc_trailers(&mut trailers);
    let frames = futures::stream::iter([Ok::<_, Infallible>(Frame::trailers(trailers))]);
    let mut response = Response::new(Body::new(StreamBody::new(frames)));
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(TYPE_DEFAULT_GRPC));
    insert_grpc_accept_encoding(headers, compressors);
    response
}

fn twirp_error_response(err: &Error, name: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(err.twirp_body_named(name)));
    *response.status_mut() = err.code().http_status();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TYPE_JSON));
    response
}

/// Answers requests no handler is mounted for: `Unimplemented` in trailers
/// for gRPC clients, a Twirp `bad_route` otherwise.
pub async fn bad_route(request: Request<Body>) -> Response<Body> {
    let content_type = header_str(request.headers(), CONTENT_TYPE).unwrap_or_default();
    let path = request.uri().path();
    match Protocol::error_shape(content_type) {
        Protocol::Grpc => grpc_error_response(
            &errorf!(Code::Unimplemented, "unknown method {path}"),
            &Compressors::default(),
        ),
        Protocol::TwirpProto | Protocol::TwirpJson => twirp_error_response(
            &errorf!(Code::NotFound, "no handler for path {path:?}"),
            TWIRP_BAD_ROUTE,
        ),
    }
}

/// Mounts handlers on an [`axum::Router`] with [`bad_route`] as fallback.
///
/// Twirp-enabled handlers are also mounted under the `/twirp` prefix.
pub fn router(handlers: impl IntoIterator<Item = Handler>) -> axum::Router {
    handlers
        .into_iter()
        .fold(axum::Router::new().fallback(bad_route), |router, handler| {
            let path = handler.path().to_owned();
            let router = if handler.serves_twirp() {
                router.route_service(&handler.twirp_path(), handler.clone())
            } else {
                router
            };
            router.route_service(&path, handler)
        })
}

/// Splits off the method name, checking it nests under the service and the
/// service under the package.
fn validate_names<'a>(method: &'a str, service: &str, package: &str) -> Result<&'a str, Error> {
    let service_name = if package.is_empty() {
        Some(service)
    } else {
        service
            .strip_prefix(package)
            .and_then(|rest| rest.strip_prefix('.'))
    };
    if !service_name.is_some_and(is_identifier) {
        return Err(errorf!(
            Code::InvalidArgument,
            "service {service:?} is not declared directly in package {package:?}"
        ));
    }

    method
        .strip_prefix(service)
        .and_then(|rest| rest.strip_prefix('.'))
        .filter(|name| is_identifier(name))
        .ok_or_else(|| {
            errorf!(
                Code::InvalidArgument,
                "method {method:?} is not declared directly in service {service:?}"
            )
        })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
