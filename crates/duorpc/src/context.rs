use crate::protocol::Protocol;
use http::HeaderMap;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Request-scoped state handed to every implementation.
///
/// The cancellation token fires when the peer goes away mid-call; streaming
/// implementations doing work between reads and writes can watch it to stop
/// early. Reads and writes on a
/// [`ServerStream`](crate::ServerStream) already observe it.
#[derive(Clone, Debug)]
pub struct CallContext {
    headers: HeaderMap,
    protocol: Protocol,
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl CallContext {
    pub(crate) fn new(headers: HeaderMap, protocol: Protocol, deadline: Option<Instant>) -> Self {
        Self {
            headers,
            protocol,
            deadline,
            cancellation: CancellationToken::new(),
        }
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The point after which the call fails with `DeadlineExceeded`, if the
    /// client sent `grpc-timeout`.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
