//! Per-call lifecycle callbacks.

use crate::protocol::Protocol;
use crate::status::Error;
use core::fmt;
use std::sync::Arc;

/// What a hook knows about the call it observes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallInfo {
    /// Fully-qualified method name, e.g. `acme.user.v1.UserService.GetUser`.
    pub method: String,
    /// The protocol the outcome was reported in.
    pub protocol: Protocol,
}

type ResultHook = Arc<dyn Fn(&CallInfo, Option<&Error>) + Send + Sync>;

/// Optional callbacks threaded through every request a handler serves.
///
/// The result hook runs exactly once per call with the logical outcome:
/// `None` on success, the final [`Error`] otherwise. It sees the same outcome
/// whether the error was delivered as gRPC trailers or a Twirp body, and
/// whether or not response messages were already flushed.
#[derive(Clone, Default)]
pub struct Hooks {
    on_result: Option<ResultHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the callback invoked with each call's outcome.
    pub fn on_result<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CallInfo, Option<&Error>) + Send + Sync + 'static,
    {
        self.on_result = Some(Arc::new(hook));
        self
    }

    pub(crate) fn call_result(&self, info: &CallInfo, err: Option<&Error>) {
        if let Some(hook) = &self.on_result {
            hook(info, err);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_result", &self.on_result.is_some())
            .finish()
    }
}
