//! Registry of the services a process is serving, for server reflection.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Collects the fully-qualified names of services as their handlers are
/// built.
///
/// Pass one to [`HandlerOptions::registrar`](crate::HandlerOptions::registrar)
/// for every handler that should be visible to reflection's `ListServices`.
/// Clones share the same underlying set. Names are only ever added; there is
/// no deregistration.
#[derive(Clone, Debug, Default)]
pub struct Registrar {
    services: Arc<RwLock<BTreeSet<String>>>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered service names, sorted. The returned vector is a copy.
    pub fn services(&self) -> Vec<String> {
        self.services.read().iter().cloned().collect()
    }

    /// Checks whether a fully-qualified service name is registered.
    pub fn is_registered(&self, service: &str) -> bool {
        self.services.read().contains(service)
    }

    /// Registers a fully-qualified service name. Empty names are ignored so an
    /// unnamed fallback route is never advertised.
    pub(crate) fn register(&self, service: &str) {
        if service.is_empty() {
            return;
        }
        self.services.write().insert(service.to_owned());
    }
}
