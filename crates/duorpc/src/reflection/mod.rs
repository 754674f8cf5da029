//! gRPC server reflection.
//!
//! Serves `grpc.reflection.v1alpha.ServerReflection` and its identical
//! successor `grpc.reflection.v1.ServerReflection` so tools like `grpcurl`
//! can discover services at runtime. Schema lookups go through an injected
//! [`DescriptorRegistry`]; the service list comes from a [`Registrar`].
//!
//! ```no_run
//! use duorpc::{Registrar, reflection};
//! use prost_reflect::DescriptorPool;
//!
//! # fn main() -> Result<(), duorpc::Error> {
//! let registrar = Registrar::new();
//! let handlers = reflection::handlers(&registrar, DescriptorPool::global())?;
//! let router = duorpc::router(handlers);
//! # drop(router);
//! # Ok(())
//! # }
//! ```

mod registry;
mod service;

pub use registry::DescriptorRegistry;
pub use service::{FdSet, ReflectionService, handlers, handlers_with_options};

/// Package of the first reflection protocol, still the one most clients use.
pub const V1ALPHA_PACKAGE: &str = "grpc.reflection.v1alpha";
/// Package of the stable reflection protocol.
pub const V1_PACKAGE: &str = "grpc.reflection.v1";

/// Path of the v1alpha reflection stream.
pub const V1ALPHA_PATH: &str = "/grpc.reflection.v1alpha.ServerReflection/ServerReflectionInfo";
/// Path of the v1 reflection stream.
pub const V1_PATH: &str = "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo";
