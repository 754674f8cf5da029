use super::{DescriptorRegistry, V1_PACKAGE, V1ALPHA_PACKAGE};
use crate::context::CallContext;
use crate::errorf;
use crate::handler::{Handler, HandlerOptions, Implementation, ServerStream, StreamingImplementation};
use crate::proto::reflection::server_reflection_request::MessageRequest;
use crate::proto::reflection::server_reflection_response::MessageResponse;
use crate::proto::reflection::{
    ErrorResponse, ExtensionNumberResponse, ExtensionRequest, FileDescriptorResponse,
    ListServiceResponse, ServerReflectionRequest, ServerReflectionResponse, ServiceResponse,
};
use crate::registrar::Registrar;
use crate::status::{Code, Error};
use async_trait::async_trait;
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

const SERVICE_NAME: &str = "ServerReflection";
const METHOD_NAME: &str = "ServerReflectionInfo";

/// Builds the v1alpha and v1 reflection handlers over one registry.
///
/// Both services are registered with `registrar`, so they list themselves.
pub fn handlers<R: DescriptorRegistry>(
    registrar: &Registrar,
    registry: R,
) -> Result<Vec<Handler>, Error> {
    handlers_with_options(registrar, registry, HandlerOptions::new())
}

/// Like [`handlers`], starting from custom options (hooks, compressors).
///
/// Twirp is always off and message sizes are unbounded: file descriptors
/// can be large and are only ever read from the local registry.
pub fn handlers_with_options<R: DescriptorRegistry>(
    registrar: &Registrar,
    registry: R,
    options: HandlerOptions,
) -> Result<Vec<Handler>, Error> {
    let service = ReflectionService::new(registrar.clone(), registry);
    let options = options
        .registrar(registrar)
        .serve_twirp(false)
        .max_request_bytes(0)
        .max_response_bytes(0);

    [V1ALPHA_PACKAGE, V1_PACKAGE]
        .into_iter()
        .map(|package| {
            let service_fqn = format!("{package}.{SERVICE_NAME}");
            Handler::new(
                format!("{service_fqn}.{METHOD_NAME}"),
                service_fqn,
                package,
                Implementation::streaming(service.clone()),
                options.clone(),
            )
        })
        .collect()
}

/// Answers reflection queries for the lifetime of one stream.
pub struct ReflectionService<R> {
    registrar: Registrar,
    registry: Arc<R>,
}

impl<R> Clone for ReflectionService<R> {
    fn clone(&self) -> Self {
        Self {
            registrar: self.registrar.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R: DescriptorRegistry> ReflectionService<R> {
    pub fn new(registrar: Registrar, registry: R) -> Self {
        Self {
            registrar,
            registry: Arc::new(registry),
        }
    }

    /// Answers one query.
    ///
    /// Lookup misses come back as an embedded `ErrorResponse`. `Err` is
    /// reserved for failures that end the stream: a request with no query
    /// set, or a registry that can't resolve a file it referenced itself.
    pub fn respond(
        &self,
        request: ServerReflectionRequest,
        sent: &mut FdSet,
    ) -> Result<ServerReflectionResponse, Error> {
        let Some(query) = request.message_request.clone() else {
            return Err(errorf!(
                Code::InvalidArgument,
                "reflection request has no message_request set"
            ));
        };

        let registry = self.registry.as_ref();
        let message_response = match query {
            MessageRequest::FileByFilename(path) => {
                file_response(registry, registry.find_file_by_path(&path), sent)?
            }
            MessageRequest::FileContainingSymbol(symbol) => {
                file_response(registry, registry.find_file_containing_symbol(&symbol), sent)?
            }
            MessageRequest::FileContainingExtension(ExtensionRequest {
                containing_type,
                extension_number,
            }) => file_response(
                registry,
                registry.find_file_containing_extension(&containing_type, extension_number),
                sent,
            )?,
            MessageRequest::AllExtensionNumbersOfType(type_name) => {
                match registry.extension_numbers(&type_name) {
                    Ok(mut numbers) => {
                        numbers.sort_unstable();
                        MessageResponse::AllExtensionNumbersResponse(ExtensionNumberResponse {
                            base_type_name: type_name,
                            extension_number: numbers,
                        })
                    }
                    Err(err) => embedded_error(err)?,
                }
            }
            MessageRequest::ListServices(_) => {
                MessageResponse::ListServicesResponse(ListServiceResponse {
                    service: self
                        .registrar
                        .services()
                        .into_iter()
                        .map(|name| ServiceResponse { name })
                        .collect(),
                })
            }
        };

        Ok(ServerReflectionResponse {
            valid_host: request.host.clone(),
            original_request: Some(request),
            message_response: Some(message_response),
        })
    }
}

#[async_trait]
impl<R: DescriptorRegistry> StreamingImplementation for ReflectionService<R> {
    async fn serve(&self, _ctx: CallContext, stream: &mut ServerStream) -> Result<(), Error> {
        let mut sent = FdSet::new();
        while let Some(payload) = stream.receive_payload().await? {
            let request = ServerReflectionRequest::decode(payload)
                .map_err(|e| errorf!(Code::Unknown, "can't unmarshal protobuf: {e}"))?;
            let response = self.respond(request, &mut sent)?;
            stream.send_payload(&response.encode_to_vec()).await?;
        }
        Ok(())
    }
}

/// The file descriptors already sent on one reflection stream, by path.
///
/// Paths are the key because a file's full name is its package, and files
/// sharing a package would otherwise hide each other's imports.
#[derive(Clone, Debug, Default)]
pub struct FdSet {
    paths: HashSet<String>,
}

impl FdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// Marks `path` sent. Returns `false` if it already was.
    pub fn insert(&mut self, path: &str) -> bool {
        self.paths.insert(path.to_owned())
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

fn file_response<R: DescriptorRegistry + ?Sized>(
    registry: &R,
    root: Result<FileDescriptorProto, Error>,
    sent: &mut FdSet,
) -> Result<MessageResponse, Error> {
    match root {
        Ok(root) => Ok(MessageResponse::FileDescriptorResponse(FileDescriptorResponse {
            file_descriptor_proto: with_dependencies(registry, root, sent)?,
        })),
        Err(err) => embedded_error(err),
    }
}

/// Serializes `root` and, breadth first, every import not yet sent on this
/// stream. The root itself is always included.
///
/// Files are marked sent before they are resolved, so a failing import is
/// reported once and never retried within the stream.
fn with_dependencies<R: DescriptorRegistry + ?Sized>(
    registry: &R,
    root: FileDescriptorProto,
    sent: &mut FdSet,
) -> Result<Vec<Vec<u8>>, Error> {
    sent.insert(root.name());
    let mut encoded = Vec::new();
    let mut queue = VecDeque::from([root]);
    while let Some(file) = queue.pop_front() {
        for dependency in &file.dependency {
            if !sent.insert(dependency) {
                continue;
            }
            let import = registry.find_file_by_path(dependency).map_err(|err| {
                errorf!(
                    Code::Internal,
                    "can't resolve import {dependency:?} of {:?}: {}",
                    file.name(),
                    err.message()
                )
            })?;
            queue.push_back(import);
        }
        encoded.push(file.encode_to_vec());
    }
    Ok(encoded)
}

/// Embeds a lookup miss in the response; anything else fails the stream.
fn embedded_error(err: Error) -> Result<MessageResponse, Error> {
    if err.code() != Code::NotFound {
        return Err(err);
    }
    Ok(MessageResponse::ErrorResponse(ErrorResponse {
        error_code: Code::NotFound.grpc_status() as i32,
        error_message: err.message().to_owned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Files(HashMap<String, FileDescriptorProto>);

    impl Files {
        fn with(mut self, name: &str, deps: &[&str]) -> Self {
            self.0.insert(
                name.to_owned(),
                FileDescriptorProto {
                    name: Some(name.to_owned()),
                    dependency: deps.iter().map(|d| (*d).to_owned()).collect(),
                    ..Default::default()
                },
            );
            self
        }
    }

    impl DescriptorRegistry for Files {
        fn find_file_by_path(&self, path: &str) -> Result<FileDescriptorProto, Error> {
            self.0
                .get(path)
                .cloned()
                .ok_or_else(|| errorf!(Code::NotFound, "no file {path}"))
        }

        fn find_file_containing_symbol(&self, symbol: &str) -> Result<FileDescriptorProto, Error> {
            Err(errorf!(Code::NotFound, "no symbol {symbol}"))
        }

        fn find_file_containing_extension(
            &self,
            containing_type: &str,
            _number: i32,
        ) -> Result<FileDescriptorProto, Error> {
            Err(errorf!(Code::NotFound, "no extensions of {containing_type}"))
        }

        fn extension_numbers(&self, _containing_type: &str) -> Result<Vec<i32>, Error> {
            Err(errorf!(Code::Unavailable, "registry offline"))
        }
    }

    fn names(encoded: &[Vec<u8>]) -> Vec<String> {
        encoded
            .iter()
            .map(|bytes| {
                FileDescriptorProto::decode(bytes.as_slice())
                    .expect("descriptor")
                    .name()
                    .to_owned()
            })
            .collect()
    }

    #[test]
    fn breadth_first_with_shared_imports_once() {
        let files = Files::default()
            .with("a.proto", &["b.proto", "c.proto"])
            .with("b.proto", &["d.proto"])
            .with("c.proto", &["d.proto"])
            .with("d.proto", &[]);
        let mut sent = FdSet::new();
        let root = files.find_file_by_path("a.proto").expect("root");
        let encoded = with_dependencies(&files, root, &mut sent).expect("closure");
        assert_eq!(names(&encoded), ["a.proto", "b.proto", "c.proto", "d.proto"]);
        assert_eq!(sent.len(), 4);

        let root = files.find_file_by_path("b.proto").expect("root");
        let encoded = with_dependencies(&files, root, &mut sent).expect("again");
        assert_eq!(names(&encoded), ["b.proto"]);
    }

    #[test]
    fn sibling_files_of_one_package_are_tracked_apart() {
        let mut files = Files::default()
            .with("acme/a.proto", &["acme/shared.proto"])
            .with("acme/b.proto", &["acme/other.proto"])
            .with("acme/shared.proto", &[])
            .with("acme/other.proto", &[]);
        for file in files.0.values_mut() {
            file.package = Some("acme".to_owned());
        }
        let mut sent = FdSet::new();

        let root = files.find_file_by_path("acme/a.proto").expect("a");
        let encoded = with_dependencies(&files, root, &mut sent).expect("a closure");
        assert_eq!(names(&encoded), ["acme/a.proto", "acme/shared.proto"]);

        let root = files.find_file_by_path("acme/b.proto").expect("b");
        let encoded = with_dependencies(&files, root, &mut sent).expect("b closure");
        assert_eq!(names(&encoded), ["acme/b.proto", "acme/other.proto"]);
        assert!(!sent.insert("acme/b.proto"));
        assert_eq!(sent.len(), 4);
    }

    #[test]
    fn unresolvable_import_fails_once() {
        let files = Files::default().with("a.proto", &["gone.proto"]);
        let mut sent = FdSet::new();
        let root = files.find_file_by_path("a.proto").expect("root");
        let err = with_dependencies(&files, root.clone(), &mut sent).expect_err("missing import");
        assert_eq!(err.code(), Code::Internal);
        assert!(sent.contains("gone.proto"));

        let encoded = with_dependencies(&files, root, &mut sent).expect("marked sent");
        assert_eq!(names(&encoded), ["a.proto"]);
    }

    #[test]
    fn only_not_found_is_embedded() {
        let service = ReflectionService::new(Registrar::new(), Files::default());
        let mut sent = FdSet::new();

        let response = service
            .respond(
                ServerReflectionRequest {
                    host: "localhost".to_owned(),
                    message_request: Some(MessageRequest::FileContainingSymbol("x.Y".to_owned())),
                },
                &mut sent,
            )
            .expect("embedded");
        assert_eq!(response.valid_host, "localhost");
        assert!(matches!(
            response.message_response,
            Some(MessageResponse::ErrorResponse(ErrorResponse { error_code: 5, .. }))
        ));

        let err = service
            .respond(
                ServerReflectionRequest {
                    host: String::new(),
                    message_request: Some(MessageRequest::AllExtensionNumbersOfType(
                        "x.Y".to_owned(),
                    )),
                },
                &mut sent,
            )
            .expect_err("stream error");
        assert_eq!(err.code(), Code::Unavailable);
    }
}
