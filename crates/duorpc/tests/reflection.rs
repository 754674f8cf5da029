mod common;

use axum::body::Body;
use common::{frames, grpc, read_grpc};
use duorpc::proto::reflection::server_reflection_request::MessageRequest;
use duorpc::proto::reflection::server_reflection_response::MessageResponse;
use duorpc::proto::reflection::{
    ExtensionRequest, ServerReflectionRequest, ServerReflectionResponse,
};
use duorpc::reflection::{self, DescriptorRegistry};
use duorpc::{Code, Error, Handler, Registrar, errorf};
use http::{StatusCode, Version};
use prost::Message;
use prost_types::FileDescriptorProto;
use std::collections::HashMap;
use tower::ServiceExt;

/// A small in-memory schema: files by path, symbols by name, extensions by
/// containing type.
#[derive(Default)]
struct FakeRegistry {
    files: HashMap<String, FileDescriptorProto>,
    symbols: HashMap<String, String>,
    extensions: HashMap<String, Vec<(i32, String)>>,
}

impl FakeRegistry {
    fn file(mut self, path: &str, deps: &[&str], symbols: &[&str]) -> Self {
        self.files.insert(
            path.to_owned(),
            FileDescriptorProto {
                name: Some(path.to_owned()),
                package: Some("pkg".to_owned()),
                dependency: deps.iter().map(|d| (*d).to_owned()).collect(),
                ..Default::default()
            },
        );
        for symbol in symbols {
            self.symbols.insert((*symbol).to_owned(), path.to_owned());
        }
        self
    }

    fn extension(mut self, containing_type: &str, number: i32, path: &str) -> Self {
        self.extensions
            .entry(containing_type.to_owned())
            .or_default()
            .push((number, path.to_owned()));
        self
    }
}

impl DescriptorRegistry for FakeRegistry {
    fn find_file_by_path(&self, path: &str) -> Result<FileDescriptorProto, Error> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| errorf!(Code::NotFound, "no file {path:?}"))
    }

    fn find_file_containing_symbol(&self, symbol: &str) -> Result<FileDescriptorProto, Error> {
        let path = self
            .symbols
            .get(symbol)
            .ok_or_else(|| errorf!(Code::NotFound, "no symbol {symbol:?}"))?;
        self.find_file_by_path(path)
    }

    fn find_file_containing_extension(
        &self,
        containing_type: &str,
        number: i32,
    ) -> Result<FileDescriptorProto, Error> {
        let path = self
            .extensions
            .get(containing_type)
            .and_then(|all| all.iter().find(|(n, _)| *n == number))
            .map(|(_, path)| path)
            .ok_or_else(|| errorf!(Code::NotFound, "no extension {number} of {containing_type}"))?;
        self.find_file_by_path(path)
    }

    fn extension_numbers(&self, containing_type: &str) -> Result<Vec<i32>, Error> {
        Ok(self
            .extensions
            .get(containing_type)
            .map(|all| all.iter().map(|(n, _)| *n).collect())
            .unwrap_or_default())
    }
}

fn registry() -> FakeRegistry {
    FakeRegistry::default()
        .file("pkg/a.proto", &["pkg/b.proto", "pkg/c.proto"], &["pkg.A", "pkg.A.Get"])
        .file("pkg/b.proto", &["pkg/d.proto"], &["pkg.B"])
        .file("pkg/c.proto", &["pkg/d.proto"], &["pkg.C"])
        .file("pkg/d.proto", &[], &["pkg.Base", "pkg.Empty"])
        .file("pkg/ext.proto", &["pkg/d.proto"], &[])
        .extension("pkg.Base", 3, "pkg/ext.proto")
        .extension("pkg.Base", 1, "pkg/ext.proto")
        .extension("pkg.Base", 2, "pkg/ext.proto")
}

fn v1alpha(registrar: &Registrar) -> Handler {
    reflection::handlers(registrar, registry())
        .expect("handlers")
        .into_iter()
        .find(|handler| handler.path() == reflection::V1ALPHA_PATH)
        .expect("v1alpha handler")
}

fn query(message_request: MessageRequest) -> ServerReflectionRequest {
    ServerReflectionRequest {
        host: "localhost".to_owned(),
        message_request: Some(message_request),
    }
}

fn file_names(response: &ServerReflectionResponse) -> Vec<String> {
    let Some(MessageResponse::FileDescriptorResponse(files)) = &response.message_response else {
        panic!("expected files, got {:?}", response.message_response);
    };
    files
        .file_descriptor_proto
        .iter()
        .map(|raw| {
            FileDescriptorProto::decode(raw.as_slice())
                .expect("descriptor")
                .name()
                .to_owned()
        })
        .collect()
}

async fn exchange(
    handler: &Handler,
    requests: &[ServerReflectionRequest],
) -> (Vec<ServerReflectionResponse>, Option<Error>) {
    let reply = read_grpc(handler.serve(grpc(handler.path(), frames(requests))).await).await;
    (reply.messages(), Error::from_grpc_trailers(&reply.trailers))
}

#[tokio::test]
async fn both_versions_are_registered_and_listed() {
    let registrar = Registrar::new();
    let handlers = reflection::handlers(&registrar, registry()).expect("handlers");
    let mut paths = handlers.iter().map(Handler::path).collect::<Vec<_>>();
    paths.sort_unstable();
    assert_eq!(paths, [reflection::V1_PATH, reflection::V1ALPHA_PATH]);
    assert!(handlers.iter().all(|handler| !handler.serves_twirp()));
    assert_eq!(
        registrar.services(),
        [
            "grpc.reflection.v1.ServerReflection",
            "grpc.reflection.v1alpha.ServerReflection"
        ]
    );
}

#[tokio::test]
async fn list_services_is_sorted() {
    let registrar = Registrar::new();
    let handler = reflection::handlers(&registrar, registry())
        .expect("handlers")
        .remove(0);
    // Register after the fact: the list is read per query.
    for name in ["pkg.B", "pkg.A"] {
        duorpc::Handler::new(
            format!("{name}.Get"),
            name,
            "pkg",
            duorpc::Implementation::unary(|_ctx, request: common::Number| async move {
                Ok::<_, Error>(request)
            }),
            duorpc::HandlerOptions::new().registrar(&registrar),
        )
        .expect("handler");
    }

    let (responses, status) =
        exchange(&handler, &[query(MessageRequest::ListServices(String::new()))]).await;
    assert_eq!(status, None);
    let Some(MessageResponse::ListServicesResponse(list)) = &responses[0].message_response else {
        panic!("expected services");
    };
    let names = list.service.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
    assert_eq!(
        names,
        [
            "grpc.reflection.v1.ServerReflection",
            "grpc.reflection.v1alpha.ServerReflection",
            "pkg.A",
            "pkg.B"
        ]
    );
}

#[tokio::test]
async fn root_is_resent_and_imports_are_sent_once_per_stream() {
    let handler = v1alpha(&Registrar::new());
    let requests = [
        query(MessageRequest::FileByFilename("pkg/a.proto".to_owned())),
        query(MessageRequest::FileByFilename("pkg/a.proto".to_owned())),
        query(MessageRequest::FileContainingSymbol("pkg.Base".to_owned())),
        query(MessageRequest::FileContainingExtension(ExtensionRequest {
            containing_type: "pkg.Base".to_owned(),
            extension_number: 2,
        })),
    ];
    let (responses, status) = exchange(&handler, &requests).await;
    assert_eq!(status, None);
    assert_eq!(responses.len(), 4);

    let first = file_names(&responses[0]);
    assert_eq!(first[0], "pkg/a.proto");
    let mut imports = first[1..].to_vec();
    imports.sort();
    assert_eq!(imports, ["pkg/b.proto", "pkg/c.proto", "pkg/d.proto"]);

    assert_eq!(file_names(&responses[1]), ["pkg/a.proto"]);
    assert_eq!(file_names(&responses[2]), ["pkg/d.proto"]);
    assert_eq!(file_names(&responses[3]), ["pkg/ext.proto"]);

    assert_eq!(responses[0].valid_host, "localhost");
    assert_eq!(responses[0].original_request, Some(requests[0].clone()));
}

#[tokio::test]
async fn separate_streams_do_not_share_sent_files() {
    let handler = v1alpha(&Registrar::new());
    let request = [query(MessageRequest::FileContainingSymbol("pkg.B".to_owned()))];
    for _ in 0..2 {
        let (responses, _) = exchange(&handler, &request).await;
        assert_eq!(file_names(&responses[0]), ["pkg/b.proto", "pkg/d.proto"]);
    }
}

#[tokio::test]
async fn extension_numbers_are_sorted() {
    let handler = v1alpha(&Registrar::new());
    let (responses, status) = exchange(
        &handler,
        &[
            query(MessageRequest::AllExtensionNumbersOfType("pkg.Base".to_owned())),
            query(MessageRequest::AllExtensionNumbersOfType("pkg.Empty".to_owned())),
            query(MessageRequest::AllExtensionNumbersOfType("pkg.Missing".to_owned())),
        ],
    )
    .await;
    assert_eq!(status, None);

    let numbers = |response: &ServerReflectionResponse| match &response.message_response {
        Some(MessageResponse::AllExtensionNumbersResponse(found)) => {
            (found.base_type_name.clone(), found.extension_number.clone())
        }
        other => panic!("expected extension numbers, got {other:?}"),
    };
    assert_eq!(numbers(&responses[0]), ("pkg.Base".to_owned(), vec![1, 2, 3]));
    assert_eq!(numbers(&responses[1]), ("pkg.Empty".to_owned(), vec![]));
    assert_eq!(numbers(&responses[2]), ("pkg.Missing".to_owned(), vec![]));
}

#[tokio::test]
async fn misses_are_embedded_and_the_stream_continues() {
    let handler = v1alpha(&Registrar::new());
    let (responses, status) = exchange(
        &handler,
        &[
            query(MessageRequest::FileByFilename("pkg/missing.proto".to_owned())),
            query(MessageRequest::FileContainingSymbol("pkg.Missing".to_owned())),
            query(MessageRequest::FileContainingExtension(ExtensionRequest {
                containing_type: "pkg.Base".to_owned(),
                extension_number: 99,
            })),
            query(MessageRequest::FileByFilename("pkg/d.proto".to_owned())),
        ],
    )
    .await;
    assert_eq!(status, None);
    assert_eq!(responses.len(), 4);
    for response in &responses[..3] {
        match &response.message_response {
            Some(MessageResponse::ErrorResponse(err)) => {
                assert_eq!(err.error_code, Code::NotFound.grpc_status() as i32);
                assert!(!err.error_message.is_empty());
            }
            other => panic!("expected an embedded error, got {other:?}"),
        }
    }
    assert_eq!(file_names(&responses[3]), ["pkg/d.proto"]);
}

#[tokio::test]
async fn empty_query_fails_the_stream() {
    let handler = v1alpha(&Registrar::new());
    let (responses, status) = exchange(
        &handler,
        &[
            query(MessageRequest::ListServices(String::new())),
            ServerReflectionRequest {
                host: String::new(),
                message_request: None,
            },
        ],
    )
    .await;
    assert_eq!(responses.len(), 1);
    assert_eq!(status.expect("error").code(), Code::InvalidArgument);
}

#[tokio::test]
async fn undecodable_request_is_unknown() {
    let handler = v1alpha(&Registrar::new());
    let garbage = duorpc::lpm::encode_envelope(&[0xff, 0xff, 0xff], &duorpc::compression::Identity, 0)
        .expect("frame");
    let reply = read_grpc(handler.serve(grpc(handler.path(), garbage)).await).await;
    let err = Error::from_grpc_trailers(&reply.trailers).expect("error");
    assert_eq!(err.code(), Code::Unknown);
    assert!(err.message().starts_with("can't unmarshal"));
}

#[tokio::test]
async fn reflection_requires_grpc_over_http2() {
    let handler = v1alpha(&Registrar::new());
    let router = duorpc::router([handler]);

    let mut request = grpc(reflection::V1ALPHA_PATH, Body::empty());
    *request.version_mut() = Version::HTTP_11;
    let response = router.clone().oneshot(request).await.expect("infallible");
    assert_eq!(response.status(), StatusCode::HTTP_VERSION_NOT_SUPPORTED);

    let response = router
        .oneshot(common::twirp(reflection::V1ALPHA_PATH, "application/json", "{}"))
        .await
        .expect("infallible");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
