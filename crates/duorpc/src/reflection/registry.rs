use crate::errorf;
use crate::status::{Code, Error};
use prost_reflect::{DescriptorPool, FileDescriptor};
use prost_types::FileDescriptorProto;

/// Read-only schema lookups backing the reflection service.
///
/// The file lookups report a miss as an [`Error`] with [`Code::NotFound`];
/// the reflection service turns those into embedded error responses rather
/// than failing the stream. Any other code ends the stream.
pub trait DescriptorRegistry: Send + Sync + 'static {
    /// The file registered under `path`, e.g. `google/protobuf/empty.proto`.
    fn find_file_by_path(&self, path: &str) -> Result<FileDescriptorProto, Error>;

    /// The file declaring a fully-qualified symbol.
    fn find_file_containing_symbol(&self, symbol: &str) -> Result<FileDescriptorProto, Error>;

    /// The file declaring extension `number` of `containing_type`.
    fn find_file_containing_extension(
        &self,
        containing_type: &str,
        number: i32,
    ) -> Result<FileDescriptorProto, Error>;

    /// Every known extension number of `containing_type`, in any order.
    ///
    /// A type without extensions, or one the registry doesn't know, is an
    /// empty success.
    fn extension_numbers(&self, containing_type: &str) -> Result<Vec<i32>, Error>;
}

impl DescriptorRegistry for DescriptorPool {
    fn find_file_by_path(&self, path: &str) -> Result<FileDescriptorProto, Error> {
        self.get_file_by_name(path)
            .map(|file| to_proto(&file))
            .ok_or_else(|| errorf!(Code::NotFound, "no file named {path:?}"))
    }

    fn find_file_containing_symbol(&self, symbol: &str) -> Result<FileDescriptorProto, Error> {
        symbol_file(self, symbol)
            .map(|file| to_proto(&file))
            .ok_or_else(|| errorf!(Code::NotFound, "no descriptor found for symbol {symbol:?}"))
    }

    fn find_file_containing_extension(
        &self,
        containing_type: &str,
        number: i32,
    ) -> Result<FileDescriptorProto, Error> {
        let number = u32::try_from(number).ok();
        self.get_message_by_name(containing_type)
            .and_then(|message| {
                message
                    .extensions()
                    .find(|extension| Some(extension.number()) == number)
            })
            .map(|extension| to_proto(&extension.parent_file()))
            .ok_or_else(|| {
                errorf!(
                    Code::NotFound,
                    "no extension {} of message {containing_type:?}",
                    number.map_or_else(|| "<negative>".to_owned(), |n| n.to_string())
                )
            })
    }

    fn extension_numbers(&self, containing_type: &str) -> Result<Vec<i32>, Error> {
        let Some(message) = self.get_message_by_name(containing_type) else {
            return Ok(Vec::new());
        };
        Ok(message
            .extensions()
            .filter_map(|extension| i32::try_from(extension.number()).ok())
            .collect())
    }
}

/// Resolves any named element down to fields and methods, which the pool
/// doesn't index on their own.
fn symbol_file(pool: &DescriptorPool, symbol: &str) -> Option<FileDescriptor> {
    if let Some(message) = pool.get_message_by_name(symbol) {
        return Some(message.parent_file());
    }
    if let Some(enumeration) = pool.get_enum_by_name(symbol) {
        return Some(enumeration.parent_file());
    }
    if let Some(service) = pool.get_service_by_name(symbol) {
        return Some(service.parent_file());
    }
    if let Some(extension) = pool.get_extension_by_name(symbol) {
        return Some(extension.parent_file());
    }

    let (parent, name) = symbol.rsplit_once('.')?;
    if let Some(service) = pool.get_service_by_name(parent) {
        if service.methods().any(|method| method.name() == name) {
            return Some(service.parent_file());
        }
    }
    pool.get_message_by_name(parent)
        .filter(|message| message.get_field_by_name(name).is_some())
        .map(|message| message.parent_file())
}

fn to_proto(file: &FileDescriptor) -> FileDescriptorProto {
    file.file_descriptor_proto().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::field_descriptor_proto::{Label, Type};
    use prost_types::{
        DescriptorProto, FieldDescriptorProto, FileDescriptorSet, MethodDescriptorProto,
        ServiceDescriptorProto, descriptor_proto::ExtensionRange,
    };

    fn field(name: &str, number: i32) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_owned()),
            number: Some(number),
            label: Some(Label::Optional as i32),
            r#type: Some(Type::String as i32),
            json_name: Some(name.to_owned()),
            ..Default::default()
        }
    }

    fn pool() -> DescriptorPool {
        let base = FileDescriptorProto {
            name: Some("acme/base.proto".to_owned()),
            package: Some("acme".to_owned()),
            message_type: vec![DescriptorProto {
                name: Some("Base".to_owned()),
                field: vec![field("id", 1)],
                extension_range: vec![ExtensionRange {
                    start: Some(100),
                    end: Some(200),
                    options: None,
                }],
                ..Default::default()
            }],
            syntax: Some("proto2".to_owned()),
            ..Default::default()
        };
        let extensions = FileDescriptorProto {
            name: Some("acme/ext.proto".to_owned()),
            package: Some("acme".to_owned()),
            dependency: vec!["acme/base.proto".to_owned()],
            extension: vec![
                FieldDescriptorProto {
                    extendee: Some(".acme.Base".to_owned()),
                    ..field("late", 102)
                },
                FieldDescriptorProto {
                    extendee: Some(".acme.Base".to_owned()),
                    ..field("early", 101)
                },
            ],
            service: vec![ServiceDescriptorProto {
                name: Some("Lookup".to_owned()),
                method: vec![MethodDescriptorProto {
                    name: Some("Find".to_owned()),
                    input_type: Some(".acme.Base".to_owned()),
                    output_type: Some(".acme.Base".to_owned()),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            syntax: Some("proto2".to_owned()),
            ..Default::default()
        };
        DescriptorPool::from_file_descriptor_set(FileDescriptorSet {
            file: vec![base, extensions],
        })
        .expect("valid descriptors")
    }

    #[test]
    fn finds_files_by_path() {
        let pool = pool();
        let file = pool.find_file_by_path("acme/ext.proto").expect("found");
        assert_eq!(file.dependency, ["acme/base.proto"]);
        let err = pool.find_file_by_path("acme/missing.proto").expect_err("missing");
        assert_eq!(err.code(), Code::NotFound);
    }

    #[test]
    fn finds_files_by_symbol() {
        let pool = pool();
        for (symbol, path) in [
            ("acme.Base", "acme/base.proto"),
            ("acme.Base.id", "acme/base.proto"),
            ("acme.Lookup", "acme/ext.proto"),
            ("acme.Lookup.Find", "acme/ext.proto"),
            ("acme.early", "acme/ext.proto"),
        ] {
            let file = pool.find_file_containing_symbol(symbol).expect(symbol);
            assert_eq!(file.name(), path, "{symbol}");
        }
        for symbol in ["acme.Nope", "acme.Lookup.Nope", "acme.Base.nope", "nodots"] {
            let err = pool.find_file_containing_symbol(symbol).expect_err(symbol);
            assert_eq!(err.code(), Code::NotFound);
        }
    }

    #[test]
    fn finds_extensions() {
        let pool = pool();
        let file = pool
            .find_file_containing_extension("acme.Base", 101)
            .expect("found");
        assert_eq!(file.name(), "acme/ext.proto");
        for (message, number) in [("acme.Base", 150), ("acme.Base", -1), ("acme.Nope", 101)] {
            let err = pool
                .find_file_containing_extension(message, number)
                .expect_err("missing");
            assert_eq!(err.code(), Code::NotFound);
        }

        let mut numbers = pool.extension_numbers("acme.Base").expect("numbers");
        numbers.sort_unstable();
        assert_eq!(numbers, [101, 102]);
        assert!(pool.extension_numbers("acme.Nope").expect("unknown").is_empty());
    }
}
