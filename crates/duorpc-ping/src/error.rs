//! Error types for the ping service.
//!
//! `Error` covers everything the service itself can report. It converts into
//! [`duorpc::Error`] so the transport maps it onto gRPC trailers or Twirp
//! bodies.

use duorpc::Code;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The bundled descriptor failed to load into a pool.
    #[error("Invalid descriptor: {0}")]
    Descriptor(#[from] prost_reflect::DescriptorError),

    /// `Fail` did what it was asked to.
    #[error("Failing with requested code {code}")]
    RequestedFailure { code: Code },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl From<Error> for duorpc::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Descriptor(e) => duorpc::errorf!(Code::Internal, "descriptor error: {e}"),
            Error::RequestedFailure { code } => {
                duorpc::errorf!(code, "failing with requested code {}", code.grpc_status())
            }
            Error::InvalidRequest { reason } => duorpc::Error::new(Code::InvalidArgument, reason),
        }
    }
}
