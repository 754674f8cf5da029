use crate::descriptor::{PACKAGE, SERVICE};
use crate::error::Error;
use crate::types::{FailRequest, FailResponse, PingRequest, PingResponse};
use duorpc::{CallContext, Code, Handler, HandlerOptions, Implementation};

/// Echoes the request number.
pub async fn ping(_ctx: CallContext, request: PingRequest) -> Result<PingResponse, duorpc::Error> {
    Ok(PingResponse {
        number: request.number,
    })
}

/// Fails with the requested code. `0` and unknown codes are rejected as
/// invalid, since they can't describe a failure.
pub async fn fail(_ctx: CallContext, request: FailRequest) -> Result<FailResponse, duorpc::Error> {
    let code = u32::try_from(request.code)
        .ok()
        .filter(|code| (1..=16).contains(code))
        .map(Code::from_grpc_status)
        .ok_or_else(|| Error::InvalidRequest {
            reason: format!("code {} is not a gRPC error code", request.code),
        })?;
    Err(Error::RequestedFailure { code }.into())
}

/// Handlers for both `PingService` methods, sharing `options`.
pub fn handlers(options: HandlerOptions) -> Result<Vec<Handler>, duorpc::Error> {
    Ok(vec![
        Handler::new(
            format!("{SERVICE}.Ping"),
            SERVICE,
            PACKAGE,
            Implementation::unary(ping),
            options.clone(),
        )?,
        Handler::new(
            format!("{SERVICE}.Fail"),
            SERVICE,
            PACKAGE,
            Implementation::unary(fail),
            options,
        )?,
    ])
}
