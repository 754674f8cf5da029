pub mod config;
pub mod telemetry;

use config::ServerConfig;
use duorpc::{CallInfo, Error, HandlerOptions, Hooks, Registrar, reflection};

/// Builds the router for every service the configuration enables.
pub fn build_router(config: &ServerConfig) -> anyhow::Result<axum::Router> {
    let registrar = Registrar::new();
    let options = HandlerOptions::new()
        .registrar(&registrar)
        .serve_twirp(config.serve_twirp)
        .max_request_bytes(config.max_request_bytes)
        .max_response_bytes(config.max_response_bytes)
        .hooks(call_hooks());

    let mut handlers = duorpc_ping::handlers(options)?;
    if config.reflection {
        let pool = duorpc_ping::descriptor_pool()?;
        handlers.extend(reflection::handlers_with_options(
            &registrar,
            pool,
            HandlerOptions::new().hooks(call_hooks()),
        )?);
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Serving {:?}", registrar.services());

    Ok(duorpc::router(handlers))
}

fn call_hooks() -> Hooks {
    Hooks::new().on_result(log_outcome)
}

fn log_outcome(_info: &CallInfo, _err: Option<&Error>) {
    #[cfg(feature = "tracing")]
    match _err {
        None => tracing::debug!(method = %_info.method, protocol = ?_info.protocol, "call succeeded"),
        Some(err) => tracing::info!(
            method = %_info.method,
            protocol = ?_info.protocol,
            code = %err.code(),
            "call failed: {}",
            err.message()
        ),
    }
}
