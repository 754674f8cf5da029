use anyhow::bail;
use clap::{ArgAction, Parser};
use std::net::SocketAddr;

/// One LPM length prefix is a `u32`, so no message can be larger.
const MAX_MESSAGE_BYTES: usize = u32::MAX as usize;

/// Runtime configuration for the `duorpc-server` binary.
///
/// All values are parsed from CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "duorpc-server",
    version,
    about = "Serves the ping service over gRPC and Twirp"
)]
pub struct CliArgs {
    /// Address to listen on, e.g. "0.0.0.0:50051".
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Largest request message accepted, after decompression. `0` disables
    /// the limit.
    ///
    /// Environment variable: `MAX_REQUEST_BYTES`
    #[arg(long, env = "MAX_REQUEST_BYTES", default_value_t = 4 * 1024 * 1024)]
    pub max_request_bytes: usize,

    /// Largest response message sent, before compression. `0` disables the
    /// limit.
    ///
    /// Environment variable: `MAX_RESPONSE_BYTES`
    #[arg(long, env = "MAX_RESPONSE_BYTES", default_value_t = 4 * 1024 * 1024)]
    pub max_response_bytes: usize,

    /// Accept Twirp (`application/protobuf` and `application/json`) requests
    /// next to gRPC.
    ///
    /// Environment variable: `SERVE_TWIRP`
    #[arg(long, env = "SERVE_TWIRP", default_value_t = true, action = ArgAction::Set)]
    pub serve_twirp: bool,

    /// Mount the gRPC server reflection services.
    ///
    /// Environment variable: `REFLECTION`
    #[arg(long, env = "REFLECTION", default_value_t = true, action = ArgAction::Set)]
    pub reflection: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub max_request_bytes: usize,
    pub max_response_bytes: usize,
    pub serve_twirp: bool,
    pub reflection: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let server_addr = match args.server_addr.parse() {
            Ok(addr) => addr,
            Err(err) => bail!("SERVER_ADDR ({}) is not a socket address: {err}", args.server_addr),
        };

        if args.max_request_bytes > MAX_MESSAGE_BYTES {
            bail!(
                "MAX_REQUEST_BYTES ({}) exceeds the largest framed message ({MAX_MESSAGE_BYTES})",
                args.max_request_bytes
            );
        }

        if args.max_response_bytes > MAX_MESSAGE_BYTES {
            bail!(
                "MAX_RESPONSE_BYTES ({}) exceeds the largest framed message ({MAX_MESSAGE_BYTES})",
                args.max_response_bytes
            );
        }

        Ok(Self {
            server_addr,
            max_request_bytes: args.max_request_bytes,
            max_response_bytes: args.max_response_bytes,
            serve_twirp: args.serve_twirp,
            reflection: args.reflection,
        })
    }
}
