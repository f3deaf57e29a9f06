//! reliable-transport echo demo
//!
//! Runs either an echo server, which sends every byte it receives straight
//! back, or a client that forwards stdin lines and prints the echoes.
//!
//! Environment variables:
//! - RT_MODE: "server" (default) or "client"
//! - RT_BIND: link socket address (default 127.0.0.1:7001)
//! - RT_PORT: transport port to listen on (default 7000, client 40000)
//! - RT_LINK_PORT: UDP port peers listen on (default: same as RT_BIND)
//! - RT_PEER: transport address of the server (client only, default 127.0.0.1:7000)
//! - RUST_LOG: log filter, e.g. `info` or `reliable_transport=trace`

mod client;
mod server;

use std::net::SocketAddr;
use std::str::FromStr;

use reliable_transport::TransportConfig;
use reliable_transport::server::{ServerConfig, ServerConfigBuilder};
use thiserror::Error;

/// Errors from reading the environment.
#[derive(Debug, Error)]
pub enum EnvError {
    /// A variable did not parse.
    #[error("invalid {var}={value:?}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}

fn env_or<T: FromStr>(var: &'static str, default: T) -> Result<T, EnvError> {
    match std::env::var(var) {
        Ok(value) => value.parse().map_err(|_| EnvError::Invalid { var, value }),
        Err(_) => Ok(default),
    }
}

fn server_config(default_port: u16) -> Result<ServerConfig, EnvError> {
    let bind: SocketAddr = env_or("RT_BIND", ServerConfig::default().bind_addr)?;
    let port: u16 = env_or("RT_PORT", default_port)?;

    let mut builder = ServerConfigBuilder::new()
        .bind_addr(bind)
        .transport(TransportConfig::builder().listen_port(port).build());
    if std::env::var("RT_LINK_PORT").is_ok() {
        builder = builder.link_port(env_or("RT_LINK_PORT", 0)?);
    }
    Ok(builder.build())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mode: String = env_or("RT_MODE", "server".to_string())?;
    match mode.as_str() {
        "server" => server::run(server_config(7000)?).await,
        "client" => {
            let peer: SocketAddr = env_or("RT_PEER", "127.0.0.1:7000".parse()?)?;
            client::run(server_config(40000)?, peer).await
        }
        other => Err(EnvError::Invalid {
            var: "RT_MODE",
            value: other.to_string(),
        }
        .into()),
    }
}
