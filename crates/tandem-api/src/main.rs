//! `tandem-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use tandem_api::config::Config;
use tandem_api::server::Server;
use tandem_core::observability::{LogFormat, init_logging};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    init_logging(choose_log_format(&config));

    tracing::warn!(
        "call records live in an in-memory store; a restart loses them and webhooks for \
         in-flight calls will no longer match"
    );

    let server = Server::new(config);
    server.serve().await?;
    Ok(())
}
