//! CLI entry point: reads configuration from the environment, installs a
//! `tracing` subscriber, and runs the server until `SIGINT` or a fatal
//! accept-loop error.

use simple_socks5::{Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    let server = Server::bind(config).await?;
    let registry = server.registry();

    tokio::select! {
        res = server.run(None) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
            registry.close_all().await;
        }
    }

    Ok(())
}
