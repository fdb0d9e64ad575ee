use simple_socks5::{Config, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut config = Config::default();
    config.username = Some("admin".to_string());
    config.password = Some("admin".to_string());

    let server = Server::bind(config).await?;
    println!("SOCKS5 proxy listening on {}", server.local_addr()?);

    server.run(None).await?;
    Ok(())
}
