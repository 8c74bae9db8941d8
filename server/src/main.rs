use clap::Parser;
use log::info;
use server::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Hint: set RUST_LOG=info (or debug) to see server logs");
    }
    env_logger::init();

    let config = ServerConfig::parse();
    info!(
        "Starting server on {} (TCP {}, UDP {})",
        config.host, config.tcp_port, config.udp_port
    );

    let server = Server::bind(config).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C, shutting down gracefully...");
        })
        .await?;

    Ok(())
}
