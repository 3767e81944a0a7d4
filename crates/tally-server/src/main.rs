use clap::Parser;
use tally::server::CounterService;
use tally_server::{
    config::{ServerCliArgs, ServerConfig},
    signal::shutdown_signal,
    telemetry::init_tracing,
};
use tokio::net::TcpListener;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = ServerCliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_tracing()?;

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&listener.local_addr()?.to_string(), &config);

    let service = CounterService::new(config.service)?;
    let server = {
        let service = service.clone();
        tokio::spawn(async move { service.serve(listener).await })
    };

    shutdown_signal().await;

    #[cfg(feature = "tracing")]
    tracing::info!("Shutdown signal received, terminating gracefully...");

    service.shutdown();
    server.await?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Service shut down successfully with {} labels tracked",
        service.table().len()
    );
    Ok(())
}

fn log_startup_info(_addr: &str, _config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting counter service on {} with full config: {:#?}",
            _addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting counter service on {} (reset after {})",
            _addr,
            _config.service.reset_threshold
        );
    }
}
