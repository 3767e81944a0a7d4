use clap::Parser;
use std::sync::Arc;
use tally::{orchestrator::Orchestrator, pool::WorkerPool};
use tally_server::{
    config::{ClientCliArgs, ClientConfig},
    signal::shutdown_signal,
    telemetry::init_tracing,
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = ClientCliArgs::parse();
    let config = ClientConfig::try_from(args)?;

    init_tracing()?;

    let pool = Arc::new(WorkerPool::new(&config.pool)?);
    let orchestrator = Orchestrator::new(config.orchestrator, Arc::clone(&pool));

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Draining {} from {} with {} workers",
        orchestrator.config().label,
        orchestrator.config().server_addr,
        pool.num_workers()
    );

    let outcome = tokio::select! {
        outcome = orchestrator.run(|_label, _result| {
            #[cfg(feature = "tracing")]
            match _result {
                Ok(output) => tracing::info!("[done] {output}"),
                Err(e) => tracing::error!("[failed] {_label}: {e}"),
            }
        }) => Some(outcome),
        () = shutdown_signal() => None,
    };

    // An interrupted run leaves its session teardown and job callbacks
    // running detached; let them finish before exiting.
    orchestrator.settle().await;
    pool.shutdown().await?;

    match outcome {
        Some(report) => {
            let _report = report?;
            #[cfg(feature = "tracing")]
            tracing::info!(
                "Finished {} jobs for results {:?}",
                _report.outputs.len(),
                _report.results
            );
        }
        None => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Interrupted before all jobs finished");
        }
    }

    Ok(())
}
