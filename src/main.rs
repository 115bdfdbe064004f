use otel_sla::{CancellationToken, Config, ProcessSampler, init_prometheus, init_tracing, run};
use std::sync::Arc;
use tokio::select;
use tracing::{error, info};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let config = Config::from_env()?;

    // Set up the tracing. Keep the provider so spans are flushed on exit.
    let tracer_provider = init_tracing(&config)?;

    if let Some(port) = config.prometheus_port {
        init_prometheus(port)?;
        info!(port, "serving self-metrics");
    }

    let cancel = CancellationToken::new();
    let sampler = Arc::new(ProcessSampler::new());

    let telemetry = match run(&config, sampler, cancel).await {
        Ok(telemetry) => telemetry,
        Err(err) => {
            error!(%err, "could not start telemetry");
            return Err(err.into());
        }
    };

    info!(
        endpoint = %config.endpoint,
        log_path = %config.log_path.display(),
        "telemetry running"
    );

    let result = telemetry.run_until(shutdown_signal()).await;

    if let Some(provider) = tracer_provider {
        provider.shutdown()?;
    }
    result
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
