use crate::ui;
use anyhow::Result;
use colored::Colorize;
use statline_server::{
    router, AppState, CommitScheduler, Environments, MemoryStore, TracingAlertSink,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// How far back the in-memory store keeps committed aggregates.
const AGGREGATE_HISTORY: Duration = Duration::from_secs(3600);

pub async fn execute(config_file: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let mut config = super::load_config(config_file).await?.server;
    if let Some(bind) = bind {
        config.bind = bind;
    }
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    ui::print_header("Statline Server");
    println!("  Bind: {}", config.bind.green());
    println!("  Retention: {:?}", config.retention_period);
    println!("  Commit every: {:?}", config.commit_period);
    println!("  Sweep every: {:?}", config.sweep_interval);

    let config = Arc::new(config);
    let environments = Arc::new(Environments::new(
        config.clone(),
        Arc::new(MemoryStore::with_history(AGGREGATE_HISTORY)),
    ));

    let cancel = CancellationToken::new();
    let scheduler = CommitScheduler::new(
        environments.clone(),
        Arc::new(TracingAlertSink),
        config.commit_period,
        config.sweep_interval,
    )
    .spawn(cancel.clone());

    let app = router(AppState::new(environments, config.clone()));
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    cancel.cancel();
    scheduler.await?;

    ui::print_success("Server stopped");
    Ok(())
}
