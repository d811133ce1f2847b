#![forbid(unsafe_code)]

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wakewatch_adapter::{
    router, run_control_loop, AdapterClock, AdapterConfig, AdapterState, LogOnlyActuatorSink,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wakewatch=info")),
        )
        .init();

    let config = AdapterConfig::from_env().context("reading WAKEWATCH_* configuration")?;
    let clock = AdapterClock::start();
    let state = AdapterState::start(&config, clock).context("starting session runtime")?;

    tokio::spawn(run_control_loop(
        state.clone(),
        config.tick_ms,
        Box::new(LogOnlyActuatorSink),
    ));

    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    info!(
        addr = %config.bind,
        tick_ms = config.tick_ms,
        vote_duration_ms = config.session.vote.duration_ms,
        grant_ttl_ms = config.session.grant.ttl_ms,
        "wakewatch_http listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("http server")?;

    let stats = state.recorder().summarize();
    info!(
        total_drowsy_events = stats.total_drowsy_events,
        total_wake_ups = stats.total_wake_ups,
        total_shots_fired = stats.total_shots_fired,
        avg_drowsy_duration_secs = stats.avg_drowsy_duration_secs,
        session_duration_secs = stats.session_duration_secs,
        "wakewatch_http stopped"
    );
    Ok(())
}
