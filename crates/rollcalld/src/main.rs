use anyhow::Result;
use rollcall_store::Roster;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::Config;
use dbus_interface::TrackerService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env();
    tracing::info!(
        ledger = %config.ledger_path.display(),
        roster = %config.roster_path.display(),
        debounce_secs = config.debounce_secs,
        match_tolerance = config.match_tolerance,
        "configuration loaded"
    );

    let roster = Roster::load(&config.roster_path)?;
    tracing::info!(people = roster.len(), "roster loaded");

    let engine = engine::spawn_engine(&config.ledger_path, config.debounce())?;

    let service = TrackerService::new(
        engine,
        roster,
        config.match_tolerance,
        config.enroll_samples,
    );

    let _conn = zbus::connection::Builder::session()?
        .name("org.rollcall.Tracker1")?
        .serve_at("/org/rollcall/Tracker1", service)?
        .build()
        .await?;

    tracing::info!("rollcalld ready on org.rollcall.Tracker1");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
