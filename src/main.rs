use anyhow::{bail, Context};
use glow_meter_bridge::{
    sensor_values, Coordinator, GlowConfig, GlowmarktClient, GlowmarktError, Scheduler, Snapshot,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GlowConfig::from_env()?;
    info!("Starting Glowmarkt bridge for {}", config.username);

    let mut client = GlowmarktClient::from_config(&config);
    match client.connection_check().await {
        Ok(0) => bail!("No metering resources found for {}", config.username),
        Ok(count) => info!("Credentials accepted, {count} resources available"),
        Err(GlowmarktError::Auth(e)) => bail!("Invalid credentials: {e}"),
        Err(GlowmarktError::Api(e)) => bail!("Cannot connect to Glowmarkt: {e}"),
    }

    let mut coordinator = Coordinator::new(client, config.tariff);
    let first = coordinator
        .refresh()
        .await
        .context("Initial refresh failed")?;
    log_snapshot(&first);

    let handle = Scheduler::spawn(coordinator, config.scan_interval, config.timezone);
    let mut snapshots = handle.snapshots();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let latest = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = latest {
                    log_snapshot(&snapshot);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn log_snapshot(snapshot: &Snapshot) {
    match serde_json::to_string(snapshot) {
        Ok(json) => debug!("Snapshot: {json}"),
        Err(e) => warn!("Failed to serialize snapshot: {e}"),
    }
    for sensor in sensor_values(snapshot) {
        match sensor.value {
            Some(value) => info!("{}: {value} {}", sensor.name, sensor.unit),
            None => info!("{}: unknown", sensor.name),
        }
    }
}
