use std::env;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use packline_monitor::config::{Endpoint, MonitorConfig, SessionConfig, DEFAULT_DEVICE_PORT};
use packline_monitor::monitor::{self, MonitorEvent};
use packline_monitor::persistence::{ConfigProvider, FixedLimits, JsonlSink, LocalSequenceSource};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cfg = monitor_config_from_env()?;
    let limits = FixedLimits {
        under_limit_grams: env_i64("UNDER_LIMIT_GRAMS", 25025)?,
        over_limit_grams: env_i64("OVER_LIMIT_GRAMS", 25175)?,
    };
    let (under, over) = limits.limits()?;
    let session = SessionConfig::new(
        env_i64("PRODUCTION_ID", 1)?,
        under,
        over,
        cfg.metal.is_some(),
    )?;

    let record_log = env::var("RECORD_LOG").unwrap_or_else(|_| "records.jsonl".to_string());
    let sink = JsonlSink::create(&record_log)?;
    let mut sequence = LocalSequenceSource::starting_at(1);

    info!(
        weigher = %cfg.weigher.addr(),
        metal = ?cfg.metal.as_ref().map(Endpoint::addr),
        record_log = %record_log,
        "starting packaging-line monitor"
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let monitor = monitor::start(cfg, session, Box::new(sink), &mut sequence, events_tx).await?;

    loop {
        tokio::select! {
            event = events_rx.recv() => match event {
                Some(MonitorEvent::Matched(record)) => {
                    info!(
                        sequence = record.sequence_id,
                        grams = record.weight_grams,
                        status = %record.weight_status,
                        metal = record.metal_status,
                        "bag inspected"
                    );
                }
                Some(MonitorEvent::Diagnostic { depths, stats }) => {
                    info!(
                        weigher_queue = depths.weigher,
                        metal_queue = depths.metal,
                        total = stats.total,
                        passed = stats.passed,
                        under = stats.under,
                        over = stats.over,
                        metal = stats.metal,
                        "session status"
                    );
                }
                None => {
                    warn!("monitor event channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    monitor.stop().await;
    Ok(())
}

fn monitor_config_from_env() -> Result<MonitorConfig> {
    let weigher_host =
        env::var("WEIGHER_HOST").context("WEIGHER_HOST is required (weigher device address)")?;
    let weigher = Endpoint::new(weigher_host, env_port("WEIGHER_PORT")?);

    let metal = match env::var("METAL_HOST") {
        Ok(host) if !host.is_empty() => Some(Endpoint::new(host, env_port("METAL_PORT")?)),
        _ => None,
    };

    Ok(MonitorConfig::new(weigher, metal))
}

fn env_port(key: &str) -> Result<u16> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be a port number, got {raw:?}")),
        Err(_) => Ok(DEFAULT_DEVICE_PORT),
    }
}

fn env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{key} must be an integer, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
