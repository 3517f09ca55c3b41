//! Environment-driven kernel configuration
//!
//! Every setting has a documented default; a set-but-unparseable value is
//! a startup error rather than a silent fallback.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 30;
const DEFAULT_FUND_INTERVAL_SECS: u64 = 60;
const DEFAULT_COLLECTION_INTERVAL_SECS: u64 = 10;
const DEFAULT_DAILY_BUDGET: f64 = 50.0;
const DEFAULT_MONTHLY_BUDGET: f64 = 1500.0;
const DEFAULT_LOCK_FILE: &str = "data/doomsday.lock";

/// Settings the binary assembles the construction graph from
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Redis URL; absent means in-memory degradation
    pub redis_url: Option<String>,
    pub metrics_port: u16,
    pub health_interval: Duration,
    pub fund_interval: Duration,
    pub collection_interval: Duration,
    pub daily_budget: f64,
    pub monthly_budget: f64,
    pub lock_file_path: PathBuf,
    /// TCP ports probed each health pass
    pub probe_ports: Vec<u16>,
}

impl KernelConfig {
    /// Read the `SENTINEL_*` environment
    pub fn from_env() -> Result<Self> {
        let redis_url = match std::env::var("SENTINEL_REDIS_URL") {
            Ok(url) if !url.is_empty() => Some(url),
            _ => {
                warn!("SENTINEL_REDIS_URL not set, running without a durable KV");
                None
            }
        };

        Ok(Self {
            redis_url,
            metrics_port: parse_env("SENTINEL_METRICS_PORT", DEFAULT_METRICS_PORT)?,
            health_interval: Duration::from_secs(parse_env(
                "SENTINEL_HEALTH_INTERVAL_SECS",
                DEFAULT_HEALTH_INTERVAL_SECS,
            )?),
            fund_interval: Duration::from_secs(parse_env(
                "SENTINEL_FUND_INTERVAL_SECS",
                DEFAULT_FUND_INTERVAL_SECS,
            )?),
            collection_interval: Duration::from_secs(parse_env(
                "SENTINEL_COLLECTION_INTERVAL_SECS",
                DEFAULT_COLLECTION_INTERVAL_SECS,
            )?),
            daily_budget: parse_env("SENTINEL_DAILY_BUDGET", DEFAULT_DAILY_BUDGET)?,
            monthly_budget: parse_env("SENTINEL_MONTHLY_BUDGET", DEFAULT_MONTHLY_BUDGET)?,
            lock_file_path: PathBuf::from(
                std::env::var("SENTINEL_LOCK_FILE").unwrap_or_else(|_| DEFAULT_LOCK_FILE.to_string()),
            ),
            probe_ports: parse_ports("SENTINEL_PROBE_PORTS", &[8501, 8502])?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().with_context(|| format!("invalid {name}: {raw}")),
        Err(_) => Ok(default),
    }
}

fn parse_ports(name: &str, default: &[u16]) -> Result<Vec<u16>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(|part| {
                part.trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid port in {name}: {part}"))
            })
            .collect(),
        Err(_) => Ok(default.to_vec()),
    }
}
