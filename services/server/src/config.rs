use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub pki_path: PathBuf,
    pub queue_capacity: usize,
    pub cosign_timeout: Duration,
    /// How long `GET /commitments/next/:n` waits before answering 204.
    pub poll_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let pki_path = PathBuf::from(get("BVERIFY_PKI")?);
        let bind_addr =
            std::env::var("BVERIFY_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
        let data_dir = PathBuf::from(
            std::env::var("BVERIFY_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
        );
        let queue_capacity = parse_or("BVERIFY_QUEUE_CAPACITY", 64)?;
        let cosign_timeout = Duration::from_secs(parse_or("BVERIFY_COSIGN_TIMEOUT_SECS", 30)?);
        let poll_timeout = Duration::from_secs(parse_or("BVERIFY_POLL_TIMEOUT_SECS", 25)?);

        if queue_capacity == 0 {
            bail!("BVERIFY_QUEUE_CAPACITY must be at least 1");
        }
        if cosign_timeout.is_zero() {
            bail!("BVERIFY_COSIGN_TIMEOUT_SECS must be at least 1");
        }
        if poll_timeout.is_zero() {
            bail!("BVERIFY_POLL_TIMEOUT_SECS must be at least 1");
        }

        Ok(Self {
            bind_addr,
            data_dir,
            pki_path,
            queue_capacity,
            cosign_timeout,
            poll_timeout,
        })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("ledger.snapshot")
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("Invalid value for {key}: {v}")),
        Err(_) => Ok(default),
    }
}
