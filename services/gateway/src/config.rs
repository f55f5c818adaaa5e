use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024;
const DEFAULT_MAX_QUEUE_LEN: usize = 100;
const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

// Gateway configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    // Route prefix the queue endpoints are nested under.
    pub route_prefix: String,
    // Root directory holding one subdirectory per domain.
    pub storage_root: PathBuf,
    pub max_message_bytes: usize,
    pub max_queue_len: usize,
    // How long a long-poll read stays parked before a no-content reply.
    pub connection_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct GatewayConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    route_prefix: Option<String>,
    storage_root: Option<PathBuf>,
    max_message_bytes: Option<usize>,
    max_queue_len: Option<usize>,
    connection_timeout_ms: Option<u64>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("POSTBOX_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse POSTBOX_BIND")?;
        let metrics_bind = std::env::var("POSTBOX_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse POSTBOX_METRICS_BIND")?;
        let route_prefix =
            std::env::var("POSTBOX_ROUTE_PREFIX").unwrap_or_else(|_| "/mq".to_string());
        let storage_root = std::env::var("POSTBOX_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("external-volume/mqs"));
        let max_message_bytes = std::env::var("POSTBOX_MAX_MESSAGE_BYTES")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_MESSAGE_BYTES);
        let max_queue_len = std::env::var("POSTBOX_MAX_QUEUE_LEN")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_QUEUE_LEN);
        let connection_timeout_ms = std::env::var("POSTBOX_CONNECTION_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_MS);
        Ok(Self {
            bind_addr,
            metrics_bind,
            route_prefix,
            storage_root,
            max_message_bytes,
            max_queue_len,
            connection_timeout_ms,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("POSTBOX_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read POSTBOX_CONFIG: {path}"))?;
            let override_cfg: GatewayConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse gateway config yaml")?;
            if let Some(value) = override_cfg.bind_addr {
                config.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.route_prefix {
                config.route_prefix = value;
            }
            if let Some(value) = override_cfg.storage_root {
                config.storage_root = value;
            }
            if let Some(value) = override_cfg.max_message_bytes {
                config.max_message_bytes = value;
            }
            if let Some(value) = override_cfg.max_queue_len {
                config.max_queue_len = value;
            }
            if let Some(value) = override_cfg.connection_timeout_ms {
                config.connection_timeout_ms = value;
            }
        }
        Ok(config)
    }
}
