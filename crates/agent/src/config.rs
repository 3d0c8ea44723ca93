//! Daemon configuration

use anyhow::{bail, Context, Result};
use pulse_lib::probe::{
    EchoTarget, StatsSource, UdpEchoConfig, UdpEchoSource, UnavailableSource,
    DEFAULT_REPLY_TIMEOUT,
};
use pulse_lib::session::SessionConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Where live samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// UDP echo against an in-process responder
    Loopback,
    /// UDP echo against `echo_target`
    Remote,
    /// No live source, always simulate
    Simulated,
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    /// Name attached to structured log events
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// HTTP port for snapshot, control, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Tick interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Rolling history capacity
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default = "default_probe_mode")]
    pub probe_mode: ProbeMode,

    /// `host:port` of a UDP echo service, required for `remote`
    #[serde(default)]
    pub echo_target: Option<String>,

    /// How long to wait for each UDP echo, in milliseconds
    #[serde(default = "default_echo_timeout")]
    pub echo_timeout_ms: u64,

    /// Start a session as soon as the daemon is up
    #[serde(default = "default_autostart")]
    pub autostart: bool,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_history_capacity() -> usize {
    pulse_lib::history::MAX_POINTS
}

fn default_echo_timeout() -> u64 {
    DEFAULT_REPLY_TIMEOUT.as_millis() as u64
}

fn default_probe_mode() -> ProbeMode {
    ProbeMode::Loopback
}

fn default_autostart() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: default_api_port(),
            poll_interval_ms: default_poll_interval(),
            history_capacity: default_history_capacity(),
            probe_mode: default_probe_mode(),
            echo_target: None,
            echo_timeout_ms: default_echo_timeout(),
            autostart: default_autostart(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `netpulse.toml` (optional) and `PULSE_*` variables
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("netpulse.toml"))
    }

    /// Load configuration from a specific file, overridden by the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("PULSE").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.echo_timeout_ms == 0 {
            bail!("echo_timeout_ms must be greater than zero");
        }
        if self.probe_mode == ProbeMode::Remote && self.echo_target.is_none() {
            bail!("probe_mode = remote requires echo_target");
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            history_capacity: self.history_capacity,
            ..SessionConfig::default()
        }
    }

    /// Echo settings sized so a burst fits in one poll interval
    pub fn echo_config(&self, target: EchoTarget) -> UdpEchoConfig {
        UdpEchoConfig {
            target,
            reply_timeout: Duration::from_millis(self.echo_timeout_ms),
            ..UdpEchoConfig::default()
        }
        .fit_to_interval(Duration::from_millis(self.poll_interval_ms))
    }

    /// Build the live statistics source for the configured mode
    pub async fn stats_source(&self) -> Result<Arc<dyn StatsSource>> {
        let source: Arc<dyn StatsSource> = match self.probe_mode {
            ProbeMode::Loopback => {
                Arc::new(UdpEchoSource::new(self.echo_config(EchoTarget::Loopback)))
            }
            ProbeMode::Remote => {
                let target = self.echo_target.as_deref().unwrap_or_default();
                let addr = resolve(target).await?;
                Arc::new(UdpEchoSource::new(self.echo_config(EchoTarget::Remote(addr))))
            }
            ProbeMode::Simulated => Arc::new(UnavailableSource),
        };
        Ok(source)
    }
}

async fn resolve(target: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(target)
        .await
        .with_context(|| format!("Failed to resolve echo target {target}"))?
        .next()
        .with_context(|| format!("Echo target {target} has no addresses"))
}
