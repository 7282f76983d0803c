//! Process configuration, resolved once at startup

use std::time::Duration;

use clap::Parser;

/// Command-line and environment configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "roomhub")]
#[command(about = "Real-time collaboration hub for the application builder")]
#[command(version)]
pub struct Config {
    /// Address the HTTP/websocket listener binds to
    #[arg(long, env = "HUB_LISTEN_ADDR", default_value = "0.0.0.0:8000")]
    pub listen: String,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:roomhub.db?mode=rwc")]
    pub database_url: String,

    /// Maximum pooled database connections
    #[arg(long, env = "HUB_DB_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,

    /// Base URL of the token supervisor
    #[arg(long, env = "HUB_SUPERVISOR_URL", default_value = "http://127.0.0.1:9001")]
    pub supervisor_url: String,

    /// Secret shared with the supervisor for request signing
    #[arg(long, env = "HUB_SECRET_KEY", hide_env_values = true)]
    pub secret_key: String,

    /// Age in seconds after which the active snapshot is archived
    #[arg(long, env = "HUB_ARCHIVE_PERIOD_SECS", default_value_t = 300)]
    pub archive_period_secs: u64,
}

impl Config {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            archive_period: Duration::from_secs(self.archive_period_secs),
            ..HubConfig::default()
        }
    }
}

/// Tunables of the dispatcher and its sessions
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each session's outbound queue
    pub outbound_capacity: usize,
    /// Capacity of each dispatcher input channel
    pub inbound_capacity: usize,
    pub ping_interval: Duration,
    pub read_deadline: Duration,
    pub write_deadline: Duration,
    pub archive_period: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 10_240,
            inbound_capacity: 1_024,
            ping_interval: Duration::from_secs(54),
            read_deadline: Duration::from_secs(60),
            write_deadline: Duration::from_secs(60),
            archive_period: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.outbound_capacity, 10_240);
        assert!(config.ping_interval < config.read_deadline);
        assert_eq!(config.archive_period, Duration::from_secs(300));
    }

    #[test]
    fn test_parse_args() {
        let config = Config::try_parse_from([
            "roomhub",
            "--secret-key",
            "s3cret",
            "--archive-period-secs",
            "1",
        ])
        .unwrap();
        assert_eq!(config.listen, "0.0.0.0:8000");
        assert_eq!(config.hub_config().archive_period, Duration::from_secs(1));
        assert_eq!(config.hub_config().outbound_capacity, 10_240);
    }
}
