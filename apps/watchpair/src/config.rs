use std::time::Duration;

use watchpair_core::SessionConfig;
use watchpair_core::config::parse_ice_servers;

use crate::cli::{Cli, PeerBackend};

pub const DEFAULT_LOG_FILTER: &str = "info,watchpair=debug,watchpair_core=debug";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub room: String,
    pub source: Option<String>,
    pub backend: PeerBackend,
    pub connect_timeout: Duration,
    pub log_filter: String,
}

impl AppConfig {
    /// Environment first, then command line flags on top.
    pub fn from_cli(cli: Cli) -> Self {
        let mut session = SessionConfig::from_env();
        if let Some(raw) = cli.ice_servers.as_deref() {
            session.ice_servers = parse_ice_servers(raw);
        }
        if let Some(ms) = cli.echo_guard_ms {
            session.echo_guard_window = Duration::from_millis(ms);
        }
        if let Some(step) = cli.seek_step.filter(|step| step.is_finite() && *step > 0.0) {
            session.seek_step_secs = step;
        }
        Self {
            session,
            room: cli.room,
            source: cli.source,
            backend: cli.backend,
            connect_timeout: Duration::from_secs(cli.connect_timeout),
            log_filter: cli.log_filter,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn flags_override_session_defaults() {
        let cli = Cli::parse_from([
            "watchpair",
            "--room",
            "friday",
            "--ice-servers",
            "",
            "--echo-guard-ms",
            "250",
            "--seek-step=-3",
            "--backend",
            "mock",
        ]);
        let cfg = AppConfig::from_cli(cli);
        assert_eq!(cfg.room, "friday");
        assert!(cfg.session.ice_servers.is_empty());
        assert_eq!(cfg.session.echo_guard_window, Duration::from_millis(250));
        assert!(cfg.session.seek_step_secs > 0.0);
        assert_eq!(cfg.backend, PeerBackend::Mock);
    }
}
