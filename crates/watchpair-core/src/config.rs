use std::time::Duration;

use tracing::warn;

use crate::room::DEFAULT_ROOM_ID_MAX_LEN;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "movie-sync";
pub const DEFAULT_ECHO_GUARD_MS: u64 = 500;
pub const DEFAULT_SEEK_STEP_SECS: f64 = 10.0;

/// Tunables shared by the negotiator and the playback synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub ice_servers: Vec<String>,
    pub data_channel_label: String,
    /// How long inbound remote mutations suppress local re-emission.
    pub echo_guard_window: Duration,
    /// Step used by the relative seek shortcuts.
    pub seek_step_secs: f64,
    pub room_id_max_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            echo_guard_window: Duration::from_millis(DEFAULT_ECHO_GUARD_MS),
            seek_step_secs: DEFAULT_SEEK_STEP_SECS,
            room_id_max_len: DEFAULT_ROOM_ID_MAX_LEN,
        }
    }
}

impl SessionConfig {
    /// Reads the `WATCHPAIR_*` variables, keeping defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let ice_servers = lookup("WATCHPAIR_ICE_SERVERS")
            .map(|raw| parse_ice_servers(&raw))
            .unwrap_or(defaults.ice_servers);
        let data_channel_label = parse_var(&lookup, "WATCHPAIR_DATA_CHANNEL_LABEL", |value| {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        })
        .unwrap_or(defaults.data_channel_label);
        let echo_guard_window = parse_var(&lookup, "WATCHPAIR_ECHO_GUARD_MS", |value| {
            value.trim().parse().ok().map(Duration::from_millis)
        })
        .unwrap_or(defaults.echo_guard_window);
        let seek_step_secs = parse_var(&lookup, "WATCHPAIR_SEEK_STEP_SECS", |value| {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v > 0.0)
        })
        .unwrap_or(defaults.seek_step_secs);
        let room_id_max_len = parse_var(&lookup, "WATCHPAIR_ROOM_ID_MAX_LEN", |value| {
            value.trim().parse::<usize>().ok().filter(|v| *v > 0)
        })
        .unwrap_or(defaults.room_id_max_len);
        Self {
            ice_servers,
            data_channel_label,
            echo_guard_window,
            seek_step_secs,
            room_id_max_len,
        }
    }

    pub fn with_echo_guard_window(mut self, window: Duration) -> Self {
        self.echo_guard_window = window;
        self
    }

    /// Host-candidates only; handy for same-machine sessions.
    pub fn localhost(mut self) -> Self {
        self.ice_servers.clear();
        self
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Option<T> {
    let value = lookup(var)?;
    let parsed = parse(&value);
    if parsed.is_none() {
        warn!(var, value = %value, "ignoring invalid value");
    }
    parsed
}

/// Splits a comma separated server list. An empty string means "no servers".
pub fn parse_ice_servers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.ice_servers, vec![DEFAULT_STUN_SERVER.to_string()]);
        assert_eq!(cfg.data_channel_label, "movie-sync");
        assert_eq!(cfg.echo_guard_window, Duration::from_millis(500));
        assert_eq!(cfg.room_id_max_len, 32);
    }

    #[test]
    fn parses_ice_server_lists() {
        assert_eq!(
            parse_ice_servers(" stun:a:1 ,, turn:b:2"),
            vec!["stun:a:1".to_string(), "turn:b:2".to_string()]
        );
        assert!(parse_ice_servers("").is_empty());
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn environment_overrides_defaults() {
        let cfg = SessionConfig::from_lookup(lookup(&[
            ("WATCHPAIR_ICE_SERVERS", "stun:a:1,turn:b:2"),
            ("WATCHPAIR_DATA_CHANNEL_LABEL", "sync"),
            ("WATCHPAIR_ECHO_GUARD_MS", "250"),
            ("WATCHPAIR_SEEK_STEP_SECS", "5.5"),
            ("WATCHPAIR_ROOM_ID_MAX_LEN", "12"),
        ]));
        assert_eq!(cfg.ice_servers, vec!["stun:a:1", "turn:b:2"]);
        assert_eq!(cfg.data_channel_label, "sync");
        assert_eq!(cfg.echo_guard_window, Duration::from_millis(250));
        assert_eq!(cfg.seek_step_secs, 5.5);
        assert_eq!(cfg.room_id_max_len, 12);
    }

    #[test]
    fn invalid_environment_values_keep_defaults() {
        let cfg = SessionConfig::from_lookup(lookup(&[
            ("WATCHPAIR_DATA_CHANNEL_LABEL", "  "),
            ("WATCHPAIR_ECHO_GUARD_MS", "soon"),
            ("WATCHPAIR_SEEK_STEP_SECS", "-3"),
            ("WATCHPAIR_ROOM_ID_MAX_LEN", "0"),
        ]));
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn localhost_drops_ice_servers() {
        assert!(SessionConfig::default().localhost().ice_servers.is_empty());
    }
}
