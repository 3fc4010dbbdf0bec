//! Environment-driven settings, resolved once at startup.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONTAINER_RUNTIME: &str = "docker";
const DEFAULT_APP_ID: &str = "hostexec";
const DEFAULT_LOG_FILTER: &str = "warn";
const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Per-user runtime directory; holds the sandbox marker and shared launcher state.
    pub runtime_dir: PathBuf,
    /// Container runtime program used by docker-launch.
    pub container_runtime: String,
    /// Application id naming the sandbox-shared state directory.
    pub app_id: String,
    /// How long output forwarders may keep draining after the remote exit.
    pub drain_timeout: Duration,
    /// Terminal type forwarded to the remote command.
    pub term: Option<String>,
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve settings through `lookup`, so callers and tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let runtime_dir = non_empty("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(fallback_runtime_dir);

        let container_runtime = non_empty("HOSTEXEC_CONTAINER_RUNTIME")
            .unwrap_or_else(|| DEFAULT_CONTAINER_RUNTIME.to_string());

        let app_id = non_empty("HOSTEXEC_APP_ID")
            .or_else(|| non_empty("FLATPAK_ID"))
            .unwrap_or_else(|| DEFAULT_APP_ID.to_string());

        let drain_ms = non_empty("HOSTEXEC_DRAIN_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_DRAIN_TIMEOUT_MS);

        // TERM is forwarded verbatim, even when blank.
        let term = lookup("TERM");

        let log_filter =
            non_empty("HOSTEXEC_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Config {
            runtime_dir,
            container_runtime,
            app_id,
            drain_timeout: Duration::from_millis(drain_ms),
            term,
            log_filter,
        }
    }
}

fn fallback_runtime_dir() -> PathBuf {
    home::home_dir()
        .map(|h| h.join(".cache"))
        .unwrap_or_else(env::temp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let cfg = Config::from_lookup(lookup_from(&[("XDG_RUNTIME_DIR", "/run/user/1000")]));
        assert_eq!(cfg.runtime_dir, PathBuf::from("/run/user/1000"));
        assert_eq!(cfg.container_runtime, "docker");
        assert_eq!(cfg.app_id, "hostexec");
        assert_eq!(cfg.drain_timeout, Duration::from_millis(500));
        assert_eq!(cfg.term, None);
        assert_eq!(cfg.log_filter, "warn");
    }

    #[test]
    fn test_overrides_and_precedence() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("XDG_RUNTIME_DIR", "/run/user/42"),
            ("HOSTEXEC_CONTAINER_RUNTIME", "podman"),
            ("HOSTEXEC_APP_ID", "org.example.App"),
            ("FLATPAK_ID", "org.example.Ignored"),
            ("HOSTEXEC_DRAIN_TIMEOUT_MS", "25"),
            ("TERM", "xterm-256color"),
            ("HOSTEXEC_LOG", "hostexec=debug"),
        ]));
        assert_eq!(cfg.container_runtime, "podman");
        assert_eq!(cfg.app_id, "org.example.App");
        assert_eq!(cfg.drain_timeout, Duration::from_millis(25));
        assert_eq!(cfg.term.as_deref(), Some("xterm-256color"));
        assert_eq!(cfg.log_filter, "hostexec=debug");
    }

    #[test]
    fn test_flatpak_id_used_when_no_explicit_app_id() {
        let cfg = Config::from_lookup(lookup_from(&[("FLATPAK_ID", "org.gnome.Builder")]));
        assert_eq!(cfg.app_id, "org.gnome.Builder");
    }

    #[test]
    fn test_bad_drain_timeout_falls_back() {
        let cfg = Config::from_lookup(lookup_from(&[("HOSTEXEC_DRAIN_TIMEOUT_MS", "soon")]));
        assert_eq!(cfg.drain_timeout, Duration::from_millis(500));
    }
}
