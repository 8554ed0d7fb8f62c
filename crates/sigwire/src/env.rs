//! Startup settings taken from the environment.
//!
//! A session coordinator that launches a client passes its own URL in
//! `NSM_URL`. That is the only variable read here; command-line parsing
//! is left to the application.

use sigwire_session::SessionConfig;

/// Name of the variable holding the coordinator URL.
pub const COORDINATOR_URL_VAR: &str = "NSM_URL";

/// The coordinator URL from `NSM_URL`, if set and not blank.
pub fn coordinator_url() -> Option<String> {
    coordinator_url_from(|name| std::env::var(name).ok())
}

/// [`coordinator_url`] over an arbitrary lookup, so callers and tests
/// can supply their own environment.
pub fn coordinator_url_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    lookup(COORDINATOR_URL_VAR)
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
}

/// Fills in `config.coordinator_url` from the environment unless it is
/// already set.
pub fn with_env_coordinator(config: SessionConfig) -> SessionConfig {
    with_coordinator_from(config, |name| std::env::var(name).ok())
}

fn with_coordinator_from(mut config: SessionConfig, lookup: impl Fn(&str) -> Option<String>) -> SessionConfig {
    if config.coordinator_url.is_none() {
        config.coordinator_url = coordinator_url_from(lookup);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(url: &'static str) -> impl Fn(&str) -> Option<String> {
        move |name| (name == COORDINATOR_URL_VAR).then(|| url.to_string())
    }

    #[test]
    fn test_coordinator_url_from_reads_nsm_url() {
        let url = coordinator_url_from(env_with("osc.udp://host:15000/"));
        assert_eq!(url.as_deref(), Some("osc.udp://host:15000/"));
    }

    #[test]
    fn test_coordinator_url_from_blank_is_none() {
        assert_eq!(coordinator_url_from(env_with("  ")), None);
        assert_eq!(coordinator_url_from(|_| None), None);
    }

    #[test]
    fn test_with_coordinator_keeps_explicit_url() {
        let config = SessionConfig::new("a", "a").with_coordinator("osc.udp://explicit:1/");
        let config = with_coordinator_from(config, env_with("osc.udp://env:2/"));
        assert_eq!(config.coordinator_url.as_deref(), Some("osc.udp://explicit:1/"));
    }

    #[test]
    fn test_with_coordinator_fills_missing_url() {
        let config = with_coordinator_from(SessionConfig::new("a", "a"), env_with("osc.udp://env:2/"));
        assert_eq!(config.coordinator_url.as_deref(), Some("osc.udp://env:2/"));
    }
}
