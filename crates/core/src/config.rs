use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;
use crate::template::ReloadPolicy;

/// Longest accepted generation deadline (30 days). Larger values are a
/// configuration mistake, not a wish to wait longer.
pub const MAX_GENERATION_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Backend connection and template settings shared by every front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// `host:port` of the ComfyUI server (default: `localhost:8188`).
    pub server_address: String,
    /// Path to the API-format workflow JSON (default: `workflow.json`).
    pub workflow_path: PathBuf,
    /// Whether the workflow file is re-read for every job (default: `false`).
    pub template_reload: ReloadPolicy,
    /// How long to wait for a job to finish (default: 600s). `None` waits forever.
    pub generation_timeout: Option<Duration>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            server_address: "localhost:8188".to_string(),
            workflow_path: PathBuf::from("workflow.json"),
            template_reload: ReloadPolicy::Once,
            generation_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl BackendConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default          |
    /// |---------------------------|------------------|
    /// | `COMFYUI_SERVER_ADDRESS`  | `localhost:8188` |
    /// | `WORKFLOW_PATH`           | `workflow.json`  |
    /// | `TEMPLATE_RELOAD`         | `false`          |
    /// | `GENERATION_TIMEOUT_SECS` | `600` (`0` = no deadline, at most 30 days) |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    ///
    /// Unset variables take their defaults. Malformed booleans, negative or
    /// non-numeric timeouts and timeouts above [`MAX_GENERATION_TIMEOUT`]
    /// are [`CoreError::Validation`] errors.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let defaults = Self::default();

        let server_address = lookup("COMFYUI_SERVER_ADDRESS")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.server_address);

        let workflow_path = lookup("WORKFLOW_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.workflow_path);

        let template_reload = match lookup("TEMPLATE_RELOAD") {
            Some(raw) => {
                if parse_bool("TEMPLATE_RELOAD", &raw)? {
                    ReloadPolicy::PerCall
                } else {
                    ReloadPolicy::Once
                }
            }
            None => defaults.template_reload,
        };

        let generation_timeout = match lookup("GENERATION_TIMEOUT_SECS") {
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    CoreError::Validation(format!(
                        "GENERATION_TIMEOUT_SECS must be a non-negative integer, got '{raw}'"
                    ))
                })?;
                let timeout = Duration::from_secs(secs);
                if timeout > MAX_GENERATION_TIMEOUT {
                    return Err(CoreError::Validation(format!(
                        "GENERATION_TIMEOUT_SECS must be at most {}, got {secs}",
                        MAX_GENERATION_TIMEOUT.as_secs()
                    )));
                }
                (secs > 0).then_some(timeout)
            }
            None => defaults.generation_timeout,
        };

        Ok(Self {
            server_address,
            workflow_path,
            template_reload,
            generation_timeout,
        })
    }

    /// HTTP base URL, e.g. `http://localhost:8188`.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.server_address)
    }

    /// WebSocket base URL, e.g. `ws://localhost:8188`.
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.server_address)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, CoreError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(CoreError::Validation(format!(
            "{key} must be a boolean, got '{raw}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = BackendConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, BackendConfig::default());
        assert_eq!(config.api_url(), "http://localhost:8188");
        assert_eq!(config.ws_url(), "ws://localhost:8188");
    }

    #[test]
    fn overrides_are_applied() {
        let config = BackendConfig::from_lookup(lookup(&[
            ("COMFYUI_SERVER_ADDRESS", "gpu-box:9000"),
            ("WORKFLOW_PATH", "/etc/promptdeck/flow.json"),
            ("TEMPLATE_RELOAD", "true"),
            ("GENERATION_TIMEOUT_SECS", "42"),
        ]))
        .unwrap();

        assert_eq!(config.api_url(), "http://gpu-box:9000");
        assert_eq!(config.workflow_path, PathBuf::from("/etc/promptdeck/flow.json"));
        assert_eq!(config.template_reload, ReloadPolicy::PerCall);
        assert_eq!(config.generation_timeout, Some(Duration::from_secs(42)));
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config =
            BackendConfig::from_lookup(lookup(&[("GENERATION_TIMEOUT_SECS", "0")])).unwrap();
        assert_eq!(config.generation_timeout, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert_matches!(
            BackendConfig::from_lookup(lookup(&[("GENERATION_TIMEOUT_SECS", "soon")])),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            BackendConfig::from_lookup(lookup(&[("TEMPLATE_RELOAD", "maybe")])),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn timeout_is_capped() {
        let max = MAX_GENERATION_TIMEOUT.as_secs().to_string();
        let config = BackendConfig::from_lookup(lookup(&[("GENERATION_TIMEOUT_SECS", max.as_str())])).unwrap();
        assert_eq!(config.generation_timeout, Some(MAX_GENERATION_TIMEOUT));

        let too_long = (MAX_GENERATION_TIMEOUT.as_secs() + 1).to_string();
        assert_matches!(
            BackendConfig::from_lookup(lookup(&[("GENERATION_TIMEOUT_SECS", too_long.as_str())])),
            Err(CoreError::Validation(msg)) if msg.contains("at most")
        );
        assert_matches!(
            BackendConfig::from_lookup(lookup(&[("GENERATION_TIMEOUT_SECS", "18446744073709551615")])),
            Err(CoreError::Validation(_))
        );
    }
}
