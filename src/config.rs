//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Application configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "FLOTILLA")]
pub struct FlotillaConfig {
    /// Path to the `ssh` binary used for sessions.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` binary used for file uploads.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Path to the `sshpass` binary used for password authentication.
    #[ortho_config(default = "sshpass".to_owned())]
    pub sshpass_bin: String,
    /// Seconds to wait when establishing a session.
    #[ortho_config(default = 30)]
    pub connect_timeout_secs: u64,
    /// Default per-command timeout in seconds.
    #[ortho_config(default = 30)]
    pub command_timeout_secs: u64,
    /// Remote directory where rendered stack files are placed.
    #[ortho_config(default = "/root".to_owned())]
    pub remote_stack_dir: String,
    /// Name of the overlay network shared by application stacks.
    #[ortho_config(default = "network_swarm_public".to_owned())]
    pub overlay_network: String,
    /// Base URL of the DNS provider REST API.
    #[ortho_config(default = "https://api.cloudflare.com/client/v4".to_owned())]
    pub dns_api_base: String,
}

impl FlotillaConfig {
    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("flotilla")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Session establishment timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Default per-command timeout as a [`Duration`].
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// or a timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(&self.ssh_bin, "ssh binary path", "FLOTILLA_SSH_BIN")?;
        Self::require_field(&self.scp_bin, "scp binary path", "FLOTILLA_SCP_BIN")?;
        Self::require_field(
            &self.remote_stack_dir,
            "remote stack directory",
            "FLOTILLA_REMOTE_STACK_DIR",
        )?;
        Self::require_field(
            &self.overlay_network,
            "overlay network name",
            "FLOTILLA_OVERLAY_NETWORK",
        )?;
        if self.connect_timeout_secs == 0 || self.command_timeout_secs == 0 {
            return Err(ConfigError::MissingField(String::from(
                "timeouts must be greater than zero",
            )));
        }
        Ok(())
    }

    fn require_field(value: &str, description: &str, env_var: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {description}: set {env_var} or add the field to flotilla.toml"
            )));
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> FlotillaConfig {
        FlotillaConfig {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            sshpass_bin: String::from("sshpass"),
            connect_timeout_secs: 30,
            command_timeout_secs: 30,
            remote_stack_dir: String::from("/root"),
            overlay_network: String::from("network_swarm_public"),
            dns_api_base: String::from("https://api.cloudflare.com/client/v4"),
        }
    }

    #[test]
    fn default_config_validates() {
        assert_eq!(default_config().validate(), Ok(()));
    }

    #[test]
    fn empty_network_name_is_rejected() {
        let config = FlotillaConfig {
            overlay_network: String::from("  "),
            ..default_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = FlotillaConfig {
            command_timeout_secs: 0,
            ..default_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn timeouts_convert_to_durations() {
        let config = default_config();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
    }
}
