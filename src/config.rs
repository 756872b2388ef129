//! Service configuration (C6). `serde` + `toml` + `Default`, following the
//! layered config-struct style of `config.rs` with fields replaced by the
//! broker's own.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_ENDPOINT: &str = "127.0.0.1:48200";
const ENDPOINT_ENV_VAR: &str = "AKVCAM_SERVICE_ENDPOINT";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
	/// Local endpoint the control protocol listens on (§6).
	#[serde(default = "default_endpoint")]
	pub service_endpoint: String,

	/// Where the device/format/control registry is persisted.
	#[serde(default = "default_preferences_path")]
	pub preferences_path: PathBuf,

	/// Default picture overlay shown to listeners of an idle device.
	#[serde(default)]
	pub picture_path: Option<PathBuf>,

	/// Seconds a device may sit idle (no broadcaster, no listeners) before
	/// its runtime state is torn down.
	#[serde(default = "default_idle_timeout_secs")]
	pub idle_timeout_secs: u64,

	/// Interval between `Ping` requests sent to each connected peer.
	#[serde(default = "default_ping_interval_secs")]
	pub ping_interval_secs: u64,

	/// Consecutive missed pings (N≥2) before a peer is declared dead.
	#[serde(default = "default_ping_missed_threshold")]
	pub ping_missed_threshold: u32,
}

fn default_endpoint() -> String {
	DEFAULT_ENDPOINT.to_string()
}

fn default_preferences_path() -> PathBuf {
	dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("akvcam").join("prefs.ini")
}

fn default_idle_timeout_secs() -> u64 {
	300
}

fn default_ping_interval_secs() -> u64 {
	5
}

fn default_ping_missed_threshold() -> u32 {
	3
}

impl Config {
	pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
		let text = std::fs::read_to_string(path)?;
		toml::from_str(&text).map_err(|e| Error::InvalidArgument(format!("invalid configuration: {e}")))
	}

	/// Resolves the effective endpoint: `AKVCAM_SERVICE_ENDPOINT` overrides
	/// the configured value, per §6.
	pub fn effective_endpoint(&self) -> String {
		std::env::var(ENDPOINT_ENV_VAR).unwrap_or_else(|_| self.service_endpoint.clone())
	}
}

impl Default for Config {
	fn default() -> Self {
		Self {
			service_endpoint: default_endpoint(),
			preferences_path: default_preferences_path(),
			picture_path: None,
			idle_timeout_secs: default_idle_timeout_secs(),
			ping_interval_secs: default_ping_interval_secs(),
			ping_missed_threshold: default_ping_missed_threshold(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let config = Config::default();
		assert_eq!(config.service_endpoint, DEFAULT_ENDPOINT);
		assert!(config.ping_missed_threshold >= 2);
	}

	#[test]
	fn env_var_overrides_configured_endpoint() {
		let config = Config { service_endpoint: "127.0.0.1:1".to_string(), ..Config::default() };
		unsafe {
			std::env::set_var(ENDPOINT_ENV_VAR, "127.0.0.1:9999");
		}
		assert_eq!(config.effective_endpoint(), "127.0.0.1:9999");
		unsafe {
			std::env::remove_var(ENDPOINT_ENV_VAR);
		}
	}

	#[test]
	fn reads_partial_toml_with_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(&path, "service_endpoint = \"127.0.0.1:9001\"\n").unwrap();
		let config = Config::read_from_file(&path).unwrap();
		assert_eq!(config.service_endpoint, "127.0.0.1:9001");
		assert_eq!(config.idle_timeout_secs, 300);
	}
}
