//! Relay configuration: an optional JSON file with command line overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clicker_flow::Participant;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cli::Cli;
use crate::error::{RelayError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
	pub host: String,
	pub port: u16,
	pub device: DeviceConfig,
	/// Interval between batched participant updates.
	pub flush_interval_ms: u64,
	/// Treat instructor presses as navigation commands instead of votes.
	pub instructor_control: bool,
	/// App assembled for each new session.
	pub app: String,
	/// Merged over the app's default config.
	pub app_config: Map<String, Value>,
	/// Exercise logs go here; without it they are only traced.
	pub log_dir: Option<PathBuf>,
	/// Roster handed out when an app takes attendance.
	pub roster: Vec<Participant>,
	/// `tracing` filter directives; replaces the `-v` presets.
	pub log_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceConfig {
	pub host: String,
	pub port: u16,
	pub ping_interval_ms: u64,
	pub reconnect_interval_ms: u64,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".into(),
			port: 8080,
			device: DeviceConfig::default(),
			flush_interval_ms: 150,
			instructor_control: true,
			app: "pd".into(),
			app_config: Map::new(),
			log_dir: None,
			roster: Vec::new(),
			log_filter: None,
		}
	}
}

impl Default for DeviceConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".into(),
			port: 4444,
			ping_interval_ms: 5_000,
			reconnect_interval_ms: 5_000,
		}
	}
}

impl DeviceConfig {
	pub fn ping_interval(&self) -> Duration {
		Duration::from_millis(self.ping_interval_ms)
	}

	pub fn reconnect_interval(&self) -> Duration {
		Duration::from_millis(self.reconnect_interval_ms)
	}
}

impl RelayConfig {
	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|source| RelayError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		let config: Self = serde_json::from_str(&text).map_err(|source| RelayError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})?;
		config.validate()?;
		Ok(config)
	}

	/// Rejects values the relay cannot run with.
	pub fn validate(&self) -> Result<()> {
		let intervals = [
			("flushIntervalMs", self.flush_interval_ms),
			("device.pingIntervalMs", self.device.ping_interval_ms),
			("device.reconnectIntervalMs", self.device.reconnect_interval_ms),
		];
		for (field, value) in intervals {
			if value == 0 {
				return Err(RelayError::InvalidConfig(format!("{field} must be greater than zero")));
			}
		}
		Ok(())
	}

	/// File values (or defaults) with command line flags applied on top.
	pub fn from_cli(cli: &Cli) -> Result<Self> {
		let mut config = match &cli.config {
			Some(path) => Self::load(path)?,
			None => Self::default(),
		};
		config.apply_cli(cli);
		config.validate()?;
		Ok(config)
	}

	pub fn apply_cli(&mut self, cli: &Cli) {
		if let Some(host) = &cli.host {
			self.host = host.clone();
		}
		if let Some(port) = cli.port {
			self.port = port;
		}
		if let Some(host) = &cli.device_host {
			self.device.host = host.clone();
		}
		if let Some(port) = cli.device_port {
			self.device.port = port;
		}
		if let Some(app) = &cli.app {
			self.app = app.clone();
		}
		if let Some(dir) = &cli.log_dir {
			self.log_dir = Some(dir.clone());
		}
		if let Some(filter) = &cli.log_filter {
			self.log_filter = Some(filter.clone());
		}
	}

	pub fn flush_interval(&self) -> Duration {
		Duration::from_millis(self.flush_interval_ms)
	}
}
