use crate::paths::{self, config_dir};
use crate::types::{ModePolicy, ServerProfile};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
	#[serde(default = "default_base_dir")]
	pub base_dir: PathBuf,
	#[serde(default = "default_local_address")]
	pub local_address: String,
	#[serde(default = "default_socks5_port")]
	pub socks5_local_port: u16,
	#[serde(default = "default_redirector_port")]
	pub redirector_tcp_port: u16,
	#[serde(default)]
	pub logs: LogsConfig,
	#[serde(default)]
	pub driver: DriverConfig,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			base_dir: default_base_dir(),
			local_address: default_local_address(),
			socks5_local_port: default_socks5_port(),
			redirector_tcp_port: default_redirector_port(),
			logs: LogsConfig::default(),
			driver: DriverConfig::default(),
		}
	}
}

impl Settings {
	pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
		Self {
			base_dir: base_dir.into(),
			..Self::default()
		}
	}

	pub fn bin_dir(&self) -> PathBuf {
		paths::bin_dir(&self.base_dir)
	}

	pub fn log_dir(&self) -> PathBuf {
		match &self.logs.dir {
			Some(dir) => dir.clone(),
			None => paths::default_log_dir(&self.base_dir),
		}
	}
}

fn default_base_dir() -> PathBuf {
	std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
fn default_local_address() -> String {
	"127.0.0.1".into()
}
fn default_socks5_port() -> u16 {
	2801
}
fn default_redirector_port() -> u16 {
	2800
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
	pub dir: Option<PathBuf>,
	#[serde(default = "default_max_size")]
	pub max_size_bytes: u64,
}

impl Default for LogsConfig {
	fn default() -> Self {
		Self {
			dir: None,
			max_size_bytes: default_max_size(),
		}
	}
}

fn default_max_size() -> u64 {
	10 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
	#[serde(default = "default_service_name")]
	pub service_name: String,
	#[serde(default = "paths::default_driver_path")]
	pub path: PathBuf,
}

impl Default for DriverConfig {
	fn default() -> Self {
		Self {
			service_name: default_service_name(),
			path: paths::default_driver_path(),
		}
	}
}

fn default_service_name() -> String {
	"netfilter2".into()
}

/// A server plus the mode to run it with, as stored in a profile file.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
	pub server: ServerProfile,
	#[serde(default)]
	pub mode: ModePolicy,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {}: {}", .0.display(), .1)]
	Read(PathBuf, #[source] std::io::Error),
	#[error("failed to parse {}: {}", .0.display(), .1)]
	Parse(PathBuf, #[source] toml::de::Error),
}

pub fn settings_path() -> PathBuf {
	config_dir().join("config.toml")
}

pub fn load_settings() -> Settings {
	let path = settings_path();
	if path.exists() {
		match read_toml::<Settings>(&path) {
			Ok(settings) => return settings,
			Err(e) => eprintln!("warning: {}", e),
		}
	}
	Settings::default()
}

pub fn load_profile(path: &Path) -> Result<Profile, ConfigError> {
	read_toml(path)
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
	let content =
		std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
	toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}
