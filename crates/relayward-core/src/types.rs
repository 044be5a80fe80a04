use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport kind of an upstream server, as written in profile files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerKind {
	Socks5,
	Shadowsocks,
	ShadowsocksR,
	Other(String),
}

impl From<String> for ServerKind {
	fn from(s: String) -> Self {
		match s.as_str() {
			"Socks5" => ServerKind::Socks5,
			"SS" => ServerKind::Shadowsocks,
			"SSR" => ServerKind::ShadowsocksR,
			_ => ServerKind::Other(s),
		}
	}
}

impl From<ServerKind> for String {
	fn from(kind: ServerKind) -> Self {
		match kind {
			ServerKind::Socks5 => "Socks5".into(),
			ServerKind::Shadowsocks => "SS".into(),
			ServerKind::ShadowsocksR => "SSR".into(),
			ServerKind::Other(s) => s,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProfile {
	#[serde(default)]
	pub remark: String,
	#[serde(rename = "type")]
	pub kind: ServerKind,
	pub hostname: String,
	pub port: u16,
	#[serde(default)]
	pub username: Option<String>,
	#[serde(default)]
	pub password: Option<String>,
	#[serde(default)]
	pub encrypt_method: Option<String>,
	#[serde(default)]
	pub protocol: Option<String>,
	#[serde(default)]
	pub protocol_param: Option<String>,
	#[serde(default)]
	pub obfs: Option<String>,
	#[serde(default)]
	pub obfs_param: Option<String>,
}

impl ServerProfile {
	pub fn new(kind: ServerKind, hostname: impl Into<String>, port: u16) -> Self {
		Self {
			remark: String::new(),
			kind,
			hostname: hostname.into(),
			port,
			username: None,
			password: None,
			encrypt_method: None,
			protocol: None,
			protocol_param: None,
			obfs: None,
			obfs_param: None,
		}
	}

	pub fn is_socks5(&self) -> bool {
		self.kind == ServerKind::Socks5
	}
}

/// Treats `None`, `""` and whitespace-only values alike: absent.
pub fn present(value: &Option<String>) -> Option<&str> {
	value.as_deref().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
	#[default]
	Process,
	TunTap,
	SystemProxy,
	Socks5Only,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModePolicy {
	#[serde(default)]
	pub remark: String,
	#[serde(default)]
	pub kind: ModeKind,
	#[serde(default)]
	pub bypass_china: bool,
	/// Process names subject to redirection.
	#[serde(default)]
	pub rule: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ControllerState {
	Waiting = 0,
	Starting = 1,
	Started = 2,
	Stopping = 3,
	Stopped = 4,
	Terminating = 5,
}

impl ControllerState {
	pub fn from_u8(raw: u8) -> Self {
		match raw {
			1 => ControllerState::Starting,
			2 => ControllerState::Started,
			3 => ControllerState::Stopping,
			4 => ControllerState::Stopped,
			5 => ControllerState::Terminating,
			_ => ControllerState::Waiting,
		}
	}

	/// Started or Stopped: either one ends the Starting phase.
	pub fn is_terminal(&self) -> bool {
		matches!(self, ControllerState::Started | ControllerState::Stopped)
	}

	pub fn is_active(&self) -> bool {
		matches!(self, ControllerState::Starting | ControllerState::Started)
	}
}

impl fmt::Display for ControllerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ControllerState::Waiting => "waiting",
			ControllerState::Starting => "starting",
			ControllerState::Started => "started",
			ControllerState::Stopping => "stopping",
			ControllerState::Stopped => "stopped",
			ControllerState::Terminating => "terminating",
		};
		f.write_str(s)
	}
}

/// Cumulative transfer counters reported by the redirector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthSample {
	pub upload: u64,
	pub download: u64,
}
