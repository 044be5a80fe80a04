//! Per-backend policy: what to run, how to recognise readiness, how long to
//! wait. Each backend is a variant of [`BackendKind`]; the supervisor only ever
//! sees the plain [`BackendPolicy`] value it produces.

pub mod redirector;
pub mod ssr;

use std::time::Duration;

use crate::classify::KeywordSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
	ShadowsocksR,
	Redirector,
}

/// How often and how many times `launch` checks for a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollCadence {
	pub interval: Duration,
	pub attempts: u32,
}

impl PollCadence {
	pub const fn new(interval: Duration, attempts: u32) -> Self {
		Self { interval, attempts }
	}

	pub fn budget(&self) -> Duration {
		self.interval * self.attempts
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPolicy {
	/// Controller name; also names the output log file.
	pub name: String,
	/// Executable inside the `bin` directory.
	pub main_file: String,
	pub keywords: KeywordSet,
	pub cadence: PollCadence,
	/// Parse bandwidth telemetry once started.
	pub telemetry: bool,
}

impl BackendPolicy {
	pub fn with_cadence(mut self, cadence: PollCadence) -> Self {
		self.cadence = cadence;
		self
	}

	pub fn with_main_file(mut self, main_file: impl Into<String>) -> Self {
		self.main_file = main_file.into();
		self
	}
}

impl BackendKind {
	pub fn policy(self) -> BackendPolicy {
		match self {
			BackendKind::ShadowsocksR => BackendPolicy {
				name: "ShadowsocksR".into(),
				main_file: executable("ShadowsocksR"),
				keywords: ssr::KEYWORDS,
				cadence: ssr::CADENCE,
				telemetry: false,
			},
			BackendKind::Redirector => BackendPolicy {
				name: "redirector".into(),
				main_file: executable("Redirector"),
				keywords: redirector::KEYWORDS,
				cadence: redirector::CADENCE,
				telemetry: true,
			},
		}
	}

	pub fn from_name(name: &str) -> Option<Self> {
		match name.to_ascii_lowercase().as_str() {
			"ssr" | "shadowsocksr" => Some(BackendKind::ShadowsocksR),
			"redirector" | "nf" => Some(BackendKind::Redirector),
			_ => None,
		}
	}
}

fn executable(stem: &str) -> String {
	format!("{}{}", stem, std::env::consts::EXE_SUFFIX)
}

/// Renders an argument list as one loggable command line, quoting values that
/// contain whitespace or quotes.
pub fn render_args(args: &[String]) -> String {
	args.iter()
		.map(|arg| quote(arg))
		.collect::<Vec<_>>()
		.join(" ")
}

fn quote(arg: &str) -> String {
	if arg.is_empty() {
		return "\"\"".into();
	}
	if !arg.chars().any(|c| c.is_whitespace() || c == '"') {
		return arg.to_string();
	}
	format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cadence_budgets_are_ten_seconds() {
		assert_eq!(
			BackendKind::ShadowsocksR.policy().cadence.budget(),
			Duration::from_secs(10)
		);
		assert_eq!(
			BackendKind::Redirector.policy().cadence.budget(),
			Duration::from_secs(10)
		);
	}

	#[test]
	fn only_redirector_parses_telemetry() {
		assert!(!BackendKind::ShadowsocksR.policy().telemetry);
		assert!(BackendKind::Redirector.policy().telemetry);
	}

	#[test]
	fn kind_from_cli_names() {
		assert_eq!(BackendKind::from_name("SSR"), Some(BackendKind::ShadowsocksR));
		assert_eq!(BackendKind::from_name("redirector"), Some(BackendKind::Redirector));
		assert_eq!(BackendKind::from_name("v2ray"), None);
	}

	#[test]
	fn render_quotes_only_when_needed() {
		let args: Vec<String> = ["-k", "pass word", "-m", "aes-256-cfb", "-G", "say \"hi\"", ""]
			.iter()
			.map(|s| s.to_string())
			.collect();
		assert_eq!(
			render_args(&args),
			r#"-k "pass word" -m aes-256-cfb -G "say \"hi\"" """#
		);
	}
}
