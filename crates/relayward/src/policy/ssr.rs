use std::time::Duration;

use relayward_core::config::Settings;
use relayward_core::types::present;
use relayward_core::{ModePolicy, ServerProfile};

use super::PollCadence;
use crate::classify::KeywordSet;

pub const KEYWORDS: KeywordSet = KeywordSet::new(&["listening at"], &["Invalid config path", "usage"]);
pub const CADENCE: PollCadence = PollCadence::new(Duration::from_millis(10), 1000);

const TIMEOUT_SECS: &str = "120";
const BYPASS_ACL: &str = "default.acl";

/// Arguments for the ShadowsocksR local client.
///
/// `-G` only follows `-O`, and `-g` only follows `-o`.
pub fn build_args(server: &ServerProfile, mode: &ModePolicy, settings: &Settings) -> Vec<String> {
	let mut args: Vec<String> = vec![
		"-s".into(),
		server.hostname.clone(),
		"-p".into(),
		server.port.to_string(),
		"-k".into(),
		server.password.clone().unwrap_or_default(),
		"-m".into(),
		server.encrypt_method.clone().unwrap_or_default(),
		"-t".into(),
		TIMEOUT_SECS.into(),
	];

	if let Some(protocol) = present(&server.protocol) {
		args.push("-O".into());
		args.push(protocol.into());
		if let Some(param) = present(&server.protocol_param) {
			args.push("-G".into());
			args.push(param.into());
		}
	}

	if let Some(obfs) = present(&server.obfs) {
		args.push("-o".into());
		args.push(obfs.into());
		if let Some(param) = present(&server.obfs_param) {
			args.push("-g".into());
			args.push(param.into());
		}
	}

	args.extend([
		"-b".into(),
		settings.local_address.clone(),
		"-l".into(),
		settings.socks5_local_port.to_string(),
		"-u".into(),
	]);

	if mode.bypass_china {
		args.push("--acl".into());
		args.push(BYPASS_ACL.into());
	}

	args
}

#[cfg(test)]
mod tests {
	use super::*;
	use relayward_core::ServerKind;

	fn server() -> ServerProfile {
		let mut s = ServerProfile::new(ServerKind::ShadowsocksR, "ssr.example.com", 8388);
		s.password = Some("pass word".into());
		s.encrypt_method = Some("aes-256-cfb".into());
		s
	}

	fn settings() -> Settings {
		Settings::with_base_dir("/opt/relayward")
	}

	fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
		args.iter()
			.position(|a| a == flag)
			.and_then(|i| args.get(i + 1))
			.map(|s| s.as_str())
	}

	#[test]
	fn minimal_server() {
		let args = build_args(&server(), &ModePolicy::default(), &settings());
		let expected: Vec<String> = [
			"-s", "ssr.example.com", "-p", "8388", "-k", "pass word", "-m", "aes-256-cfb", "-t",
			"120", "-b", "127.0.0.1", "-l", "2801", "-u",
		]
		.iter()
		.map(|s| s.to_string())
		.collect();
		assert_eq!(args, expected);
	}

	#[test]
	fn password_with_spaces_stays_one_argument() {
		let args = build_args(&server(), &ModePolicy::default(), &settings());
		assert_eq!(flag_value(&args, "-k"), Some("pass word"));
	}

	#[test]
	fn protocol_param_requires_protocol() {
		let mut s = server();
		s.protocol_param = Some("12345:abc".into());
		let args = build_args(&s, &ModePolicy::default(), &settings());
		assert!(!args.contains(&"-O".to_string()));
		assert!(!args.contains(&"-G".to_string()));

		s.protocol = Some("auth_aes128_md5".into());
		let args = build_args(&s, &ModePolicy::default(), &settings());
		assert_eq!(flag_value(&args, "-O"), Some("auth_aes128_md5"));
		assert_eq!(flag_value(&args, "-G"), Some("12345:abc"));
	}

	#[test]
	fn obfs_param_requires_obfs() {
		let mut s = server();
		s.obfs_param = Some("cdn.example.com".into());
		let args = build_args(&s, &ModePolicy::default(), &settings());
		assert!(!args.contains(&"-g".to_string()));

		s.obfs = Some("http_simple".into());
		let args = build_args(&s, &ModePolicy::default(), &settings());
		assert_eq!(flag_value(&args, "-o"), Some("http_simple"));
		assert_eq!(flag_value(&args, "-g"), Some("cdn.example.com"));
	}

	#[test]
	fn blank_optional_fields_are_omitted() {
		let mut s = server();
		s.protocol = Some(String::new());
		s.obfs = Some("   ".into());
		let args = build_args(&s, &ModePolicy::default(), &settings());
		assert!(!args.contains(&"-O".to_string()));
		assert!(!args.contains(&"-o".to_string()));
	}

	#[test]
	fn bypass_adds_acl() {
		let mode = ModePolicy {
			bypass_china: true,
			..ModePolicy::default()
		};
		let args = build_args(&server(), &mode, &settings());
		assert_eq!(flag_value(&args, "--acl"), Some("default.acl"));
		assert_eq!(args.last().map(|s| s.as_str()), Some("default.acl"));
	}

	#[test]
	fn local_endpoint_follows_settings() {
		let mut st = settings();
		st.local_address = "0.0.0.0".into();
		st.socks5_local_port = 1080;
		let args = build_args(&server(), &ModePolicy::default(), &st);
		assert_eq!(flag_value(&args, "-b"), Some("0.0.0.0"));
		assert_eq!(flag_value(&args, "-l"), Some("1080"));
	}
}
