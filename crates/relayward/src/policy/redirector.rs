use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use relayward_core::config::Settings;
use relayward_core::types::present;
use relayward_core::{ModePolicy, ServerProfile};

use super::PollCadence;
use crate::classify::KeywordSet;

pub const KEYWORDS: KeywordSet = KeywordSet::new(&["Started"], &["Failed", "Unable"]);
pub const CADENCE: PollCadence = PollCadence::new(Duration::from_secs(1), 10);

/// Always redirected, whatever the mode lists.
pub const SENTINEL_PROCESS: &str = "NTT.exe";

/// Where redirected traffic is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
	/// Through the local SOCKS front-end.
	LocalSocks,
	/// Straight to a Socks5 server at an already-resolved address.
	Upstream(IpAddr),
}

pub fn process_list(mode: &ModePolicy) -> String {
	let mut names: Vec<&str> = mode.rule.iter().map(|s| s.as_str()).collect();
	names.push(SENTINEL_PROCESS);
	names.join(",")
}

pub fn build_args(
	server: &ServerProfile,
	mode: &ModePolicy,
	route: Route,
	settings: &Settings,
) -> Vec<String> {
	let target = match route {
		Route::LocalSocks => SocketAddr::new(
			IpAddr::V4(Ipv4Addr::LOCALHOST),
			settings.socks5_local_port,
		),
		Route::Upstream(ip) => SocketAddr::new(ip, server.port),
	};

	let mut args: Vec<String> = vec![
		"-r".into(),
		target.to_string(),
		"-p".into(),
		process_list(mode),
	];

	if let Route::Upstream(_) = route {
		if let (Some(user), Some(pass)) = (present(&server.username), present(&server.password)) {
			args.extend([
				"-username".into(),
				user.into(),
				"-password".into(),
				pass.into(),
			]);
		}
	}

	args.push("-t".into());
	args.push(settings.redirector_tcp_port.to_string());
	args
}
