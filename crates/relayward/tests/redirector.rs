#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use relayward::driver::{DriverHost, DriverLifecycle, ServiceStatus};
use relayward::error::{DriverError, DriverResult, FailurePhase};
use relayward::policy::{BackendKind, PollCadence};
use relayward::{RedirectorSupervisor, StartError};
use relayward_core::config::Settings;
use relayward_core::{BandwidthSample, ControllerState, ModePolicy, ServerKind, ServerProfile};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!(
		"relayward-redirector-{}-{}-{}",
		std::process::id(),
		n,
		name
	));
	let _ = std::fs::remove_dir_all(&dir);
	std::fs::create_dir_all(dir.join("bin")).unwrap();
	dir
}

fn write_script(bin: &Path, name: &str, body: &str) {
	use std::os::unix::fs::PermissionsExt;
	let path = bin.join(name);
	std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
	std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// In-memory service manager. File contents stand in for file versions.
struct FakeHost {
	os: &'static str,
	status: Mutex<Option<ServiceStatus>>,
	calls: Mutex<Vec<&'static str>>,
}

impl FakeHost {
	fn new(os: &'static str) -> Self {
		Self {
			os,
			status: Mutex::new(None),
			calls: Mutex::new(Vec::new()),
		}
	}

	fn calls(&self) -> Vec<&'static str> {
		self.calls.lock().unwrap().clone()
	}

	fn record(&self, call: &'static str) {
		self.calls.lock().unwrap().push(call);
	}
}

impl DriverHost for FakeHost {
	fn os_version(&self) -> DriverResult<String> {
		Ok(self.os.to_string())
	}

	fn file_version(&self, path: &Path) -> DriverResult<String> {
		Ok(std::fs::read_to_string(path)?.trim().to_string())
	}

	fn register_driver(&self, _service: &str) -> DriverResult<()> {
		self.record("register");
		*self.status.lock().unwrap() = Some(ServiceStatus::Stopped);
		Ok(())
	}

	fn unregister_driver(&self, _service: &str) -> DriverResult<()> {
		self.record("unregister");
		*self.status.lock().unwrap() = None;
		Ok(())
	}

	fn service_status(&self, service: &str) -> DriverResult<ServiceStatus> {
		self.status.lock().unwrap().ok_or_else(|| DriverError::ServiceMissing {
			name: service.to_string(),
		})
	}

	fn start_service(&self, _service: &str) -> DriverResult<()> {
		self.record("start");
		*self.status.lock().unwrap() = Some(ServiceStatus::Running);
		Ok(())
	}

	fn stop_service(&self, _service: &str) -> DriverResult<()> {
		self.record("stop");
		*self.status.lock().unwrap() = Some(ServiceStatus::Stopped);
		Ok(())
	}
}

const ECHO_ARGS: &str = "echo \"args: $*\"";

fn redirector(name: &str, os: &'static str, script: Option<&str>) -> (RedirectorSupervisor<FakeHost>, PathBuf) {
	let base = temp_dir(name);
	std::fs::write(base.join("bin").join("Win-10.sys"), "3.2.1").unwrap();
	if let Some(body) = script {
		write_script(&base.join("bin"), "Redirector", body);
	}

	let mut settings = Settings::with_base_dir(&base);
	settings.driver.path = base.join("drivers").join("netfilter2.sys");

	let policy = BackendKind::Redirector
		.policy()
		.with_cadence(PollCadence::new(Duration::from_millis(20), 250));
	let driver = DriverLifecycle::new(FakeHost::new(os), &settings);
	(RedirectorSupervisor::with_policy(policy, driver, settings), base)
}

fn mode() -> ModePolicy {
	ModePolicy {
		rule: vec!["chrome.exe".into(), "curl.exe".into()],
		..ModePolicy::default()
	}
}

#[tokio::test]
async fn starts_through_local_socks_and_installs_driver() {
	let script = format!("{}\necho 'Started'\nexec sleep 30", ECHO_ARGS);
	let (nf, base) = redirector("local-socks", "10.0", Some(&script));
	let server = ServerProfile::new(ServerKind::ShadowsocksR, "example.com", 8388);

	assert!(nf.start(&server, &mode(), false).await);
	assert_eq!(nf.state(), ControllerState::Started);
	assert_eq!(nf.driver().host().calls(), vec!["register", "start"]);
	assert_eq!(
		std::fs::read_to_string(nf.driver().driver_path()).unwrap(),
		"3.2.1"
	);

	let lines = nf.supervisor().recent_lines().await;
	assert!(
		lines.contains(&"args: -r 127.0.0.1:2801 -p chrome.exe,curl.exe,NTT.exe -t 2800".to_string()),
		"lines were: {:?}",
		lines
	);

	nf.stop().await;
	assert_eq!(nf.state(), ControllerState::Stopped);
	let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn socks5_upstream_carries_credentials() {
	let script = format!("{}\necho 'Started'\nexec sleep 30", ECHO_ARGS);
	let (nf, base) = redirector("socks5", "10.0", Some(&script));
	let mut server = ServerProfile::new(ServerKind::Socks5, "192.0.2.7", 1080);
	server.username = Some("user".into());
	server.password = Some("secret".into());

	assert!(nf.start(&server, &mode(), false).await);
	let lines = nf.supervisor().recent_lines().await;
	assert!(
		lines.contains(
			&"args: -r 192.0.2.7:1080 -p chrome.exe,curl.exe,NTT.exe -username user -password secret -t 2800"
				.to_string()
		),
		"lines were: {:?}",
		lines
	);

	nf.stop().await;
	let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn socks5_dns_failure_spawns_nothing() {
	let (nf, base) = redirector("dns-failure", "10.0", Some("echo 'Started'\nexec sleep 30"));
	let server = ServerProfile::new(ServerKind::Socks5, "relayward-test.invalid", 1080);

	let err = nf.try_start(&server, &mode(), false).await.unwrap_err();
	assert!(matches!(err, StartError::Resolve { ref host } if host == "relayward-test.invalid"));
	assert_eq!(err.phase(), FailurePhase::PreFlight);
	assert_eq!(nf.state(), ControllerState::Waiting);
	assert_eq!(nf.supervisor().pid().await, None);
	assert!(!nf.supervisor().log_path().exists());

	assert!(!nf.start(&server, &mode(), false).await);
	let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn unsupported_os_spawns_nothing() {
	let (nf, base) = redirector("unsupported-os", "5.1", Some("echo 'Started'\nexec sleep 30"));
	let server = ServerProfile::new(ServerKind::ShadowsocksR, "example.com", 8388);

	let err = nf.try_start(&server, &mode(), false).await.unwrap_err();
	assert!(matches!(err, StartError::Driver(DriverError::UnsupportedOs { .. })));
	assert_eq!(err.phase(), FailurePhase::Driver);
	assert_eq!(nf.state(), ControllerState::Waiting);
	assert!(nf.driver().host().calls().is_empty());
	assert!(!nf.supervisor().log_path().exists());

	let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn missing_binary_skips_driver() {
	let (nf, base) = redirector("missing-binary", "10.0", None);
	let server = ServerProfile::new(ServerKind::ShadowsocksR, "example.com", 8388);

	let err = nf.try_start(&server, &mode(), false).await.unwrap_err();
	assert!(matches!(err, StartError::MissingBinary { .. }));
	assert!(nf.driver().host().calls().is_empty());
	assert!(!nf.driver().driver_path().exists());

	let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn failed_keyword_stops_redirector() {
	let (nf, base) = redirector(
		"failed-keyword",
		"10.0",
		Some("echo 'Failed to open device'\nexec sleep 30"),
	);
	let server = ServerProfile::new(ServerKind::ShadowsocksR, "example.com", 8388);

	let err = nf.try_start(&server, &mode(), false).await.unwrap_err();
	assert!(matches!(err, StartError::PrematureExit { .. }));
	assert_eq!(nf.state(), ControllerState::Stopped);
	assert_eq!(nf.supervisor().pid().await, None);

	let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn bandwidth_samples_are_published() {
	let script = "echo 'Started'\nsleep 1\n\
		echo '[APP][Bandwidth]upload:oops'\n\
		echo '[APP][Bandwidth]upload:1024, download:4096'\n\
		exec sleep 30";
	let (nf, base) = redirector("bandwidth", "10.0", Some(script));
	let server = ServerProfile::new(ServerKind::ShadowsocksR, "example.com", 8388);
	let mut rx = nf.subscribe_bandwidth();

	assert!(nf.start(&server, &mode(), false).await);

	let sample = tokio::time::timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("no bandwidth sample within 5s")
		.unwrap();
	assert_eq!(
		sample,
		BandwidthSample {
			upload: 1024,
			download: 4096
		}
	);

	nf.stop().await;
	let _ = std::fs::remove_dir_all(&base);
}

#[tokio::test]
async fn restart_flag_cycles_running_service() {
	let script = "echo 'Started'\nexec sleep 30";
	let (nf, base) = redirector("restart-service", "10.0", Some(script));
	let server = ServerProfile::new(ServerKind::ShadowsocksR, "example.com", 8388);

	assert!(nf.start(&server, &mode(), false).await);
	nf.stop().await;
	assert!(nf.start(&server, &mode(), true).await);
	assert_eq!(
		nf.driver().host().calls(),
		vec!["register", "start", "stop", "start"]
	);

	nf.stop().await;
	let _ = std::fs::remove_dir_all(&base);
}
