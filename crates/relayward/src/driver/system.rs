use std::path::{Path, PathBuf};
use std::process::Command;

use super::host::{DriverHost, ServiceStatus};
use crate::error::{DriverError, DriverResult};

const ERROR_SERVICE_ALREADY_RUNNING: i32 = 1056;
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const ERROR_SERVICE_NOT_ACTIVE: i32 = 1062;
const ERROR_SERVICE_EXISTS: i32 = 1073;

/// Drives the real OS through `sc.exe`, `cmd` and PowerShell.
pub struct SystemDriverHost {
	driver_path: PathBuf,
}

impl SystemDriverHost {
	pub fn new(driver_path: impl Into<PathBuf>) -> Self {
		Self {
			driver_path: driver_path.into(),
		}
	}
}

struct ScOutput {
	code: i32,
	stdout: String,
}

fn run_sc(service: &str, args: &[&str]) -> DriverResult<ScOutput> {
	let output = Command::new("sc.exe").args(args).output().map_err(|e| DriverError::Service {
		name: service.to_string(),
		reason: format!("failed to run sc.exe: {}", e),
	})?;
	Ok(ScOutput {
		code: output.status.code().unwrap_or(-1),
		stdout: String::from_utf8_lossy(&output.stdout).to_string(),
	})
}

fn sc_failure(service: &str, action: &str, out: &ScOutput) -> DriverError {
	DriverError::Service {
		name: service.to_string(),
		reason: format!("sc {} exited with {}: {}", action, out.code, out.stdout.trim()),
	}
}

impl DriverHost for SystemDriverHost {
	fn os_version(&self) -> DriverResult<String> {
		let output = Command::new("cmd")
			.args(["/C", "ver"])
			.output()
			.map_err(|e| DriverError::OsVersion(e.to_string()))?;
		let text = String::from_utf8_lossy(&output.stdout);
		parse_ver_output(&text)
			.ok_or_else(|| DriverError::OsVersion(format!("unrecognised `ver` output: {}", text.trim())))
	}

	fn file_version(&self, path: &Path) -> DriverResult<String> {
		let script = format!(
			"(Get-Item -LiteralPath '{}').VersionInfo.FileVersion",
			path.display().to_string().replace('\'', "''")
		);
		let output = Command::new("powershell")
			.args(["-NoProfile", "-NonInteractive", "-Command", &script])
			.output()?;
		let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
		if !output.status.success() || version.is_empty() {
			return Err(DriverError::Io(std::io::Error::new(
				std::io::ErrorKind::InvalidData,
				format!("no version information for {}", path.display()),
			)));
		}
		Ok(version)
	}

	fn register_driver(&self, service: &str) -> DriverResult<()> {
		let bin_path = self.driver_path.display().to_string();
		let out = run_sc(
			service,
			&["create", service, "type=", "kernel", "start=", "demand", "binPath=", &bin_path],
		)
		.map_err(|e| DriverError::Register {
			name: service.to_string(),
			reason: e.to_string(),
		})?;
		match out.code {
			0 | ERROR_SERVICE_EXISTS => Ok(()),
			code => Err(DriverError::Register {
				name: service.to_string(),
				reason: format!("sc create exited with {}: {}", code, out.stdout.trim()),
			}),
		}
	}

	fn unregister_driver(&self, service: &str) -> DriverResult<()> {
		let out = run_sc(service, &["delete", service]).map_err(|e| DriverError::Unregister {
			name: service.to_string(),
			reason: e.to_string(),
		})?;
		match out.code {
			0 | ERROR_SERVICE_DOES_NOT_EXIST => Ok(()),
			code => Err(DriverError::Unregister {
				name: service.to_string(),
				reason: format!("sc delete exited with {}: {}", code, out.stdout.trim()),
			}),
		}
	}

	fn service_status(&self, service: &str) -> DriverResult<ServiceStatus> {
		let out = run_sc(service, &["query", service])?;
		match out.code {
			0 => parse_sc_state(&out.stdout).ok_or_else(|| sc_failure(service, "query", &out)),
			ERROR_SERVICE_DOES_NOT_EXIST => Err(DriverError::ServiceMissing {
				name: service.to_string(),
			}),
			_ => Err(sc_failure(service, "query", &out)),
		}
	}

	fn start_service(&self, service: &str) -> DriverResult<()> {
		let out = run_sc(service, &["start", service])?;
		match out.code {
			0 | ERROR_SERVICE_ALREADY_RUNNING => Ok(()),
			_ => Err(sc_failure(service, "start", &out)),
		}
	}

	fn stop_service(&self, service: &str) -> DriverResult<()> {
		let out = run_sc(service, &["stop", service])?;
		match out.code {
			0 | ERROR_SERVICE_NOT_ACTIVE => Ok(()),
			_ => Err(sc_failure(service, "stop", &out)),
		}
	}
}

/// Extracts `major.minor` from `Microsoft Windows [Version 10.0.19045.3803]`.
pub fn parse_ver_output(text: &str) -> Option<String> {
	let start = text.find("Version ")? + "Version ".len();
	let rest = &text[start..];
	let end = rest.find(']').unwrap_or(rest.len());
	let mut parts = rest[..end].trim().split('.');
	let major = parts.next()?.trim();
	let minor = parts.next()?.trim();
	if major.parse::<u32>().is_err() || minor.parse::<u32>().is_err() {
		return None;
	}
	Some(format!("{}.{}", major, minor))
}

/// Reads the `STATE : <n> <NAME>` line of `sc query` output.
pub fn parse_sc_state(text: &str) -> Option<ServiceStatus> {
	let line = text.lines().find(|l| l.trim_start().starts_with("STATE"))?;
	let value = line.split(':').nth(1)?.trim();
	let code: u32 = value.split_whitespace().next()?.parse().ok()?;
	Some(match code {
		1 => ServiceStatus::Stopped,
		2 => ServiceStatus::StartPending,
		3 => ServiceStatus::StopPending,
		4 => ServiceStatus::Running,
		7 => ServiceStatus::Paused,
		_ => ServiceStatus::Other,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ver_output_versions() {
		assert_eq!(
			parse_ver_output("\r\nMicrosoft Windows [Version 10.0.19045.3803]\r\n"),
			Some("10.0".into())
		);
		assert_eq!(
			parse_ver_output("Microsoft Windows [Version 6.1.7601]"),
			Some("6.1".into())
		);
		assert_eq!(parse_ver_output("Linux"), None);
		assert_eq!(parse_ver_output("Microsoft Windows [Version x.y]"), None);
	}

	#[test]
	fn sc_query_running() {
		let out = "\r\nSERVICE_NAME: netfilter2\r\n        TYPE               : 1  KERNEL_DRIVER\r\n        STATE              : 4  RUNNING\r\n                                (STOPPABLE, NOT_PAUSABLE, IGNORES_SHUTDOWN)\r\n";
		assert_eq!(parse_sc_state(out), Some(ServiceStatus::Running));
	}

	#[test]
	fn sc_query_stopped() {
		let out = "SERVICE_NAME: netfilter2\n        STATE              : 1  STOPPED\n";
		assert_eq!(parse_sc_state(out), Some(ServiceStatus::Stopped));
	}

	#[test]
	fn sc_query_without_state() {
		assert_eq!(parse_sc_state("[SC] EnumQueryServicesStatus:OpenService FAILED 1060"), None);
	}
}
