use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::error::DriverResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
	Stopped,
	StartPending,
	StopPending,
	Running,
	Paused,
	Other,
}

impl fmt::Display for ServiceStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ServiceStatus::Stopped => "stopped",
			ServiceStatus::StartPending => "start pending",
			ServiceStatus::StopPending => "stop pending",
			ServiceStatus::Running => "running",
			ServiceStatus::Paused => "paused",
			ServiceStatus::Other => "unknown",
		};
		f.write_str(s)
	}
}

/// OS facilities the driver lifecycle needs. Calls block.
pub trait DriverHost: Send + Sync {
	/// `major.minor`, e.g. `10.0`.
	fn os_version(&self) -> DriverResult<String>;

	fn file_version(&self, path: &Path) -> DriverResult<String>;

	fn register_driver(&self, service: &str) -> DriverResult<()>;

	fn unregister_driver(&self, service: &str) -> DriverResult<()>;

	fn service_status(&self, service: &str) -> DriverResult<ServiceStatus>;

	fn start_service(&self, service: &str) -> DriverResult<()>;

	fn stop_service(&self, service: &str) -> DriverResult<()>;
}
