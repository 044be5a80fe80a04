//! Kernel driver lifecycle for the redirector.
//!
//! The driver file and its service are machine-wide singletons: at most one
//! [`DriverLifecycle`] should be acting on them at a time. Nothing is cached
//! between calls; every operation queries the filesystem and the service
//! manager afresh.

pub mod host;
pub mod system;

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use relayward_core::config::Settings;

pub use host::{DriverHost, ServiceStatus};
pub use system::SystemDriverHost;

use crate::error::{DriverError, DriverResult};

/// Driver artifact shipped for each supported `major.minor` OS version.
pub fn artifact_for(os_version: &str) -> Option<&'static str> {
	match os_version {
		"10.0" => Some("Win-10.sys"),
		"6.3" | "6.2" => Some("Win-8.sys"),
		"6.1" | "6.0" => Some("Win-7.sys"),
		_ => None,
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverRecord {
	pub path: PathBuf,
	pub artifact: Option<String>,
	pub expected_version: Option<String>,
	pub installed_version: Option<String>,
}

#[derive(Debug)]
pub enum DriverOutcome {
	Installed,
	UpToDate,
	Updated { from: String, to: String },
	/// The update sequence failed part-way. The caller carries on with whatever
	/// driver is left in place.
	UpdateFailed(DriverError),
}

#[derive(Debug, Clone, Copy)]
pub struct ServiceWait {
	pub interval: Duration,
	pub timeout: Duration,
}

impl Default for ServiceWait {
	fn default() -> Self {
		Self {
			interval: Duration::from_millis(250),
			timeout: Duration::from_secs(30),
		}
	}
}

pub struct DriverLifecycle<H> {
	host: H,
	service: String,
	driver_path: PathBuf,
	artifact_dir: PathBuf,
	wait: ServiceWait,
}

impl DriverLifecycle<SystemDriverHost> {
	pub fn system(settings: &Settings) -> Self {
		let host = SystemDriverHost::new(&settings.driver.path);
		Self::new(host, settings)
	}
}

impl<H: DriverHost> DriverLifecycle<H> {
	pub fn new(host: H, settings: &Settings) -> Self {
		Self {
			host,
			service: settings.driver.service_name.clone(),
			driver_path: settings.driver.path.clone(),
			artifact_dir: settings.bin_dir(),
			wait: ServiceWait::default(),
		}
	}

	pub fn with_wait(mut self, wait: ServiceWait) -> Self {
		self.wait = wait;
		self
	}

	pub fn host(&self) -> &H {
		&self.host
	}

	pub fn service_name(&self) -> &str {
		&self.service
	}

	pub fn driver_path(&self) -> &Path {
		&self.driver_path
	}

	/// Installs the driver if absent, or replaces it if its version differs
	/// from the shipped artifact.
	pub fn ensure_installed(&self) -> DriverResult<DriverOutcome> {
		let artifact_path = self.artifact_path()?;

		if !self.driver_path.exists() {
			self.install(&artifact_path)?;
			return Ok(DriverOutcome::Installed);
		}

		let expected = match self.host.file_version(&artifact_path) {
			Ok(v) => v,
			Err(e) => {
				tracing::warn!(
					artifact = %artifact_path.display(),
					"cannot read artifact version, keeping installed driver: {}",
					e
				);
				return Ok(DriverOutcome::UpToDate);
			}
		};
		let installed = match self.host.file_version(&self.driver_path) {
			Ok(v) => v,
			Err(e) => {
				tracing::warn!(path = %self.driver_path.display(), "cannot read driver version: {}", e);
				String::new()
			}
		};

		if installed == expected {
			tracing::debug!(version = %installed, "driver is up to date");
			return Ok(DriverOutcome::UpToDate);
		}

		tracing::info!(from = %installed, to = %expected, "updating driver");
		if let Err(e) = self.remove_outdated() {
			tracing::warn!("driver update failed, continuing with existing driver: {}", e);
			return Ok(DriverOutcome::UpdateFailed(e));
		}

		// The old driver is already removed here.
		self.install(&artifact_path)?;
		tracing::info!(version = %expected, "driver updated");
		Ok(DriverOutcome::Updated {
			from: installed,
			to: expected,
		})
	}

	/// Makes sure the driver service is running, restarting it first when
	/// `force_restart` is set. If the service cannot be queried or controlled,
	/// falls back to registering the driver directly.
	pub fn ensure_service_running(&self, force_restart: bool) -> DriverResult<()> {
		let result = match self.host.service_status(&self.service) {
			Ok(ServiceStatus::Running) if force_restart => self.cycle_service(),
			Ok(ServiceStatus::Stopped) => {
				tracing::info!(service = %self.service, "starting driver service");
				self.host.start_service(&self.service)
			}
			Ok(_) => Ok(()),
			Err(e) => Err(e),
		};

		result.or_else(|e| self.register_fallback(e))
	}

	/// Starts the service if stopped, or stops and starts it if running,
	/// waiting for each state change.
	pub fn restart_service(&self) -> DriverResult<()> {
		let result = match self.host.service_status(&self.service) {
			Ok(ServiceStatus::Stopped) => self
				.host
				.start_service(&self.service)
				.and_then(|_| self.wait_for(ServiceStatus::Running)),
			Ok(ServiceStatus::Running) => self
				.cycle_service()
				.and_then(|_| self.wait_for(ServiceStatus::Running)),
			Ok(_) => Ok(()),
			Err(e) => Err(e),
		};

		result.or_else(|e| self.register_fallback(e))
	}

	/// Stops the service, unregisters the driver and deletes its file.
	/// Returns `false` when no driver was installed.
	pub fn uninstall(&self) -> DriverResult<bool> {
		if !self.driver_path.exists() {
			return Ok(false);
		}

		if let Ok(ServiceStatus::Running) = self.host.service_status(&self.service) {
			if let Err(e) = self.stop_and_wait() {
				tracing::warn!(service = %self.service, "failed to stop driver service: {}", e);
			}
		}

		self.host.unregister_driver(&self.service)?;
		fs::remove_file(&self.driver_path)?;
		tracing::info!(path = %self.driver_path.display(), "driver uninstalled");
		Ok(true)
	}

	pub fn record(&self) -> DriverRecord {
		let artifact = self
			.host
			.os_version()
			.ok()
			.and_then(|v| artifact_for(&v))
			.map(str::to_string);
		let expected_version = artifact
			.as_ref()
			.and_then(|a| self.host.file_version(&self.artifact_dir.join(a)).ok());
		let installed_version = if self.driver_path.exists() {
			self.host.file_version(&self.driver_path).ok()
		} else {
			None
		};
		DriverRecord {
			path: self.driver_path.clone(),
			artifact,
			expected_version,
			installed_version,
		}
	}

	pub fn service_status(&self) -> DriverResult<ServiceStatus> {
		self.host.service_status(&self.service)
	}

	fn artifact_path(&self) -> DriverResult<PathBuf> {
		let version = self.host.os_version()?;
		match artifact_for(&version) {
			Some(artifact) => Ok(self.artifact_dir.join(artifact)),
			None => {
				tracing::error!(version = %version, "unsupported OS version for redirector driver");
				Err(DriverError::UnsupportedOs { version })
			}
		}
	}

	fn install(&self, artifact_path: &Path) -> DriverResult<()> {
		tracing::info!(
			artifact = %artifact_path.display(),
			path = %self.driver_path.display(),
			"installing driver"
		);

		if let Some(parent) = self.driver_path.parent() {
			let _ = fs::create_dir_all(parent);
		}
		fs::copy(artifact_path, &self.driver_path).map_err(|source| DriverError::Copy {
			from: artifact_path.to_path_buf(),
			to: self.driver_path.clone(),
			source,
		})?;

		self.host.register_driver(&self.service)
	}

	fn remove_outdated(&self) -> DriverResult<()> {
		if self.host.service_status(&self.service)? == ServiceStatus::Running {
			self.stop_and_wait()?;
		}
		self.host.unregister_driver(&self.service)?;
		fs::remove_file(&self.driver_path)?;
		Ok(())
	}

	fn cycle_service(&self) -> DriverResult<()> {
		tracing::info!(service = %self.service, "restarting driver service");
		self.stop_and_wait()?;
		self.host.start_service(&self.service)
	}

	fn stop_and_wait(&self) -> DriverResult<()> {
		self.host.stop_service(&self.service)?;
		self.wait_for(ServiceStatus::Stopped)
	}

	fn wait_for(&self, wanted: ServiceStatus) -> DriverResult<()> {
		let deadline = Instant::now() + self.wait.timeout;
		loop {
			if self.host.service_status(&self.service)? == wanted {
				return Ok(());
			}
			if Instant::now() >= deadline {
				return Err(DriverError::ServiceTimeout {
					name: self.service.clone(),
					wanted: wanted.to_string(),
				});
			}
			std::thread::sleep(self.wait.interval);
		}
	}

	fn register_fallback(&self, cause: DriverError) -> DriverResult<()> {
		tracing::warn!(
			service = %self.service,
			"service control failed, registering driver directly: {}",
			cause
		);
		self.host.register_driver(&self.service).map_err(|e| {
			tracing::error!(service = %self.service, "driver registration failed: {}", e);
			e
		})
	}
}
