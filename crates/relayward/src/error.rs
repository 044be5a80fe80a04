//! Failure taxonomy for starting backends and managing the redirector driver.
//!
//! The bool-returning `start` methods collapse these into `false` plus a log
//! entry; the `try_*`/`launch` variants hand them to callers and tests intact.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Where in the start sequence a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
	/// Nothing was spawned.
	PreFlight,
	/// The process was spawned and has since been cleaned up.
	Runtime,
	/// No terminal signal within the poll budget.
	Timeout,
	/// Driver install, registration, or service control.
	Driver,
}

#[derive(Debug, Error)]
pub enum StartError {
	#[error("backend binary not found: {path}")]
	MissingBinary { path: PathBuf },

	#[error("{backend} is already running")]
	AlreadyRunning { backend: String },

	#[error("unable to resolve server address: {host}")]
	Resolve { host: String },

	#[error("redirector driver unavailable: {0}")]
	Driver(#[from] DriverError),

	#[error("failed to spawn {backend}: {source}")]
	Spawn {
		backend: String,
		#[source]
		source: std::io::Error,
	},

	#[error("{backend} exited before it finished starting")]
	PrematureExit { backend: String },

	#[error("{backend} did not start within {waited:?}")]
	Timeout { backend: String, waited: Duration },
}

impl StartError {
	pub fn phase(&self) -> FailurePhase {
		match self {
			StartError::MissingBinary { .. }
			| StartError::AlreadyRunning { .. }
			| StartError::Resolve { .. } => FailurePhase::PreFlight,
			StartError::Driver(_) => FailurePhase::Driver,
			StartError::Spawn { .. } | StartError::PrematureExit { .. } => FailurePhase::Runtime,
			StartError::Timeout { .. } => FailurePhase::Timeout,
		}
	}
}

#[derive(Debug, Error)]
pub enum DriverError {
	#[error("unsupported OS version: {version}")]
	UnsupportedOs { version: String },

	#[error("failed to detect OS version: {0}")]
	OsVersion(String),

	#[error("failed to copy driver {from} to {to}: {source}")]
	Copy {
		from: PathBuf,
		to: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to register driver {name}: {reason}")]
	Register { name: String, reason: String },

	#[error("failed to unregister driver {name}: {reason}")]
	Unregister { name: String, reason: String },

	#[error("service {name} is not installed")]
	ServiceMissing { name: String },

	#[error("service {name}: {reason}")]
	Service { name: String, reason: String },

	#[error("timed out waiting for service {name} to reach {wanted}")]
	ServiceTimeout { name: String, wanted: String },

	#[error("driver I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl DriverError {
	/// Whether the redirector cannot proceed past this error.
	///
	/// Service-control failures are recoverable because the caller falls back
	/// to registering the driver directly.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			DriverError::UnsupportedOs { .. }
				| DriverError::OsVersion(_)
				| DriverError::Copy { .. }
				| DriverError::Register { .. }
		)
	}
}

pub type StartResult<T> = Result<T, StartError>;
pub type DriverResult<T> = Result<T, DriverError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn start_error_phases() {
		let missing = StartError::MissingBinary {
			path: "bin/x".into(),
		};
		assert_eq!(missing.phase(), FailurePhase::PreFlight);

		let dns = StartError::Resolve {
			host: "example.invalid".into(),
		};
		assert_eq!(dns.phase(), FailurePhase::PreFlight);

		let early = StartError::PrematureExit {
			backend: "ShadowsocksR".into(),
		};
		assert_eq!(early.phase(), FailurePhase::Runtime);

		let slow = StartError::Timeout {
			backend: "ShadowsocksR".into(),
			waited: Duration::from_secs(10),
		};
		assert_eq!(slow.phase(), FailurePhase::Timeout);

		let driver: StartError = DriverError::UnsupportedOs {
			version: "5.1".into(),
		}
		.into();
		assert_eq!(driver.phase(), FailurePhase::Driver);
	}

	#[test]
	fn driver_error_fatality() {
		assert!(DriverError::UnsupportedOs {
			version: "5.1".into()
		}
		.is_fatal());
		assert!(DriverError::Register {
			name: "netfilter2".into(),
			reason: "access denied".into()
		}
		.is_fatal());
		assert!(!DriverError::ServiceMissing {
			name: "netfilter2".into()
		}
		.is_fatal());
	}

	#[test]
	fn messages_name_the_backend() {
		let err = StartError::AlreadyRunning {
			backend: "Redirector".into(),
		};
		assert_eq!(err.to_string(), "Redirector is already running");
	}
}
