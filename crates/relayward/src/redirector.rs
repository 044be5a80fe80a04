use std::sync::Arc;

use tokio::sync::broadcast;

use relayward_core::config::Settings;
use relayward_core::{BandwidthSample, ControllerState, ModePolicy, ServerProfile};

use crate::dns::Resolver;
use crate::driver::{DriverHost, DriverLifecycle, DriverOutcome, SystemDriverHost};
use crate::error::{DriverError, StartError, StartResult};
use crate::policy::redirector::{self, Route};
use crate::policy::{BackendKind, BackendPolicy};
use crate::supervisor::{ProcessSupervisor, SupervisorConfig};

/// The redirector backend plus the kernel driver it depends on.
///
/// Only one of these should be active per machine: the driver file and its
/// service are shared.
pub struct RedirectorSupervisor<H: DriverHost + 'static> {
	supervisor: ProcessSupervisor,
	driver: Arc<DriverLifecycle<H>>,
	resolver: Resolver,
	settings: Settings,
}

impl RedirectorSupervisor<SystemDriverHost> {
	pub fn system(settings: Settings) -> Self {
		let driver = DriverLifecycle::system(&settings);
		Self::new(driver, settings)
	}
}

impl<H: DriverHost + 'static> RedirectorSupervisor<H> {
	pub fn new(driver: DriverLifecycle<H>, settings: Settings) -> Self {
		Self::with_policy(BackendKind::Redirector.policy(), driver, settings)
	}

	pub fn with_policy(policy: BackendPolicy, driver: DriverLifecycle<H>, settings: Settings) -> Self {
		let supervisor = ProcessSupervisor::new(policy, SupervisorConfig::from_settings(&settings));
		Self {
			supervisor,
			driver: Arc::new(driver),
			resolver: Resolver::new(),
			settings,
		}
	}

	pub fn supervisor(&self) -> &ProcessSupervisor {
		&self.supervisor
	}

	pub fn driver(&self) -> &DriverLifecycle<H> {
		&self.driver
	}

	pub fn state(&self) -> ControllerState {
		self.supervisor.state()
	}

	pub fn subscribe_bandwidth(&self) -> broadcast::Receiver<BandwidthSample> {
		self.supervisor.subscribe_bandwidth()
	}

	/// Starts the redirector, logging the failure and returning `false` if it
	/// does not reach `Started`.
	pub async fn start(&self, server: &ServerProfile, mode: &ModePolicy, stop_and_restart: bool) -> bool {
		match self.try_start(server, mode, stop_and_restart).await {
			Ok(()) => true,
			Err(e) => {
				tracing::error!(
					backend = %self.supervisor.policy().name,
					phase = ?e.phase(),
					"failed to start redirector: {}",
					e
				);
				false
			}
		}
	}

	/// Installs or updates the driver, brings its service up, then launches
	/// the redirector. Nothing is spawned unless the driver steps succeed.
	pub async fn try_start(
		&self,
		server: &ServerProfile,
		mode: &ModePolicy,
		stop_and_restart: bool,
	) -> StartResult<()> {
		let binary = self.supervisor.binary_path();
		if !binary.exists() {
			return Err(StartError::MissingBinary { path: binary });
		}
		if self.supervisor.state().is_active() {
			return Err(StartError::AlreadyRunning {
				backend: self.supervisor.policy().name.clone(),
			});
		}

		self.prepare_driver(stop_and_restart).await?;

		let route = self.route(server).await?;
		let args = redirector::build_args(server, mode, route, &self.settings);

		self.supervisor.clear_log();
		self.supervisor.launch(&args).await
	}

	pub async fn stop(&self) {
		self.supervisor.stop().await;
	}

	pub async fn shutdown(&self) {
		self.supervisor.shutdown().await;
	}

	async fn prepare_driver(&self, stop_and_restart: bool) -> Result<(), DriverError> {
		let driver = Arc::clone(&self.driver);
		let result = tokio::task::spawn_blocking(move || {
			match driver.ensure_installed()? {
				DriverOutcome::UpdateFailed(_) => {}
				outcome => tracing::debug!(?outcome, "driver ready"),
			}
			driver.ensure_service_running(stop_and_restart)
		})
		.await;

		match result {
			Ok(r) => r,
			Err(e) => Err(DriverError::Io(std::io::Error::new(
				std::io::ErrorKind::Other,
				format!("driver task failed: {}", e),
			))),
		}
	}

	async fn route(&self, server: &ServerProfile) -> StartResult<Route> {
		if !server.is_socks5() {
			return Ok(Route::LocalSocks);
		}
		match self.resolver.lookup(&server.hostname).await {
			Some(ip) => Ok(Route::Upstream(ip)),
			None => Err(StartError::Resolve {
				host: server.hostname.clone(),
			}),
		}
	}
}
