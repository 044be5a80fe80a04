use relayward_core::config::Settings;
use relayward_core::{ControllerState, ModePolicy, ServerProfile};

use crate::error::{StartError, StartResult};
use crate::policy::{ssr, BackendKind, BackendPolicy};
use crate::supervisor::{ProcessSupervisor, SupervisorConfig};

/// Controller for the ShadowsocksR local proxy.
pub struct SsrController {
	supervisor: ProcessSupervisor,
	settings: Settings,
}

impl SsrController {
	pub fn new(settings: Settings) -> Self {
		Self::with_policy(BackendKind::ShadowsocksR.policy(), settings)
	}

	pub fn with_policy(policy: BackendPolicy, settings: Settings) -> Self {
		let supervisor = ProcessSupervisor::new(policy, SupervisorConfig::from_settings(&settings));
		Self { supervisor, settings }
	}

	pub fn supervisor(&self) -> &ProcessSupervisor {
		&self.supervisor
	}

	pub fn state(&self) -> ControllerState {
		self.supervisor.state()
	}

	pub async fn start(&self, server: &ServerProfile, mode: &ModePolicy) -> bool {
		match self.try_start(server, mode).await {
			Ok(()) => true,
			Err(e) => {
				tracing::error!(
					backend = %self.supervisor.policy().name,
					phase = ?e.phase(),
					"failed to start proxy: {}",
					e
				);
				false
			}
		}
	}

	pub async fn try_start(&self, server: &ServerProfile, mode: &ModePolicy) -> StartResult<()> {
		let binary = self.supervisor.binary_path();
		if !binary.exists() {
			return Err(StartError::MissingBinary { path: binary });
		}
		let args = ssr::build_args(server, mode, &self.settings);
		self.supervisor.launch(&args).await
	}

	pub async fn stop(&self) {
		self.supervisor.stop().await;
	}

	pub async fn shutdown(&self) {
		self.supervisor.shutdown().await;
	}
}
