//! # relayward
//!
//! Supervises proxy backend processes and the kernel-driver-backed traffic
//! redirector.
//!
//! A [`ProcessSupervisor`] spawns one backend, reads its stdout and stderr line
//! by line, logs every line, and decides from keywords in that output whether
//! the backend came up. Backends differ only in their [`BackendPolicy`]. The
//! [`RedirectorSupervisor`] adds driver installation, service control and
//! bandwidth telemetry on top.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use relayward::SsrController;
//! use relayward_core::config::Settings;
//! use relayward_core::{ModePolicy, ServerKind, ServerProfile};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let controller = SsrController::new(Settings::with_base_dir("/opt/relayward"));
//!
//! let mut server = ServerProfile::new(ServerKind::ShadowsocksR, "example.com", 8388);
//! server.password = Some("secret".into());
//! server.encrypt_method = Some("aes-256-cfb".into());
//!
//! if controller.start(&server, &ModePolicy::default()).await {
//!     // ...
//!     controller.stop().await;
//! }
//! # }
//! ```

pub mod classify;
pub mod dns;
pub mod driver;
pub mod error;
pub mod logs;
pub mod output;
pub mod policy;
pub mod proxy;
pub mod redirector;
pub mod supervisor;
pub mod telemetry;

pub use classify::{classify, KeywordSet, Transition};
pub use dns::Resolver;
pub use driver::{DriverHost, DriverLifecycle, DriverOutcome, DriverRecord, ServiceStatus, SystemDriverHost};
pub use error::{DriverError, FailurePhase, StartError};
pub use output::OutputCapture;
pub use policy::{BackendKind, BackendPolicy, PollCadence};
pub use proxy::SsrController;
pub use redirector::RedirectorSupervisor;
pub use supervisor::{ProcessSupervisor, StateCell, SupervisorConfig};
