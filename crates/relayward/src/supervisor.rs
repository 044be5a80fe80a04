use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use relayward_core::config::Settings;
use relayward_core::{BandwidthSample, ControllerState};

use crate::classify::{classify, KeywordSet};
use crate::error::{StartError, StartResult};
use crate::logs;
use crate::output::OutputCapture;
use crate::policy::{render_args, BackendPolicy};
use crate::telemetry;

const LINE_CHANNEL: usize = 1024;
const BANDWIDTH_CHANNEL: usize = 64;
const STOP_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LINE_BYTES: usize = 64 * 1024;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	pub bin_dir: PathBuf,
	pub log_dir: PathBuf,
	pub max_log_size: u64,
}

impl SupervisorConfig {
	pub fn from_settings(settings: &Settings) -> Self {
		Self {
			bin_dir: settings.bin_dir(),
			log_dir: settings.log_dir(),
			max_log_size: settings.logs.max_size_bytes,
		}
	}
}

/// The controller state, shared between the polling caller, the output pump,
/// and the exit watcher.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
	pub fn new(state: ControllerState) -> Self {
		Self(AtomicU8::new(state as u8))
	}

	pub fn get(&self) -> ControllerState {
		ControllerState::from_u8(self.0.load(Ordering::SeqCst))
	}

	pub fn set(&self, state: ControllerState) {
		self.0.store(state as u8, Ordering::SeqCst);
	}

	/// Moves `from` -> `to` only if the state is still `from`.
	pub fn transition(&self, from: ControllerState, to: ControllerState) -> bool {
		self.0
			.compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
			.is_ok()
	}
}

struct RunningProcess {
	pid: Option<u32>,
	exited: Arc<AtomicBool>,
	cancel: watch::Sender<bool>,
	waiter: JoinHandle<()>,
	/// Output pump plus the per-stream readers feeding it.
	output_tasks: Vec<JoinHandle<()>>,
}

/// Owns one backend process and turns its output into a lifecycle state.
pub struct ProcessSupervisor {
	policy: BackendPolicy,
	config: SupervisorConfig,
	state: Arc<StateCell>,
	process: Mutex<Option<RunningProcess>>,
	output: RwLock<Option<OutputCapture>>,
	bandwidth: broadcast::Sender<BandwidthSample>,
}

impl ProcessSupervisor {
	pub fn new(policy: BackendPolicy, config: SupervisorConfig) -> Self {
		let (bandwidth, _) = broadcast::channel(BANDWIDTH_CHANNEL);
		Self {
			policy,
			config,
			state: Arc::new(StateCell::new(ControllerState::Waiting)),
			process: Mutex::new(None),
			output: RwLock::new(None),
			bandwidth,
		}
	}

	pub fn policy(&self) -> &BackendPolicy {
		&self.policy
	}

	pub fn config(&self) -> &SupervisorConfig {
		&self.config
	}

	pub fn state(&self) -> ControllerState {
		self.state.get()
	}

	pub fn binary_path(&self) -> PathBuf {
		self.config.bin_dir.join(&self.policy.main_file)
	}

	pub fn log_path(&self) -> PathBuf {
		logs::backend_log_path(&self.config.log_dir, &self.policy.name)
	}

	pub async fn pid(&self) -> Option<u32> {
		self.process.lock().await.as_ref().and_then(|p| p.pid)
	}

	pub fn subscribe_bandwidth(&self) -> broadcast::Receiver<BandwidthSample> {
		self.bandwidth.subscribe()
	}

	pub async fn recent_lines(&self) -> Vec<String> {
		match self.output.read().await.as_ref() {
			Some(capture) => capture.snapshot().await,
			None => Vec::new(),
		}
	}

	pub fn clear_log(&self) {
		logs::clear_log(&self.config.log_dir, &self.policy.name);
	}

	/// Spawns the backend with `args` and waits, within the policy's poll
	/// budget, for its output to mark it started.
	///
	/// On any failure after spawning, the process has been stopped by the time
	/// this returns.
	pub async fn launch(&self, args: &[String]) -> StartResult<()> {
		let backend = self.policy.name.clone();
		let program = self.binary_path();
		if !program.exists() {
			return Err(StartError::MissingBinary { path: program });
		}

		let mut slot = self.process.lock().await;
		if self.state.get().is_active() {
			return Err(StartError::AlreadyRunning { backend });
		}
		if let Some(previous) = slot.take() {
			reap(previous, &backend).await;
		}

		tracing::info!(backend = %backend, args = %render_args(args), "starting backend");

		let capture = OutputCapture::new(&self.config.log_dir, &backend, self.config.max_log_size);
		*self.output.write().await = Some(capture.clone());

		let mut cmd = Command::new(&program);
		cmd.args(args)
			.current_dir(&self.config.bin_dir)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		#[cfg(unix)]
		cmd.process_group(0);
		#[cfg(windows)]
		cmd.creation_flags(CREATE_NO_WINDOW);

		self.state.set(ControllerState::Starting);
		let mut child = match cmd.spawn() {
			Ok(child) => child,
			Err(source) => {
				self.state.set(ControllerState::Stopped);
				return Err(StartError::Spawn { backend, source });
			}
		};

		let pid = child.id();
		let exited = Arc::new(AtomicBool::new(false));
		let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL);
		let mut output_tasks = Vec::with_capacity(3);

		if let Some(stdout) = child.stdout.take() {
			let tx = line_tx.clone();
			output_tasks.push(tokio::spawn(async move { read_lines(stdout, tx).await }));
		}
		if let Some(stderr) = child.stderr.take() {
			let tx = line_tx.clone();
			output_tasks.push(tokio::spawn(async move { read_lines(stderr, tx).await }));
		}
		drop(line_tx);

		let pump = OutputPump {
			capture,
			state: Arc::clone(&self.state),
			exited: Arc::clone(&exited),
			keywords: self.policy.keywords,
			telemetry: self.policy.telemetry,
			bandwidth: self.bandwidth.clone(),
		};
		output_tasks.push(tokio::spawn(pump.run(line_rx)));

		let (cancel, cancel_rx) = watch::channel(false);
		let waiter = tokio::spawn(watch_child(
			child,
			cancel_rx,
			Arc::clone(&exited),
			Arc::clone(&self.state),
			backend.clone(),
		));

		*slot = Some(RunningProcess {
			pid,
			exited,
			cancel,
			waiter,
			output_tasks,
		});
		drop(slot);

		tracing::debug!(backend = %backend, pid = ?pid, "backend spawned");

		let cadence = self.policy.cadence;
		for _ in 0..cadence.attempts {
			tokio::time::sleep(cadence.interval).await;
			match self.state.get() {
				ControllerState::Started => {
					tracing::info!(backend = %backend, pid = ?pid, "backend started");
					return Ok(());
				}
				ControllerState::Starting => {}
				_ => {
					self.stop().await;
					return Err(StartError::PrematureExit { backend });
				}
			}
		}

		self.stop().await;
		Err(StartError::Timeout {
			backend,
			waited: cadence.budget(),
		})
	}

	/// Kills the backend and waits for it to exit. Never fails; calling it
	/// without a live process does nothing.
	pub async fn stop(&self) {
		let Some(running) = self.process.lock().await.take() else {
			return;
		};

		if running.exited.load(Ordering::SeqCst) {
			reap(running, &self.policy.name).await;
			if !self.state.get().is_terminal() {
				self.state.set(ControllerState::Stopped);
			}
			return;
		}

		self.state.set(ControllerState::Stopping);
		halt(running, &self.policy.name).await;
		self.state.set(ControllerState::Stopped);
	}

	/// Process-wide shutdown: kills the backend and leaves the controller in
	/// `Terminating`.
	pub async fn shutdown(&self) {
		self.state.set(ControllerState::Terminating);
		let running = self.process.lock().await.take();
		if let Some(running) = running {
			halt(running, &self.policy.name).await;
		}
	}
}

impl Drop for ProcessSupervisor {
	fn drop(&mut self) {
		if let Some(running) = self.process.get_mut().take() {
			let _ = running.cancel.send(true);
			for task in &running.output_tasks {
				task.abort();
			}
		}
	}
}

async fn halt(running: RunningProcess, backend: &str) {
	let pid = running.pid;
	let _ = running.cancel.send(true);
	match tokio::time::timeout(STOP_TIMEOUT, running.waiter).await {
		Ok(Ok(())) => tracing::info!(backend, pid = ?pid, "backend stopped"),
		Ok(Err(e)) => tracing::error!(backend, pid = ?pid, "exit watcher failed: {}", e),
		Err(_) => tracing::error!(
			backend,
			pid = ?pid,
			"backend did not exit within {:?}",
			STOP_TIMEOUT
		),
	}
	drain_output(running.output_tasks, backend).await;
}

async fn reap(running: RunningProcess, backend: &str) {
	if running.exited.load(Ordering::SeqCst) {
		if let Err(e) = running.waiter.await {
			tracing::error!(backend, "exit watcher failed: {}", e);
		}
		drain_output(running.output_tasks, backend).await;
	} else {
		halt(running, backend).await;
	}
}

/// Waits for the output of a dead process to be fully handled, so no line
/// from it can reach the state of a later run. Tasks still busy after
/// `DRAIN_TIMEOUT` are aborted.
async fn drain_output(tasks: Vec<JoinHandle<()>>, backend: &str) {
	let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
	for mut task in tasks {
		if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
			tracing::warn!(backend, "output still pending after {:?}, discarding", DRAIN_TIMEOUT);
			task.abort();
			let _ = task.await;
		}
	}
}

async fn watch_child(
	mut child: Child,
	mut cancel: watch::Receiver<bool>,
	exited: Arc<AtomicBool>,
	state: Arc<StateCell>,
	backend: String,
) {
	let status = tokio::select! {
		status = child.wait() => status,
		_ = cancel.changed() => terminate(&mut child).await,
	};
	exited.store(true, Ordering::SeqCst);

	match status {
		Ok(status) => tracing::debug!(backend = %backend, %status, "backend exited"),
		Err(e) => tracing::error!(backend = %backend, "failed to stop backend: {}", e),
	}

	if state.transition(ControllerState::Starting, ControllerState::Stopped) {
		tracing::warn!(backend = %backend, "backend exited while starting");
	} else if state.transition(ControllerState::Started, ControllerState::Stopped) {
		tracing::warn!(backend = %backend, "backend exited unexpectedly");
	}
}

async fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
	#[cfg(unix)]
	if let Some(pid) = child.id() {
		use nix::sys::signal::{killpg, Signal};
		use nix::unistd::Pid;

		match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
			Ok(()) | Err(nix::errno::Errno::ESRCH) => return child.wait().await,
			Err(e) => tracing::debug!(pid, "killpg failed, killing child only: {}", e),
		}
	}

	child.kill().await?;
	child.wait().await
}

/// Forwards output line by line. Lines longer than `MAX_LINE_BYTES` are
/// split into chunks of that size.
async fn read_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
	let mut reader = BufReader::new(reader);
	let mut buf = Vec::new();
	loop {
		buf.clear();
		let mut limited = (&mut reader).take(MAX_LINE_BYTES as u64);
		match limited.read_until(b'\n', &mut buf).await {
			Ok(0) => break,
			Ok(_) => {
				let line = String::from_utf8_lossy(&buf);
				let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');
				if tx.send(line.to_string()).await.is_err() {
					break;
				}
			}
			Err(e) => {
				tracing::debug!("output reader stopped: {}", e);
				break;
			}
		}
	}
}

/// Single consumer of both output streams: logs each line, then applies the
/// classifier or the telemetry parser depending on the current state.
struct OutputPump {
	capture: OutputCapture,
	state: Arc<StateCell>,
	exited: Arc<AtomicBool>,
	keywords: KeywordSet,
	telemetry: bool,
	bandwidth: broadcast::Sender<BandwidthSample>,
}

impl OutputPump {
	async fn run(self, mut lines: mpsc::Receiver<String>) {
		while let Some(line) = lines.recv().await {
			self.handle(&line).await;
		}
	}

	async fn handle(&self, line: &str) {
		if line.trim().is_empty() {
			return;
		}
		self.capture.write_line(line).await;

		match self.state.get() {
			ControllerState::Starting => {
				let exited = self.exited.load(Ordering::SeqCst);
				let transition = classify(ControllerState::Starting, exited, line, &self.keywords);
				if let Some(target) = transition.target() {
					self.state.transition(ControllerState::Starting, target);
				}
			}
			ControllerState::Started if self.telemetry && telemetry::is_telemetry(line) => {
				// Receivers that fall behind lose old samples; send never blocks.
				if let Some(sample) = telemetry::parse(line) {
					let _ = self.bandwidth.send(sample);
				}
			}
			_ => {}
		}
	}
}
