use std::path::Path;
use std::time::Duration;

use owo_colors::OwoColorize;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use relayward::driver::{DriverLifecycle, DriverOutcome, ServiceStatus};
use relayward::policy::BackendKind;
use relayward::{RedirectorSupervisor, SsrController};
use relayward_core::config::{self, Profile, Settings};
use relayward_core::{BandwidthSample, ControllerState};

fn main() {
	let args: Vec<String> = std::env::args().skip(1).collect();

	if args.is_empty() {
		print_usage();
		return;
	}

	init_tracing();

	match args[0].as_str() {
		"help" | "--help" | "-h" => print_usage(),
		"version" | "--version" | "-V" => println!("relayward {}", env!("CARGO_PKG_VERSION")),
		"ssr" => cmd_ssr(&args[1..]),
		"redirector" | "nf" => cmd_redirector(&args[1..]),
		"driver" => cmd_driver(&args[1..]),
		"logs" => cmd_logs(&args[1..]),
		other => {
			eprintln!("unknown command: {}", other);
			eprintln!("run 'relayward help' for usage");
			std::process::exit(1);
		}
	}
}

fn print_usage() {
	eprintln!("{} {} - proxy backend supervisor", "relayward".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} <command> [args]", "relayward".bold());
	eprintln!();

	eprintln!("{}", "backends".cyan().bold());
	eprintln!("  {} <profile.toml>                    Run ShadowsocksR until Ctrl-C", "ssr".bold());
	eprintln!("  {} <profile.toml> [--restart-service] Run the redirector until Ctrl-C", "redirector".bold());
	eprintln!();

	eprintln!("{}", "driver".cyan().bold());
	eprintln!("  {} [--json]                   Show driver versions and service state", "driver status".bold());
	eprintln!("  {}                           Install or update the driver", "driver install".bold());
	eprintln!("  {}                           Restart the driver service", "driver restart".bold());
	eprintln!("  {}                         Remove the driver", "driver uninstall".bold());
	eprintln!();

	eprintln!("{}", "logs".cyan().bold());
	eprintln!("  {} <ssr|redirector>            Delete a backend's output log", "logs clear".bold());
	eprintln!();

	eprintln!("{}", "config".cyan().bold());
	eprintln!("  settings: {}", config::settings_path().display());
	eprintln!("  RUST_LOG controls log verbosity (default: info)");
}

fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.init();
}

fn runtime() -> tokio::runtime::Runtime {
	match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => fail(&format!("failed to start runtime: {}", e)),
	}
}

fn fail(message: &str) -> ! {
	eprintln!("{} {}", "error:".red().bold(), message);
	std::process::exit(1);
}

fn load_profile_arg(args: &[String], usage: &str) -> Profile {
	let Some(path) = args.iter().find(|a| !a.starts_with("--")) else {
		eprintln!("usage: {}", usage);
		std::process::exit(1);
	};
	match config::load_profile(Path::new(path)) {
		Ok(profile) => profile,
		Err(e) => fail(&e.to_string()),
	}
}

// ── backends ─────────────────────────────────────────────────────────────────

fn cmd_ssr(args: &[String]) {
	let profile = load_profile_arg(args, "relayward ssr <profile.toml>");
	let settings = config::load_settings();
	let socks = format!("{}:{}", settings.local_address, settings.socks5_local_port);

	runtime().block_on(async move {
		let controller = SsrController::new(settings);
		if !controller.start(&profile.server, &profile.mode).await {
			fail("ShadowsocksR did not start");
		}

		let pid = controller.supervisor().pid().await;
		print_started("ShadowsocksR", pid, &format!("socks5 on {}", socks));

		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!("failed to wait for Ctrl-C: {}", e);
		}
		controller.stop().await;
		print_state("ShadowsocksR", controller.state());
	});
}

fn cmd_redirector(args: &[String]) {
	let profile = load_profile_arg(args, "relayward redirector <profile.toml> [--restart-service]");
	let restart_service = args.iter().any(|a| a == "--restart-service");
	let settings = config::load_settings();

	runtime().block_on(async move {
		let redirector = RedirectorSupervisor::system(settings);
		let mut samples = redirector.subscribe_bandwidth();

		if !redirector.start(&profile.server, &profile.mode, restart_service).await {
			fail("redirector did not start");
		}

		let pid = redirector.supervisor().pid().await;
		print_started("redirector", pid, &format!("{} processes", profile.mode.rule.len()));

		loop {
			tokio::select! {
				_ = tokio::signal::ctrl_c() => break,
				_ = tokio::time::sleep(Duration::from_secs(1)) => {}
				sample = samples.recv() => match sample {
					Ok(sample) => print_bandwidth(&sample),
					Err(RecvError::Lagged(_)) => continue,
					Err(RecvError::Closed) => break,
				},
			}
			if redirector.state() != ControllerState::Started {
				eprintln!("{} redirector exited", "●".red());
				break;
			}
		}

		redirector.stop().await;
		print_state("redirector", redirector.state());
	});
}

fn print_started(name: &str, pid: Option<u32>, detail: &str) {
	let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
	println!("{} {} {} pid {} ({})", "●".green(), name.bold(), "started".green(), pid, detail.dimmed());
	println!("  press Ctrl-C to stop");
}

fn print_state(name: &str, state: ControllerState) {
	let label = match state {
		ControllerState::Started => state.to_string().green().to_string(),
		ControllerState::Stopped => state.to_string().red().to_string(),
		_ => state.to_string().yellow().to_string(),
	};
	println!("{} {} {}", "●".dimmed(), name.bold(), label);
}

fn print_bandwidth(sample: &BandwidthSample) {
	println!(
		"  {} {:>10}  {} {:>10}",
		"↑".cyan(),
		format_bytes(sample.upload),
		"↓".cyan(),
		format_bytes(sample.download)
	);
}

fn format_bytes(bytes: u64) -> String {
	const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
	if bytes < 1024 {
		return format!("{} B", bytes);
	}
	let mut value = bytes as f64;
	let mut unit = 0;
	while value >= 1024.0 && unit < UNITS.len() - 1 {
		value /= 1024.0;
		unit += 1;
	}
	format!("{:.1} {}", value, UNITS[unit])
}

// ── driver ───────────────────────────────────────────────────────────────────

fn cmd_driver(args: &[String]) {
	let settings = config::load_settings();
	let driver = DriverLifecycle::system(&settings);

	match args.first().map(|s| s.as_str()).unwrap_or("status") {
		"status" => driver_status(&driver, args.iter().any(|a| a == "--json")),
		"install" => {
			match driver.ensure_installed() {
				Ok(DriverOutcome::Installed) => println!("{} driver installed", "●".green()),
				Ok(DriverOutcome::UpToDate) => println!("{} driver up to date", "●".green()),
				Ok(DriverOutcome::Updated { from, to }) => {
					println!("{} driver updated {} -> {}", "●".green(), from.dimmed(), to)
				}
				Ok(DriverOutcome::UpdateFailed(e)) => {
					println!("{} driver update failed, existing driver kept: {}", "●".yellow(), e)
				}
				Err(e) => fail(&e.to_string()),
			}
			if let Err(e) = driver.ensure_service_running(false) {
				fail(&e.to_string());
			}
		}
		"restart" => match driver.restart_service() {
			Ok(()) => println!("{} {} restarted", "●".green(), driver.service_name().bold()),
			Err(e) => fail(&e.to_string()),
		},
		"uninstall" => match driver.uninstall() {
			Ok(true) => println!("{} driver removed", "●".green()),
			Ok(false) => println!("{} driver not installed", "○".dimmed()),
			Err(e) => fail(&e.to_string()),
		},
		other => {
			eprintln!("unknown driver command: {}", other);
			eprintln!("usage: relayward driver [status|install|restart|uninstall]");
			std::process::exit(1);
		}
	}
}

fn driver_status(driver: &DriverLifecycle<relayward::SystemDriverHost>, json: bool) {
	let record = driver.record();
	let status = driver.service_status().ok();

	if json {
		let value = serde_json::json!({
			"driver": record,
			"service": driver.service_name(),
			"status": status,
		});
		match serde_json::to_string_pretty(&value) {
			Ok(text) => println!("{}", text),
			Err(e) => fail(&e.to_string()),
		}
		return;
	}

	let circle = match status {
		Some(ServiceStatus::Running) => "●".green().to_string(),
		Some(_) => "●".yellow().to_string(),
		None => "○".dimmed().to_string(),
	};
	let state = status
		.map(|s| s.to_string())
		.unwrap_or_else(|| "not registered".into());
	println!("{} {} {}", circle, driver.service_name().bold(), state);
	println!("  path       {}", record.path.display());
	println!("  artifact   {}", record.artifact.as_deref().unwrap_or("-"));
	println!("  expected   {}", record.expected_version.as_deref().unwrap_or("-"));
	println!("  installed  {}", record.installed_version.as_deref().unwrap_or("-"));
}

// ── logs ─────────────────────────────────────────────────────────────────────

fn cmd_logs(args: &[String]) {
	match (args.first().map(|s| s.as_str()), args.get(1)) {
		(Some("clear"), Some(backend)) => {
			let Some(kind) = BackendKind::from_name(backend) else {
				fail(&format!("unknown backend: {}", backend));
			};
			let settings: Settings = config::load_settings();
			let name = kind.policy().name;
			relayward::logs::clear_log(&settings.log_dir(), &name);
			println!("cleared {}", relayward::logs::backend_log_path(&settings.log_dir(), &name).display());
		}
		_ => {
			eprintln!("usage: relayward logs clear <ssr|redirector>");
			std::process::exit(1);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bytes_are_humanised() {
		assert_eq!(format_bytes(0), "0 B");
		assert_eq!(format_bytes(1023), "1023 B");
		assert_eq!(format_bytes(1024), "1.0 KiB");
		assert_eq!(format_bytes(1536), "1.5 KiB");
		assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
	}
}
