use std::path::{Path, PathBuf};

#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

pub fn backend_log_path(log_dir: &Path, backend: &str) -> PathBuf {
	log_dir.join(format!("{}.log", backend))
}

pub fn rotated_log_path(path: &Path) -> PathBuf {
	let mut name = path.file_name().unwrap_or_default().to_os_string();
	name.push(".1");
	path.with_file_name(name)
}

/// Removes a backend's output log. Missing files are fine.
pub fn clear_log(log_dir: &Path, backend: &str) {
	let path = backend_log_path(log_dir, backend);
	match std::fs::remove_file(&path) {
		Ok(()) => tracing::debug!(path = %path.display(), "cleared backend log"),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
		Err(e) => tracing::warn!(path = %path.display(), "failed to clear backend log: {}", e),
	}
}
