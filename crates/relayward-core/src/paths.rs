use std::path::{Path, PathBuf};

pub const BIN_DIR: &str = "bin";
pub const LOG_DIR: &str = "logging";

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("RELAYWARD_CONFIG_DIR") {
		PathBuf::from(dir)
	} else if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join("relayward")
	} else if let Some(home) = home_dir() {
		home.join(".config").join("relayward")
	} else {
		std::env::temp_dir().join("relayward").join("config")
	}
}

pub fn bin_dir(base_dir: &Path) -> PathBuf {
	base_dir.join(BIN_DIR)
}

pub fn default_log_dir(base_dir: &Path) -> PathBuf {
	base_dir.join(LOG_DIR)
}

pub fn default_driver_path() -> PathBuf {
	let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
	PathBuf::from(root)
		.join("System32")
		.join("drivers")
		.join("netfilter2.sys")
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME")
		.or_else(|_| std::env::var("USERPROFILE"))
		.ok()
		.map(PathBuf::from)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bin_dir_is_under_base() {
		let base = Path::new("/opt/relayward");
		assert_eq!(bin_dir(base), base.join("bin"));
		assert_eq!(default_log_dir(base), base.join("logging"));
	}

	#[test]
	fn driver_path_ends_with_sys_file() {
		let path = default_driver_path();
		assert_eq!(path.file_name().unwrap(), "netfilter2.sys");
	}
}
