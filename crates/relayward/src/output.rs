use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::logs;

const RECENT_LINES: usize = 256;

/// Captures a backend's output: recent lines in memory, every line on disk.
///
/// Disk writes are best-effort. A failed open or write is logged and the line
/// still reaches the in-memory buffer and the classifier.
#[derive(Clone)]
pub struct OutputCapture {
	recent: Arc<Mutex<VecDeque<String>>>,
	log_writer: Arc<Mutex<LogWriter>>,
}

struct LogWriter {
	file: Option<File>,
	path: PathBuf,
	bytes_written: u64,
	max_size: u64,
}

impl OutputCapture {
	pub fn new(log_dir: &Path, backend: &str, max_log_size: u64) -> Self {
		if let Err(e) = fs::create_dir_all(log_dir) {
			tracing::warn!(dir = %log_dir.display(), "failed to create log dir: {}", e);
		}

		let path = logs::backend_log_path(log_dir, backend);
		let file = open_append(&path);
		let bytes_written = file
			.as_ref()
			.and_then(|f| f.metadata().ok())
			.map(|m| m.len())
			.unwrap_or(0);

		Self {
			recent: Arc::new(Mutex::new(VecDeque::with_capacity(RECENT_LINES))),
			log_writer: Arc::new(Mutex::new(LogWriter {
				file,
				path,
				bytes_written,
				max_size: max_log_size,
			})),
		}
	}

	pub async fn write_line(&self, line: &str) {
		{
			let mut recent = self.recent.lock().await;
			if recent.len() >= RECENT_LINES {
				recent.pop_front();
			}
			recent.push_back(line.to_string());
		}

		let mut writer = self.log_writer.lock().await;
		writer.write_line(line);
	}

	pub async fn snapshot(&self) -> Vec<String> {
		let recent = self.recent.lock().await;
		recent.iter().cloned().collect()
	}
}

fn open_append(path: &Path) -> Option<File> {
	match OpenOptions::new().create(true).append(true).open(path) {
		Ok(file) => Some(file),
		Err(e) => {
			tracing::warn!(path = %path.display(), "failed to open backend log: {}", e);
			None
		}
	}
}

impl LogWriter {
	fn write_line(&mut self, line: &str) {
		let Some(ref mut file) = self.file else {
			return;
		};

		let record = format!("{}{}", line, logs::LINE_ENDING);
		if let Err(e) = file.write_all(record.as_bytes()) {
			tracing::warn!(path = %self.path.display(), "failed to write backend log: {}", e);
			return;
		}

		self.bytes_written += record.len() as u64;
		if self.max_size > 0 && self.bytes_written >= self.max_size {
			self.rotate();
		}
	}

	fn rotate(&mut self) {
		if let Some(file) = self.file.take() {
			drop(file);
		}

		let rotated = logs::rotated_log_path(&self.path);
		if let Err(e) = fs::rename(&self.path, &rotated) {
			tracing::warn!(path = %self.path.display(), "failed to rotate backend log: {}", e);
		}

		self.file = open_append(&self.path);
		self.bytes_written = 0;
	}
}
