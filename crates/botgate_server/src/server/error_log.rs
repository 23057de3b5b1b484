#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One delivery attempt as written to the diagnostic log.
#[derive(Debug, Serialize)]
pub struct AttemptRecord<'a> {
	pub time_ms: i64,
	pub target: &'a str,
	pub op: &'a str,
	pub attempt: u32,
	pub ok: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// Append-only JSON-lines file for delivery diagnostics.
#[derive(Debug)]
pub struct ErrorLog {
	path: PathBuf,
	write: Mutex<()>,
}

impl ErrorLog {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			write: Mutex::new(()),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn append(&self, record: &AttemptRecord<'_>) -> anyhow::Result<()> {
		let mut line = serde_json::to_vec(record)?;
		line.push(b'\n');

		let _guard = self.write.lock().await;
		if let Some(parent) = self.path.parent()
			&& !parent.as_os_str().is_empty()
		{
			tokio::fs::create_dir_all(parent).await?;
		}
		let mut file = tokio::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.await?;
		file.write_all(&line).await?;
		file.flush().await?;
		Ok(())
	}
}
