// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Append-only NDJSON file sink.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::SinkError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum Command {
	Line(String),
	Flush(oneshot::Sender<()>),
}

/// Serializes records as JSON lines into one file.
///
/// All writes go through a single background task, so concurrent producers
/// never interleave partial lines. Producers never wait: when the queue is
/// full the record is dropped and [`NdjsonSink::append`] returns `false`.
#[derive(Debug, Clone)]
pub struct NdjsonSink {
	path: PathBuf,
	tx: mpsc::Sender<Command>,
}

impl NdjsonSink {
	/// Start the writer task. Must be called inside a Tokio runtime.
	pub fn spawn(path: impl Into<PathBuf>, queue_capacity: usize) -> Self {
		let path = path.into();
		let (tx, rx) = mpsc::channel(queue_capacity.max(1));
		tokio::spawn(Self::writer_task(path.clone(), rx));
		Self { path, tx }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Queue one record; `false` if it was dropped.
	pub fn append<T: Serialize>(&self, record: &T) -> bool {
		match format_json_line(record) {
			Ok(line) => self.tx.try_send(Command::Line(line)).is_ok(),
			Err(e) => {
				debug!(path = %self.path.display(), error = %e, "dropping unserializable record");
				false
			}
		}
	}

	/// Wait until every record queued before this call has been written.
	pub async fn flush(&self) -> Result<(), SinkError> {
		let closed = || SinkError::Closed(self.path.display().to_string());
		let (done_tx, done_rx) = oneshot::channel();
		self.tx
			.send(Command::Flush(done_tx))
			.await
			.map_err(|_| closed())?;
		done_rx.await.map_err(|_| closed())
	}

	async fn writer_task(path: PathBuf, mut rx: mpsc::Receiver<Command>) {
		let mut file: Option<tokio::fs::File> = None;
		while let Some(command) = rx.recv().await {
			match command {
				Command::Line(line) => {
					if let Err(e) = write_line(&path, &mut file, &line).await {
						warn!(path = %path.display(), error = %e, "ndjson sink write failed");
						file = None;
					}
				}
				Command::Flush(done) => {
					let _ = done.send(());
				}
			}
		}
		debug!(path = %path.display(), "ndjson sink closed");
	}
}

async fn open_append(path: &Path) -> Result<tokio::fs::File, SinkError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		tokio::fs::create_dir_all(parent)
			.await
			.map_err(|e| SinkError::Transient(format!("failed to create {}: {e}", parent.display())))?;
	}
	OpenOptions::new()
		.create(true)
		.append(true)
		.open(path)
		.await
		.map_err(|e| SinkError::Transient(format!("failed to open file: {e}")))
}

async fn write_line(
	path: &Path,
	file: &mut Option<tokio::fs::File>,
	line: &str,
) -> Result<(), SinkError> {
	if file.is_none() {
		*file = Some(open_append(path).await?);
	}
	let Some(handle) = file.as_mut() else {
		return Err(SinkError::Permanent("file handle not initialized".to_string()));
	};
	handle
		.write_all(line.as_bytes())
		.await
		.map_err(|e| SinkError::Transient(format!("failed to write to file: {e}")))?;
	handle
		.flush()
		.await
		.map_err(|e| SinkError::Transient(format!("failed to flush file: {e}")))
}

pub fn format_json_line<T: Serialize>(record: &T) -> Result<String, SinkError> {
	let json = serde_json::to_string(record)
		.map_err(|e| SinkError::Permanent(format!("JSON serialization failed: {e}")))?;
	Ok(format!("{json}\n"))
}
