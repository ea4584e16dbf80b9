// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use loom_ff_core::now_ms;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{elapsed_ms, LockOptions, LockToken, RuntimeLock};
use crate::error::LockError;

pub const DEFAULT_FILE_LOCK_TTL: Duration = Duration::from_millis(30_000);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFile {
	expires_at: i64,
	token: String,
}

/// Cross-process lock backed by `{dir}/{key}.lock` files.
///
/// Creation uses `create_new`, so exactly one process wins. A lock file whose
/// `expiresAt` has passed is treated as abandoned and removed, as is an
/// unparseable one whose mtime is older than the ttl.
#[derive(Debug)]
pub struct FileRuntimeLock {
	dir: PathBuf,
	options: LockOptions,
}

impl FileRuntimeLock {
	pub fn new(dir: impl Into<PathBuf>, options: LockOptions) -> Self {
		Self {
			dir: dir.into(),
			options,
		}
	}

	fn path_for(&self, key: &str) -> PathBuf {
		let safe: String = key
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
			.collect();
		self.dir.join(format!("{safe}.lock"))
	}

	async fn try_create(&self, path: &Path, token: &str) -> Result<bool, LockError> {
		let body = LockFile {
			expires_at: now_ms() + self.options.ttl.as_millis() as i64,
			token: token.to_string(),
		};
		let bytes = serde_json::to_vec(&body).unwrap_or_default();
		let open = tokio::fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(path)
			.await;
		match open {
			Ok(mut file) => {
				file.write_all(&bytes).await.map_err(|e| io(path, e))?;
				file.flush().await.map_err(|e| io(path, e))?;
				Ok(true)
			}
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
			Err(e) => Err(io(path, e)),
		}
	}

	/// Remove the lock file if it has expired. Returns true when removed.
	async fn clear_stale(&self, path: &Path) -> bool {
		let Ok(contents) = tokio::fs::read(path).await else {
			return false;
		};
		match serde_json::from_slice::<LockFile>(&contents) {
			Ok(existing) => {
				if existing.expires_at >= now_ms() {
					return false;
				}
				warn!(path = %path.display(), expired_at = existing.expires_at, "removing stale lock file");
			}
			// Empty or torn body: the holder died between create and write,
			// or is still writing. Only the file's age can tell them apart.
			Err(_) => {
				if !self.older_than_ttl(path).await {
					return false;
				}
				warn!(path = %path.display(), "removing unreadable lock file past its ttl");
			}
		}
		tokio::fs::remove_file(path).await.is_ok()
	}

	async fn older_than_ttl(&self, path: &Path) -> bool {
		let Ok(modified) = tokio::fs::metadata(path).await.and_then(|m| m.modified()) else {
			return false;
		};
		modified
			.elapsed()
			.is_ok_and(|age| age >= self.options.ttl)
	}
}

fn io(path: &Path, source: std::io::Error) -> LockError {
	LockError::Io {
		path: path.to_path_buf(),
		source,
	}
}

#[async_trait]
impl RuntimeLock for FileRuntimeLock {
	fn name(&self) -> &'static str {
		"file"
	}

	async fn acquire(&self, key: &str) -> Result<LockToken, LockError> {
		tokio::fs::create_dir_all(&self.dir)
			.await
			.map_err(|e| io(&self.dir, e))?;
		let path = self.path_for(key);
		let token = Uuid::new_v4().to_string();
		let started = tokio::time::Instant::now();

		loop {
			if self.try_create(&path, &token).await? {
				debug!(path = %path.display(), "acquired file lock");
				return Ok(LockToken {
					key: key.to_string(),
					token,
					guard: None,
				});
			}
			if self.clear_stale(&path).await {
				continue;
			}
			if started.elapsed() >= self.options.acquire_timeout {
				return Err(LockError::Timeout {
					key: key.to_string(),
					waited_ms: elapsed_ms(started),
				});
			}
			tokio::time::sleep(self.options.retry_delay).await;
		}
	}

	async fn release(&self, token: LockToken) -> Result<(), LockError> {
		let path = self.path_for(&token.key);
		let contents = match tokio::fs::read(&path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(io(&path, e)),
		};
		match serde_json::from_slice::<LockFile>(&contents) {
			Ok(current) if current.token == token.token => match tokio::fs::remove_file(&path).await {
				Ok(()) => Ok(()),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
				Err(e) => Err(io(&path, e)),
			},
			_ => {
				debug!(path = %path.display(), "lock file now owned by another holder, leaving it");
				Ok(())
			}
		}
	}
}
