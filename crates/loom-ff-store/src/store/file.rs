// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use loom_ff_core::{EvaluationResult, FlagConfig, FlagSnapshot, OverrideEntry, OverrideScope};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::memory::MemoryFlagStore;
use super::{EvalRequest, FlagStore};
use crate::error::{Result, StoreError};
use crate::snapshot::write_atomic;

pub const DEFAULT_STORE_FILE: &str = ".runtime/flags.snapshot.json";
pub const DEFAULT_STORE_TMP_DIR: &str = ".runtime/tmp";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(1000);

#[derive(Debug, Default)]
struct DiskState {
	/// mtime of the file contents currently held in memory.
	loaded_mtime: Option<SystemTime>,
	checked_at: Option<Instant>,
}

/// Snapshot-file store: an in-memory copy refreshed when the file changes.
///
/// Reads within `cache_ttl` of the last check are served from memory. After
/// that a `stat` decides whether the file must be re-read. The refresh runs
/// under a single async mutex, so concurrent readers share one disk read.
/// Writes go to a temp file in `tmp_dir` and are renamed over the target.
#[derive(Debug)]
pub struct FileFlagStore {
	memory: MemoryFlagStore,
	file: PathBuf,
	tmp_dir: PathBuf,
	cache_ttl: Duration,
	disk: Mutex<DiskState>,
	disk_reads: AtomicU64,
}

impl FileFlagStore {
	pub async fn open(
		file: impl Into<PathBuf>,
		tmp_dir: Option<PathBuf>,
		cache_ttl: Duration,
	) -> Result<Self> {
		let file = file.into();
		let tmp_dir = match tmp_dir {
			Some(dir) => dir,
			None => file
				.parent()
				.map(Path::to_path_buf)
				.unwrap_or_else(|| PathBuf::from(".")),
		};
		if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| StoreError::io(parent, e))?;
		}
		tokio::fs::create_dir_all(&tmp_dir)
			.await
			.map_err(|e| StoreError::io(&tmp_dir, e))?;

		let store = Self {
			memory: MemoryFlagStore::new(),
			file,
			tmp_dir,
			cache_ttl,
			disk: Mutex::new(DiskState::default()),
			disk_reads: AtomicU64::new(0),
		};
		{
			let mut disk = store.disk.lock().await;
			store.reload(&mut disk).await?;
		}
		info!(
			file = %store.file.display(),
			cache_ttl_ms = cache_ttl.as_millis() as u64,
			"opened file flag store"
		);
		Ok(store)
	}

	pub fn path(&self) -> &Path {
		&self.file
	}

	/// How many times the snapshot file has been read from disk.
	pub fn disk_reads(&self) -> u64 {
		self.disk_reads.load(Ordering::Relaxed)
	}

	async fn refresh(&self) -> Result<()> {
		let mut disk = self.disk.lock().await;
		if disk
			.checked_at
			.is_some_and(|at| at.elapsed() < self.cache_ttl)
		{
			return Ok(());
		}
		self.reload(&mut disk).await
	}

	/// Re-read the file if its mtime moved. Caller holds the disk mutex.
	async fn reload(&self, disk: &mut DiskState) -> Result<()> {
		disk.checked_at = Some(Instant::now());
		let mtime = match tokio::fs::metadata(&self.file).await {
			Ok(meta) => meta.modified().ok(),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				if disk.loaded_mtime.take().is_some() {
					debug!(file = %self.file.display(), "snapshot file removed, clearing store");
				}
				self.memory.load(FlagSnapshot::default());
				return Ok(());
			}
			Err(e) => return Err(StoreError::io(&self.file, e)),
		};
		if mtime.is_some() && mtime == disk.loaded_mtime {
			return Ok(());
		}

		let contents = tokio::fs::read_to_string(&self.file)
			.await
			.map_err(|e| StoreError::io(&self.file, e))?;
		let reads = self.disk_reads.fetch_add(1, Ordering::Relaxed) + 1;
		let snapshot = if contents.trim().is_empty() {
			FlagSnapshot::default()
		} else {
			match serde_json::from_str::<FlagSnapshot>(&contents) {
				Ok(snapshot) => snapshot,
				Err(e) => {
					warn!(
						file = %self.file.display(),
						error = %e,
						"malformed snapshot file, treating as empty"
					);
					FlagSnapshot::default()
				}
			}
		};
		debug!(
			file = %self.file.display(),
			flags = snapshot.flags.len(),
			overrides = snapshot.overrides.len(),
			reads,
			"loaded snapshot file"
		);
		self.memory.load(snapshot);
		disk.loaded_mtime = mtime;
		Ok(())
	}

	async fn persist(&self, disk: &mut DiskState) -> Result<()> {
		let snapshot = self.memory.snapshot_now();
		let payload = serde_json::to_string_pretty(&snapshot)?;
		write_atomic(&self.file, &self.tmp_dir, payload.as_bytes()).await?;
		disk.loaded_mtime = tokio::fs::metadata(&self.file)
			.await
			.ok()
			.and_then(|m| m.modified().ok());
		disk.checked_at = Some(Instant::now());
		Ok(())
	}

	/// Run a mutation against fresh file contents and write the result back.
	async fn mutate<'a, T, F, Fut>(&'a self, op: F) -> Result<T>
	where
		F: FnOnce(&'a MemoryFlagStore) -> Fut + Send,
		Fut: std::future::Future<Output = Result<T>> + Send,
		T: Send,
	{
		let mut disk = self.disk.lock().await;
		self.reload(&mut disk).await?;
		let out = op(&self.memory).await?;
		self.persist(&mut disk).await?;
		Ok(out)
	}
}

#[async_trait]
impl FlagStore for FileFlagStore {
	fn name(&self) -> &'static str {
		"file"
	}

	async fn list_flags(&self) -> Result<Vec<FlagConfig>> {
		self.refresh().await?;
		self.memory.list_flags().await
	}

	async fn get_flag(&self, key: &str) -> Result<Option<FlagConfig>> {
		self.refresh().await?;
		self.memory.get_flag(key).await
	}

	#[instrument(skip(self, config), fields(flag = %config.key))]
	async fn put_flag(&self, config: FlagConfig) -> Result<FlagConfig> {
		self.mutate(|memory| memory.put_flag(config)).await
	}

	#[instrument(skip(self))]
	async fn remove_flag(&self, key: &str) -> Result<()> {
		self.mutate(|memory| memory.remove_flag(key)).await
	}

	async fn list_overrides(&self, flag: &str) -> Result<Vec<OverrideEntry>> {
		self.refresh().await?;
		self.memory.list_overrides(flag).await
	}

	#[instrument(skip(self, entry), fields(flag = %entry.flag, scope = %entry.scope))]
	async fn put_override(&self, entry: OverrideEntry) -> Result<OverrideEntry> {
		self.mutate(|memory| memory.put_override(entry)).await
	}

	#[instrument(skip(self))]
	async fn remove_override(&self, flag: &str, scope: &OverrideScope) -> Result<()> {
		self.mutate(|memory| memory.remove_override(flag, scope)).await
	}

	#[instrument(skip(self))]
	async fn delete_overrides_by_user(&self, user_id: &str) -> Result<usize> {
		self.mutate(|memory| memory.delete_overrides_by_user(user_id))
			.await
	}

	async fn evaluate(&self, key: &str, req: EvalRequest<'_>) -> Option<EvaluationResult> {
		if let Err(e) = self.refresh().await {
			warn!(flag = %key, error = %e, "snapshot refresh failed, evaluating cached state");
		}
		self.memory.evaluate(key, req).await
	}

	async fn snapshot(&self) -> Result<FlagSnapshot> {
		self.refresh().await?;
		self.memory.snapshot().await
	}

	#[instrument(skip(self, snapshot), fields(flags = snapshot.flags.len()))]
	async fn replace_all(&self, snapshot: FlagSnapshot) -> Result<()> {
		let mut disk = self.disk.lock().await;
		self.memory.load(snapshot);
		self.persist(&mut disk).await
	}
}
