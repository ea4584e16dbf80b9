// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Snapshot files and wholesale restore.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use loom_ff_core::FlagSnapshot;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::store::FlagStore;

/// Write `bytes` to a temp file in `tmp_dir`, then rename it over `target`.
pub async fn write_atomic(target: &Path, tmp_dir: &Path, bytes: &[u8]) -> Result<()> {
	let base = target
		.file_name()
		.map(|n| n.to_string_lossy().into_owned())
		.unwrap_or_else(|| "snapshot".to_string());
	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_nanos())
		.unwrap_or_default();
	let tmp_path = tmp_dir.join(format!("{base}.{}.{nanos}.tmp", std::process::id()));

	let mut file = tokio::fs::File::create(&tmp_path)
		.await
		.map_err(|e| StoreError::io(&tmp_path, e))?;
	let written = async {
		file.write_all(bytes).await?;
		file.sync_all().await
	}
	.await;
	drop(file);
	if let Err(e) = written {
		discard_tmp(&tmp_path).await;
		return Err(StoreError::io(&tmp_path, e));
	}

	if let Err(e) = tokio::fs::rename(&tmp_path, target).await {
		discard_tmp(&tmp_path).await;
		return Err(StoreError::io(target, e));
	}
	Ok(())
}

async fn discard_tmp(path: &Path) {
	match tokio::fs::remove_file(path).await {
		Ok(()) => {}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
		Err(e) => warn!(path = %path.display(), error = %e, "could not remove temp snapshot"),
	}
}

/// Read a snapshot file; missing `flags`/`overrides` arrays read as empty.
pub async fn read_snapshot_file(path: &Path) -> Result<FlagSnapshot> {
	let contents = tokio::fs::read_to_string(path)
		.await
		.map_err(|e| StoreError::io(path, e))?;
	Ok(serde_json::from_str(&contents)?)
}

/// Pretty JSON with a trailing newline, written atomically next to `path`.
pub async fn write_snapshot_file(path: &Path, snapshot: &FlagSnapshot) -> Result<()> {
	let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
		Some(dir) => dir.to_path_buf(),
		None => std::path::PathBuf::from("."),
	};
	tokio::fs::create_dir_all(&dir)
		.await
		.map_err(|e| StoreError::io(&dir, e))?;
	let mut payload = serde_json::to_string_pretty(snapshot)?;
	payload.push('\n');
	write_atomic(path, &dir, payload.as_bytes()).await
}

/// Content id of a snapshot: hex sha256 of its compact JSON.
pub fn snapshot_id(snapshot: &FlagSnapshot) -> Result<String> {
	let bytes = serde_json::to_vec(snapshot)?;
	Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Replace everything in `store` with `snapshot`.
///
/// Entries are stored as given, timestamps included, so restoring a
/// store's own snapshot leaves it unchanged.
pub async fn restore_snapshot(store: &dyn FlagStore, snapshot: FlagSnapshot) -> Result<()> {
	let flags = snapshot.flags.len();
	let overrides = snapshot.overrides.len();
	store.replace_all(snapshot).await?;
	info!(
		store = store.name(),
		flags, overrides, "restored flag snapshot"
	);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::MemoryFlagStore;
	use loom_ff_core::{FlagConfig, FlagValue, OverrideEntry, OverrideScope, RolloutStrategy};
	use tempfile::TempDir;

	async fn populated() -> MemoryFlagStore {
		let store = MemoryFlagStore::new();
		let mut flag = FlagConfig::new("checkout", 1);
		flag.rollout = Some(RolloutStrategy::with_percent(25.0));
		store.put_flag(flag).await.unwrap();
		let mut other = FlagConfig::new("banner", 1);
		other.default_value = FlagValue::from("blue");
		store.put_flag(other).await.unwrap();
		store
			.put_override(OverrideEntry::new("checkout", OverrideScope::user("amy"), true, 0))
			.await
			.unwrap();
		store
			.put_override(OverrideEntry::new("checkout", OverrideScope::Global, false, 0))
			.await
			.unwrap();
		store
	}

	#[tokio::test]
	async fn restore_of_own_snapshot_is_identity() {
		let store = populated().await;
		let before = store.snapshot().await.unwrap();
		restore_snapshot(&store, before.clone()).await.unwrap();
		assert_eq!(store.snapshot().await.unwrap(), before);
	}

	#[tokio::test]
	async fn restore_replaces_existing_state() {
		let store = populated().await;
		let target = MemoryFlagStore::new();
		target.put_flag(FlagConfig::new("stale", 1)).await.unwrap();
		restore_snapshot(&target, store.snapshot().await.unwrap())
			.await
			.unwrap();
		assert!(target.get_flag("stale").await.unwrap().is_none());
		assert_eq!(
			target.snapshot().await.unwrap(),
			store.snapshot().await.unwrap()
		);
	}

	#[tokio::test]
	async fn snapshot_orders_flags_by_key() {
		let snapshot = populated().await.snapshot().await.unwrap();
		let keys: Vec<_> = snapshot.flags.iter().map(|f| f.key.as_str()).collect();
		assert_eq!(keys, vec!["banner", "checkout"]);
		let scopes: Vec<_> = snapshot.overrides.iter().map(|o| o.scope.to_string()).collect();
		assert_eq!(scopes, vec!["user:amy", "global"]);
	}

	#[tokio::test]
	async fn file_round_trip_and_defaults() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("nested").join("snap.json");
		let snapshot = populated().await.snapshot().await.unwrap();
		write_snapshot_file(&path, &snapshot).await.unwrap();
		assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
		assert_eq!(read_snapshot_file(&path).await.unwrap(), snapshot);

		let sparse = dir.path().join("sparse.json");
		std::fs::write(&sparse, "{}").unwrap();
		assert_eq!(read_snapshot_file(&sparse).await.unwrap(), FlagSnapshot::default());
	}

	#[tokio::test]
	async fn failed_write_leaves_no_temp_file() {
		let dir = TempDir::new().unwrap();
		let tmp = dir.path().join("tmp");
		std::fs::create_dir_all(&tmp).unwrap();
		// A non-empty directory cannot be replaced by a rename.
		let target = dir.path().join("flags.json");
		std::fs::create_dir_all(target.join("occupied")).unwrap();

		let err = write_atomic(&target, &tmp, b"{}").await.unwrap_err();
		assert!(matches!(err, StoreError::Io { .. }));
		assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
	}

	#[tokio::test]
	async fn snapshot_id_tracks_content() {
		let snapshot = populated().await.snapshot().await.unwrap();
		let id = snapshot_id(&snapshot).unwrap();
		assert_eq!(id.len(), 64);
		assert_eq!(snapshot_id(&snapshot.clone()).unwrap(), id);

		let mut changed = snapshot.clone();
		changed.flags.pop();
		assert_ne!(snapshot_id(&changed).unwrap(), id);
	}
}
