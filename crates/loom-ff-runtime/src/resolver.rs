// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Builds the store, lock and rate limiter a runtime uses from configuration.

use std::sync::Arc;
use std::time::Duration;

use loom_ff_config::{LockConfig, StoreAdapter, StoreConfig};
use loom_ff_store::{
	FileFlagStore, FileRuntimeLock, FlagStore, InMemoryRuntimeLock, LockOptions, MemoryFlagStore,
	MemoryRateLimiter, RateLimiter, RedisFlagStore, RedisRateLimiter, RedisRuntimeLock, RuntimeLock,
};
use tracing::{info, warn};

use crate::error::Result;

/// A store and the lock guarding its read-modify-write cycles.
#[derive(Clone)]
pub struct ResolvedStore {
	pub adapter: StoreAdapter,
	pub store: Arc<dyn FlagStore>,
	pub lock: Arc<dyn RuntimeLock>,
}

impl std::fmt::Debug for ResolvedStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ResolvedStore")
			.field("adapter", &self.adapter)
			.field("store", &self.store.name())
			.field("lock", &self.lock.name())
			.finish()
	}
}

pub async fn resolve_store(store: &StoreConfig, lock: &LockConfig) -> Result<ResolvedStore> {
	let resolved = match (store.adapter, store.redis_url.as_deref()) {
		(StoreAdapter::Memory, _) => memory_pair(lock),
		(StoreAdapter::File, _) => {
			let flags = FileFlagStore::open(
				&store.file,
				Some(store.tmp_dir.clone()),
				Duration::from_millis(store.cache_ttl_ms),
			)
			.await?;
			let options = LockOptions {
				ttl: Duration::from_millis(lock.file_ttl_ms),
				retry_delay: Duration::from_millis(lock.file_retry_ms),
				acquire_timeout: lock.timeout(),
			};
			ResolvedStore {
				adapter: StoreAdapter::File,
				store: Arc::new(flags),
				lock: Arc::new(FileRuntimeLock::new(&lock.dir, options)),
			}
		}
		(StoreAdapter::Redis, Some(url)) => {
			let display = store.display_redis_url().unwrap_or_default();
			let options = LockOptions {
				ttl: Duration::from_millis(lock.redis_ttl_ms),
				retry_delay: Duration::from_millis(lock.redis_retry_ms),
				acquire_timeout: lock.timeout(),
			};
			ResolvedStore {
				adapter: StoreAdapter::Redis,
				store: Arc::new(RedisFlagStore::open(url, display.clone())?),
				lock: Arc::new(RedisRuntimeLock::open(url, display, options)?),
			}
		}
		(StoreAdapter::Redis, None) => {
			warn!("redis store adapter without a redis url, using memory");
			memory_pair(lock)
		}
	};
	info!(
		adapter = %resolved.adapter,
		store = resolved.store.name(),
		lock = resolved.lock.name(),
		"resolved flag store"
	);
	Ok(resolved)
}

fn memory_pair(lock: &LockConfig) -> ResolvedStore {
	ResolvedStore {
		adapter: StoreAdapter::Memory,
		store: Arc::new(MemoryFlagStore::new()),
		lock: Arc::new(InMemoryRuntimeLock::new(lock.timeout())),
	}
}

/// Redis-backed when the store runs on Redis, in-process otherwise.
pub fn resolve_rate_limiter(store: &StoreConfig) -> Result<Arc<dyn RateLimiter>> {
	match (store.adapter, store.redis_url.as_deref()) {
		(StoreAdapter::Redis, Some(url)) => {
			let display = store.display_redis_url().unwrap_or_default();
			Ok(Arc::new(RedisRateLimiter::open(url, display)?))
		}
		_ => Ok(Arc::new(MemoryRateLimiter::new())),
	}
}
