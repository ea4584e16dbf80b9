// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-key mutual exclusion for flag mutations.

pub mod file;
pub mod memory;
pub mod redis;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

use crate::error::LockError;

pub use self::file::FileRuntimeLock;
pub use self::memory::InMemoryRuntimeLock;
pub use self::redis::RedisRuntimeLock;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
	/// How long a held lock stays valid if its holder dies.
	pub ttl: Duration,
	pub retry_delay: Duration,
	/// Give up acquiring after this long.
	pub acquire_timeout: Duration,
}

impl LockOptions {
	pub fn new(ttl: Duration) -> Self {
		Self {
			ttl,
			retry_delay: DEFAULT_RETRY_DELAY,
			acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
		}
	}
}

/// Proof of a held lock, handed back to [`RuntimeLock::release`].
#[derive(Debug)]
pub struct LockToken {
	key: String,
	token: String,
	guard: Option<OwnedMutexGuard<()>>,
}

impl LockToken {
	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn token(&self) -> &str {
		&self.token
	}
}

#[async_trait]
pub trait RuntimeLock: Send + Sync {
	fn name(&self) -> &'static str;

	/// Block until `key` is held or the acquire timeout passes.
	async fn acquire(&self, key: &str) -> Result<LockToken, LockError>;

	async fn release(&self, token: LockToken) -> Result<(), LockError>;
}

/// Run `f` while holding `key`. Release failures are logged, not returned:
/// the work already happened and the lock TTL reclaims the key.
pub async fn with_lock<L, F, Fut, T>(lock: &L, key: &str, f: F) -> Result<T, LockError>
where
	L: RuntimeLock + ?Sized,
	F: FnOnce() -> Fut,
	Fut: Future<Output = T>,
{
	let token = lock.acquire(key).await?;
	let out = f().await;
	if let Err(e) = lock.release(token).await {
		warn!(lock = lock.name(), key = %key, error = %e, "lock release failed");
	}
	Ok(out)
}

fn elapsed_ms(since: tokio::time::Instant) -> u64 {
	since.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	/// N concurrent holders append to a shared list; none may overlap.
	pub(crate) async fn assert_serialized(lock: Arc<dyn RuntimeLock>, n: usize) {
		let active = Arc::new(AtomicUsize::new(0));
		let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
		let handles: Vec<_> = (0..n)
			.map(|i| {
				let lock = Arc::clone(&lock);
				let active = Arc::clone(&active);
				let order = Arc::clone(&order);
				tokio::spawn(async move {
					with_lock(lock.as_ref(), "k", || async {
						assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
						tokio::time::sleep(Duration::from_millis(2)).await;
						order.lock().push(i);
						assert_eq!(active.fetch_sub(1, Ordering::SeqCst), 1);
					})
					.await
					.unwrap();
				})
			})
			.collect();
		for handle in futures::future::join_all(handles).await {
			handle.unwrap();
		}
		let mut seen = order.lock().clone();
		assert_eq!(seen.len(), n);
		seen.sort_unstable();
		seen.dedup();
		assert_eq!(seen.len(), n);
	}

	#[tokio::test]
	async fn with_lock_returns_the_closure_value() {
		let lock = InMemoryRuntimeLock::new(DEFAULT_ACQUIRE_TIMEOUT);
		let value = with_lock(&lock, "k", || async { 41 + 1 }).await.unwrap();
		assert_eq!(value, 42);
	}
}
