// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Mutex as KeyMutex;

use super::{elapsed_ms, LockToken, RuntimeLock};
use crate::error::LockError;

/// Process-local lock. Waiters on a key are served in arrival order.
#[derive(Debug)]
pub struct InMemoryRuntimeLock {
	keys: Mutex<HashMap<String, Arc<KeyMutex<()>>>>,
	acquire_timeout: Duration,
}

impl InMemoryRuntimeLock {
	pub fn new(acquire_timeout: Duration) -> Self {
		Self {
			keys: Mutex::new(HashMap::new()),
			acquire_timeout,
		}
	}

	fn slot(&self, key: &str) -> Arc<KeyMutex<()>> {
		Arc::clone(
			self.keys
				.lock()
				.entry(key.to_string())
				.or_insert_with(|| Arc::new(KeyMutex::new(()))),
		)
	}

	#[cfg(test)]
	fn tracked_keys(&self) -> usize {
		self.keys.lock().len()
	}
}

#[async_trait]
impl RuntimeLock for InMemoryRuntimeLock {
	fn name(&self) -> &'static str {
		"memory"
	}

	async fn acquire(&self, key: &str) -> Result<LockToken, LockError> {
		let started = tokio::time::Instant::now();
		let slot = self.slot(key);
		match tokio::time::timeout(self.acquire_timeout, slot.lock_owned()).await {
			Ok(guard) => Ok(LockToken {
				key: key.to_string(),
				token: String::new(),
				guard: Some(guard),
			}),
			Err(_) => Err(LockError::Timeout {
				key: key.to_string(),
				waited_ms: elapsed_ms(started),
			}),
		}
	}

	async fn release(&self, token: LockToken) -> Result<(), LockError> {
		drop(token.guard);
		let mut keys = self.keys.lock();
		// Only the map holds the slot: nobody is waiting, forget the key.
		if keys
			.get(&token.key)
			.is_some_and(|slot| Arc::strong_count(slot) == 1)
		{
			keys.remove(&token.key);
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lock::tests::assert_serialized;
	use crate::lock::with_lock;

	#[tokio::test]
	async fn serializes_concurrent_holders() {
		let lock = Arc::new(InMemoryRuntimeLock::new(Duration::from_secs(5)));
		assert_serialized(lock.clone(), 16).await;
		assert_eq!(lock.tracked_keys(), 0);
	}

	#[tokio::test]
	async fn distinct_keys_do_not_block() {
		let lock = InMemoryRuntimeLock::new(Duration::from_millis(50));
		let held = lock.acquire("a").await.unwrap();
		let other = with_lock(&lock, "b", || async { "ran" }).await.unwrap();
		assert_eq!(other, "ran");
		lock.release(held).await.unwrap();
	}

	#[tokio::test]
	async fn times_out_when_held() {
		let lock = InMemoryRuntimeLock::new(Duration::from_millis(30));
		let held = lock.acquire("k").await.unwrap();
		let err = lock.acquire("k").await.unwrap_err();
		assert!(matches!(err, LockError::Timeout { ref key, .. } if key == "k"));
		lock.release(held).await.unwrap();
		assert!(lock.acquire("k").await.is_ok());
	}
}
