// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisResult;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use uuid::Uuid;

use super::memory::InMemoryRuntimeLock;
use super::{elapsed_ms, LockOptions, LockToken, RuntimeLock};
use crate::error::LockError;

pub const DEFAULT_REDIS_LOCK_TTL: Duration = Duration::from_millis(15_000);
const LOCK_PREFIX: &str = "ff:lock:";

const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
	return redis.call("del", KEYS[1])
else
	return 0
end
"#;

enum Attempt {
	Acquired,
	Busy,
}

/// Distributed lock using `SET key token NX PX ttl`.
///
/// Release deletes the key only while it still carries our token. If Redis
/// errors, the lock switches to a process-local lock for good.
pub struct RedisRuntimeLock {
	client: redis::Client,
	conn: OnceCell<MultiplexedConnection>,
	fallback: InMemoryRuntimeLock,
	degraded: AtomicBool,
	options: LockOptions,
	display_url: String,
}

impl std::fmt::Debug for RedisRuntimeLock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RedisRuntimeLock")
			.field("url", &self.display_url)
			.field("degraded", &self.is_degraded())
			.field("options", &self.options)
			.finish()
	}
}

impl RedisRuntimeLock {
	pub fn new(client: redis::Client, display_url: impl Into<String>, options: LockOptions) -> Self {
		Self {
			client,
			conn: OnceCell::new(),
			fallback: InMemoryRuntimeLock::new(options.acquire_timeout),
			degraded: AtomicBool::new(false),
			options,
			display_url: display_url.into(),
		}
	}

	pub fn open(url: &str, display_url: impl Into<String>, options: LockOptions) -> Result<Self, LockError> {
		Ok(Self::new(redis::Client::open(url)?, display_url, options))
	}

	pub fn is_degraded(&self) -> bool {
		self.degraded.load(Ordering::Acquire)
	}

	async fn connection(&self) -> RedisResult<MultiplexedConnection> {
		self.conn
			.get_or_try_init(|| self.client.get_multiplexed_async_connection())
			.await
			.cloned()
	}

	fn degrade(&self, error: &redis::RedisError) {
		if !self.degraded.swap(true, Ordering::AcqRel) {
			warn!(
				url = %self.display_url,
				error = %error,
				"redis lock failed, falling back to in-process lock"
			);
		}
	}

	async fn try_set(&self, redis_key: &str, token: &str) -> RedisResult<Attempt> {
		let mut conn = self.connection().await?;
		let reply: Option<String> = redis::cmd("SET")
			.arg(redis_key)
			.arg(token)
			.arg("NX")
			.arg("PX")
			.arg(self.options.ttl.as_millis() as u64)
			.query_async(&mut conn)
			.await?;
		Ok(match reply {
			Some(_) => Attempt::Acquired,
			None => Attempt::Busy,
		})
	}
}

#[async_trait]
impl RuntimeLock for RedisRuntimeLock {
	fn name(&self) -> &'static str {
		"redis"
	}

	async fn acquire(&self, key: &str) -> Result<LockToken, LockError> {
		if self.is_degraded() {
			return self.fallback.acquire(key).await;
		}
		let redis_key = format!("{LOCK_PREFIX}{key}");
		let token = Uuid::new_v4().to_string();
		let started = tokio::time::Instant::now();

		loop {
			match self.try_set(&redis_key, &token).await {
				Ok(Attempt::Acquired) => {
					debug!(key = %redis_key, "acquired redis lock");
					return Ok(LockToken {
						key: key.to_string(),
						token,
						guard: None,
					});
				}
				Ok(Attempt::Busy) => {}
				Err(e) => {
					self.degrade(&e);
					return self.fallback.acquire(key).await;
				}
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
		// Tokens carrying a guard came from the in-process fallback.
		if token.guard.is_some() {
			return self.fallback.release(token).await;
		}
		let mut conn = self.connection().await?;
		let removed: i64 = redis::Script::new(RELEASE_SCRIPT)
			.key(format!("{LOCK_PREFIX}{}", token.key))
			.arg(&token.token)
			.invoke_async(&mut conn)
			.await?;
		if removed == 0 {
			debug!(key = %token.key, "redis lock expired or taken over before release");
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::lock::tests::assert_serialized;
	use crate::lock::with_lock;
	use std::sync::Arc;

	fn options() -> LockOptions {
		LockOptions {
			ttl: DEFAULT_REDIS_LOCK_TTL,
			retry_delay: Duration::from_millis(5),
			acquire_timeout: Duration::from_secs(5),
		}
	}

	#[tokio::test]
	async fn unreachable_redis_falls_back_to_local_lock() {
		let lock = Arc::new(
			RedisRuntimeLock::open("redis://127.0.0.1:1/", "redis://127.0.0.1:1/", options()).unwrap(),
		);
		let value = with_lock(lock.as_ref(), "k", || async { 7 }).await.unwrap();
		assert_eq!(value, 7);
		assert!(lock.is_degraded());
		assert_serialized(lock, 8).await;
	}

	#[tokio::test]
	#[ignore = "requires REDIS_URL"]
	async fn live_redis_serializes_holders() {
		let Ok(url) = std::env::var("REDIS_URL") else {
			return;
		};
		let lock = Arc::new(RedisRuntimeLock::open(&url, "redis", options()).unwrap());
		assert_serialized(lock.clone(), 8).await;
		assert!(!lock.is_degraded());
	}

	#[tokio::test]
	#[ignore = "requires REDIS_URL"]
	async fn live_redis_times_out_while_held() {
		let Ok(url) = std::env::var("REDIS_URL") else {
			return;
		};
		let mut opts = options();
		opts.acquire_timeout = Duration::from_millis(60);
		let lock = RedisRuntimeLock::open(&url, "redis", opts).unwrap();
		let key = format!("test-{}", Uuid::new_v4());
		let held = lock.acquire(&key).await.unwrap();
		assert!(matches!(lock.acquire(&key).await, Err(LockError::Timeout { .. })));
		lock.release(held).await.unwrap();
		let again = lock.acquire(&key).await.unwrap();
		lock.release(again).await.unwrap();
	}
}
