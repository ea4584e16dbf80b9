// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::RedisResult;
use tokio::sync::OnceCell;
use tracing::warn;

use super::memory::MemoryRateLimiter;
use super::{RateLimitDecision, RateLimiter};
use crate::error::RateLimitError;

const KEY_PREFIX: &str = "ff:rl:";

/// Returns `{count, ttl_ms}`. The expiry is set on the first hit only; a
/// key found without a TTL is re-expired so it cannot count forever.
const WINDOW_SCRIPT: &str = r#"
local current = redis.call("INCR", KEYS[1])
local ttl
if current == 1 then
	redis.call("PEXPIRE", KEYS[1], ARGV[1])
	ttl = tonumber(ARGV[1])
else
	ttl = redis.call("PTTL", KEYS[1])
	if ttl < 0 then
		redis.call("PEXPIRE", KEYS[1], ARGV[1])
		ttl = tonumber(ARGV[1])
	end
end
return {current, ttl}
"#;

/// Shared fixed-window counters in Redis.
///
/// Each call is one script round trip. The first Redis error switches this
/// instance to its in-process limiter for the rest of its life, so an outage
/// never opens the gate and is warned about once.
pub struct RedisRateLimiter {
	client: redis::Client,
	conn: OnceCell<MultiplexedConnection>,
	script: redis::Script,
	fallback: MemoryRateLimiter,
	degraded: AtomicBool,
	display_url: String,
}

impl std::fmt::Debug for RedisRateLimiter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RedisRateLimiter")
			.field("url", &self.display_url)
			.field("degraded", &self.is_degraded())
			.finish()
	}
}

impl RedisRateLimiter {
	pub fn new(client: redis::Client, display_url: impl Into<String>) -> Self {
		Self {
			client,
			conn: OnceCell::new(),
			script: redis::Script::new(WINDOW_SCRIPT),
			fallback: MemoryRateLimiter::new(),
			degraded: AtomicBool::new(false),
			display_url: display_url.into(),
		}
	}

	pub fn open(url: &str, display_url: impl Into<String>) -> Result<Self, RateLimitError> {
		Ok(Self::new(redis::Client::open(url)?, display_url))
	}

	/// True once the limiter has fallen back to in-process windows.
	pub fn is_degraded(&self) -> bool {
		self.degraded.load(Ordering::Acquire)
	}

	async fn connection(&self) -> RedisResult<MultiplexedConnection> {
		self.conn
			.get_or_try_init(|| self.client.get_multiplexed_async_connection())
			.await
			.cloned()
	}

	async fn hit(&self, key: &str, window: Duration) -> RedisResult<(u64, i64)> {
		let mut conn = self.connection().await?;
		self.script
			.key(format!("{KEY_PREFIX}{key}"))
			.arg(window.as_millis() as u64)
			.invoke_async(&mut conn)
			.await
	}
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
	fn name(&self) -> &'static str {
		"redis"
	}

	async fn allow(
		&self,
		key: &str,
		limit: u32,
		window: Duration,
	) -> Result<RateLimitDecision, RateLimitError> {
		if !self.is_degraded() {
			match self.hit(key, window).await {
				Ok((count, ttl_ms)) => {
					return Ok(RateLimitDecision::from_count(
						count,
						limit,
						ttl_ms.max(0) as u64,
					));
				}
				Err(e) => {
					if !self.degraded.swap(true, Ordering::AcqRel) {
						warn!(
							url = %self.display_url,
							key = %key,
							error = %e,
							"redis rate limiter failed, falling back to in-process windows"
						);
					}
				}
			}
		}
		Ok(self.fallback.check(key, limit, window))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn unreachable_redis_uses_memory_windows() {
		let limiter = RedisRateLimiter::open("redis://127.0.0.1:1/", "redis://127.0.0.1:1/").unwrap();
		assert!(!limiter.is_degraded());
		let window = Duration::from_secs(60);
		assert!(limiter.allow("k", 1, window).await.unwrap().ok);
		assert!(limiter.is_degraded());
		assert!(!limiter.allow("k", 1, window).await.unwrap().ok);
		assert!(limiter.allow("other", 1, window).await.unwrap().ok);
	}

	#[tokio::test]
	#[ignore = "requires REDIS_URL"]
	async fn live_redis_denies_after_limit() {
		let Ok(url) = std::env::var("REDIS_URL") else {
			return;
		};
		let limiter = RedisRateLimiter::open(&url, "redis").unwrap();
		let key = format!("test-{}", uuid::Uuid::new_v4());
		let window = Duration::from_secs(5);
		let first = limiter.allow(&key, 1, window).await.unwrap();
		assert!(first.ok);
		assert!(first.reset_in_ms <= 5_000);
		assert!(!limiter.allow(&key, 1, window).await.unwrap().ok);
	}
}
