// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{RateLimitDecision, RateLimiter};
use crate::error::RateLimitError;

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
	count: u64,
	reset_at: Instant,
}

/// Per-key fixed windows held in process memory.
#[derive(Debug, Default)]
pub struct MemoryRateLimiter {
	windows: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimiter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
		let now = Instant::now();
		let mut windows = self.windows.lock();
		if windows.len() >= PRUNE_THRESHOLD {
			windows.retain(|_, w| w.reset_at > now);
		}
		let entry = windows.entry(key.to_string()).or_insert(Window {
			count: 0,
			reset_at: now + window,
		});
		if entry.reset_at <= now {
			*entry = Window {
				count: 0,
				reset_at: now + window,
			};
		}
		entry.count += 1;
		let reset_in = entry.reset_at.saturating_duration_since(now);
		RateLimitDecision::from_count(entry.count, limit, reset_in.as_millis() as u64)
	}

	pub fn clear(&self) {
		self.windows.lock().clear();
	}
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
	fn name(&self) -> &'static str {
		"memory"
	}

	async fn allow(
		&self,
		key: &str,
		limit: u32,
		window: Duration,
	) -> Result<RateLimitDecision, RateLimitError> {
		Ok(self.check(key, limit, window))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn denies_past_limit_then_resets() {
		let limiter = MemoryRateLimiter::new();
		let window = Duration::from_millis(60);
		for expected_remaining in [2, 1, 0] {
			let d = limiter.allow("demo", 3, window).await.unwrap();
			assert!(d.ok);
			assert_eq!(d.remaining, expected_remaining);
		}
		let denied = limiter.allow("demo", 3, window).await.unwrap();
		assert!(!denied.ok);
		assert!(denied.reset_in_ms <= 60);

		tokio::time::sleep(Duration::from_millis(80)).await;
		let d = limiter.allow("demo", 3, window).await.unwrap();
		assert!(d.ok);
		assert_eq!(d.remaining, 2);
	}

	#[tokio::test]
	async fn keys_are_independent() {
		let limiter = MemoryRateLimiter::new();
		let window = Duration::from_secs(60);
		assert!(limiter.allow("a", 1, window).await.unwrap().ok);
		assert!(!limiter.allow("a", 1, window).await.unwrap().ok);
		assert!(limiter.allow("b", 1, window).await.unwrap().ok);
	}

	#[test]
	fn clear_forgets_windows() {
		let limiter = MemoryRateLimiter::new();
		let window = Duration::from_secs(60);
		assert!(limiter.check("a", 1, window).ok);
		assert!(!limiter.check("a", 1, window).ok);
		limiter.clear();
		assert!(limiter.check("a", 1, window).ok);
	}
}
