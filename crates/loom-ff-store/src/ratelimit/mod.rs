// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixed-window request counters.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::RateLimitError;

pub use self::memory::MemoryRateLimiter;
pub use self::redis::RedisRateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
	pub ok: bool,
	pub remaining: u32,
	/// Milliseconds until the window for this key resets.
	pub reset_in_ms: u64,
}

impl RateLimitDecision {
	pub(crate) fn from_count(count: u64, limit: u32, reset_in_ms: u64) -> Self {
		let limit = u64::from(limit);
		Self {
			ok: count <= limit,
			remaining: limit.saturating_sub(count) as u32,
			reset_in_ms,
		}
	}

	/// Whole seconds a client should wait, never less than one.
	pub fn retry_after_secs(&self) -> u64 {
		self.reset_in_ms.div_ceil(1000).max(1)
	}
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
	fn name(&self) -> &'static str;

	/// Count one hit against `key`; at most `limit` hits pass per `window`.
	async fn allow(
		&self,
		key: &str,
		limit: u32,
		window: Duration,
	) -> Result<RateLimitDecision, RateLimitError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decision_from_count() {
		let d = RateLimitDecision::from_count(3, 3, 500);
		assert!(d.ok);
		assert_eq!(d.remaining, 0);
		let d = RateLimitDecision::from_count(4, 3, 500);
		assert!(!d.ok);
		assert_eq!(d.remaining, 0);
	}

	#[test]
	fn retry_after_rounds_up() {
		let at = |ms| RateLimitDecision::from_count(9, 1, ms).retry_after_secs();
		assert_eq!(at(0), 1);
		assert_eq!(at(999), 1);
		assert_eq!(at(1001), 2);
		assert_eq!(at(60_000), 60);
	}
}
