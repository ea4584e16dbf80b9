// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runtime lock configuration section.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCK_DIR: &str = ".runtime/locks";
pub const DEFAULT_FILE_LOCK_TTL_MS: u64 = 30_000;
pub const DEFAULT_REDIS_LOCK_TTL_MS: u64 = 15_000;
pub const DEFAULT_LOCK_RETRY_MS: u64 = 50;
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LockConfigLayer {
	pub dir: Option<PathBuf>,
	pub file_ttl_ms: Option<u64>,
	pub file_retry_ms: Option<u64>,
	pub redis_ttl_ms: Option<u64>,
	pub redis_retry_ms: Option<u64>,
	pub timeout_ms: Option<u64>,
}

impl LockConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.dir.is_some() {
			self.dir = other.dir;
		}
		if other.file_ttl_ms.is_some() {
			self.file_ttl_ms = other.file_ttl_ms;
		}
		if other.file_retry_ms.is_some() {
			self.file_retry_ms = other.file_retry_ms;
		}
		if other.redis_ttl_ms.is_some() {
			self.redis_ttl_ms = other.redis_ttl_ms;
		}
		if other.redis_retry_ms.is_some() {
			self.redis_retry_ms = other.redis_retry_ms;
		}
		if other.timeout_ms.is_some() {
			self.timeout_ms = other.timeout_ms;
		}
	}

	pub fn finalize(self) -> LockConfig {
		LockConfig {
			dir: self.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_DIR)),
			file_ttl_ms: self.file_ttl_ms.unwrap_or(DEFAULT_FILE_LOCK_TTL_MS).max(1),
			file_retry_ms: self.file_retry_ms.unwrap_or(DEFAULT_LOCK_RETRY_MS).max(1),
			redis_ttl_ms: self.redis_ttl_ms.unwrap_or(DEFAULT_REDIS_LOCK_TTL_MS).max(1),
			redis_retry_ms: self.redis_retry_ms.unwrap_or(DEFAULT_LOCK_RETRY_MS).max(1),
			timeout_ms: self.timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockConfig {
	pub dir: PathBuf,
	pub file_ttl_ms: u64,
	pub file_retry_ms: u64,
	pub redis_ttl_ms: u64,
	pub redis_retry_ms: u64,
	/// Acquisition deadline shared by every lock backend.
	pub timeout_ms: u64,
}

impl LockConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_millis(self.timeout_ms)
	}
}

impl Default for LockConfig {
	fn default() -> Self {
		LockConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = LockConfig::default();
		assert_eq!(config.dir, PathBuf::from(".runtime/locks"));
		assert_eq!(config.file_ttl_ms, 30_000);
		assert_eq!(config.redis_ttl_ms, 15_000);
		assert_eq!(config.file_retry_ms, 50);
		assert_eq!(config.timeout(), Duration::from_secs(10));
	}

	#[test]
	fn zero_ttl_is_raised() {
		let config = LockConfigLayer {
			file_ttl_ms: Some(0),
			redis_retry_ms: Some(0),
			..Default::default()
		}
		.finalize();
		assert_eq!(config.file_ttl_ms, 1);
		assert_eq!(config.redis_retry_ms, 1);
	}
}
