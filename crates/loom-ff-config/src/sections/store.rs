// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag store configuration section.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::mask_redis_url;

pub const DEFAULT_STORE_FILE: &str = ".runtime/flags.snapshot.json";
pub const DEFAULT_STORE_TMP_DIR: &str = ".runtime/tmp";
pub const DEFAULT_STORE_CACHE_TTL_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreAdapter {
	Memory,
	File,
	Redis,
}

impl fmt::Display for StoreAdapter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			StoreAdapter::Memory => "memory",
			StoreAdapter::File => "file",
			StoreAdapter::Redis => "redis",
		})
	}
}

impl FromStr for StoreAdapter {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"memory" => Ok(StoreAdapter::Memory),
			"file" => Ok(StoreAdapter::File),
			"redis" => Ok(StoreAdapter::Redis),
			other => Err(format!(
				"unknown store adapter '{other}', expected memory, file or redis"
			)),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoreConfigLayer {
	pub adapter: Option<StoreAdapter>,
	pub file: Option<PathBuf>,
	pub tmp_dir: Option<PathBuf>,
	pub cache_ttl_ms: Option<u64>,
	pub redis_url: Option<String>,
}

impl StoreConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.adapter.is_some() {
			self.adapter = other.adapter;
		}
		if other.file.is_some() {
			self.file = other.file;
		}
		if other.tmp_dir.is_some() {
			self.tmp_dir = other.tmp_dir;
		}
		if other.cache_ttl_ms.is_some() {
			self.cache_ttl_ms = other.cache_ttl_ms;
		}
		if other.redis_url.is_some() {
			self.redis_url = other.redis_url;
		}
	}

	/// An unset adapter picks Redis when a URL is configured. Asking for
	/// Redis without a URL falls back to memory.
	pub fn finalize(self) -> StoreConfig {
		let redis_url = self.redis_url.filter(|u| !u.trim().is_empty());
		let adapter = match (self.adapter, redis_url.as_deref()) {
			(None, Some(_)) => StoreAdapter::Redis,
			(None, None) => StoreAdapter::Memory,
			(Some(StoreAdapter::Redis), None) => {
				warn!("redis store adapter requested without a redis url, using memory");
				StoreAdapter::Memory
			}
			(Some(adapter), _) => adapter,
		};
		StoreConfig {
			adapter,
			file: self
				.file
				.unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_FILE)),
			tmp_dir: self
				.tmp_dir
				.unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_TMP_DIR)),
			cache_ttl_ms: self.cache_ttl_ms.unwrap_or(DEFAULT_STORE_CACHE_TTL_MS),
			redis_url,
		}
	}
}

#[derive(Clone, PartialEq)]
pub struct StoreConfig {
	pub adapter: StoreAdapter,
	pub file: PathBuf,
	pub tmp_dir: PathBuf,
	pub cache_ttl_ms: u64,
	pub redis_url: Option<String>,
}

impl StoreConfig {
	/// Redis URL safe to log.
	pub fn display_redis_url(&self) -> Option<String> {
		self.redis_url.as_deref().map(mask_redis_url)
	}
}

impl fmt::Debug for StoreConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("StoreConfig")
			.field("adapter", &self.adapter)
			.field("file", &self.file)
			.field("tmp_dir", &self.tmp_dir)
			.field("cache_ttl_ms", &self.cache_ttl_ms)
			.field("redis_url", &self.display_redis_url())
			.finish()
	}
}

impl Default for StoreConfig {
	fn default() -> Self {
		StoreConfigLayer::default().finalize()
	}
}
