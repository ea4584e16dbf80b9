// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bucketing and kill switch sections.

use loom_ff_core::{BucketStrategy, DEFAULT_CACHE_CAPACITY};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BucketConfigLayer {
	pub strategy: Option<BucketStrategy>,
	pub cache_size: Option<usize>,
}

impl BucketConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.strategy.is_some() {
			self.strategy = other.strategy;
		}
		if other.cache_size.is_some() {
			self.cache_size = other.cache_size;
		}
	}

	pub fn finalize(self) -> BucketConfig {
		BucketConfig {
			strategy: self.strategy.unwrap_or_default(),
			cache_size: self.cache_size.unwrap_or(DEFAULT_CACHE_CAPACITY),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketConfig {
	pub strategy: BucketStrategy,
	pub cache_size: usize,
}

impl Default for BucketConfig {
	fn default() -> Self {
		Self {
			strategy: BucketStrategy::Murmur3,
			cache_size: DEFAULT_CACHE_CAPACITY,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KillConfigLayer {
	pub all: Option<bool>,
}

impl KillConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.all.is_some() {
			self.all = other.all;
		}
	}

	pub fn finalize(self) -> KillConfig {
		KillConfig {
			all: self.all.unwrap_or(false),
		}
	}
}

/// Global kill switch; when set every flag resolves to its kill value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KillConfig {
	pub all: bool,
}
