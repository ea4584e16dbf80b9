// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Self-hosted metrics and privacy erasure section.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use loom_ff_metrics::aggregator::{
	DEFAULT_CACHE_TTL, DEFAULT_ERRORS_FILE, DEFAULT_VITALS_FILE, DEFAULT_WINDOW,
};
use loom_ff_metrics::ndjson::{DEFAULT_MAX_CHUNK_COUNT, DEFAULT_MAX_CHUNK_DAYS};
use loom_ff_metrics::{ChunkOptions, SelfMetricsOptions, DEFAULT_ERASURE_FILE};
use serde::{Deserialize, Serialize};

/// Which metrics backend feeds rollout decisions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricsProvider {
	/// Vitals and errors collected by this runtime; rollout steps need data.
	#[default]
	SelfHosted,
	External(String),
}

impl From<String> for MetricsProvider {
	fn from(value: String) -> Self {
		let value = value.trim().to_ascii_lowercase();
		if value.is_empty() || value == "self" {
			MetricsProvider::SelfHosted
		} else {
			MetricsProvider::External(value)
		}
	}
}

impl From<MetricsProvider> for String {
	fn from(value: MetricsProvider) -> Self {
		value.to_string()
	}
}

impl fmt::Display for MetricsProvider {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MetricsProvider::SelfHosted => f.write_str("self"),
			MetricsProvider::External(name) => f.write_str(name),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfigLayer {
	pub provider: Option<MetricsProvider>,
	pub vitals_file: Option<PathBuf>,
	pub errors_file: Option<PathBuf>,
	pub window_ms: Option<u64>,
	pub cache_ttl_ms: Option<u64>,
	pub max_chunk_days: Option<u32>,
	pub max_chunk_count: Option<usize>,
	pub min_samples: Option<u64>,
	pub erasure_file: Option<PathBuf>,
}

impl MetricsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.provider.is_some() {
			self.provider = other.provider;
		}
		if other.vitals_file.is_some() {
			self.vitals_file = other.vitals_file;
		}
		if other.errors_file.is_some() {
			self.errors_file = other.errors_file;
		}
		if other.window_ms.is_some() {
			self.window_ms = other.window_ms;
		}
		if other.cache_ttl_ms.is_some() {
			self.cache_ttl_ms = other.cache_ttl_ms;
		}
		if other.max_chunk_days.is_some() {
			self.max_chunk_days = other.max_chunk_days;
		}
		if other.max_chunk_count.is_some() {
			self.max_chunk_count = other.max_chunk_count;
		}
		if other.min_samples.is_some() {
			self.min_samples = other.min_samples;
		}
		if other.erasure_file.is_some() {
			self.erasure_file = other.erasure_file;
		}
	}

	pub fn finalize(self) -> MetricsConfig {
		MetricsConfig {
			provider: self.provider.unwrap_or_default(),
			vitals_file: self
				.vitals_file
				.unwrap_or_else(|| PathBuf::from(DEFAULT_VITALS_FILE)),
			errors_file: self
				.errors_file
				.unwrap_or_else(|| PathBuf::from(DEFAULT_ERRORS_FILE)),
			window_ms: self.window_ms.unwrap_or(DEFAULT_WINDOW.as_millis() as u64),
			cache_ttl_ms: self
				.cache_ttl_ms
				.unwrap_or(DEFAULT_CACHE_TTL.as_millis() as u64),
			max_chunk_days: self.max_chunk_days.unwrap_or(DEFAULT_MAX_CHUNK_DAYS),
			max_chunk_count: self.max_chunk_count.unwrap_or(DEFAULT_MAX_CHUNK_COUNT),
			min_samples: self.min_samples.unwrap_or(0),
			erasure_file: self
				.erasure_file
				.unwrap_or_else(|| PathBuf::from(DEFAULT_ERASURE_FILE)),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsConfig {
	pub provider: MetricsProvider,
	pub vitals_file: PathBuf,
	pub errors_file: PathBuf,
	pub window_ms: u64,
	pub cache_ttl_ms: u64,
	pub max_chunk_days: u32,
	pub max_chunk_count: usize,
	/// Samples required before the rollout gate judges a snapshot.
	pub min_samples: u64,
	pub erasure_file: PathBuf,
}

impl MetricsConfig {
	pub fn requires_data(&self) -> bool {
		self.provider == MetricsProvider::SelfHosted
	}

	pub fn options(&self) -> SelfMetricsOptions {
		SelfMetricsOptions {
			vitals_file: self.vitals_file.clone(),
			errors_file: self.errors_file.clone(),
			window: Duration::from_millis(self.window_ms),
			cache_ttl: Duration::from_millis(self.cache_ttl_ms),
			chunks: ChunkOptions {
				max_chunk_days: self.max_chunk_days,
				max_chunk_count: self.max_chunk_count,
			},
		}
	}
}

impl Default for MetricsConfig {
	fn default() -> Self {
		MetricsConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = MetricsConfig::default();
		assert_eq!(config.provider, MetricsProvider::SelfHosted);
		assert!(config.requires_data());
		assert_eq!(config.window_ms, 900_000);
		assert_eq!(config.cache_ttl_ms, 5000);
		assert_eq!(config.max_chunk_days, 14);
		assert_eq!(config.max_chunk_count, 12);
		assert_eq!(config.min_samples, 0);
		assert_eq!(
			config.erasure_file,
			PathBuf::from(".runtime/privacy.erasure.ndjson")
		);
	}

	#[test]
	fn external_provider_skips_data_requirement() {
		let config = MetricsConfigLayer {
			provider: Some(MetricsProvider::from("Datadog".to_string())),
			..Default::default()
		}
		.finalize();
		assert_eq!(config.provider.to_string(), "datadog");
		assert!(!config.requires_data());
	}

	#[test]
	fn options_carry_window_and_chunks() {
		let config = MetricsConfigLayer {
			window_ms: Some(60_000),
			max_chunk_count: Some(3),
			..Default::default()
		}
		.finalize();
		let options = config.options();
		assert_eq!(options.window, Duration::from_secs(60));
		assert_eq!(options.chunks.max_chunk_count, 3);
		assert_eq!(options.chunks.max_chunk_days, 14);
	}

	#[test]
	fn provider_from_toml() {
		let layer: MetricsConfigLayer = toml::from_str("provider = \"self\"\nmin_samples = 200").unwrap();
		assert_eq!(layer.provider, Some(MetricsProvider::SelfHosted));
		assert_eq!(layer.finalize().min_samples, 200);
	}
}
