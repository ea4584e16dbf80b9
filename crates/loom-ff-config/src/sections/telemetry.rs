// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Telemetry and audit sections.

use std::path::PathBuf;

use loom_ff_audit::{
	clamp_ring, TelemetryOptions, TelemetrySinkKind, DEFAULT_TELEMETRY_FILE, DEFAULT_TELEMETRY_RING,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfigLayer {
	/// Kept as text so an unknown sink degrades to `none` instead of failing startup.
	pub sink: Option<String>,
	pub ring: Option<usize>,
	pub file: Option<PathBuf>,
}

impl TelemetryConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.sink.is_some() {
			self.sink = other.sink;
		}
		if other.ring.is_some() {
			self.ring = other.ring;
		}
		if other.file.is_some() {
			self.file = other.file;
		}
	}

	pub fn finalize(self) -> TelemetryConfig {
		let sink = match self.sink.as_deref().map(str::parse::<TelemetrySinkKind>) {
			None => TelemetrySinkKind::None,
			Some(Ok(kind)) => kind,
			Some(Err(message)) => {
				warn!(%message, "telemetry disabled");
				TelemetrySinkKind::None
			}
		};
		TelemetryConfig {
			sink,
			ring: clamp_ring(self.ring.unwrap_or(DEFAULT_TELEMETRY_RING)),
			file: self
				.file
				.unwrap_or_else(|| PathBuf::from(DEFAULT_TELEMETRY_FILE)),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
	pub sink: TelemetrySinkKind,
	pub ring: usize,
	pub file: PathBuf,
}

impl TelemetryConfig {
	pub fn options(&self) -> TelemetryOptions {
		TelemetryOptions {
			sink: self.sink,
			ring: self.ring,
			file: self.file.clone(),
		}
	}
}

impl Default for TelemetryConfig {
	fn default() -> Self {
		TelemetryConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditConfigLayer {
	pub file: Option<PathBuf>,
}

impl AuditConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.file.is_some() {
			self.file = other.file;
		}
	}

	pub fn finalize(self) -> AuditConfig {
		AuditConfig { file: self.file }
	}
}

/// The audit ring itself is always on; `file` adds an NDJSON mirror.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
	pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_to_no_sink() {
		let config = TelemetryConfig::default();
		assert_eq!(config.sink, TelemetrySinkKind::None);
		assert_eq!(config.ring, 1000);
		assert_eq!(config.file, PathBuf::from(".runtime/telemetry.ndjson"));
	}

	#[test]
	fn unknown_sink_disables_telemetry() {
		let config = TelemetryConfigLayer {
			sink: Some("kafka".into()),
			..Default::default()
		}
		.finalize();
		assert_eq!(config.sink, TelemetrySinkKind::None);
	}

	#[test]
	fn ring_is_clamped() {
		let small = TelemetryConfigLayer {
			sink: Some("memory".into()),
			ring: Some(2),
			..Default::default()
		}
		.finalize();
		assert_eq!(small.sink, TelemetrySinkKind::Memory);
		assert_eq!(small.ring, 10);

		let large = TelemetryConfigLayer {
			ring: Some(1_000_000),
			..Default::default()
		}
		.finalize();
		assert_eq!(large.ring, 10_000);
	}

	#[test]
	fn audit_file_is_optional() {
		assert!(AuditConfigLayer::default().finalize().file.is_none());
		let mut layer = AuditConfigLayer::default();
		layer.merge(AuditConfigLayer {
			file: Some("audit.ndjson".into()),
		});
		assert_eq!(layer.finalize().file, Some(PathBuf::from("audit.ndjson")));
	}
}
