// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag evaluation telemetry.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use loom_ff_core::{EvaluationReason, FlagValue};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ring::Ring;
use crate::sink::{NdjsonSink, DEFAULT_QUEUE_CAPACITY};

pub const DEFAULT_TELEMETRY_RING: usize = 1000;
pub const MIN_TELEMETRY_RING: usize = 10;
pub const MAX_TELEMETRY_RING: usize = 10_000;
pub const DEFAULT_TELEMETRY_FILE: &str = ".runtime/telemetry.ndjson";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySinkKind {
	#[default]
	None,
	Console,
	Memory,
	File,
}

impl FromStr for TelemetrySinkKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"none" | "" => Ok(Self::None),
			"console" => Ok(Self::Console),
			"memory" => Ok(Self::Memory),
			"file" => Ok(Self::File),
			other => Err(format!(
				"unknown telemetry sink '{other}', expected none, console, memory or file"
			)),
		}
	}
}

impl fmt::Display for TelemetrySinkKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::None => "none",
			Self::Console => "console",
			Self::Memory => "memory",
			Self::File => "file",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
	pub ts: i64,
	pub flag: String,
	pub value: Option<FlagValue>,
	pub source: EvaluationReason,
	pub stable_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	/// Milliseconds spent evaluating.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub evaluation_time: Option<f64>,
	#[serde(default)]
	pub cache_hit: bool,
}

#[derive(Debug, Clone)]
pub struct TelemetryOptions {
	pub sink: TelemetrySinkKind,
	pub ring: usize,
	pub file: PathBuf,
}

impl Default for TelemetryOptions {
	fn default() -> Self {
		Self {
			sink: TelemetrySinkKind::None,
			ring: DEFAULT_TELEMETRY_RING,
			file: PathBuf::from(DEFAULT_TELEMETRY_FILE),
		}
	}
}

pub fn clamp_ring(requested: usize) -> usize {
	requested.clamp(MIN_TELEMETRY_RING, MAX_TELEMETRY_RING)
}

/// Evaluation event recorder.
///
/// `memory` keeps events in the ring, `file` keeps them in the ring and
/// appends them to NDJSON, `console` logs them, `none` drops them.
#[derive(Debug, Clone)]
pub struct Telemetry {
	kind: TelemetrySinkKind,
	ring: Ring<TelemetryEvent>,
	file: Option<NdjsonSink>,
}

impl Telemetry {
	/// A `file` sink spawns its writer task, so call this inside a runtime.
	pub fn new(options: &TelemetryOptions) -> Self {
		let file = (options.sink == TelemetrySinkKind::File)
			.then(|| NdjsonSink::spawn(&options.file, DEFAULT_QUEUE_CAPACITY));
		Self {
			kind: options.sink,
			ring: Ring::new(clamp_ring(options.ring)),
			file,
		}
	}

	pub fn disabled() -> Self {
		Self::new(&TelemetryOptions::default())
	}

	pub fn kind(&self) -> TelemetrySinkKind {
		self.kind
	}

	pub fn track(&self, event: TelemetryEvent) {
		match self.kind {
			TelemetrySinkKind::None => {}
			TelemetrySinkKind::Console => {
				info!(
					target: "loom_ff::telemetry",
					flag = %event.flag,
					source = %event.source,
					stable_id = %event.stable_id,
					value = ?event.value,
					"flag evaluated"
				);
			}
			TelemetrySinkKind::Memory => self.ring.push(event),
			TelemetrySinkKind::File => {
				if let Some(file) = &self.file {
					file.append(&event);
				}
				self.ring.push(event);
			}
		}
	}

	/// Up to `limit` newest events (clamped to 1..=ring size), oldest first.
	/// The flag filter applies after the window is taken.
	pub fn read_recent(&self, limit: usize, flag: Option<&str>) -> Vec<TelemetryEvent> {
		let n = limit.clamp(1, self.ring.capacity());
		let mut events = self.ring.tail(n);
		if let Some(flag) = flag {
			events.retain(|e| e.flag == flag);
		}
		events
	}

	pub fn clear(&self) {
		self.ring.clear();
	}

	pub fn sink(&self) -> Option<&NdjsonSink> {
		self.file.as_ref()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn event(flag: &str, i: i64) -> TelemetryEvent {
		TelemetryEvent {
			ts: i,
			flag: flag.to_string(),
			value: Some(FlagValue::Bool(true)),
			source: EvaluationReason::GlobalRollout,
			stable_id: "sid".into(),
			user_id: None,
			evaluation_time: Some(0.1),
			cache_hit: false,
		}
	}

	fn memory(ring: usize) -> Telemetry {
		Telemetry::new(&TelemetryOptions {
			sink: TelemetrySinkKind::Memory,
			ring,
			..TelemetryOptions::default()
		})
	}

	#[test]
	fn ring_size_is_clamped() {
		assert_eq!(clamp_ring(0), 10);
		assert_eq!(clamp_ring(50_000), 10_000);
		assert_eq!(clamp_ring(500), 500);

		let telemetry = memory(1);
		for i in 0..25 {
			telemetry.track(event("a", i));
		}
		assert_eq!(telemetry.read_recent(100, None).len(), 10);
	}

	#[test]
	fn read_recent_filters_inside_the_window() {
		let telemetry = memory(100);
		for i in 0..10 {
			telemetry.track(event(if i % 2 == 0 { "a" } else { "b" }, i));
		}
		let last_four_a = telemetry.read_recent(4, Some("a"));
		assert_eq!(last_four_a.iter().map(|e| e.ts).collect::<Vec<_>>(), vec![6, 8]);
		assert_eq!(telemetry.read_recent(0, None).len(), 1);
	}

	#[test]
	fn none_and_console_keep_nothing() {
		let none = Telemetry::disabled();
		none.track(event("a", 1));
		assert!(none.read_recent(10, None).is_empty());

		let console = Telemetry::new(&TelemetryOptions {
			sink: TelemetrySinkKind::Console,
			..TelemetryOptions::default()
		});
		console.track(event("a", 1));
		assert!(console.read_recent(10, None).is_empty());
	}

	#[test]
	fn parses_sink_kind() {
		assert_eq!("FILE".parse::<TelemetrySinkKind>().unwrap(), TelemetrySinkKind::File);
		assert_eq!("".parse::<TelemetrySinkKind>().unwrap(), TelemetrySinkKind::None);
		assert!("kafka".parse::<TelemetrySinkKind>().is_err());
	}

	#[tokio::test]
	async fn file_sink_appends_ndjson() {
		let dir = TempDir::new().unwrap();
		let telemetry = Telemetry::new(&TelemetryOptions {
			sink: TelemetrySinkKind::File,
			ring: 100,
			file: dir.path().join("telemetry.ndjson"),
		});
		telemetry.track(event("a", 1));
		telemetry.track(event("b", 2));
		telemetry.sink().unwrap().flush().await.unwrap();

		let contents = std::fs::read_to_string(dir.path().join("telemetry.ndjson")).unwrap();
		let first: TelemetryEvent = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
		assert_eq!(first, event("a", 1));
		assert_eq!(telemetry.read_recent(10, None).len(), 2);
	}
}
