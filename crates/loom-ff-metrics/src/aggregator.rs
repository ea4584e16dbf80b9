// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-snapshot vitals and error aggregation over NDJSON logs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use loom_ff_audit::NdjsonSink;
use loom_ff_core::now_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::erasure::{ErasureIndex, ErasureLog};
use crate::error::Result;
use crate::ndjson::{list_ndjson_files, read_lines, ChunkOptions};

pub const DEFAULT_VITALS_FILE: &str = ".runtime/vitals.ndjson";
pub const DEFAULT_ERRORS_FILE: &str = ".runtime/errors.ndjson";
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(15 * 60 * 1000);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(5000);
const SINK_QUEUE: usize = 1024;

/// Nearest-rank percentile; 0 for no samples.
pub fn percentile(values: &[f64], p: f64) -> f64 {
	if values.is_empty() {
		return 0.0;
	}
	let mut sorted = values.to_vec();
	sorted.sort_by(f64::total_cmp);
	let rank = ((p / 100.0) * sorted.len() as f64).ceil() as i64 - 1;
	let idx = rank.clamp(0, sorted.len() as i64 - 1) as usize;
	sorted[idx]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalEvent {
	pub snapshot_id: String,
	pub metric: String,
	pub value: f64,
	pub ts: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
}

impl VitalEvent {
	pub fn new(snapshot_id: impl Into<String>, metric: impl Into<String>, value: f64) -> Self {
		Self {
			snapshot_id: snapshot_id.into(),
			metric: metric.into(),
			value,
			ts: now_ms(),
			sid: None,
			aid: None,
			user_id: None,
			namespace: None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
	pub snapshot_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	pub ts: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
}

impl ErrorEvent {
	pub fn new(snapshot_id: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			snapshot_id: snapshot_id.into(),
			message: Some(message.into()),
			ts: now_ms(),
			sid: None,
			aid: None,
			user_id: None,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryMetric {
	pub p75: f64,
	pub samples: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
	pub snapshot_id: String,
	pub metrics: BTreeMap<String, SummaryMetric>,
	pub error_rate: f64,
	pub error_count: u64,
	pub sample_count: u64,
}

impl SnapshotSummary {
	pub fn p75(&self, metric: &str) -> Option<f64> {
		self.metrics.get(metric).map(|m| m.p75)
	}
}

fn error_rate(errors: u64, samples: u64) -> f64 {
	match (errors, samples) {
		(0, 0) => 0.0,
		(_, 0) => 1.0,
		(e, s) => e as f64 / s as f64,
	}
}

#[derive(Debug, Default)]
struct WindowData {
	/// snapshot id → metric → samples
	vitals: BTreeMap<String, BTreeMap<String, Vec<f64>>>,
	errors: BTreeMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct SelfMetricsOptions {
	pub vitals_file: PathBuf,
	pub errors_file: PathBuf,
	pub window: Duration,
	pub cache_ttl: Duration,
	pub chunks: ChunkOptions,
}

impl Default for SelfMetricsOptions {
	fn default() -> Self {
		Self {
			vitals_file: PathBuf::from(DEFAULT_VITALS_FILE),
			errors_file: PathBuf::from(DEFAULT_ERRORS_FILE),
			window: DEFAULT_WINDOW,
			cache_ttl: DEFAULT_CACHE_TTL,
			chunks: ChunkOptions::default(),
		}
	}
}

/// Self-hosted metrics provider.
///
/// Vitals and errors are appended to NDJSON logs and aggregated on read.
/// Aggregates are cached per window length for `cache_ttl`; recording
/// through this instance drops the cache.
#[derive(Debug)]
pub struct SelfMetrics {
	options: SelfMetricsOptions,
	erasures: Arc<ErasureLog>,
	vitals_sink: NdjsonSink,
	errors_sink: NdjsonSink,
	cache: Mutex<HashMap<u64, (Instant, Arc<WindowData>)>>,
}

impl SelfMetrics {
	/// Spawns the two log writers, so call this inside a runtime.
	pub fn new(options: SelfMetricsOptions, erasures: Arc<ErasureLog>) -> Self {
		Self {
			vitals_sink: NdjsonSink::spawn(&options.vitals_file, SINK_QUEUE),
			errors_sink: NdjsonSink::spawn(&options.errors_file, SINK_QUEUE),
			options,
			erasures,
			cache: Mutex::new(HashMap::new()),
		}
	}

	pub fn options(&self) -> &SelfMetricsOptions {
		&self.options
	}

	pub fn record_vital(&self, event: VitalEvent) -> bool {
		self.cache.lock().clear();
		self.vitals_sink.append(&event)
	}

	pub fn record_error(&self, event: ErrorEvent) -> bool {
		self.cache.lock().clear();
		self.errors_sink.append(&event)
	}

	/// Wait for recorded events to reach disk.
	///
	/// A closed sink only happens at shutdown; it is logged, not returned.
	pub async fn flush(&self) -> Result<()> {
		for sink in [&self.vitals_sink, &self.errors_sink] {
			if let Err(e) = sink.flush().await {
				warn!(path = %sink.path().display(), error = %e, "metrics sink flush failed");
			}
		}
		self.cache.lock().clear();
		Ok(())
	}

	pub fn invalidate(&self) {
		self.cache.lock().clear();
	}

	async fn window_data(&self, window: Option<Duration>) -> Result<Arc<WindowData>> {
		let window = window.unwrap_or(self.options.window);
		if window.is_zero() {
			return Ok(Arc::new(WindowData::default()));
		}
		let key = window.as_millis() as u64;
		let cached = self
			.cache
			.lock()
			.get(&key)
			.filter(|(at, _)| at.elapsed() < self.options.cache_ttl)
			.map(|(_, data)| Arc::clone(data));
		if let Some(data) = cached {
			return Ok(data);
		}
		let data = Arc::new(self.load_window(window).await?);
		self.cache.lock().insert(key, (Instant::now(), Arc::clone(&data)));
		Ok(data)
	}

	#[instrument(skip(self), fields(window_ms = window.as_millis() as u64))]
	async fn load_window(&self, window: Duration) -> Result<WindowData> {
		let cutoff = now_ms() - window.as_millis() as i64;
		let erasures = self.erasures.index().await?;
		let mut data = WindowData::default();

		for file in list_ndjson_files(&self.options.vitals_file, self.options.chunks).await? {
			for record in read_records(&file, cutoff, &erasures).await? {
				let (Some(snapshot), Some(metric), Some(value)) = (
					record.get("snapshotId").and_then(Value::as_str),
					record.get("metric").and_then(Value::as_str),
					record.get("value").and_then(Value::as_f64).filter(|v| v.is_finite()),
				) else {
					continue;
				};
				data.vitals
					.entry(snapshot.to_string())
					.or_default()
					.entry(metric.to_string())
					.or_default()
					.push(value);
			}
		}
		for file in list_ndjson_files(&self.options.errors_file, self.options.chunks).await? {
			for record in read_records(&file, cutoff, &erasures).await? {
				if let Some(snapshot) = record.get("snapshotId").and_then(Value::as_str) {
					*data.errors.entry(snapshot.to_string()).or_default() += 1;
				}
			}
		}
		debug!(
			snapshots = data.vitals.len(),
			error_snapshots = data.errors.len(),
			"aggregated metrics window"
		);
		Ok(data)
	}

	/// Summaries for every snapshot (or just `snapshot_id`), ordered by id.
	pub async fn summarize(&self, snapshot_id: Option<&str>) -> Result<Vec<SnapshotSummary>> {
		let data = self.window_data(None).await?;
		let ids: BTreeSet<&String> = data.vitals.keys().chain(data.errors.keys()).collect();
		Ok(ids
			.into_iter()
			.filter(|id| snapshot_id.map_or(true, |want| want == id.as_str()))
			.map(|id| summarize_one(&data, id))
			.collect())
	}

	pub async fn summary(&self, snapshot_id: &str) -> Result<Option<SnapshotSummary>> {
		Ok(self.summarize(Some(snapshot_id)).await?.into_iter().next())
	}

	/// True if any vitals were recorded for `snapshot_id` within the window.
	pub async fn has_data(&self, snapshot_id: &str) -> Result<bool> {
		Ok(self.window_data(None).await?.vitals.contains_key(snapshot_id))
	}

	/// p75 of `metric` across `snapshot_ids`, `None` without samples.
	pub async fn web_vital(
		&self,
		metric: &str,
		snapshot_ids: &[String],
		window: Option<Duration>,
	) -> Result<Option<f64>> {
		let data = self.window_data(window).await?;
		let values: Vec<f64> = snapshot_ids
			.iter()
			.filter_map(|id| data.vitals.get(id).and_then(|m| m.get(metric)))
			.flatten()
			.copied()
			.collect();
		Ok((!values.is_empty()).then(|| percentile(&values, 75.0)))
	}

	/// Errors per sample across `snapshot_ids`, `None` without any data.
	pub async fn error_rate(
		&self,
		snapshot_ids: &[String],
		window: Option<Duration>,
	) -> Result<Option<f64>> {
		let data = self.window_data(window).await?;
		let mut has_data = false;
		let (mut samples, mut errors) = (0u64, 0u64);
		for id in snapshot_ids {
			if let Some(metrics) = data.vitals.get(id) {
				has_data = true;
				samples += metrics.values().map(|v| v.len() as u64).sum::<u64>();
			}
			if let Some(count) = data.errors.get(id) {
				has_data = true;
				errors += count;
			}
		}
		Ok(has_data.then(|| error_rate(errors, samples)))
	}
}

fn summarize_one(data: &WindowData, id: &str) -> SnapshotSummary {
	let mut metrics = BTreeMap::new();
	let mut sample_count = 0u64;
	if let Some(per_metric) = data.vitals.get(id) {
		for (name, values) in per_metric {
			sample_count += values.len() as u64;
			metrics.insert(
				name.clone(),
				SummaryMetric {
					p75: percentile(values, 75.0),
					samples: values.len() as u64,
				},
			);
		}
	}
	let error_count = data.errors.get(id).copied().unwrap_or(0);
	SnapshotSummary {
		snapshot_id: id.to_string(),
		metrics,
		error_rate: error_rate(error_count, sample_count),
		error_count,
		sample_count,
	}
}

/// Parsed records of one log with a `ts` inside the window and no erasure hit.
async fn read_records(path: &Path, cutoff: i64, erasures: &ErasureIndex) -> Result<Vec<Value>> {
	Ok(read_lines(path)
		.await?
		.iter()
		.filter_map(|line| serde_json::from_str::<Value>(line).ok())
		.filter(|record| record.is_object())
		.filter(|record| {
			record
				.get("ts")
				.and_then(Value::as_f64)
				.is_some_and(|ts| ts >= cutoff as f64)
		})
		.filter(|record| !erasures.is_erased_json(record))
		.collect())
}
