// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Self-hosted rollout metrics for the Loom flag runtime.
//!
//! Vitals and error events are kept in day-chunked NDJSON logs. The
//! aggregator turns them into per-snapshot p75 values and error rates,
//! skipping anything covered by the privacy erasure log, and the gate
//! decides whether a rollout may advance.

pub mod aggregator;
pub mod erasure;
pub mod error;
pub mod gate;
pub mod ndjson;

pub use aggregator::{
	percentile, ErrorEvent, SelfMetrics, SelfMetricsOptions, SnapshotSummary, SummaryMetric,
	VitalEvent,
};
pub use erasure::{
	purge_ndjson_files, ErasureCandidate, ErasureIdentifier, ErasureIndex, ErasureLog,
	ErasureRecord, ErasureSource, PurgeFileReport, DEFAULT_ERASURE_FILE,
};
pub use error::{MetricsError, Result};
pub use gate::{evaluate_gate, GateDecision, GateMetric, GateViolation};
pub use ndjson::{list_ndjson_files, ChunkOptions};
