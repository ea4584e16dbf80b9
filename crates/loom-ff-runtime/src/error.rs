// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use loom_ff_config::ConfigError;
use loom_ff_core::CodecError;
use loom_ff_metrics::{GateViolation, MetricsError};
use loom_ff_store::{LockError, RateLimitError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error(transparent)]
	Store(#[from] StoreError),

	#[error(transparent)]
	Lock(#[from] LockError),

	#[error(transparent)]
	RateLimit(#[from] RateLimitError),

	#[error(transparent)]
	Metrics(#[from] MetricsError),

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Codec(#[from] CodecError),

	#[error("flag not found: {0}")]
	FlagNotFound(String),

	#[error("flag {0} was removed while the lock was pending")]
	FlagDisappeared(String),

	#[error("rollout step {0} is outside -100..=100")]
	InvalidStep(i32),

	#[error("insufficient metrics for snapshot {snapshot_id}")]
	InsufficientMetrics { snapshot_id: String },

	#[error("rollout held: {samples} samples, {min_samples} required")]
	RolloutHeld { samples: u64, min_samples: u64 },

	#[error("rollout blocked by stop conditions: {}", describe(.violations))]
	RolloutBlocked { violations: Vec<GateViolation> },
}

fn describe(violations: &[GateViolation]) -> String {
	violations
		.iter()
		.map(|v| format!("{} {:.4} > {:.4}", v.metric.as_str(), v.observed, v.limit))
		.collect::<Vec<_>>()
		.join(", ")
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
