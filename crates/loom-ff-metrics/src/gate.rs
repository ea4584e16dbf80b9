// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stop-condition gate consulted before a rollout moves forward.

use loom_ff_core::{RolloutHysteresis, RolloutStopConditions};
use serde::Serialize;

use crate::aggregator::SnapshotSummary;

pub const CLS_METRIC: &str = "CLS";
pub const INP_METRIC: &str = "INP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateMetric {
	#[serde(rename = "maxErrorRate")]
	ErrorRate,
	#[serde(rename = "maxCLS")]
	Cls,
	#[serde(rename = "maxINP")]
	Inp,
}

impl GateMetric {
	pub fn as_str(&self) -> &'static str {
		match self {
			GateMetric::ErrorRate => "maxErrorRate",
			GateMetric::Cls => "maxCLS",
			GateMetric::Inp => "maxINP",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateViolation {
	pub metric: GateMetric,
	pub observed: f64,
	/// Stop threshold plus hysteresis margin.
	pub limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum GateDecision {
	/// Not enough samples to judge.
	Hold { samples: u64, min_samples: u64 },
	Block { violations: Vec<GateViolation> },
	Proceed,
}

impl GateDecision {
	pub fn is_proceed(&self) -> bool {
		matches!(self, GateDecision::Proceed)
	}
}

/// A metric blocks only when it exceeds its stop threshold by more than the
/// hysteresis margin. Metrics with no samples never block.
pub fn evaluate_gate(
	summary: Option<&SnapshotSummary>,
	stop: Option<&RolloutStopConditions>,
	hysteresis: Option<&RolloutHysteresis>,
	min_samples: u64,
) -> GateDecision {
	let samples = summary.map(|s| s.sample_count).unwrap_or(0);
	if samples < min_samples {
		return GateDecision::Hold {
			samples,
			min_samples,
		};
	}
	let (Some(summary), Some(stop)) = (summary, stop) else {
		return GateDecision::Proceed;
	};
	let margin = hysteresis.cloned().unwrap_or_default();

	let checks = [
		(
			GateMetric::ErrorRate,
			stop.max_error_rate,
			margin.error_rate,
			Some(summary.error_rate),
		),
		(
			GateMetric::Cls,
			stop.max_cls,
			margin.cls,
			summary.p75(CLS_METRIC),
		),
		(
			GateMetric::Inp,
			stop.max_inp,
			margin.inp,
			summary.p75(INP_METRIC),
		),
	];
	let violations: Vec<GateViolation> = checks
		.into_iter()
		.filter_map(|(metric, max, slack, observed)| {
			let limit = max? + slack.unwrap_or(0.0).max(0.0);
			let observed = observed?;
			(observed > limit).then_some(GateViolation {
				metric,
				observed,
				limit,
			})
		})
		.collect();

	if violations.is_empty() {
		GateDecision::Proceed
	} else {
		GateDecision::Block { violations }
	}
}
