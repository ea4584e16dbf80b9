// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Staged rollout stepping.

use loom_ff_audit::{AuditAction, AuditRecord};
use loom_ff_core::{clamp_percent, now_ms, RolloutStep, RolloutStrategy};
use loom_ff_metrics::{evaluate_gate, GateDecision};
use loom_ff_store::with_lock;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::{Result, RuntimeError};
use crate::runtime::FlagRuntime;

pub const DEFAULT_ROLLOUT_STEP: i32 = 5;
pub const MAX_ROLLOUT_STEP: i32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutOutcome {
	pub key: String,
	pub from: f64,
	pub to: f64,
	pub step: i32,
	pub snapshot_id: String,
}

impl FlagRuntime {
	/// Move a flag's rollout percent by `step` points, clamped to 0..=100.
	///
	/// With the self-hosted metrics provider the current snapshot must have
	/// recorded vitals, and increases must pass the flag's stop conditions.
	/// Decreases are never gated.
	#[instrument(skip(self, actor), fields(flag = %key))]
	pub async fn step_rollout(
		&self,
		key: &str,
		step: i32,
		actor: Option<&str>,
	) -> Result<RolloutOutcome> {
		if !(-MAX_ROLLOUT_STEP..=MAX_ROLLOUT_STEP).contains(&step) {
			return Err(RuntimeError::InvalidStep(step));
		}
		let Some(flag) = self.store().get_flag(key).await? else {
			return Err(RuntimeError::FlagNotFound(key.to_string()));
		};
		let snapshot_id = self.snapshot().await?.id;

		let metrics_config = &self.config().metrics;
		if metrics_config.requires_data() {
			if !self.metrics().has_data(&snapshot_id).await? {
				warn!(snapshot_id = %snapshot_id, "no vitals recorded for current snapshot");
				return Err(RuntimeError::InsufficientMetrics { snapshot_id });
			}
			if step > 0 {
				let summary = self.metrics().summary(&snapshot_id).await?;
				let rollout = flag.rollout.as_ref();
				let decision = evaluate_gate(
					summary.as_ref(),
					rollout.and_then(|r| r.stop.as_ref()),
					rollout.and_then(|r| r.hysteresis.as_ref()),
					metrics_config.min_samples,
				);
				match decision {
					GateDecision::Proceed => {}
					GateDecision::Hold {
						samples,
						min_samples,
					} => return Err(RuntimeError::RolloutHeld { samples, min_samples }),
					GateDecision::Block { violations } => {
						warn!(violations = violations.len(), "rollout blocked by stop conditions");
						return Err(RuntimeError::RolloutBlocked { violations });
					}
				}
			}
		}

		let store = self.store().as_ref();
		let (from, to) = with_lock(self.lock().as_ref(), key, || async move {
			let Some(mut flag) = store.get_flag(key).await? else {
				return Err(RuntimeError::FlagDisappeared(key.to_string()));
			};
			let rollout = flag.rollout.get_or_insert_with(|| RolloutStrategy::with_percent(0.0));
			let from = rollout.percent;
			let to = clamp_percent(from + f64::from(step));
			rollout.percent = to;
			rollout.steps.get_or_insert_with(Vec::new).push(RolloutStep {
				pct: to,
				note: None,
				at: Some(now_ms()),
			});
			store.put_flag(flag).await?;
			Ok::<_, RuntimeError>((from, to))
		})
		.await??;

		self.record(
			AuditRecord::new(AuditAction::RolloutStep)
				.flag(key)
				.details(json!({
					"from": from,
					"to": to,
					"step": step,
					"snapshotId": snapshot_id,
				})),
			actor,
		);
		info!(from, to, step, "rollout stepped");
		Ok(RolloutOutcome {
			key: key.to_string(),
			from,
			to,
			step,
			snapshot_id,
		})
	}
}
