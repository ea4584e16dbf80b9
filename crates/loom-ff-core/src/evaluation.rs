// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bucketing::{clamp_percent, resolve_seed, RolloutInput, RolloutPercent};
use crate::context::{EvaluationContext, SeedHints};
use crate::flag::{FlagConfig, RolloutStrategy, SeedBy};
use crate::overrides::OverrideEntry;
use crate::segment::matches_segment;
use crate::value::FlagValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationReason {
	KillSwitch,
	UserOverride,
	NsOverride,
	SegmentOverride,
	SegmentRollout,
	GlobalOverride,
	GlobalRollout,
	Default,
}

impl fmt::Display for EvaluationReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			EvaluationReason::KillSwitch => "killSwitch",
			EvaluationReason::UserOverride => "userOverride",
			EvaluationReason::NsOverride => "nsOverride",
			EvaluationReason::SegmentOverride => "segmentOverride",
			EvaluationReason::SegmentRollout => "segmentRollout",
			EvaluationReason::GlobalOverride => "globalOverride",
			EvaluationReason::GlobalRollout => "globalRollout",
			EvaluationReason::Default => "default",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
	/// `None` only when an explicit `null` kill value is active.
	pub value: Option<FlagValue>,
	pub reason: EvaluationReason,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub segment_id: Option<String>,
	#[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
	pub override_entry: Option<OverrideEntry>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub shadow_value: Option<bool>,
}

impl EvaluationResult {
	fn new(value: Option<FlagValue>, reason: EvaluationReason) -> Self {
		Self {
			value,
			reason,
			segment_id: None,
			override_entry: None,
			shadow_value: None,
		}
	}
}

/// Override entries that apply to the context being evaluated.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchedOverrides<'a> {
	pub user: Option<&'a OverrideEntry>,
	pub namespace: Option<&'a OverrideEntry>,
	pub global: Option<&'a OverrideEntry>,
}

impl<'a> MatchedOverrides<'a> {
	pub fn none() -> Self {
		Self::default()
	}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationOptions {
	/// Process-wide kill switch.
	pub kill_all: bool,
}

struct Engine<'a> {
	cfg: &'a FlagConfig,
	ctx: &'a EvaluationContext,
	hints: Option<&'a SeedHints>,
	percent_fn: &'a dyn RolloutPercent,
	shadow: Option<bool>,
}

impl<'a> Engine<'a> {
	fn bucket(&self, seed_by: SeedBy, salt: &str, percent: f64, segment_id: Option<&str>) -> f64 {
		let seed = resolve_seed(self.ctx, self.hints, seed_by);
		self.percent_fn.percent(&RolloutInput {
			seed: &seed,
			salt,
			percent,
			flag_key: &self.cfg.key,
			segment_id,
		})
	}

	/// Records the canary decision for a rollout tier. Never affects the live value.
	fn record_shadow(
		&mut self,
		rollout: &RolloutStrategy,
		live_seed_by: SeedBy,
		salt: &str,
		segment_id: Option<&str>,
	) {
		let Some(shadow) = &rollout.shadow else {
			return;
		};
		let pct = clamp_percent(shadow.pct);
		let hit = if pct >= 100.0 {
			true
		} else if pct <= 0.0 {
			false
		} else {
			let seed_by = shadow.seed_by.unwrap_or(live_seed_by);
			self.bucket(seed_by, salt, pct, segment_id) < pct
		};
		self.shadow = Some(hit);
	}

	/// Live rollout decision: `>= 100` always hits, `<= 0` never does.
	fn rollout_hits(
		&self,
		rollout: &RolloutStrategy,
		seed_by: SeedBy,
		salt: &str,
		segment_id: Option<&str>,
	) -> bool {
		let percent = clamp_percent(rollout.percent);
		if percent >= 100.0 {
			return true;
		}
		if percent <= 0.0 {
			return false;
		}
		self.bucket(seed_by, salt, percent, segment_id) < percent
	}

	fn finish(&self, mut result: EvaluationResult) -> EvaluationResult {
		result.shadow_value = self.shadow;
		result
	}
}

/// Computes a flag's effective value for a context.
///
/// The evaluation order is:
/// 1. Kill switch (per flag, or process-wide via `options.kill_all`)
/// 2. User override for `ctx.user_id`
/// 3. Namespace override for `ctx.namespace`
/// 4. Segments by ascending priority: a matching segment's literal override
///    wins, otherwise its rollout wins on a bucket hit
/// 5. Global override
/// 6. Global rollout
/// 7. The flag's default value
///
/// Rollout tiers with a `shadow` configured record the canary decision in
/// `shadow_value`; the live value is unaffected. A segment's shadow is only
/// reported when that segment decides the result. The global shadow is
/// reported for both the global rollout and the default it falls through
/// to. Evaluation cannot fail.
pub fn evaluate_flag(
	cfg: &FlagConfig,
	ctx: &EvaluationContext,
	hints: Option<&SeedHints>,
	overrides: MatchedOverrides<'_>,
	percent_fn: &dyn RolloutPercent,
	options: EvaluationOptions,
) -> EvaluationResult {
	if cfg.kill_switch || options.kill_all {
		return EvaluationResult::new(cfg.kill_value_or_default(), EvaluationReason::KillSwitch);
	}

	if let Some(entry) = overrides.user {
		let mut result =
			EvaluationResult::new(Some(entry.value.clone()), EvaluationReason::UserOverride);
		result.override_entry = Some(entry.clone());
		return result;
	}

	if let Some(entry) = overrides.namespace {
		let mut result =
			EvaluationResult::new(Some(entry.value.clone()), EvaluationReason::NsOverride);
		result.override_entry = Some(entry.clone());
		return result;
	}

	let mut engine = Engine {
		cfg,
		ctx,
		hints,
		percent_fn,
		shadow: None,
	};
	let seed_by_default = cfg.seed_by_default();

	let mut segments: Vec<_> = cfg.segments.iter().collect();
	segments.sort_by_key(|s| s.priority);

	for segment in segments {
		if !matches_segment(segment, ctx) {
			continue;
		}

		if let Some(value) = &segment.override_value {
			let mut result =
				EvaluationResult::new(Some(value.clone()), EvaluationReason::SegmentOverride);
			result.segment_id = Some(segment.id.clone());
			return engine.finish(result);
		}

		if let Some(rollout) = &segment.rollout {
			let seed_by = rollout.seed_by.unwrap_or(seed_by_default);
			let salt = rollout.salt_or(|| format!("{}:segment:{}", cfg.key, segment.id));
			engine.record_shadow(rollout, seed_by, &salt, Some(&segment.id));
			if engine.rollout_hits(rollout, seed_by, &salt, Some(&segment.id)) {
				let mut result = EvaluationResult::new(
					Some(cfg.default_value.clone()),
					EvaluationReason::SegmentRollout,
				);
				result.segment_id = Some(segment.id.clone());
				return engine.finish(result);
			}
			// The canary belongs to this segment only.
			engine.shadow = None;
		}
	}

	if let Some(entry) = overrides.global {
		let mut result =
			EvaluationResult::new(Some(entry.value.clone()), EvaluationReason::GlobalOverride);
		result.override_entry = Some(entry.clone());
		return engine.finish(result);
	}

	if let Some(rollout) = &cfg.rollout {
		let seed_by = rollout.seed_by.unwrap_or(seed_by_default);
		let salt = rollout.salt_or(|| format!("{}:global", cfg.key));
		engine.record_shadow(rollout, seed_by, &salt, None);
		if engine.rollout_hits(rollout, seed_by, &salt, None) {
			return engine.finish(EvaluationResult::new(
				Some(cfg.default_value.clone()),
				EvaluationReason::GlobalRollout,
			));
		}
	}

	engine.finish(EvaluationResult::new(
		Some(cfg.default_value.clone()),
		EvaluationReason::Default,
	))
}
