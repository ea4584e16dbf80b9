// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag persistence backends.
//!
//! Every backend hands out owned copies: callers can mutate what they get
//! back without touching stored state.

pub mod file;
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use loom_ff_core::{
	evaluate_flag, random_id, EvaluationContext, EvaluationOptions, EvaluationResult, FlagConfig,
	FlagSnapshot, MatchedOverrides, OverrideEntry, OverrideScope, RolloutPercent, SeedHints,
};

use crate::error::Result;

pub use self::file::FileFlagStore;
pub use self::memory::MemoryFlagStore;
pub use self::redis::RedisFlagStore;

/// Everything an evaluation needs besides the flag and its overrides.
#[derive(Clone, Copy)]
pub struct EvalRequest<'a> {
	pub ctx: &'a EvaluationContext,
	pub hints: Option<&'a SeedHints>,
	pub percent_fn: &'a dyn RolloutPercent,
	pub options: EvaluationOptions,
}

#[async_trait]
pub trait FlagStore: Send + Sync {
	/// Backend name for logs (`memory`, `file`, `redis`).
	fn name(&self) -> &'static str;

	async fn list_flags(&self) -> Result<Vec<FlagConfig>>;
	async fn get_flag(&self, key: &str) -> Result<Option<FlagConfig>>;

	/// Store a flag. Keeps the original `created_at`, stamps `updated_at`,
	/// assigns ids to anonymous segments and orders segments by priority.
	async fn put_flag(&self, config: FlagConfig) -> Result<FlagConfig>;

	/// Remove a flag together with all of its overrides.
	async fn remove_flag(&self, key: &str) -> Result<()>;

	/// Live overrides for a flag: users, then namespaces, then global.
	async fn list_overrides(&self, flag: &str) -> Result<Vec<OverrideEntry>>;
	async fn put_override(&self, entry: OverrideEntry) -> Result<OverrideEntry>;
	async fn remove_override(&self, flag: &str, scope: &OverrideScope) -> Result<()>;

	/// Drop every user-scoped override for `user_id`; returns how many went.
	async fn delete_overrides_by_user(&self, user_id: &str) -> Result<usize>;

	/// `None` when the flag is missing, disabled or the backend cannot answer.
	async fn evaluate(&self, key: &str, req: EvalRequest<'_>) -> Option<EvaluationResult>;

	/// Flags ordered by key, each followed by its overrides.
	async fn snapshot(&self) -> Result<FlagSnapshot>;

	/// Replace all state with `snapshot`, storing entries exactly as given.
	async fn replace_all(&self, snapshot: FlagSnapshot) -> Result<()>;
}

/// Normalize a flag on its way into a store.
pub(crate) fn prepare_flag(mut config: FlagConfig, existing: Option<&FlagConfig>, now_ms: i64) -> FlagConfig {
	if let Some(existing) = existing {
		config.created_at = existing.created_at;
	} else if config.created_at == 0 {
		config.created_at = now_ms;
	}
	config.updated_at = now_ms;
	for segment in &mut config.segments {
		if segment.id.is_empty() {
			segment.id = random_id(8);
		}
	}
	config.sort_segments();
	config
}

fn scope_rank(scope: &OverrideScope) -> u8 {
	match scope {
		OverrideScope::User { .. } => 0,
		OverrideScope::Namespace { .. } => 1,
		OverrideScope::Global => 2,
	}
}

/// Users, then namespaces, then global; ids ascending within a scope.
pub(crate) fn order_overrides(entries: &mut [OverrideEntry]) {
	entries.sort_by(|a, b| {
		scope_rank(&a.scope)
			.cmp(&scope_rank(&b.scope))
			.then_with(|| a.scope.hash_field().cmp(&b.scope.hash_field()))
	});
}

/// Run the shared engine over a flag and its live override entries.
pub(crate) fn evaluate_config(
	flag: &FlagConfig,
	overrides: &[OverrideEntry],
	req: EvalRequest<'_>,
) -> Option<EvaluationResult> {
	if !flag.enabled {
		return None;
	}
	let ctx = req.ctx;
	let mut matched = MatchedOverrides::none();
	for entry in overrides {
		match &entry.scope {
			OverrideScope::User { id } if ctx.user_id.as_deref() == Some(id.as_str()) => {
				matched.user = Some(entry);
			}
			OverrideScope::Namespace { id } if ctx.namespace.as_deref() == Some(id.as_str()) => {
				matched.namespace = Some(entry);
			}
			OverrideScope::Global => matched.global = Some(entry),
			_ => {}
		}
	}
	Some(evaluate_flag(
		flag,
		ctx,
		req.hints,
		matched,
		req.percent_fn,
		req.options,
	))
}

#[cfg(test)]
pub(crate) mod test_support {
	use loom_ff_core::{RolloutInput, RolloutPercent};

	/// Buckets every seed at the same position.
	pub struct FixedBucket(pub f64);

	impl RolloutPercent for FixedBucket {
		fn percent(&self, _input: &RolloutInput<'_>) -> f64 {
			self.0
		}
	}
}
