// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use async_trait::async_trait;
use loom_ff_core::{
	now_ms, EvaluationResult, FlagConfig, FlagSnapshot, OverrideEntry, OverrideScope,
};
use parking_lot::Mutex;
use tracing::debug;

use super::{evaluate_config, prepare_flag, EvalRequest, FlagStore};
use crate::error::Result;

#[derive(Debug, Default, Clone)]
struct OverrideSlots {
	user: BTreeMap<String, OverrideEntry>,
	namespace: BTreeMap<String, OverrideEntry>,
	global: Option<OverrideEntry>,
}

impl OverrideSlots {
	fn insert(&mut self, entry: OverrideEntry) {
		match &entry.scope {
			OverrideScope::User { id } => {
				self.user.insert(id.clone(), entry);
			}
			OverrideScope::Namespace { id } => {
				self.namespace.insert(id.clone(), entry);
			}
			OverrideScope::Global => self.global = Some(entry),
		}
	}

	fn remove(&mut self, scope: &OverrideScope) {
		match scope {
			OverrideScope::User { id } => {
				self.user.remove(id);
			}
			OverrideScope::Namespace { id } => {
				self.namespace.remove(id);
			}
			OverrideScope::Global => self.global = None,
		}
	}

	/// Drops expired entries; returns how many were removed.
	fn prune(&mut self, now: i64) -> usize {
		let before = self.len();
		self.user.retain(|_, e| !e.is_expired(now));
		self.namespace.retain(|_, e| !e.is_expired(now));
		if self.global.as_ref().is_some_and(|e| e.is_expired(now)) {
			self.global = None;
		}
		before - self.len()
	}

	fn len(&self) -> usize {
		self.user.len() + self.namespace.len() + usize::from(self.global.is_some())
	}

	fn entries(&self) -> Vec<OverrideEntry> {
		self.user
			.values()
			.chain(self.namespace.values())
			.chain(self.global.iter())
			.cloned()
			.collect()
	}
}

#[derive(Debug, Default)]
struct State {
	flags: BTreeMap<String, FlagConfig>,
	overrides: BTreeMap<String, OverrideSlots>,
}

impl State {
	fn prune_flag(&mut self, flag: &str, now: i64) {
		if let Some(slots) = self.overrides.get_mut(flag) {
			let removed = slots.prune(now);
			if removed > 0 {
				debug!(flag = %flag, removed, "pruned expired overrides");
			}
		}
	}

	fn prune_all(&mut self, now: i64) {
		let keys: Vec<String> = self.overrides.keys().cloned().collect();
		for key in keys {
			self.prune_flag(&key, now);
		}
	}
}

/// Process-local store. Also the fallback for the file and Redis backends.
#[derive(Debug, Default)]
pub struct MemoryFlagStore {
	state: Mutex<State>,
}

impl MemoryFlagStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_snapshot(snapshot: FlagSnapshot) -> Self {
		let store = Self::new();
		store.load(snapshot);
		store
	}

	/// Swap in `snapshot` wholesale, entries stored verbatim.
	pub(crate) fn load(&self, snapshot: FlagSnapshot) {
		let mut next = State::default();
		for flag in snapshot.flags {
			next.flags.insert(flag.key.clone(), flag);
		}
		for entry in snapshot.overrides {
			next.overrides
				.entry(entry.flag.clone())
				.or_default()
				.insert(entry);
		}
		*self.state.lock() = next;
	}

	pub(crate) fn snapshot_now(&self) -> FlagSnapshot {
		let mut state = self.state.lock();
		state.prune_all(now_ms());
		FlagSnapshot {
			flags: state.flags.values().cloned().collect(),
			overrides: state
				.overrides
				.values()
				.flat_map(OverrideSlots::entries)
				.collect(),
		}
	}
}

#[async_trait]
impl FlagStore for MemoryFlagStore {
	fn name(&self) -> &'static str {
		"memory"
	}

	async fn list_flags(&self) -> Result<Vec<FlagConfig>> {
		Ok(self.state.lock().flags.values().cloned().collect())
	}

	async fn get_flag(&self, key: &str) -> Result<Option<FlagConfig>> {
		Ok(self.state.lock().flags.get(key).cloned())
	}

	async fn put_flag(&self, config: FlagConfig) -> Result<FlagConfig> {
		let mut state = self.state.lock();
		let existing = state.flags.get(&config.key);
		let next = prepare_flag(config, existing, now_ms());
		state.flags.insert(next.key.clone(), next.clone());
		Ok(next)
	}

	async fn remove_flag(&self, key: &str) -> Result<()> {
		let mut state = self.state.lock();
		state.flags.remove(key);
		state.overrides.remove(key);
		Ok(())
	}

	async fn list_overrides(&self, flag: &str) -> Result<Vec<OverrideEntry>> {
		let mut state = self.state.lock();
		state.prune_flag(flag, now_ms());
		Ok(state
			.overrides
			.get(flag)
			.map(OverrideSlots::entries)
			.unwrap_or_default())
	}

	async fn put_override(&self, entry: OverrideEntry) -> Result<OverrideEntry> {
		let stored = entry.stamped(now_ms());
		self.state
			.lock()
			.overrides
			.entry(stored.flag.clone())
			.or_default()
			.insert(stored.clone());
		Ok(stored)
	}

	async fn remove_override(&self, flag: &str, scope: &OverrideScope) -> Result<()> {
		if let Some(slots) = self.state.lock().overrides.get_mut(flag) {
			slots.remove(scope);
		}
		Ok(())
	}

	async fn delete_overrides_by_user(&self, user_id: &str) -> Result<usize> {
		let mut state = self.state.lock();
		let removed = state
			.overrides
			.values_mut()
			.filter_map(|slots| slots.user.remove(user_id))
			.count();
		Ok(removed)
	}

	async fn evaluate(&self, key: &str, req: EvalRequest<'_>) -> Option<EvaluationResult> {
		let (flag, overrides) = {
			let mut state = self.state.lock();
			state.prune_flag(key, now_ms());
			let flag = state.flags.get(key)?.clone();
			let overrides = state
				.overrides
				.get(key)
				.map(OverrideSlots::entries)
				.unwrap_or_default();
			(flag, overrides)
		};
		evaluate_config(&flag, &overrides, req)
	}

	async fn snapshot(&self) -> Result<FlagSnapshot> {
		Ok(self.snapshot_now())
	}

	async fn replace_all(&self, snapshot: FlagSnapshot) -> Result<()> {
		self.load(snapshot);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::store::test_support::FixedBucket;
	use loom_ff_core::{
		EvaluationContext, EvaluationOptions, EvaluationReason, FlagValue, SegmentConfig,
	};

	fn req<'a>(ctx: &'a EvaluationContext, bucket: &'a FixedBucket) -> EvalRequest<'a> {
		EvalRequest {
			ctx,
			hints: None,
			percent_fn: bucket,
			options: EvaluationOptions::default(),
		}
	}

	#[tokio::test]
	async fn put_flag_preserves_created_at_and_orders_segments() {
		let store = MemoryFlagStore::new();
		let mut flag = FlagConfig::new("checkout", 0);
		flag.created_at = 0;
		flag.segments = vec![
			SegmentConfig {
				priority: 5,
				..Default::default()
			},
			SegmentConfig {
				id: "first".into(),
				priority: 1,
				..Default::default()
			},
		];
		let stored = store.put_flag(flag.clone()).await.unwrap();
		assert!(stored.created_at > 0);
		assert_eq!(stored.segments[0].id, "first");
		assert_eq!(stored.segments[1].id.len(), 16);

		let mut edit = stored.clone();
		edit.created_at = 42;
		edit.description = Some("edited".into());
		let again = store.put_flag(edit).await.unwrap();
		assert_eq!(again.created_at, stored.created_at);
		assert_eq!(again.segments[1].id, stored.segments[1].id);
	}

	#[tokio::test]
	async fn returned_values_are_copies() {
		let store = MemoryFlagStore::new();
		store.put_flag(FlagConfig::new("a", 1)).await.unwrap();
		let mut copy = store.get_flag("a").await.unwrap().unwrap();
		copy.enabled = false;
		assert!(store.get_flag("a").await.unwrap().unwrap().enabled);
	}

	#[tokio::test]
	async fn overrides_are_listed_by_scope() {
		let store = MemoryFlagStore::new();
		store.put_flag(FlagConfig::new("a", 1)).await.unwrap();
		for scope in [
			OverrideScope::Global,
			OverrideScope::namespace("acme"),
			OverrideScope::user("zed"),
			OverrideScope::user("amy"),
		] {
			store
				.put_override(OverrideEntry::new("a", scope, true, 0))
				.await
				.unwrap();
		}
		let scopes: Vec<String> = store
			.list_overrides("a")
			.await
			.unwrap()
			.iter()
			.map(|e| e.scope.to_string())
			.collect();
		assert_eq!(
			scopes,
			vec!["user:amy", "user:zed", "namespace:acme", "global"]
		);
	}

	#[tokio::test]
	async fn expired_overrides_are_pruned_on_read() {
		let store = MemoryFlagStore::new();
		let mut flag = FlagConfig::new("a", 1);
		flag.default_value = FlagValue::Bool(true);
		store.put_flag(flag).await.unwrap();

		let mut stale = OverrideEntry::new("a", OverrideScope::user("amy"), false, 0);
		stale.expires_at = Some(1);
		store.put_override(stale).await.unwrap();
		store
			.put_override(OverrideEntry::new("a", OverrideScope::user("bob"), false, 0).with_ttl(3600))
			.await
			.unwrap();

		let live = store.list_overrides("a").await.unwrap();
		assert_eq!(live.len(), 1);
		assert!(live[0].expires_at.is_some());

		let ctx = EvaluationContext::new("sid").with_user("amy");
		let bucket = FixedBucket(99.0);
		let result = store.evaluate("a", req(&ctx, &bucket)).await.unwrap();
		assert_eq!(result.reason, EvaluationReason::Default);
	}

	#[tokio::test]
	async fn evaluate_skips_missing_and_disabled() {
		let store = MemoryFlagStore::new();
		let ctx = EvaluationContext::new("sid");
		let bucket = FixedBucket(0.0);
		assert!(store.evaluate("nope", req(&ctx, &bucket)).await.is_none());

		let mut flag = FlagConfig::new("off", 1);
		flag.enabled = false;
		store.put_flag(flag).await.unwrap();
		assert!(store.evaluate("off", req(&ctx, &bucket)).await.is_none());
	}

	#[tokio::test]
	async fn evaluate_applies_matching_overrides() {
		let store = MemoryFlagStore::new();
		store.put_flag(FlagConfig::new("a", 1)).await.unwrap();
		store
			.put_override(OverrideEntry::new("a", OverrideScope::namespace("acme"), "ns", 0))
			.await
			.unwrap();
		store
			.put_override(OverrideEntry::new("a", OverrideScope::Global, "global", 0))
			.await
			.unwrap();
		let bucket = FixedBucket(0.0);

		let ctx = EvaluationContext::new("sid").with_namespace("acme");
		let result = store.evaluate("a", req(&ctx, &bucket)).await.unwrap();
		assert_eq!(result.reason, EvaluationReason::NsOverride);
		assert_eq!(result.value, Some(FlagValue::from("ns")));

		let ctx = EvaluationContext::new("sid").with_namespace("other");
		let result = store.evaluate("a", req(&ctx, &bucket)).await.unwrap();
		assert_eq!(result.reason, EvaluationReason::GlobalOverride);
	}

	#[tokio::test]
	async fn delete_overrides_by_user_spans_flags() {
		let store = MemoryFlagStore::new();
		for key in ["a", "b"] {
			store.put_flag(FlagConfig::new(key, 1)).await.unwrap();
			store
				.put_override(OverrideEntry::new(key, OverrideScope::user("amy"), true, 0))
				.await
				.unwrap();
		}
		store
			.put_override(OverrideEntry::new("a", OverrideScope::user("bob"), true, 0))
			.await
			.unwrap();

		assert_eq!(store.delete_overrides_by_user("amy").await.unwrap(), 2);
		assert_eq!(store.list_overrides("a").await.unwrap().len(), 1);
		assert!(store.list_overrides("b").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn remove_flag_drops_overrides() {
		let store = MemoryFlagStore::new();
		store.put_flag(FlagConfig::new("a", 1)).await.unwrap();
		store
			.put_override(OverrideEntry::new("a", OverrideScope::Global, true, 0))
			.await
			.unwrap();
		store.remove_flag("a").await.unwrap();
		assert!(store.get_flag("a").await.unwrap().is_none());
		assert!(store.list_overrides("a").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn snapshot_keeps_overrides_without_a_flag() {
		let store = MemoryFlagStore::new();
		store
			.put_override(OverrideEntry::new("ghost", OverrideScope::user("amy"), true, 0))
			.await
			.unwrap();
		let snapshot = store.snapshot().await.unwrap();
		assert!(snapshot.flags.is_empty());
		assert_eq!(snapshot.overrides.len(), 1);

		let restored = MemoryFlagStore::from_snapshot(snapshot.clone());
		assert_eq!(restored.list_overrides("ghost").await.unwrap().len(), 1);
		assert_eq!(restored.snapshot().await.unwrap(), snapshot);
	}
}
