// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The runtime context every flag operation goes through.

use std::sync::Arc;
use std::time::Instant;

use loom_ff_audit::sink::DEFAULT_QUEUE_CAPACITY;
use loom_ff_audit::{
	AuditAction, AuditLog, AuditRecord, NdjsonSink, Telemetry, TelemetryEvent,
};
use loom_ff_config::RuntimeConfig;
use loom_ff_core::{
	now_ms, Bucketer, EvaluationContext, EvaluationOptions, EvaluationResult, FlagConfig,
	FlagSnapshot, FlagValue, OverrideEntry, OverrideScope, SeedHints,
};
use loom_ff_metrics::{ErasureLog, SelfMetrics};
use loom_ff_store::{
	restore_snapshot, snapshot_id, with_lock, EvalRequest, FlagStore, RateLimiter, RuntimeLock,
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument};

use crate::error::{Result, RuntimeError};
use crate::resolver::{resolve_rate_limiter, resolve_store, ResolvedStore};

/// Lock key serializing whole-store replacement.
pub const SNAPSHOT_LOCK_KEY: &str = "__snapshot__";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeSnapshot {
	/// Hex sha256 of the canonical snapshot JSON.
	pub id: String,
	pub data: FlagSnapshot,
}

/// Store, lock, limiter, bucketing cache, audit and telemetry rings and the
/// metrics aggregator for one process or tenant.
///
/// Cloning shares every component.
#[derive(Clone)]
pub struct FlagRuntime {
	config: Arc<RuntimeConfig>,
	store: Arc<dyn FlagStore>,
	lock: Arc<dyn RuntimeLock>,
	limiter: Arc<dyn RateLimiter>,
	bucketer: Arc<Bucketer>,
	telemetry: Telemetry,
	audit: AuditLog,
	metrics: Arc<SelfMetrics>,
	erasures: Arc<ErasureLog>,
}

impl std::fmt::Debug for FlagRuntime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FlagRuntime")
			.field("store", &self.store.name())
			.field("lock", &self.lock.name())
			.field("limiter", &self.limiter.name())
			.field("bucketer", &self.bucketer)
			.field("telemetry", &self.telemetry.kind())
			.finish_non_exhaustive()
	}
}

impl FlagRuntime {
	/// Resolve every backend from `config`. Must run inside a Tokio runtime.
	pub async fn from_config(config: RuntimeConfig) -> Result<Self> {
		let resolved = resolve_store(&config.store, &config.lock).await?;
		let limiter = resolve_rate_limiter(&config.store)?;
		Ok(Self::with_parts(config, resolved, limiter))
	}

	/// Assemble a runtime around already-built backends.
	///
	/// File-backed sinks spawn writer tasks, so call this inside a runtime.
	pub fn with_parts(
		config: RuntimeConfig,
		resolved: ResolvedStore,
		limiter: Arc<dyn RateLimiter>,
	) -> Self {
		let bucketer = Arc::new(Bucketer::new(
			config.bucket.strategy,
			config.bucket.cache_size,
		));
		let telemetry = Telemetry::new(&config.telemetry.options());
		let audit = AuditLog::new(
			config
				.audit
				.file
				.as_ref()
				.map(|path| NdjsonSink::spawn(path, DEFAULT_QUEUE_CAPACITY)),
		);
		let erasures = Arc::new(ErasureLog::new(&config.metrics.erasure_file));
		let metrics = Arc::new(SelfMetrics::new(
			config.metrics.options(),
			Arc::clone(&erasures),
		));
		info!(
			store = resolved.store.name(),
			lock = resolved.lock.name(),
			limiter = limiter.name(),
			strategy = %config.bucket.strategy,
			"flag runtime ready"
		);
		Self {
			config: Arc::new(config),
			store: resolved.store,
			lock: resolved.lock,
			limiter,
			bucketer,
			telemetry,
			audit,
			metrics,
			erasures,
		}
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.config
	}

	pub fn store(&self) -> &Arc<dyn FlagStore> {
		&self.store
	}

	pub fn lock(&self) -> &Arc<dyn RuntimeLock> {
		&self.lock
	}

	pub fn limiter(&self) -> &Arc<dyn RateLimiter> {
		&self.limiter
	}

	pub fn bucketer(&self) -> &Bucketer {
		&self.bucketer
	}

	pub fn telemetry(&self) -> &Telemetry {
		&self.telemetry
	}

	pub fn audit(&self) -> &AuditLog {
		&self.audit
	}

	pub fn metrics(&self) -> &SelfMetrics {
		&self.metrics
	}

	pub fn erasures(&self) -> &ErasureLog {
		&self.erasures
	}

	/// Effective value of `key` for `ctx`; `None` when the flag is missing,
	/// disabled or unreadable. Never fails.
	pub async fn evaluate(
		&self,
		key: &str,
		ctx: &EvaluationContext,
		hints: Option<&SeedHints>,
	) -> Option<EvaluationResult> {
		let started = Instant::now();
		let req = EvalRequest {
			ctx,
			hints,
			percent_fn: self.bucketer.as_ref(),
			options: EvaluationOptions {
				kill_all: self.config.kill.all,
			},
		};
		let result = self.store.evaluate(key, req).await?;
		let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
		debug!(flag = %key, reason = %result.reason, elapsed_ms, "flag evaluated");
		self.telemetry.track(TelemetryEvent {
			ts: now_ms(),
			flag: key.to_string(),
			value: result.value.clone(),
			source: result.reason,
			stable_id: ctx.stable_id.clone(),
			user_id: ctx.user_id.clone(),
			evaluation_time: Some(elapsed_ms),
			cache_hit: false,
		});
		Some(result)
	}

	pub async fn snapshot(&self) -> Result<RuntimeSnapshot> {
		let data = self.store.snapshot().await?;
		let id = snapshot_id(&data)?;
		Ok(RuntimeSnapshot { id, data })
	}

	/// Replace the whole store with `snapshot`.
	#[instrument(skip(self, snapshot), fields(flags = snapshot.flags.len(), overrides = snapshot.overrides.len()))]
	pub async fn restore(&self, snapshot: FlagSnapshot, actor: Option<&str>) -> Result<()> {
		let flags = snapshot.flags.len();
		let overrides = snapshot.overrides.len();
		let store = self.store.as_ref();
		with_lock(self.lock.as_ref(), SNAPSHOT_LOCK_KEY, || {
			restore_snapshot(store, snapshot)
		})
		.await??;
		self.record(
			AuditRecord::new(AuditAction::SnapshotRestore)
				.details(json!({ "flags": flags, "overrides": overrides })),
			actor,
		);
		info!(flags, overrides, "snapshot restored");
		Ok(())
	}

	pub async fn put_flag(&self, config: FlagConfig, actor: Option<&str>) -> Result<FlagConfig> {
		let key = config.key.clone();
		let store = self.store.as_ref();
		let stored = with_lock(self.lock.as_ref(), &key, || store.put_flag(config)).await??;
		self.record(
			AuditRecord::new(AuditAction::FlagPut)
				.flag(&key)
				.details(json!({ "enabled": stored.enabled, "killSwitch": stored.kill_switch })),
			actor,
		);
		Ok(stored)
	}

	pub async fn remove_flag(&self, key: &str, actor: Option<&str>) -> Result<()> {
		let store = self.store.as_ref();
		with_lock(self.lock.as_ref(), key, || store.remove_flag(key)).await??;
		self.record(AuditRecord::new(AuditAction::FlagRemove).flag(key), actor);
		Ok(())
	}

	pub async fn set_override(
		&self,
		entry: OverrideEntry,
		actor: Option<&str>,
	) -> Result<OverrideEntry> {
		let key = entry.flag.clone();
		let store = self.store.as_ref();
		let stored = with_lock(self.lock.as_ref(), &key, || store.put_override(entry)).await??;
		self.record(
			AuditRecord::new(AuditAction::OverrideSet)
				.flag(&key)
				.details(json!({
					"scope": stored.scope.to_string(),
					"value": stored.value,
					"expiresAt": stored.expires_at,
				})),
			actor,
		);
		Ok(stored)
	}

	pub async fn remove_override(
		&self,
		flag: &str,
		scope: &OverrideScope,
		actor: Option<&str>,
	) -> Result<()> {
		let store = self.store.as_ref();
		with_lock(self.lock.as_ref(), flag, || store.remove_override(flag, scope)).await??;
		self.record(
			AuditRecord::new(AuditAction::OverrideRemove)
				.flag(flag)
				.details(json!({ "scope": scope.to_string() })),
			actor,
		);
		Ok(())
	}

	/// Toggle a flag's kill switch. `kill_value` replaces the stored kill
	/// value when given (`Some(None)` means an explicit null).
	pub async fn set_kill_switch(
		&self,
		key: &str,
		enabled: bool,
		kill_value: Option<Option<FlagValue>>,
		actor: Option<&str>,
	) -> Result<FlagConfig> {
		let store = self.store.as_ref();
		let updated = with_lock(self.lock.as_ref(), key, || async move {
			let Some(mut flag) = store.get_flag(key).await? else {
				return Err(RuntimeError::FlagNotFound(key.to_string()));
			};
			flag.kill_switch = enabled;
			if kill_value.is_some() {
				flag.kill_value = kill_value;
			}
			Ok::<_, RuntimeError>(store.put_flag(flag).await?)
		})
		.await??;
		self.record(
			AuditRecord::new(AuditAction::KillSwitch)
				.flag(key)
				.details(json!({ "enabled": enabled })),
			actor,
		);
		Ok(updated)
	}

	pub(crate) fn record(&self, record: AuditRecord, actor: Option<&str>) {
		let record = match actor {
			Some(actor) => record.actor(actor),
			None => record,
		};
		self.audit.record(record);
	}
}
