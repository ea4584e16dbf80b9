// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use loom_ff_core::{
	now_ms, EvaluationResult, FlagConfig, FlagSnapshot, OverrideEntry, OverrideScope,
};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use tokio::sync::OnceCell;
use tracing::{instrument, warn};

use super::memory::MemoryFlagStore;
use super::{evaluate_config, order_overrides, prepare_flag, EvalRequest, FlagStore};
use crate::error::Result;

const FLAG_PREFIX: &str = "ff:flag:";
const OVERRIDE_PREFIX: &str = "ff:override:";
const SCAN_COUNT: usize = 200;

fn flag_key(key: &str) -> String {
	format!("{FLAG_PREFIX}{key}")
}

fn override_key(flag: &str) -> String {
	format!("{OVERRIDE_PREFIX}{flag}")
}

/// Redis-backed store.
///
/// Flags live as JSON under `ff:flag:{key}`; overrides as a hash under
/// `ff:override:{flag}` keyed by scope (`global`, `user:{id}`,
/// `namespace:{id}`). The first Redis error switches this instance to its
/// embedded memory store for the rest of its life.
pub struct RedisFlagStore {
	client: redis::Client,
	conn: OnceCell<MultiplexedConnection>,
	fallback: MemoryFlagStore,
	degraded: AtomicBool,
	display_url: String,
}

impl std::fmt::Debug for RedisFlagStore {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RedisFlagStore")
			.field("url", &self.display_url)
			.field("degraded", &self.is_degraded())
			.finish()
	}
}

impl RedisFlagStore {
	/// `display_url` is what ends up in logs; pass it pre-masked.
	pub fn new(client: redis::Client, display_url: impl Into<String>) -> Self {
		Self {
			client,
			conn: OnceCell::new(),
			fallback: MemoryFlagStore::new(),
			degraded: AtomicBool::new(false),
			display_url: display_url.into(),
		}
	}

	pub fn open(url: &str, display_url: impl Into<String>) -> Result<Self> {
		Ok(Self::new(redis::Client::open(url)?, display_url))
	}

	/// True once the store has fallen back to memory.
	pub fn is_degraded(&self) -> bool {
		self.degraded.load(Ordering::Acquire)
	}

	async fn connection(&self) -> RedisResult<MultiplexedConnection> {
		self.conn
			.get_or_try_init(|| self.client.get_multiplexed_async_connection())
			.await
			.cloned()
	}

	fn degrade(&self, op: &'static str, error: &redis::RedisError) {
		if !self.degraded.swap(true, Ordering::AcqRel) {
			warn!(
				url = %self.display_url,
				op,
				error = %error,
				"redis flag store failed, falling back to memory store"
			);
		}
	}

	/// Run `redis_op`, or the memory fallback once degraded.
	async fn guarded<'a, T, R, RFut, M, MFut>(&'a self, op: &'static str, redis_op: R, memory_op: M) -> Result<T>
	where
		R: FnOnce(MultiplexedConnection) -> RFut,
		RFut: Future<Output = RedisResult<T>>,
		M: FnOnce(&'a MemoryFlagStore) -> MFut,
		MFut: Future<Output = Result<T>>,
	{
		if !self.is_degraded() {
			let outcome = match self.connection().await {
				Ok(conn) => redis_op(conn).await,
				Err(e) => Err(e),
			};
			match outcome {
				Ok(value) => return Ok(value),
				Err(e) => self.degrade(op, &e),
			}
		}
		memory_op(&self.fallback).await
	}
}

async fn scan_keys(conn: &mut MultiplexedConnection, pattern: &str) -> RedisResult<Vec<String>> {
	let mut cursor: u64 = 0;
	let mut keys = Vec::new();
	loop {
		let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
			.arg(cursor)
			.arg("MATCH")
			.arg(pattern)
			.arg("COUNT")
			.arg(SCAN_COUNT)
			.query_async(conn)
			.await?;
		keys.extend(batch);
		if next == 0 {
			break;
		}
		cursor = next;
	}
	keys.sort();
	keys.dedup();
	Ok(keys)
}

fn parse_flag(raw: &str, redis_key: &str) -> Option<FlagConfig> {
	match serde_json::from_str(raw) {
		Ok(flag) => Some(flag),
		Err(e) => {
			warn!(key = %redis_key, error = %e, "skipping malformed flag blob");
			None
		}
	}
}

async fn read_flag(conn: &mut MultiplexedConnection, key: &str) -> RedisResult<Option<FlagConfig>> {
	let redis_key = flag_key(key);
	let raw: Option<String> = conn.get(&redis_key).await?;
	Ok(raw.and_then(|raw| parse_flag(&raw, &redis_key)))
}

async fn read_flags(conn: &mut MultiplexedConnection) -> RedisResult<Vec<FlagConfig>> {
	let keys = scan_keys(conn, &format!("{FLAG_PREFIX}*")).await?;
	let mut flags = Vec::with_capacity(keys.len());
	for redis_key in keys {
		let raw: Option<String> = conn.get(&redis_key).await?;
		if let Some(flag) = raw.and_then(|raw| parse_flag(&raw, &redis_key)) {
			flags.push(flag);
		}
	}
	flags.sort_by(|a, b| a.key.cmp(&b.key));
	Ok(flags)
}

/// Live overrides for a flag; expired hash fields are deleted on the way.
async fn read_overrides(
	conn: &mut MultiplexedConnection,
	flag: &str,
) -> RedisResult<Vec<OverrideEntry>> {
	let redis_key = override_key(flag);
	let fields: HashMap<String, String> = conn.hgetall(&redis_key).await?;
	let now = now_ms();
	let mut entries = Vec::with_capacity(fields.len());
	let mut expired = Vec::new();
	for (field, raw) in fields {
		match serde_json::from_str::<OverrideEntry>(&raw) {
			Ok(entry) if entry.is_expired(now) => expired.push(field),
			Ok(entry) => entries.push(entry),
			Err(e) => warn!(key = %redis_key, field = %field, error = %e, "skipping malformed override"),
		}
	}
	if !expired.is_empty() {
		let _: usize = conn.hdel(&redis_key, &expired).await?;
	}
	order_overrides(&mut entries);
	Ok(entries)
}

async fn clear_all(conn: &mut MultiplexedConnection) -> RedisResult<()> {
	let mut keys = scan_keys(conn, &format!("{FLAG_PREFIX}*")).await?;
	keys.extend(scan_keys(conn, &format!("{OVERRIDE_PREFIX}*")).await?);
	if !keys.is_empty() {
		let _: usize = conn.del(&keys).await?;
	}
	Ok(())
}

fn to_json<T: serde::Serialize>(value: &T) -> RedisResult<String> {
	serde_json::to_string(value).map_err(|e| {
		redis::RedisError::from((
			redis::ErrorKind::TypeError,
			"json encode failed",
			e.to_string(),
		))
	})
}

#[async_trait]
impl FlagStore for RedisFlagStore {
	fn name(&self) -> &'static str {
		"redis"
	}

	async fn list_flags(&self) -> Result<Vec<FlagConfig>> {
		self.guarded(
			"list_flags",
			|mut conn| async move { read_flags(&mut conn).await },
			|memory| memory.list_flags(),
		)
		.await
	}

	async fn get_flag(&self, key: &str) -> Result<Option<FlagConfig>> {
		self.guarded(
			"get_flag",
			|mut conn| async move { read_flag(&mut conn, key).await },
			|memory| memory.get_flag(key),
		)
		.await
	}

	#[instrument(skip(self, config), fields(flag = %config.key))]
	async fn put_flag(&self, config: FlagConfig) -> Result<FlagConfig> {
		let for_memory = config.clone();
		self.guarded(
			"put_flag",
			|mut conn| async move {
				let existing = read_flag(&mut conn, &config.key).await?;
				let next = prepare_flag(config, existing.as_ref(), now_ms());
				let _: () = conn.set(flag_key(&next.key), to_json(&next)?).await?;
				Ok::<_, redis::RedisError>(next)
			},
			|memory| memory.put_flag(for_memory),
		)
		.await
	}

	#[instrument(skip(self))]
	async fn remove_flag(&self, key: &str) -> Result<()> {
		self.guarded(
			"remove_flag",
			|mut conn| async move {
				let _: usize = conn.del(&[flag_key(key), override_key(key)]).await?;
				Ok::<_, redis::RedisError>(())
			},
			|memory| memory.remove_flag(key),
		)
		.await
	}

	async fn list_overrides(&self, flag: &str) -> Result<Vec<OverrideEntry>> {
		self.guarded(
			"list_overrides",
			|mut conn| async move { read_overrides(&mut conn, flag).await },
			|memory| memory.list_overrides(flag),
		)
		.await
	}

	#[instrument(skip(self, entry), fields(flag = %entry.flag, scope = %entry.scope))]
	async fn put_override(&self, entry: OverrideEntry) -> Result<OverrideEntry> {
		let for_memory = entry.clone();
		self.guarded(
			"put_override",
			|mut conn| async move {
				let stored = entry.stamped(now_ms());
				let _: usize = conn
					.hset(
						override_key(&stored.flag),
						stored.scope.hash_field(),
						to_json(&stored)?,
					)
					.await?;
				Ok::<_, redis::RedisError>(stored)
			},
			|memory| memory.put_override(for_memory),
		)
		.await
	}

	#[instrument(skip(self))]
	async fn remove_override(&self, flag: &str, scope: &OverrideScope) -> Result<()> {
		self.guarded(
			"remove_override",
			|mut conn| async move {
				let _: usize = conn.hdel(override_key(flag), scope.hash_field()).await?;
				Ok::<_, redis::RedisError>(())
			},
			|memory| memory.remove_override(flag, scope),
		)
		.await
	}

	#[instrument(skip(self))]
	async fn delete_overrides_by_user(&self, user_id: &str) -> Result<usize> {
		let field = OverrideScope::user(user_id).hash_field();
		let field_ref = &field;
		self.guarded(
			"delete_overrides_by_user",
			|mut conn| async move {
				let keys = scan_keys(&mut conn, &format!("{OVERRIDE_PREFIX}*")).await?;
				let mut removed = 0;
				for key in keys {
					let n: usize = conn.hdel(&key, field_ref).await?;
					removed += n;
				}
				Ok::<_, redis::RedisError>(removed)
			},
			|memory| memory.delete_overrides_by_user(user_id),
		)
		.await
	}

	async fn evaluate(&self, key: &str, req: EvalRequest<'_>) -> Option<EvaluationResult> {
		let loaded = self
			.guarded(
				"evaluate",
				|mut conn| async move {
					let Some(flag) = read_flag(&mut conn, key).await? else {
						return Ok(None);
					};
					let overrides = read_overrides(&mut conn, key).await?;
					Ok::<_, redis::RedisError>(Some((flag, overrides)))
				},
				|memory| async move {
					let Some(flag) = memory.get_flag(key).await? else {
						return Ok(None);
					};
					Ok::<_, crate::error::StoreError>(Some((flag, memory.list_overrides(key).await?)))
				},
			)
			.await;
		match loaded {
			Ok(Some((flag, overrides))) => evaluate_config(&flag, &overrides, req),
			Ok(None) => None,
			Err(e) => {
				warn!(flag = %key, error = %e, "flag evaluation could not load state");
				None
			}
		}
	}

	async fn snapshot(&self) -> Result<FlagSnapshot> {
		self.guarded(
			"snapshot",
			|mut conn| async move {
				let flags = read_flags(&mut conn).await?;
				// Overrides may exist for flags that were never created.
				let mut overrides = Vec::new();
				for redis_key in scan_keys(&mut conn, &format!("{OVERRIDE_PREFIX}*")).await? {
					if let Some(flag) = redis_key.strip_prefix(OVERRIDE_PREFIX) {
						overrides.extend(read_overrides(&mut conn, flag).await?);
					}
				}
				Ok::<_, redis::RedisError>(FlagSnapshot { flags, overrides })
			},
			|memory| memory.snapshot(),
		)
		.await
	}

	#[instrument(skip(self, snapshot), fields(flags = snapshot.flags.len()))]
	async fn replace_all(&self, snapshot: FlagSnapshot) -> Result<()> {
		let for_memory = snapshot.clone();
		self.guarded(
			"replace_all",
			|mut conn| async move {
				clear_all(&mut conn).await?;
				for flag in &snapshot.flags {
					let _: () = conn.set(flag_key(&flag.key), to_json(flag)?).await?;
				}
				for entry in &snapshot.overrides {
					let _: usize = conn
						.hset(
							override_key(&entry.flag),
							entry.scope.hash_field(),
							to_json(entry)?,
						)
						.await?;
				}
				Ok::<_, redis::RedisError>(())
			},
			|memory| memory.replace_all(for_memory),
		)
		.await
	}
}
