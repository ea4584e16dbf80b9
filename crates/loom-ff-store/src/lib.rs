// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistence and coordination for the Loom flag runtime.
//!
//! - [`FlagStore`] backends: memory, snapshot file, Redis.
//! - [`RuntimeLock`] backends guarding read-modify-write cycles.
//! - [`RateLimiter`] backends for mutation endpoints.
//!
//! The Redis store, lock and rate limiter switch to their in-process
//! counterpart on the first Redis failure and never switch back.

pub mod error;
pub mod lock;
pub mod ratelimit;
pub mod snapshot;
pub mod store;

pub use error::{LockError, RateLimitError, Result, StoreError};
pub use lock::{
	with_lock, FileRuntimeLock, InMemoryRuntimeLock, LockOptions, LockToken, RedisRuntimeLock,
	RuntimeLock,
};
pub use ratelimit::{MemoryRateLimiter, RateLimitDecision, RateLimiter, RedisRateLimiter};
pub use snapshot::{
	read_snapshot_file, restore_snapshot, snapshot_id, write_atomic, write_snapshot_file,
};
pub use store::{EvalRequest, FileFlagStore, FlagStore, MemoryFlagStore, RedisFlagStore};
