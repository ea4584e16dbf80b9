// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),

	#[error("flag not found: {0}")]
	FlagNotFound(String),
}

impl StoreError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		StoreError::Io {
			path: path.into(),
			source,
		}
	}
}

#[derive(Debug, Error)]
pub enum LockError {
	#[error("timed out acquiring lock '{key}' after {waited_ms}ms")]
	Timeout { key: String, waited_ms: u64 },

	#[error("lock I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("redis lock error: {0}")]
	Redis(#[from] redis::RedisError),
}

#[derive(Debug, Error)]
pub enum RateLimitError {
	#[error("redis rate limiter error: {0}")]
	Redis(#[from] redis::RedisError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
