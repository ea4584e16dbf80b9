// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("invalid chunk pattern: {0}")]
	Pattern(#[from] regex::Error),

	#[error("at least one identifier is required for erasure")]
	EmptyErasure,
}

impl MetricsError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		MetricsError::Io {
			path: path.into(),
			source,
		}
	}
}

pub type Result<T> = std::result::Result<T, MetricsError>;
