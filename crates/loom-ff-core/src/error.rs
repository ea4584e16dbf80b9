// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// A single rejected override key, reported alongside its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
	pub key: String,
	pub message: String,
}

impl std::fmt::Display for FieldError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}: {}", self.key, self.message)
	}
}

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
	#[error("invalid pair \"{0}\" (expected name:value)")]
	InvalidPair(String),

	#[error("undefined is not a valid override value (key \"{0}\")")]
	UndefinedValue(String),

	#[error("too many overrides: {count} (max {max})")]
	TooManyKeys { count: usize, max: usize },

	#[error("string too long for \"{key}\" (max {max})")]
	StringTooLong { key: String, max: usize },

	#[error("number out of range for \"{key}\" (allowed {min}..{max})")]
	NumberOutOfRange { key: String, min: f64, max: f64 },

	#[error("overrides too large: {size} bytes (max {max})")]
	TooLarge { size: usize, max: usize },

	#[error("invalid overrides: {}", format_field_errors(.0))]
	Invalid(Vec<FieldError>),

	#[error("serialization error: {0}")]
	Serialization(String),
}

fn format_field_errors(errors: &[FieldError]) -> String {
	errors
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join("; ")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BucketError {
	#[error("unknown bucket strategy '{0}' (expected murmur3_32 or xxhash32)")]
	UnknownStrategy(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
