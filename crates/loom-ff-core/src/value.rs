// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scalar flag values.

use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Largest integer an f64 represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// The value a flag resolves to.
///
/// Integral numbers serialize without a fractional part so cookie and
/// snapshot payloads stay compact (`25`, not `25.0`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
	Bool(bool),
	Number(f64),
	String(String),
}

/// Declared type of a flag in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
	Bool,
	Number,
	String,
}

impl fmt::Display for FlagKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FlagKind::Bool => write!(f, "bool"),
			FlagKind::Number => write!(f, "number"),
			FlagKind::String => write!(f, "string"),
		}
	}
}

impl FlagValue {
	pub fn kind(&self) -> FlagKind {
		match self {
			FlagValue::Bool(_) => FlagKind::Bool,
			FlagValue::Number(_) => FlagKind::Number,
			FlagValue::String(_) => FlagKind::String,
		}
	}

	pub fn is_bool(&self) -> bool {
		matches!(self, FlagValue::Bool(_))
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			FlagValue::Number(n) => Some(*n),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}

	/// Truthiness used when a non-boolean default has to be shown as a toggle.
	pub fn truthy(&self) -> bool {
		match self {
			FlagValue::Bool(b) => *b,
			FlagValue::Number(n) => *n != 0.0 && !n.is_nan(),
			FlagValue::String(s) => !s.is_empty(),
		}
	}
}

impl Serialize for FlagValue {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			FlagValue::Bool(b) => serializer.serialize_bool(*b),
			FlagValue::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
				serializer.serialize_i64(*n as i64)
			}
			FlagValue::Number(n) => serializer.serialize_f64(*n),
			FlagValue::String(s) => serializer.serialize_str(s),
		}
	}
}

impl fmt::Display for FlagValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FlagValue::Bool(b) => write!(f, "{b}"),
			FlagValue::Number(n) => write!(f, "{n}"),
			FlagValue::String(s) => write!(f, "{s}"),
		}
	}
}

impl From<bool> for FlagValue {
	fn from(value: bool) -> Self {
		FlagValue::Bool(value)
	}
}

impl From<f64> for FlagValue {
	fn from(value: f64) -> Self {
		FlagValue::Number(value)
	}
}

impl From<i64> for FlagValue {
	fn from(value: i64) -> Self {
		FlagValue::Number(value as f64)
	}
}

impl From<&str> for FlagValue {
	fn from(value: &str) -> Self {
		FlagValue::String(value.to_string())
	}
}

impl From<String> for FlagValue {
	fn from(value: String) -> Self {
		FlagValue::String(value)
	}
}
