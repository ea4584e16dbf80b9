// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scoped override entries and the snapshot transport shape.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flag::FlagConfig;
use crate::value::FlagValue;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OverrideScope {
	User { id: String },
	Namespace { id: String },
	Global,
}

impl OverrideScope {
	pub fn user(id: impl Into<String>) -> Self {
		OverrideScope::User { id: id.into() }
	}

	pub fn namespace(id: impl Into<String>) -> Self {
		OverrideScope::Namespace { id: id.into() }
	}

	/// Field name used inside the per-flag Redis hash.
	pub fn hash_field(&self) -> String {
		match self {
			OverrideScope::User { id } => format!("user:{id}"),
			OverrideScope::Namespace { id } => format!("namespace:{id}"),
			OverrideScope::Global => "global".to_string(),
		}
	}
}

impl fmt::Display for OverrideScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.hash_field())
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideEntry {
	pub flag: String,
	pub scope: OverrideScope,
	pub value: FlagValue,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ttl_seconds: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<i64>,
	#[serde(default)]
	pub updated_at: i64,
}

impl OverrideEntry {
	pub fn new(
		flag: impl Into<String>,
		scope: OverrideScope,
		value: impl Into<FlagValue>,
		now_ms: i64,
	) -> Self {
		Self {
			flag: flag.into(),
			scope,
			value: value.into(),
			reason: None,
			author: None,
			ttl_seconds: None,
			expires_at: None,
			updated_at: now_ms,
		}
	}

	pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
		self.ttl_seconds = Some(ttl_seconds);
		self
	}

	/// Stamp `updated_at` and derive `expires_at` from the TTL when it is not already set.
	pub fn stamped(mut self, now_ms: i64) -> Self {
		self.updated_at = now_ms;
		if self.expires_at.is_none() {
			if let Some(ttl) = self.ttl_seconds {
				self.expires_at = Some(now_ms.saturating_add((ttl as i64).saturating_mul(1000)));
			}
		}
		self
	}

	pub fn is_expired(&self, now_ms: i64) -> bool {
		self.expires_at.is_some_and(|at| at <= now_ms)
	}
}

/// Full exportable state of a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagSnapshot {
	#[serde(default)]
	pub flags: Vec<FlagConfig>,
	#[serde(default)]
	pub overrides: Vec<OverrideEntry>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scope_is_tagged_by_type() {
		let json = serde_json::to_string(&OverrideScope::user("u1")).unwrap();
		assert_eq!(json, r#"{"type":"user","id":"u1"}"#);
		let global: OverrideScope = serde_json::from_str(r#"{"type":"global"}"#).unwrap();
		assert_eq!(global, OverrideScope::Global);
	}

	#[test]
	fn ttl_derives_expiry_once() {
		let entry = OverrideEntry::new("f", OverrideScope::Global, true, 0)
			.with_ttl(60)
			.stamped(1_000);
		assert_eq!(entry.expires_at, Some(61_000));
		assert!(!entry.is_expired(60_999));
		assert!(entry.is_expired(61_000));

		let restamped = entry.stamped(5_000);
		assert_eq!(restamped.expires_at, Some(61_000));
	}

	#[test]
	fn snapshot_missing_arrays_default_empty() {
		let snapshot: FlagSnapshot = serde_json::from_str("{}").unwrap();
		assert!(snapshot.flags.is_empty());
		assert!(snapshot.overrides.is_empty());
	}
}
