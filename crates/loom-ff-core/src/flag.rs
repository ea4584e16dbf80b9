// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag configuration model.
//!
//! These types are the persisted shape of a flag: they round-trip through
//! snapshot files and the Redis JSON blobs unchanged, so field names follow
//! the camelCase wire format.

use serde::{Deserialize, Deserializer, Serialize};

use crate::value::FlagValue;

/// Which request attribute seeds the rollout hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SeedBy {
	#[default]
	StableId,
	AnonId,
	User,
	UserId,
	Namespace,
	Cookie,
	IpUa,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutStopConditions {
	#[serde(rename = "maxErrorRate", default, skip_serializing_if = "Option::is_none")]
	pub max_error_rate: Option<f64>,
	#[serde(rename = "maxCLS", default, skip_serializing_if = "Option::is_none")]
	pub max_cls: Option<f64>,
	#[serde(rename = "maxINP", default, skip_serializing_if = "Option::is_none")]
	pub max_inp: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolloutHysteresis {
	#[serde(rename = "errorRate", default, skip_serializing_if = "Option::is_none")]
	pub error_rate: Option<f64>,
	#[serde(rename = "CLS", default, skip_serializing_if = "Option::is_none")]
	pub cls: Option<f64>,
	#[serde(rename = "INP", default, skip_serializing_if = "Option::is_none")]
	pub inp: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutStep {
	pub pct: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub at: Option<i64>,
}

/// Parallel canary percentage evaluated next to the live rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutShadow {
	pub pct: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seed_by: Option<SeedBy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
	#[serde(default)]
	pub percent: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub salt: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seed_by: Option<SeedBy>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seed_by_default: Option<SeedBy>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub steps: Option<Vec<RolloutStep>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stop: Option<RolloutStopConditions>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub hysteresis: Option<RolloutHysteresis>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub shadow: Option<RolloutShadow>,
}

impl RolloutStrategy {
	pub fn with_percent(percent: f64) -> Self {
		Self {
			percent,
			..Default::default()
		}
	}

	/// Salt for this rollout, or `fallback` when none is configured.
	pub fn salt_or(&self, fallback: impl FnOnce() -> String) -> String {
		match self.salt.as_deref() {
			Some(salt) if !salt.is_empty() => salt.to_string(),
			_ => fallback(),
		}
	}
}

/// Right-hand side of an `eq` predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EqOperand {
	Number(f64),
	String(String),
}

/// A typed segment predicate, discriminated by `op` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum SegmentWhere {
	#[serde(rename = "eq")]
	Eq { field: String, value: EqOperand },
	#[serde(rename = "startsWith")]
	StartsWith { field: String, value: String },
	#[serde(rename = "contains")]
	Contains { field: String, value: String },
	#[serde(rename = "in")]
	In { field: String, values: Vec<String> },
	#[serde(rename = "notIn")]
	NotIn { field: String, values: Vec<String> },
	#[serde(rename = "gt")]
	Gt { field: String, value: f64 },
	#[serde(rename = "lt")]
	Lt { field: String, value: f64 },
	#[serde(rename = "between")]
	Between { field: String, min: f64, max: f64 },
	#[serde(rename = "glob")]
	Glob { field: String, value: String },
}

impl SegmentWhere {
	pub fn field(&self) -> &str {
		match self {
			SegmentWhere::Eq { field, .. }
			| SegmentWhere::StartsWith { field, .. }
			| SegmentWhere::Contains { field, .. }
			| SegmentWhere::In { field, .. }
			| SegmentWhere::NotIn { field, .. }
			| SegmentWhere::Gt { field, .. }
			| SegmentWhere::Lt { field, .. }
			| SegmentWhere::Between { field, .. }
			| SegmentWhere::Glob { field, .. } => field,
		}
	}

	pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
		SegmentWhere::Eq {
			field: field.into(),
			value: EqOperand::String(value.into()),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyField {
	User,
	Namespace,
	Cookie,
	Ip,
	Ua,
	Tag,
}

impl LegacyField {
	pub fn as_str(&self) -> &'static str {
		match self {
			LegacyField::User => "user",
			LegacyField::Namespace => "namespace",
			LegacyField::Cookie => "cookie",
			LegacyField::Ip => "ip",
			LegacyField::Ua => "ua",
			LegacyField::Tag => "tag",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LegacyOp {
	#[default]
	Eq,
}

/// Pre-`where` condition format. Still read from old snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyCondition {
	pub field: LegacyField,
	#[serde(default)]
	pub op: LegacyOp,
	pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
	#[serde(default)]
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default)]
	pub priority: i64,
	#[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
	pub where_: Vec<SegmentWhere>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub conditions: Vec<LegacyCondition>,
	#[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
	pub override_value: Option<FlagValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rollout: Option<RolloutStrategy>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagConfig {
	pub key: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
	#[serde(default, alias = "kill")]
	pub kill_switch: bool,
	/// `Some(None)` is an explicit `null` kill value.
	#[serde(
		default,
		deserialize_with = "deserialize_present",
		skip_serializing_if = "Option::is_none"
	)]
	pub kill_value: Option<Option<FlagValue>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seed_by_default: Option<SeedBy>,
	pub default_value: FlagValue,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rollout: Option<RolloutStrategy>,
	#[serde(default)]
	pub segments: Vec<SegmentConfig>,
	#[serde(default)]
	pub created_at: i64,
	#[serde(default)]
	pub updated_at: i64,
}

fn default_enabled() -> bool {
	true
}

/// Distinguishes an explicit `null` from an absent field.
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
	D: Deserializer<'de>,
	T: Deserialize<'de>,
{
	Option::<T>::deserialize(deserializer).map(Some)
}

impl FlagConfig {
	/// A fresh enabled boolean flag defaulting to `false`.
	pub fn new(key: impl Into<String>, now_ms: i64) -> Self {
		Self {
			key: key.into(),
			namespace: None,
			version: None,
			description: None,
			enabled: true,
			kill_switch: false,
			kill_value: None,
			seed_by_default: None,
			default_value: FlagValue::Bool(false),
			tags: Vec::new(),
			rollout: None,
			segments: Vec::new(),
			created_at: now_ms,
			updated_at: now_ms,
		}
	}

	/// Value returned while the kill switch is active.
	pub fn kill_value_or_default(&self) -> Option<FlagValue> {
		match &self.kill_value {
			Some(explicit) => explicit.clone(),
			None if self.default_value.is_bool() => Some(FlagValue::Bool(false)),
			None => Some(self.default_value.clone()),
		}
	}

	pub fn seed_by_default(&self) -> SeedBy {
		self.seed_by_default.unwrap_or_default()
	}

	/// Stable sort by priority; equal priorities keep insertion order.
	pub fn sort_segments(&mut self) {
		self.segments.sort_by_key(|s| s.priority);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn seed_by_uses_wire_names() {
		let json = serde_json::to_string(&[SeedBy::IpUa, SeedBy::StableId, SeedBy::UserId]).unwrap();
		assert_eq!(json, r#"["ipUa","stableId","userId"]"#);
	}

	#[test]
	fn segment_where_is_tagged_by_op() {
		let clause: SegmentWhere =
			serde_json::from_str(r#"{"field":"age","op":"between","min":18,"max":30}"#).unwrap();
		assert_eq!(
			clause,
			SegmentWhere::Between {
				field: "age".to_string(),
				min: 18.0,
				max: 30.0
			}
		);
		let clause: SegmentWhere =
			serde_json::from_str(r#"{"field":"plan","op":"eq","value":"pro"}"#).unwrap();
		assert_eq!(clause, SegmentWhere::eq("plan", "pro"));
	}

	#[test]
	fn kill_value_distinguishes_null_from_absent() {
		let explicit: FlagConfig =
			serde_json::from_str(r#"{"key":"a","defaultValue":"blue","killValue":null}"#).unwrap();
		assert_eq!(explicit.kill_value, Some(None));
		assert_eq!(explicit.kill_value_or_default(), None);

		let absent: FlagConfig = serde_json::from_str(r#"{"key":"a","defaultValue":"blue"}"#).unwrap();
		assert_eq!(absent.kill_value, None);
		assert_eq!(
			absent.kill_value_or_default(),
			Some(FlagValue::String("blue".to_string()))
		);

		let boolean: FlagConfig = serde_json::from_str(r#"{"key":"a","defaultValue":true}"#).unwrap();
		assert_eq!(boolean.kill_value_or_default(), Some(FlagValue::Bool(false)));
	}

	#[test]
	fn legacy_kill_field_is_accepted() {
		let flag: FlagConfig =
			serde_json::from_str(r#"{"key":"a","defaultValue":true,"kill":true}"#).unwrap();
		assert!(flag.kill_switch);
		assert!(flag.enabled);
	}

	#[test]
	fn sort_segments_orders_by_priority() {
		let mut flag = FlagConfig::new("a", 0);
		flag.segments = vec![
			SegmentConfig {
				id: "late".into(),
				priority: 10,
				..Default::default()
			},
			SegmentConfig {
				id: "early".into(),
				priority: 1,
				..Default::default()
			},
		];
		flag.sort_segments();
		assert_eq!(flag.segments[0].id, "early");
	}
}
