// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Admin wire format.
//!
//! The admin surface speaks [`ApiFlagConfig`]: percent is `currentPct`,
//! segments carry their conditions as an `if` map, and seeds use the short
//! public names. [`api_to_flag`] merges a payload over the stored flag so
//! fields the admin UI does not expose (salts, segment ids, `enabled`)
//! survive an edit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bucketing::clamp_percent;
use crate::flag::{
	FlagConfig, LegacyCondition, LegacyField, LegacyOp, RolloutHysteresis, RolloutShadow,
	RolloutStep, RolloutStopConditions, RolloutStrategy, SeedBy, SegmentConfig, SegmentWhere,
};
use crate::value::FlagValue;

pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiSeedBy {
	UserId,
	Cookie,
	IpUa,
	AnonId,
	StableId,
}

impl ApiSeedBy {
	fn from_seed(seed: SeedBy) -> Option<Self> {
		match seed {
			SeedBy::User | SeedBy::UserId => Some(ApiSeedBy::UserId),
			SeedBy::Cookie => Some(ApiSeedBy::Cookie),
			SeedBy::IpUa => Some(ApiSeedBy::IpUa),
			SeedBy::AnonId => Some(ApiSeedBy::AnonId),
			SeedBy::StableId => Some(ApiSeedBy::StableId),
			SeedBy::Namespace => None,
		}
	}

	fn into_seed(self) -> SeedBy {
		match self {
			ApiSeedBy::UserId => SeedBy::UserId,
			ApiSeedBy::Cookie => SeedBy::Cookie,
			ApiSeedBy::IpUa => SeedBy::IpUa,
			ApiSeedBy::AnonId => SeedBy::AnonId,
			ApiSeedBy::StableId => SeedBy::StableId,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRolloutStep {
	pub pct: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiRollout {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub current_pct: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub steps: Option<Vec<ApiRolloutStep>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub seed_by_default: Option<ApiSeedBy>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stop: Option<RolloutStopConditions>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub hysteresis: Option<RolloutHysteresis>,
	/// Absent keeps the stored shadow, explicit `null` clears it.
	#[serde(
		default,
		deserialize_with = "deserialize_present",
		skip_serializing_if = "Option::is_none"
	)]
	pub shadow: Option<Option<RolloutShadow>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSegmentRollout {
	pub pct: f64,
	#[serde(rename = "seedBy", default, skip_serializing_if = "Option::is_none")]
	pub seed_by: Option<ApiSeedBy>,
}

/// One value or several for an `if` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IfValue {
	One(String),
	Many(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSegment {
	#[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
	pub if_: Option<BTreeMap<String, IfValue>>,
	#[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
	pub where_: Option<Vec<SegmentWhere>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rollout: Option<ApiSegmentRollout>,
	#[serde(rename = "override", default, skip_serializing_if = "Option::is_none")]
	pub override_value: Option<FlagValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiFlagConfig {
	pub key: String,
	#[serde(default)]
	pub namespace: String,
	pub default: FlagValue,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tags: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub kill_switch: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rollout: Option<ApiRollout>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub segments: Option<Vec<ApiSegment>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created_at: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<i64>,
}

fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
	D: serde::Deserializer<'de>,
	T: Deserialize<'de>,
{
	Option::<T>::deserialize(deserializer).map(Some)
}

pub fn normalize_namespace(namespace: Option<&str>) -> String {
	match namespace.map(str::trim) {
		Some(ns) if !ns.is_empty() => ns.to_string(),
		_ => DEFAULT_NAMESPACE.to_string(),
	}
}

fn field_to_api_key(field: LegacyField) -> &'static str {
	match field {
		LegacyField::User => "userId",
		other => other.as_str(),
	}
}

fn api_key_to_field(key: &str) -> Option<LegacyField> {
	Some(match key {
		"userId" => LegacyField::User,
		"namespace" => LegacyField::Namespace,
		"cookie" => LegacyField::Cookie,
		"ip" => LegacyField::Ip,
		"ua" => LegacyField::Ua,
		"tag" => LegacyField::Tag,
		_ => return None,
	})
}

fn conditions_to_if(conditions: &[LegacyCondition]) -> Option<BTreeMap<String, IfValue>> {
	let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
	for condition in conditions {
		let values = grouped
			.entry(field_to_api_key(condition.field).to_string())
			.or_default();
		if !values.contains(&condition.value) {
			values.push(condition.value.clone());
		}
	}
	if grouped.is_empty() {
		return None;
	}
	Some(
		grouped
			.into_iter()
			.map(|(key, mut values)| {
				let value = if values.len() == 1 {
					IfValue::One(values.remove(0))
				} else {
					IfValue::Many(values)
				};
				(key, value)
			})
			.collect(),
	)
}

fn if_to_conditions(record: &BTreeMap<String, IfValue>) -> Vec<LegacyCondition> {
	let mut out = Vec::new();
	for (key, value) in record {
		let Some(field) = api_key_to_field(key) else {
			continue;
		};
		let values: Vec<&str> = match value {
			IfValue::One(v) => vec![v.as_str()],
			IfValue::Many(vs) => vs.iter().map(String::as_str).collect(),
		};
		for v in values.into_iter().map(str::trim).filter(|v| !v.is_empty()) {
			out.push(LegacyCondition {
				field,
				op: LegacyOp::Eq,
				value: v.to_string(),
			});
		}
	}
	out
}

fn to_api_segment(segment: &SegmentConfig) -> ApiSegment {
	ApiSegment {
		if_: conditions_to_if(&segment.conditions),
		where_: (!segment.where_.is_empty()).then(|| segment.where_.clone()),
		rollout: segment.rollout.as_ref().map(|r| ApiSegmentRollout {
			pct: clamp_percent(r.percent),
			seed_by: r.seed_by.and_then(ApiSeedBy::from_seed),
		}),
		override_value: segment.override_value.clone(),
	}
}

pub fn flag_to_api(flag: &FlagConfig) -> ApiFlagConfig {
	let rollout = flag.rollout.as_ref().map(|r| ApiRollout {
		current_pct: Some(clamp_percent(r.percent)),
		steps: r.steps.as_ref().map(|steps| {
			steps
				.iter()
				.map(|s| ApiRolloutStep {
					pct: clamp_percent(s.pct),
					note: s.note.clone(),
					at: s.at,
				})
				.collect()
		}),
		seed_by_default: r
			.seed_by_default
			.or(flag.seed_by_default)
			.and_then(ApiSeedBy::from_seed),
		stop: r.stop.clone(),
		hysteresis: r.hysteresis.clone(),
		shadow: r.shadow.clone().map(Some),
	});

	ApiFlagConfig {
		key: flag.key.clone(),
		namespace: normalize_namespace(flag.namespace.as_deref()),
		default: flag.default_value.clone(),
		version: Some(flag.version.unwrap_or(1)),
		description: flag.description.clone(),
		tags: (!flag.tags.is_empty()).then(|| flag.tags.clone()),
		kill_switch: Some(flag.kill_switch),
		rollout,
		segments: (!flag.segments.is_empty())
			.then(|| flag.segments.iter().map(to_api_segment).collect()),
		created_at: Some(flag.created_at),
		updated_at: Some(flag.updated_at),
	}
}

fn merge_segment(segment: &ApiSegment, index: usize, existing: Option<&SegmentConfig>) -> SegmentConfig {
	let rollout = match &segment.rollout {
		Some(r) => Some(RolloutStrategy {
			percent: clamp_percent(r.pct),
			seed_by: r
				.seed_by
				.map(ApiSeedBy::into_seed)
				.or_else(|| existing.and_then(|e| e.rollout.as_ref()?.seed_by)),
			salt: existing.and_then(|e| e.rollout.as_ref()?.salt.clone()),
			..Default::default()
		}),
		None => existing.and_then(|e| e.rollout.clone()),
	};
	SegmentConfig {
		id: existing.map(|e| e.id.clone()).unwrap_or_default(),
		name: existing.and_then(|e| e.name.clone()),
		priority: existing.map_or(index as i64, |e| e.priority),
		where_: segment.where_.clone().unwrap_or_default(),
		conditions: segment.if_.as_ref().map(if_to_conditions).unwrap_or_default(),
		override_value: segment
			.override_value
			.clone()
			.or_else(|| existing.and_then(|e| e.override_value.clone())),
		rollout,
		namespace: existing.and_then(|e| e.namespace.clone()),
	}
}

fn merge_steps(
	steps: Option<&[ApiRolloutStep]>,
	existing: Option<&[RolloutStep]>,
	now_ms: i64,
) -> Option<Vec<RolloutStep>> {
	let Some(steps) = steps else {
		return existing.map(<[RolloutStep]>::to_vec);
	};
	Some(
		steps
			.iter()
			.enumerate()
			.map(|(idx, step)| RolloutStep {
				pct: clamp_percent(step.pct),
				note: step.note.clone(),
				at: step
					.at
					.or_else(|| existing.and_then(|e| e.get(idx)?.at))
					.or(Some(now_ms)),
			})
			.collect(),
	)
}

/// Merge an admin payload over the stored flag.
pub fn api_to_flag(payload: &ApiFlagConfig, existing: Option<&FlagConfig>, now_ms: i64) -> FlagConfig {
	let existing_rollout = existing.and_then(|e| e.rollout.as_ref());

	let rollout = match &payload.rollout {
		Some(api) => {
			let current = api
				.current_pct
				.or_else(|| api.steps.as_ref()?.last().map(|s| s.pct))
				.unwrap_or_else(|| existing_rollout.map_or(0.0, |r| r.percent));
			Some(RolloutStrategy {
				percent: clamp_percent(current),
				salt: existing_rollout.and_then(|r| r.salt.clone()),
				seed_by: existing_rollout.and_then(|r| r.seed_by),
				seed_by_default: api
					.seed_by_default
					.map(ApiSeedBy::into_seed)
					.or_else(|| existing_rollout.and_then(|r| r.seed_by_default))
					.or_else(|| existing.and_then(|e| e.seed_by_default)),
				steps: merge_steps(
					api.steps.as_deref(),
					existing_rollout.and_then(|r| r.steps.as_deref()),
					now_ms,
				),
				stop: api
					.stop
					.clone()
					.or_else(|| existing_rollout.and_then(|r| r.stop.clone())),
				hysteresis: api
					.hysteresis
					.clone()
					.or_else(|| existing_rollout.and_then(|r| r.hysteresis.clone())),
				shadow: match &api.shadow {
					Some(explicit) => explicit.clone(),
					None => existing_rollout.and_then(|r| r.shadow.clone()),
				},
			})
		}
		None => existing_rollout.cloned(),
	};

	let segments = match &payload.segments {
		Some(segments) => segments
			.iter()
			.enumerate()
			.map(|(i, s)| merge_segment(s, i, existing.and_then(|e| e.segments.get(i))))
			.collect(),
		None => Vec::new(),
	};

	FlagConfig {
		key: payload.key.clone(),
		namespace: Some(normalize_namespace(Some(&payload.namespace))),
		version: Some(
			payload
				.version
				.unwrap_or_else(|| existing.and_then(|e| e.version).unwrap_or(0) + 1),
		),
		description: payload
			.description
			.clone()
			.or_else(|| existing.and_then(|e| e.description.clone())),
		enabled: existing.map_or(true, |e| e.enabled),
		kill_switch: payload
			.kill_switch
			.unwrap_or_else(|| existing.is_some_and(|e| e.kill_switch)),
		kill_value: existing.and_then(|e| e.kill_value.clone()),
		seed_by_default: rollout
			.as_ref()
			.and_then(|r| r.seed_by_default)
			.or_else(|| existing.and_then(|e| e.seed_by_default)),
		default_value: payload.default.clone(),
		tags: payload
			.tags
			.clone()
			.or_else(|| existing.map(|e| e.tags.clone()))
			.unwrap_or_default(),
		rollout,
		segments,
		created_at: existing
			.map(|e| e.created_at)
			.or(payload.created_at)
			.unwrap_or(now_ms),
		updated_at: now_ms,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn stored() -> FlagConfig {
		let mut flag = FlagConfig::new("checkout", 1_000);
		flag.version = Some(3);
		flag.enabled = false;
		flag.rollout = Some(RolloutStrategy {
			percent: 20.0,
			salt: Some("checkout-salt".into()),
			steps: Some(vec![RolloutStep {
				pct: 20.0,
				note: None,
				at: Some(500),
			}]),
			shadow: Some(RolloutShadow {
				pct: 40.0,
				seed_by: None,
			}),
			..Default::default()
		});
		flag.segments = vec![SegmentConfig {
			id: "seg-a".into(),
			priority: 7,
			conditions: vec![LegacyCondition {
				field: LegacyField::User,
				op: LegacyOp::Eq,
				value: "alice".into(),
			}],
			rollout: Some(RolloutStrategy {
				percent: 50.0,
				salt: Some("seg-salt".into()),
				..Default::default()
			}),
			..Default::default()
		}];
		flag
	}

	#[test]
	fn parses_admin_payload() {
		let payload: ApiFlagConfig = serde_json::from_value(json!({
			"key": "checkout",
			"namespace": " ",
			"default": true,
			"rollout": {"steps": [{"pct": 10}, {"pct": 35}], "seedByDefault": "ipUa"},
			"segments": [{"if": {"userId": ["bob", " "], "tag": "beta"}, "override": true}]
		}))
		.unwrap();
		let flag = api_to_flag(&payload, None, 9_000);

		assert_eq!(flag.namespace.as_deref(), Some(DEFAULT_NAMESPACE));
		assert_eq!(flag.version, Some(1));
		assert!(flag.enabled);
		assert_eq!(flag.created_at, 9_000);
		let rollout = flag.rollout.as_ref().unwrap();
		assert_eq!(rollout.percent, 35.0);
		assert_eq!(rollout.seed_by_default, Some(SeedBy::IpUa));
		assert_eq!(flag.seed_by_default, Some(SeedBy::IpUa));
		assert!(rollout.steps.as_ref().unwrap().iter().all(|s| s.at == Some(9_000)));

		let segment = &flag.segments[0];
		assert_eq!(segment.priority, 0);
		assert_eq!(segment.override_value, Some(FlagValue::Bool(true)));
		let fields: Vec<_> = segment.conditions.iter().map(|c| (c.field, c.value.as_str())).collect();
		assert_eq!(fields, vec![(LegacyField::Tag, "beta"), (LegacyField::User, "bob")]);
	}

	#[test]
	fn merge_keeps_hidden_fields() {
		let existing = stored();
		let payload = ApiFlagConfig {
			key: "checkout".into(),
			namespace: "shop".into(),
			default: FlagValue::Bool(false),
			version: None,
			description: None,
			tags: None,
			kill_switch: None,
			rollout: Some(ApiRollout {
				current_pct: Some(150.0),
				steps: Some(vec![
					ApiRolloutStep { pct: 20.0, note: None, at: None },
					ApiRolloutStep { pct: 60.0, note: Some("bump".into()), at: None },
				]),
				..Default::default()
			}),
			segments: Some(vec![ApiSegment {
				rollout: Some(ApiSegmentRollout { pct: 75.0, seed_by: None }),
				..Default::default()
			}]),
			created_at: Some(5),
			updated_at: None,
		};
		let flag = api_to_flag(&payload, Some(&existing), 2_000);

		assert_eq!(flag.version, Some(4));
		assert!(!flag.enabled);
		assert_eq!(flag.created_at, 1_000);
		assert_eq!(flag.updated_at, 2_000);

		let rollout = flag.rollout.as_ref().unwrap();
		assert_eq!(rollout.percent, 100.0);
		assert_eq!(rollout.salt.as_deref(), Some("checkout-salt"));
		assert_eq!(rollout.shadow.as_ref().map(|s| s.pct), Some(40.0));
		let at: Vec<_> = rollout.steps.as_ref().unwrap().iter().map(|s| s.at).collect();
		assert_eq!(at, vec![Some(500), Some(2_000)]);

		let segment = &flag.segments[0];
		assert_eq!(segment.id, "seg-a");
		assert_eq!(segment.priority, 7);
		let seg_rollout = segment.rollout.as_ref().unwrap();
		assert_eq!(seg_rollout.percent, 75.0);
		assert_eq!(seg_rollout.salt.as_deref(), Some("seg-salt"));
	}

	#[test]
	fn explicit_null_shadow_clears_it() {
		let existing = stored();
		let payload: ApiFlagConfig = serde_json::from_value(json!({
			"key": "checkout",
			"default": false,
			"rollout": {"shadow": null}
		}))
		.unwrap();
		let flag = api_to_flag(&payload, Some(&existing), 0);
		let rollout = flag.rollout.unwrap();
		assert!(rollout.shadow.is_none());
		assert_eq!(rollout.percent, 20.0);
	}

	#[test]
	fn flag_to_api_round_trips_through_merge() {
		let existing = stored();
		let api = flag_to_api(&existing);
		assert_eq!(api.rollout.as_ref().unwrap().current_pct, Some(20.0));
		assert_eq!(
			api.segments.as_ref().unwrap()[0].if_.as_ref().unwrap()["userId"],
			IfValue::One("alice".into())
		);

		let back = api_to_flag(&api, Some(&existing), existing.updated_at);
		assert_eq!(back.rollout, existing.rollout);
		assert_eq!(back.segments, existing.segments);
		assert_eq!(back.default_value, existing.default_value);
		assert_eq!(back.version, existing.version);
	}

	#[test]
	fn seed_names_map_to_public_set() {
		assert_eq!(ApiSeedBy::from_seed(SeedBy::User), Some(ApiSeedBy::UserId));
		assert_eq!(ApiSeedBy::from_seed(SeedBy::Namespace), None);
		assert_eq!(
			serde_json::to_string(&ApiSeedBy::IpUa).unwrap(),
			r#""ipUa""#
		);
	}
}
