// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation context and seed hints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who a flag is being evaluated for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
	pub stable_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cookie_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ip: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_agent: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub attributes: Map<String, Value>,
}

impl EvaluationContext {
	pub fn new(stable_id: impl Into<String>) -> Self {
		Self {
			stable_id: stable_id.into(),
			..Default::default()
		}
	}

	pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
		self.namespace = Some(namespace.into());
		self
	}

	pub fn with_cookie(mut self, cookie_id: impl Into<String>) -> Self {
		self.cookie_id = Some(cookie_id.into());
		self
	}

	pub fn with_ip_ua(mut self, ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
		self.ip = Some(ip.into());
		self.user_agent = Some(user_agent.into());
		self
	}

	pub fn with_tags<I, S>(mut self, tags: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.tags = tags.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_path(mut self, path: impl Into<String>) -> Self {
		self.path = Some(path.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.attributes.insert(key.into(), value.into());
		self
	}
}

/// Request-derived identifiers that take precedence over context fields when
/// seeding a rollout hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedHints {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub anon_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cookie: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ip: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_agent: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ip_ua: Option<String>,
}
