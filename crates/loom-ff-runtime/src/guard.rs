// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request gating for the dev override endpoint.

use std::time::Duration;

use loom_ff_core::parse_cookie_header;
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::Result;
use crate::runtime::FlagRuntime;

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const TESTER_HEADER: &str = "x-ff-tester";
pub const STABLE_ID_COOKIE: &str = "ff_aid";

/// Request headers with case-insensitive lookup. The first value wins.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
	entries: Vec<(String, String)>,
}

impl RequestHeaders {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.insert(name, value);
		self
	}

	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.entries.push((name.into(), value.into()));
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.entries
			.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}

	pub fn cookie(&self, name: &str) -> Option<String> {
		let header = self.get("cookie")?;
		parse_cookie_header(header)
			.remove(name)
			.filter(|v| !v.is_empty())
	}
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RequestHeaders {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			entries: iter
				.into_iter()
				.map(|(k, v)| (k.into(), v.into()))
				.collect(),
		}
	}
}

/// First `x-forwarded-for` hop, then `x-real-ip`, then `unknown`.
pub fn client_ip(headers: &RequestHeaders) -> String {
	let forwarded = headers
		.get("x-forwarded-for")
		.and_then(|v| v.split(',').next())
		.map(str::trim)
		.filter(|v| !v.is_empty());
	let real = headers
		.get("x-real-ip")
		.map(str::trim)
		.filter(|v| !v.is_empty());
	forwarded
		.or(real)
		.map(str::to_string)
		.unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "camelCase")]
pub enum GuardDecision {
	Allow,
	Deny {
		status: u16,
		error: String,
		/// Seconds, present on rate-limit denials.
		#[serde(skip_serializing_if = "Option::is_none")]
		retry_after: Option<u64>,
	},
}

impl GuardDecision {
	pub fn is_allowed(&self) -> bool {
		matches!(self, GuardDecision::Allow)
	}

	pub(crate) fn too_many(retry_after: u64) -> Self {
		GuardDecision::Deny {
			status: 429,
			error: "Too many requests".to_string(),
			retry_after: Some(retry_after),
		}
	}
}

fn tokens_match(given: &str, expected: &str) -> bool {
	given.as_bytes().ct_eq(expected.as_bytes()).into()
}

impl FlagRuntime {
	/// Rate-limit per client and stable id, then require the tester token in
	/// production.
	pub async fn guard_override_request(&self, headers: &RequestHeaders) -> Result<GuardDecision> {
		let guard = &self.config().guard;
		let ip = client_ip(headers);

		if guard.override_rpm > 0 {
			let stable = headers
				.cookie(STABLE_ID_COOKIE)
				.unwrap_or_else(|| "noaid".to_string());
			let key = format!("ff-override:{ip}:{stable}");
			let decision = self
				.limiter()
				.allow(&key, guard.override_rpm, RATE_LIMIT_WINDOW)
				.await?;
			if !decision.ok {
				debug!(key = %key, reset_in_ms = decision.reset_in_ms, "override request rate limited");
				return Ok(GuardDecision::too_many(decision.retry_after_secs()));
			}
		}

		if guard.is_production() {
			let given = headers.get(TESTER_HEADER).unwrap_or_default();
			let authorized = guard
				.tester_token
				.as_deref()
				.is_some_and(|expected| tokens_match(given, expected));
			if !authorized {
				warn!(client_ip = %ip, "override request without a valid tester token");
				return Ok(GuardDecision::Deny {
					status: 403,
					error: "Tester token required".to_string(),
					retry_after: None,
				});
			}
		}

		Ok(GuardDecision::Allow)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::runtime::tests::test_runtime;
	use loom_ff_config::{GuardConfigLayer, RuntimeConfig};
	use tempfile::TempDir;

	fn config(guard: GuardConfigLayer) -> RuntimeConfig {
		RuntimeConfig {
			guard: guard.finalize(),
			..Default::default()
		}
	}

	#[test]
	fn client_ip_prefers_first_forwarded_hop() {
		let headers = RequestHeaders::new()
			.with("X-Forwarded-For", " 203.0.113.9 , 10.0.0.1")
			.with("x-real-ip", "10.0.0.2");
		assert_eq!(client_ip(&headers), "203.0.113.9");

		let headers = RequestHeaders::new().with("X-Real-IP", "10.0.0.2");
		assert_eq!(client_ip(&headers), "10.0.0.2");

		assert_eq!(client_ip(&RequestHeaders::new()), "unknown");
	}

	#[test]
	fn cookie_lookup() {
		let headers: RequestHeaders = [("Cookie", "a=1; ff_aid=abc%20def")].into_iter().collect();
		assert_eq!(headers.cookie("ff_aid").as_deref(), Some("abc def"));
		assert_eq!(headers.cookie("missing"), None);
	}

	#[tokio::test]
	async fn rate_limit_is_per_client_and_stable_id() {
		let dir = TempDir::new().unwrap();
		let runtime = test_runtime(
			&dir,
			config(GuardConfigLayer {
				override_rpm: Some(2),
				..Default::default()
			}),
		);
		let alice = RequestHeaders::new()
			.with("x-forwarded-for", "1.1.1.1")
			.with("cookie", "ff_aid=alice");
		let bob = RequestHeaders::new()
			.with("x-forwarded-for", "1.1.1.1")
			.with("cookie", "ff_aid=bob");

		assert!(runtime.guard_override_request(&alice).await.unwrap().is_allowed());
		assert!(runtime.guard_override_request(&alice).await.unwrap().is_allowed());
		match runtime.guard_override_request(&alice).await.unwrap() {
			GuardDecision::Deny {
				status,
				retry_after,
				..
			} => {
				assert_eq!(status, 429);
				assert!(retry_after.unwrap() >= 1);
			}
			GuardDecision::Allow => panic!("third request should be limited"),
		}
		assert!(runtime.guard_override_request(&bob).await.unwrap().is_allowed());
	}

	#[tokio::test]
	async fn zero_rpm_disables_limit() {
		let dir = TempDir::new().unwrap();
		let runtime = test_runtime(
			&dir,
			config(GuardConfigLayer {
				override_rpm: Some(0),
				..Default::default()
			}),
		);
		for _ in 0..50 {
			assert!(runtime
				.guard_override_request(&RequestHeaders::new())
				.await
				.unwrap()
				.is_allowed());
		}
	}

	#[tokio::test]
	async fn production_requires_tester_token() {
		let dir = TempDir::new().unwrap();
		let runtime = test_runtime(
			&dir,
			config(GuardConfigLayer {
				environment: Some("production".into()),
				tester_token: Some("s3cret".into()),
				override_rpm: Some(0),
				..Default::default()
			}),
		);

		let denied = runtime
			.guard_override_request(&RequestHeaders::new().with("x-ff-tester", "wrong"))
			.await
			.unwrap();
		assert_eq!(
			denied,
			GuardDecision::Deny {
				status: 403,
				error: "Tester token required".into(),
				retry_after: None,
			}
		);
		assert!(runtime
			.guard_override_request(&RequestHeaders::new().with("X-FF-Tester", "s3cret"))
			.await
			.unwrap()
			.is_allowed());
	}

	#[tokio::test]
	async fn production_without_configured_token_denies() {
		let dir = TempDir::new().unwrap();
		let runtime = test_runtime(
			&dir,
			config(GuardConfigLayer {
				environment: Some("production".into()),
				..Default::default()
			}),
		);
		let decision = runtime
			.guard_override_request(&RequestHeaders::new().with("x-ff-tester", ""))
			.await
			.unwrap();
		assert!(!decision.is_allowed());
	}

	#[test]
	fn token_comparison() {
		assert!(tokens_match("abc", "abc"));
		assert!(!tokens_match("abc", "abd"));
		assert!(!tokens_match("abc", "abcd"));
	}
}
