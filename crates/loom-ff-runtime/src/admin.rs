// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-scope rate limits for admin mutations.

use loom_ff_config::AdminScope;
use tracing::debug;

use crate::error::Result;
use crate::guard::{GuardDecision, RATE_LIMIT_WINDOW};
use crate::runtime::FlagRuntime;

/// Who is calling an admin endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminActor {
	pub session: Option<String>,
	pub role: Option<String>,
	pub client_ip: Option<String>,
}

impl AdminActor {
	pub fn session(session: impl Into<String>) -> Self {
		Self {
			session: Some(session.into()),
			..Self::default()
		}
	}

	/// Session, else role, else client address.
	pub fn identifier(&self) -> &str {
		[&self.session, &self.role, &self.client_ip]
			.into_iter()
			.flatten()
			.map(String::as_str)
			.find(|v| !v.is_empty())
			.unwrap_or("unknown")
	}
}

impl FlagRuntime {
	pub async fn enforce_admin_rate_limit(
		&self,
		scope: AdminScope,
		actor: &AdminActor,
	) -> Result<GuardDecision> {
		let rpm = self.config().guard.admin_rpm(scope);
		if rpm == 0 {
			return Ok(GuardDecision::Allow);
		}
		let key = format!("admin:{scope}:{}", actor.identifier());
		let decision = self.limiter().allow(&key, rpm, RATE_LIMIT_WINDOW).await?;
		if decision.ok {
			return Ok(GuardDecision::Allow);
		}
		debug!(scope = %scope, key = %key, "admin request rate limited");
		Ok(GuardDecision::too_many(decision.retry_after_secs()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::runtime::tests::test_runtime;
	use loom_ff_config::{GuardConfigLayer, RuntimeConfig};
	use tempfile::TempDir;

	#[test]
	fn identifier_fallback_chain() {
		let mut actor = AdminActor {
			session: None,
			role: Some("admin".into()),
			client_ip: Some("10.0.0.1".into()),
		};
		assert_eq!(actor.identifier(), "admin");
		actor.session = Some("sess-1".into());
		assert_eq!(actor.identifier(), "sess-1");
		actor.session = Some(String::new());
		actor.role = None;
		assert_eq!(actor.identifier(), "10.0.0.1");
		assert_eq!(AdminActor::default().identifier(), "unknown");
	}

	#[tokio::test]
	async fn kill_scope_allows_two_per_minute() {
		let dir = TempDir::new().unwrap();
		let runtime = test_runtime(&dir, RuntimeConfig::default());
		let actor = AdminActor::session("ops");

		for _ in 0..2 {
			let decision = runtime
				.enforce_admin_rate_limit(AdminScope::Kill, &actor)
				.await
				.unwrap();
			assert!(decision.is_allowed());
		}
		let denied = runtime
			.enforce_admin_rate_limit(AdminScope::Kill, &actor)
			.await
			.unwrap();
		assert!(matches!(denied, GuardDecision::Deny { status: 429, .. }));

		let other_scope = runtime
			.enforce_admin_rate_limit(AdminScope::Override, &actor)
			.await
			.unwrap();
		assert!(other_scope.is_allowed());
	}

	#[tokio::test]
	async fn disabled_scope_never_limits() {
		let dir = TempDir::new().unwrap();
		let config = RuntimeConfig {
			guard: GuardConfigLayer {
				admin_kill_rpm: Some(0),
				..Default::default()
			}
			.finalize(),
			..Default::default()
		};
		let runtime = test_runtime(&dir, config);
		for _ in 0..10 {
			assert!(runtime
				.enforce_admin_rate_limit(AdminScope::Kill, &AdminActor::default())
				.await
				.unwrap()
				.is_allowed());
		}
	}
}
