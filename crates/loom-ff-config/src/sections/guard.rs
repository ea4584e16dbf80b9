// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Override guard and admin rate limit section.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_OVERRIDE_GUARD_RPM: i64 = 10;
pub const MAX_OVERRIDE_GUARD_RPM: u32 = 240;
pub const MAX_ADMIN_RPM: u32 = 600;

/// `rpm <= 0` disables limiting (0); anything else is clamped to `1..=max`.
pub fn clamp_rpm(rpm: i64, max: u32) -> u32 {
	if rpm <= 0 {
		return 0;
	}
	rpm.clamp(1, i64::from(max)) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdminScope {
	Override,
	RolloutStep,
	Kill,
	TelemetryExport,
}

impl AdminScope {
	pub const ALL: [AdminScope; 4] = [
		AdminScope::Override,
		AdminScope::RolloutStep,
		AdminScope::Kill,
		AdminScope::TelemetryExport,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			AdminScope::Override => "override",
			AdminScope::RolloutStep => "rollout-step",
			AdminScope::Kill => "kill",
			AdminScope::TelemetryExport => "telemetry-export",
		}
	}

	pub fn default_rpm(&self) -> u32 {
		match self {
			AdminScope::Override => 20,
			AdminScope::RolloutStep => 5,
			AdminScope::Kill => 2,
			AdminScope::TelemetryExport => 2,
		}
	}
}

impl fmt::Display for AdminScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GuardConfigLayer {
	pub override_rpm: Option<i64>,
	pub tester_token: Option<String>,
	pub environment: Option<String>,
	pub allow_dotted_overrides: Option<bool>,
	pub admin_override_rpm: Option<i64>,
	pub admin_rollout_step_rpm: Option<i64>,
	pub admin_kill_rpm: Option<i64>,
	pub admin_telemetry_export_rpm: Option<i64>,
}

impl GuardConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.override_rpm.is_some() {
			self.override_rpm = other.override_rpm;
		}
		if other.tester_token.is_some() {
			self.tester_token = other.tester_token;
		}
		if other.environment.is_some() {
			self.environment = other.environment;
		}
		if other.allow_dotted_overrides.is_some() {
			self.allow_dotted_overrides = other.allow_dotted_overrides;
		}
		if other.admin_override_rpm.is_some() {
			self.admin_override_rpm = other.admin_override_rpm;
		}
		if other.admin_rollout_step_rpm.is_some() {
			self.admin_rollout_step_rpm = other.admin_rollout_step_rpm;
		}
		if other.admin_kill_rpm.is_some() {
			self.admin_kill_rpm = other.admin_kill_rpm;
		}
		if other.admin_telemetry_export_rpm.is_some() {
			self.admin_telemetry_export_rpm = other.admin_telemetry_export_rpm;
		}
	}

	pub fn finalize(self) -> GuardConfig {
		let admin = |value: Option<i64>, scope: AdminScope| {
			clamp_rpm(
				value.unwrap_or(i64::from(scope.default_rpm())),
				MAX_ADMIN_RPM,
			)
		};
		GuardConfig {
			override_rpm: clamp_rpm(
				self.override_rpm.unwrap_or(DEFAULT_OVERRIDE_GUARD_RPM),
				MAX_OVERRIDE_GUARD_RPM,
			),
			tester_token: self.tester_token.filter(|t| !t.is_empty()),
			environment: self
				.environment
				.unwrap_or_else(|| "development".to_string()),
			allow_dotted_overrides: self.allow_dotted_overrides.unwrap_or(false),
			admin_override_rpm: admin(self.admin_override_rpm, AdminScope::Override),
			admin_rollout_step_rpm: admin(self.admin_rollout_step_rpm, AdminScope::RolloutStep),
			admin_kill_rpm: admin(self.admin_kill_rpm, AdminScope::Kill),
			admin_telemetry_export_rpm: admin(
				self.admin_telemetry_export_rpm,
				AdminScope::TelemetryExport,
			),
		}
	}
}

#[derive(Clone, PartialEq)]
pub struct GuardConfig {
	/// Dev override endpoint limit; 0 disables it.
	pub override_rpm: u32,
	pub tester_token: Option<String>,
	pub environment: String,
	pub allow_dotted_overrides: bool,
	pub admin_override_rpm: u32,
	pub admin_rollout_step_rpm: u32,
	pub admin_kill_rpm: u32,
	pub admin_telemetry_export_rpm: u32,
}

impl GuardConfig {
	pub fn is_production(&self) -> bool {
		self.environment.eq_ignore_ascii_case("production")
	}

	pub fn admin_rpm(&self, scope: AdminScope) -> u32 {
		match scope {
			AdminScope::Override => self.admin_override_rpm,
			AdminScope::RolloutStep => self.admin_rollout_step_rpm,
			AdminScope::Kill => self.admin_kill_rpm,
			AdminScope::TelemetryExport => self.admin_telemetry_export_rpm,
		}
	}
}

impl fmt::Debug for GuardConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("GuardConfig")
			.field("override_rpm", &self.override_rpm)
			.field(
				"tester_token",
				&self.tester_token.as_ref().map(|_| "[REDACTED]"),
			)
			.field("environment", &self.environment)
			.field("allow_dotted_overrides", &self.allow_dotted_overrides)
			.field("admin_override_rpm", &self.admin_override_rpm)
			.field("admin_rollout_step_rpm", &self.admin_rollout_step_rpm)
			.field("admin_kill_rpm", &self.admin_kill_rpm)
			.field(
				"admin_telemetry_export_rpm",
				&self.admin_telemetry_export_rpm,
			)
			.finish()
	}
}

impl Default for GuardConfig {
	fn default() -> Self {
		GuardConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = GuardConfig::default();
		assert_eq!(config.override_rpm, 10);
		assert!(!config.is_production());
		assert!(config.tester_token.is_none());
		assert_eq!(config.admin_rpm(AdminScope::Override), 20);
		assert_eq!(config.admin_rpm(AdminScope::RolloutStep), 5);
		assert_eq!(config.admin_rpm(AdminScope::Kill), 2);
		assert_eq!(config.admin_rpm(AdminScope::TelemetryExport), 2);
	}

	#[test]
	fn rpm_clamping() {
		assert_eq!(clamp_rpm(0, 240), 0);
		assert_eq!(clamp_rpm(-5, 240), 0);
		assert_eq!(clamp_rpm(1000, 240), 240);
		assert_eq!(clamp_rpm(1000, MAX_ADMIN_RPM), 600);
		assert_eq!(clamp_rpm(7, 240), 7);
	}

	#[test]
	fn token_is_redacted_in_debug() {
		let config = GuardConfigLayer {
			tester_token: Some("sekrit".into()),
			environment: Some("Production".into()),
			..Default::default()
		}
		.finalize();
		assert!(config.is_production());
		assert!(!format!("{config:?}").contains("sekrit"));
	}

	#[test]
	fn scope_names() {
		let names: Vec<_> = AdminScope::ALL.iter().map(AdminScope::as_str).collect();
		assert_eq!(
			names,
			vec!["override", "rollout-step", "kill", "telemetry-export"]
		);
	}
}
