// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit trail of flag mutations.

use std::fmt;

use loom_ff_core::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ring::Ring;
use crate::sink::NdjsonSink;

pub const AUDIT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
	FlagPut,
	FlagRemove,
	OverrideSet,
	OverrideRemove,
	RolloutStep,
	KillSwitch,
	SnapshotRestore,
	PrivacyErase,
	PrivacyExport,
}

impl fmt::Display for AuditAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			AuditAction::FlagPut => "flag_put",
			AuditAction::FlagRemove => "flag_remove",
			AuditAction::OverrideSet => "override_set",
			AuditAction::OverrideRemove => "override_remove",
			AuditAction::RolloutStep => "rollout_step",
			AuditAction::KillSwitch => "kill_switch",
			AuditAction::SnapshotRestore => "snapshot_restore",
			AuditAction::PrivacyErase => "privacy_erase",
			AuditAction::PrivacyExport => "privacy_export",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
	pub id: Uuid,
	pub ts: i64,
	pub action: AuditAction,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub actor: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub flag: Option<String>,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub details: Value,
}

impl AuditRecord {
	pub fn new(action: AuditAction) -> Self {
		Self {
			id: Uuid::new_v4(),
			ts: now_ms(),
			action,
			actor: None,
			flag: None,
			details: Value::Null,
		}
	}

	pub fn actor(mut self, actor: impl Into<String>) -> Self {
		self.actor = Some(actor.into());
		self
	}

	pub fn flag(mut self, flag: impl Into<String>) -> Self {
		self.flag = Some(flag.into());
		self
	}

	pub fn details(mut self, details: Value) -> Self {
		self.details = details;
		self
	}
}

/// In-memory audit trail, optionally mirrored to an NDJSON file.
#[derive(Debug, Clone)]
pub struct AuditLog {
	ring: Ring<AuditRecord>,
	file: Option<NdjsonSink>,
}

impl Default for AuditLog {
	fn default() -> Self {
		Self::new(None)
	}
}

impl AuditLog {
	pub fn new(file: Option<NdjsonSink>) -> Self {
		Self {
			ring: Ring::new(AUDIT_CAPACITY),
			file,
		}
	}

	/// Record an event. Never fails; a full file queue only loses the file copy.
	pub fn record(&self, record: AuditRecord) {
		tracing::debug!(
			action = %record.action,
			flag = record.flag.as_deref().unwrap_or(""),
			actor = record.actor.as_deref().unwrap_or(""),
			"audit"
		);
		if let Some(file) = &self.file {
			if !file.append(&record) {
				tracing::warn!(action = %record.action, "audit file queue full, record kept in memory only");
			}
		}
		self.ring.push(record);
	}

	/// Newest `limit` records, oldest first.
	pub fn recent(&self, limit: usize) -> Vec<AuditRecord> {
		self.ring.tail(limit)
	}

	pub fn len(&self) -> usize {
		self.ring.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ring.is_empty()
	}

	pub fn sink(&self) -> Option<&NdjsonSink> {
		self.file.as_ref()
	}
}
