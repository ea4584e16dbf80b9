// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Privacy erasure and export.

use std::path::PathBuf;

use loom_ff_audit::{AuditAction, AuditRecord, TelemetryEvent, TelemetrySinkKind};
use loom_ff_core::{OverrideEntry, OverrideScope};
use loom_ff_metrics::{
	list_ndjson_files, purge_ndjson_files, ErasureIdentifier, ErasureRecord, ErasureSource,
	PurgeFileReport,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::error::Result;
use crate::runtime::FlagRuntime;

#[derive(Debug, Clone, Default)]
pub struct ErasureRequest {
	pub identifier: ErasureIdentifier,
	pub source: ErasureSource,
	pub note: Option<String>,
	/// Also rewrite the vitals, errors and telemetry logs without the
	/// matching records.
	pub purge_files: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureReport {
	pub record: ErasureRecord,
	pub overrides_removed: usize,
	pub purged: Vec<PurgeFileReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyExport {
	pub user_id: String,
	pub overrides: Vec<OverrideEntry>,
	pub telemetry: Vec<TelemetryEvent>,
}

impl FlagRuntime {
	/// Record an erasure, drop the user's overrides and optionally purge
	/// the metric and telemetry logs.
	#[instrument(skip(self, request, actor), fields(source = ?request.source))]
	pub async fn erase(&self, request: ErasureRequest, actor: Option<&str>) -> Result<ErasureReport> {
		let record = self
			.erasures()
			.append(&request.identifier, request.source, request.note)
			.await?;

		let overrides_removed = match record.identifier.user_id.as_deref() {
			Some(user_id) => self.store().delete_overrides_by_user(user_id).await?,
			None => 0,
		};

		let purged = if request.purge_files {
			let files = self.erasable_files().await?;
			purge_ndjson_files(&files, &record.identifier).await?
		} else {
			Vec::new()
		};
		self.metrics().invalidate();

		let removed_records: usize = purged.iter().map(|r| r.removed).sum();
		self.record(
			AuditRecord::new(AuditAction::PrivacyErase).details(json!({
				"source": record.source,
				"overridesRemoved": overrides_removed,
				"recordsRemoved": removed_records,
			})),
			actor,
		);
		info!(overrides_removed, removed_records, "privacy erasure applied");
		Ok(ErasureReport {
			record,
			overrides_removed,
			purged,
		})
	}

	/// Every override scoped to `user_id` plus the user's buffered
	/// evaluations.
	pub async fn export_user(&self, user_id: &str, actor: Option<&str>) -> Result<PrivacyExport> {
		let scope = OverrideScope::user(user_id);
		let mut overrides = Vec::new();
		for flag in self.store().list_flags().await? {
			overrides.extend(
				self.store()
					.list_overrides(&flag.key)
					.await?
					.into_iter()
					.filter(|entry| entry.scope == scope),
			);
		}
		let telemetry: Vec<_> = self
			.telemetry()
			.read_recent(usize::MAX, None)
			.into_iter()
			.filter(|event| event.user_id.as_deref() == Some(user_id))
			.collect();

		self.record(
			AuditRecord::new(AuditAction::PrivacyExport).details(json!({
				"overrides": overrides.len(),
				"telemetry": telemetry.len(),
			})),
			actor,
		);
		Ok(PrivacyExport {
			user_id: user_id.to_string(),
			overrides,
			telemetry,
		})
	}

	async fn erasable_files(&self) -> Result<Vec<PathBuf>> {
		let metrics = self.metrics().options();
		let mut files = list_ndjson_files(&metrics.vitals_file, metrics.chunks).await?;
		files.extend(list_ndjson_files(&metrics.errors_file, metrics.chunks).await?);
		if self.telemetry().kind() == TelemetrySinkKind::File {
			files.push(self.config().telemetry.file.clone());
		}
		Ok(files)
	}
}
