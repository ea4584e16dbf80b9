// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Privacy erasure index.
//!
//! Erasure requests are appended to an NDJSON log. Readers of vitals and
//! error logs consult the index built from it and skip matching records.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use loom_ff_core::now_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{MetricsError, Result};
use crate::ndjson::read_lines;

pub const DEFAULT_ERASURE_FILE: &str = ".runtime/privacy.erasure.ndjson";
/// Files larger than this are reported and left alone by purges.
pub const PURGE_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErasureSource {
	#[serde(rename = "self")]
	SelfService,
	Admin,
	Ops,
	#[default]
	#[serde(other)]
	System,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureIdentifier {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stable_id: Option<String>,
}

impl ErasureIdentifier {
	pub fn user(user_id: impl Into<String>) -> Self {
		Self {
			user_id: Some(user_id.into()),
			..Self::default()
		}
	}

	fn normalized(&self) -> Self {
		Self {
			sid: normalize(self.sid.as_deref()),
			aid: normalize(self.aid.as_deref()),
			user_id: normalize(self.user_id.as_deref()),
			stable_id: normalize(self.stable_id.as_deref()),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.sid.is_none() && self.aid.is_none() && self.user_id.is_none() && self.stable_id.is_none()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErasureRecord {
	#[serde(default = "now_ms")]
	pub ts: i64,
	#[serde(default)]
	pub source: ErasureSource,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub note: Option<String>,
	#[serde(flatten)]
	pub identifier: ErasureIdentifier,
}

fn normalize(value: Option<&str>) -> Option<String> {
	value
		.map(str::trim)
		.filter(|v| !v.is_empty())
		.map(str::to_string)
}

/// Identifiers found on one telemetry, vitals or error record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErasureCandidate {
	pub sid: Option<String>,
	pub aid: Option<String>,
	pub user_id: Option<String>,
}

impl ErasureCandidate {
	/// `sid` falls back to `sessionId` then `stableId`; `aid` to `ff_aid`.
	pub fn from_json(record: &Value) -> Self {
		let field = |name: &str| normalize(record.get(name).and_then(Value::as_str));
		Self {
			sid: field("sid")
				.or_else(|| field("sessionId"))
				.or_else(|| field("stableId")),
			aid: field("aid").or_else(|| field("ff_aid")),
			user_id: field("userId"),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErasureIndex {
	sid: HashSet<String>,
	aid: HashSet<String>,
	user: HashSet<String>,
}

impl ErasureIndex {
	pub fn from_identifiers<'a>(ids: impl IntoIterator<Item = &'a ErasureIdentifier>) -> Self {
		let mut index = Self::default();
		for id in ids {
			let id = id.normalized();
			if let Some(sid) = id.sid.or(id.stable_id) {
				index.sid.insert(sid);
			}
			if let Some(aid) = id.aid {
				index.aid.insert(aid);
			}
			if let Some(user) = id.user_id {
				index.sid.insert(format!("u:{user}"));
				index.user.insert(user);
			}
		}
		index
	}

	pub fn has_any(&self) -> bool {
		!(self.sid.is_empty() && self.aid.is_empty() && self.user.is_empty())
	}

	pub fn is_erased(&self, candidate: &ErasureCandidate) -> bool {
		let hit = |set: &HashSet<String>, value: &Option<String>| {
			value.as_ref().is_some_and(|v| set.contains(v))
		};
		hit(&self.sid, &candidate.sid)
			|| hit(&self.aid, &candidate.aid)
			|| hit(&self.user, &candidate.user_id)
	}

	pub fn is_erased_json(&self, record: &Value) -> bool {
		self.has_any() && self.is_erased(&ErasureCandidate::from_json(record))
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeFileReport {
	pub file: PathBuf,
	pub removed: usize,
	pub retained: usize,
	pub size_bytes: u64,
	pub skipped: bool,
}

/// The erasure log file plus an index cached by file mtime.
#[derive(Debug)]
pub struct ErasureLog {
	path: PathBuf,
	cache: Mutex<Option<(SystemTime, Arc<ErasureIndex>)>>,
}

impl ErasureLog {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			cache: Mutex::new(None),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn append(
		&self,
		identifier: &ErasureIdentifier,
		source: ErasureSource,
		note: Option<String>,
	) -> Result<ErasureRecord> {
		let identifier = identifier.normalized();
		if identifier.is_empty() {
			return Err(MetricsError::EmptyErasure);
		}
		let record = ErasureRecord {
			ts: now_ms(),
			source,
			note,
			identifier,
		};
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| MetricsError::io(parent, e))?;
		}
		let mut line = serde_json::to_string(&record)?;
		line.push('\n');
		let mut file = tokio::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.await
			.map_err(|e| MetricsError::io(&self.path, e))?;
		file.write_all(line.as_bytes())
			.await
			.map_err(|e| MetricsError::io(&self.path, e))?;
		file.flush()
			.await
			.map_err(|e| MetricsError::io(&self.path, e))?;
		*self.cache.lock() = None;
		info!(path = %self.path.display(), source = ?record.source, "recorded privacy erasure");
		Ok(record)
	}

	pub async fn records(&self) -> Result<Vec<ErasureRecord>> {
		Ok(read_lines(&self.path)
			.await?
			.iter()
			.filter_map(|line| serde_json::from_str::<ErasureRecord>(line).ok())
			.filter(|r| !r.identifier.normalized().is_empty())
			.collect())
	}

	/// Current index; rebuilt only when the log's mtime changes.
	pub async fn index(&self) -> Result<Arc<ErasureIndex>> {
		let mtime = match tokio::fs::metadata(&self.path).await {
			Ok(meta) => meta.modified().ok(),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(Arc::new(ErasureIndex::default()));
			}
			Err(e) => return Err(MetricsError::io(&self.path, e)),
		};
		let cached = self
			.cache
			.lock()
			.as_ref()
			.filter(|(cached_at, _)| Some(*cached_at) == mtime)
			.map(|(_, index)| Arc::clone(index));
		if let Some(index) = cached {
			return Ok(index);
		}
		let records = self.records().await?;
		let index = Arc::new(ErasureIndex::from_identifiers(
			records.iter().map(|r| &r.identifier),
		));
		if let Some(mtime) = mtime {
			*self.cache.lock() = Some((mtime, Arc::clone(&index)));
		}
		debug!(path = %self.path.display(), records = records.len(), "rebuilt erasure index");
		Ok(index)
	}
}

/// Rewrite each file without the records matching `identifier`.
pub async fn purge_ndjson_files(
	files: &[PathBuf],
	identifier: &ErasureIdentifier,
) -> Result<Vec<PurgeFileReport>> {
	let index = ErasureIndex::from_identifiers([identifier]);
	let mut reports = Vec::with_capacity(files.len());
	for file in files {
		let mut report = PurgeFileReport {
			file: file.clone(),
			removed: 0,
			retained: 0,
			size_bytes: 0,
			skipped: !index.has_any(),
		};
		if report.skipped {
			reports.push(report);
			continue;
		}
		let meta = match tokio::fs::metadata(file).await {
			Ok(meta) => meta,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				reports.push(report);
				continue;
			}
			Err(e) => return Err(MetricsError::io(file, e)),
		};
		report.size_bytes = meta.len();
		if meta.len() > PURGE_THRESHOLD_BYTES {
			report.skipped = true;
			reports.push(report);
			continue;
		}

		let mut kept = String::new();
		for line in read_lines(file).await? {
			let erased = serde_json::from_str::<Value>(&line)
				.map(|record| index.is_erased_json(&record))
				.unwrap_or(false);
			if erased {
				report.removed += 1;
			} else {
				report.retained += 1;
				kept.push_str(&line);
				kept.push('\n');
			}
		}
		if report.removed > 0 {
			tokio::fs::write(file, kept)
				.await
				.map_err(|e| MetricsError::io(file, e))?;
		}
		reports.push(report);
	}
	Ok(reports)
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use tempfile::TempDir;

	#[test]
	fn user_erasure_covers_session_alias() {
		let index = ErasureIndex::from_identifiers([&ErasureIdentifier::user("42")]);
		assert!(index.is_erased_json(&json!({"userId": "42"})));
		assert!(index.is_erased_json(&json!({"sid": "u:42"})));
		assert!(index.is_erased_json(&json!({"sessionId": "u:42"})));
		assert!(!index.is_erased_json(&json!({"sid": "42"})));
		assert!(!index.is_erased_json(&json!({"userId": "43"})));
	}

	#[test]
	fn stable_id_counts_as_sid() {
		let id = ErasureIdentifier {
			stable_id: Some("  visitor-1 ".into()),
			aid: Some("a-1".into()),
			..ErasureIdentifier::default()
		};
		let index = ErasureIndex::from_identifiers([&id]);
		assert!(index.is_erased_json(&json!({"stableId": "visitor-1"})));
		assert!(index.is_erased_json(&json!({"ff_aid": "a-1"})));
		assert!(!ErasureIndex::default().is_erased_json(&json!({"sid": "visitor-1"})));
	}

	#[test]
	fn lenient_record_parsing() {
		let record: ErasureRecord =
			serde_json::from_str(r#"{"userId":"7","source":"martian"}"#).unwrap();
		assert_eq!(record.source, ErasureSource::System);
		assert!(record.ts > 0);
		let record: ErasureRecord = serde_json::from_str(r#"{"sid":"s","source":"self","ts":5}"#).unwrap();
		assert_eq!(record.source, ErasureSource::SelfService);
		assert_eq!(record.ts, 5);
	}

	#[tokio::test]
	async fn append_then_index() {
		let dir = TempDir::new().unwrap();
		let log = ErasureLog::new(dir.path().join("privacy").join("erasure.ndjson"));
		assert!(!log.index().await.unwrap().has_any());

		log.append(&ErasureIdentifier::user("9"), ErasureSource::Admin, None)
			.await
			.unwrap();
		let index = log.index().await.unwrap();
		assert!(index.is_erased_json(&json!({"userId": "9"})));
		assert!(Arc::ptr_eq(&index, &log.index().await.unwrap()));

		let err = log
			.append(&ErasureIdentifier::default(), ErasureSource::Admin, None)
			.await
			.unwrap_err();
		assert!(matches!(err, MetricsError::EmptyErasure));
	}

	#[tokio::test]
	async fn purge_rewrites_matching_lines() {
		let dir = TempDir::new().unwrap();
		let file = dir.path().join("vitals.ndjson");
		std::fs::write(
			&file,
			"{\"sid\":\"u:1\",\"value\":1}\n{\"sid\":\"keep\",\"value\":2}\nnot json\n{\"userId\":\"1\"}\n",
		)
		.unwrap();
		let missing = dir.path().join("missing.ndjson");
		let reports = purge_ndjson_files(&[file.clone(), missing], &ErasureIdentifier::user("1"))
			.await
			.unwrap();
		assert_eq!(reports[0].removed, 2);
		assert_eq!(reports[0].retained, 2);
		assert!(!reports[0].skipped);
		assert_eq!(reports[1].removed, 0);
		let contents = std::fs::read_to_string(&file).unwrap();
		assert_eq!(contents, "{\"sid\":\"keep\",\"value\":2}\nnot json\n");
	}
}
