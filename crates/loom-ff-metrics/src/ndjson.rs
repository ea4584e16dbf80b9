// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Discovery of day-chunked NDJSON files.
//!
//! A base file `vitals.ndjson` may be accompanied by rotated chunks named
//! `vitals-YYYYMMDD.ndjson` or `vitals-YYYYMMDD-N.ndjson` in the same
//! directory.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, Utc};
use regex::Regex;

use crate::error::{MetricsError, Result};

pub const DEFAULT_MAX_CHUNK_DAYS: u32 = 14;
pub const DEFAULT_MAX_CHUNK_COUNT: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
	/// Skip chunks dated more than this many days ago; 0 keeps all.
	pub max_chunk_days: u32,
	/// Keep only the newest N chunks; 0 keeps all.
	pub max_chunk_count: usize,
}

impl Default for ChunkOptions {
	fn default() -> Self {
		Self {
			max_chunk_days: DEFAULT_MAX_CHUNK_DAYS,
			max_chunk_count: DEFAULT_MAX_CHUNK_COUNT,
		}
	}
}

impl ChunkOptions {
	pub fn unbounded() -> Self {
		Self {
			max_chunk_days: 0,
			max_chunk_count: 0,
		}
	}
}

fn split_name(base: &Path) -> (String, String) {
	let name = base
		.file_name()
		.map(|n| n.to_string_lossy().into_owned())
		.unwrap_or_default();
	match name.rfind('.') {
		Some(dot) if dot > 0 => (name[..dot].to_string(), name[dot..].to_string()),
		_ => (name, String::new()),
	}
}

fn chunk_pattern(prefix: &str, ext: &str) -> Result<Regex> {
	Ok(Regex::new(&format!(
		r"^{}-(\d{{8}})(?:[-_](\d+))?{}$",
		regex::escape(prefix),
		regex::escape(ext)
	))?)
}

/// Date encoded in a chunk file name, if it is a chunk of `prefix`/`ext`.
pub fn parse_chunk_date(pattern: &Regex, name: &str) -> Option<NaiveDate> {
	let caps = pattern.captures(name)?;
	let digits = caps.get(1)?.as_str();
	let year = digits[0..4].parse().ok()?;
	let month = digits[4..6].parse().ok()?;
	let day = digits[6..8].parse().ok()?;
	NaiveDate::from_ymd_opt(year, month, day)
}

/// Chunks of `base` (oldest first, bounded by `options`) followed by `base`.
///
/// `base` is always the last entry even when it does not exist; readers
/// treat missing files as empty.
pub async fn list_ndjson_files(base: &Path, options: ChunkOptions) -> Result<Vec<PathBuf>> {
	let dir = match base.parent().filter(|p| !p.as_os_str().is_empty()) {
		Some(dir) => dir.to_path_buf(),
		None => PathBuf::from("."),
	};
	let (prefix, ext) = split_name(base);
	let pattern = chunk_pattern(&prefix, &ext)?;
	let cutoff = (options.max_chunk_days > 0)
		.then(|| Utc::now().date_naive() - Duration::days(i64::from(options.max_chunk_days)));

	let mut chunks: Vec<(NaiveDate, String, PathBuf)> = Vec::new();
	let mut entries = match tokio::fs::read_dir(&dir).await {
		Ok(entries) => entries,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![base.to_path_buf()]),
		Err(e) => return Err(MetricsError::io(&dir, e)),
	};
	while let Some(entry) = entries
		.next_entry()
		.await
		.map_err(|e| MetricsError::io(&dir, e))?
	{
		let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
		if !is_file {
			continue;
		}
		let name = entry.file_name().to_string_lossy().into_owned();
		let Some(date) = parse_chunk_date(&pattern, &name) else {
			continue;
		};
		if cutoff.is_some_and(|cutoff| date < cutoff) {
			continue;
		}
		chunks.push((date, name, entry.path()));
	}

	chunks.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
	let keep = match options.max_chunk_count {
		0 => chunks.len(),
		n => n.min(chunks.len()),
	};
	let mut files: Vec<PathBuf> = chunks
		.into_iter()
		.rev()
		.take(keep)
		.map(|(_, _, path)| path)
		.collect();
	files.reverse();
	files.push(base.to_path_buf());
	Ok(files)
}

/// Non-empty trimmed lines of `path`; a missing file has none.
pub async fn read_lines(path: &Path) -> Result<Vec<String>> {
	match tokio::fs::read_to_string(path).await {
		Ok(contents) => Ok(contents
			.lines()
			.map(str::trim)
			.filter(|l| !l.is_empty())
			.map(str::to_string)
			.collect()),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
		Err(e) => Err(MetricsError::io(path, e)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn day(offset: i64) -> String {
		(Utc::now().date_naive() - Duration::days(offset))
			.format("%Y%m%d")
			.to_string()
	}

	fn names(files: &[PathBuf]) -> Vec<String> {
		files
			.iter()
			.map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
			.collect()
	}

	#[test]
	fn chunk_names() {
		let pattern = chunk_pattern("vitals", ".ndjson").unwrap();
		assert_eq!(
			parse_chunk_date(&pattern, "vitals-20240131.ndjson"),
			NaiveDate::from_ymd_opt(2024, 1, 31)
		);
		assert!(parse_chunk_date(&pattern, "vitals-20240131-2.ndjson").is_some());
		assert!(parse_chunk_date(&pattern, "vitals-20240131_7.ndjson").is_some());
		assert!(parse_chunk_date(&pattern, "vitals-20241301.ndjson").is_none());
		assert!(parse_chunk_date(&pattern, "vitals-20240230.ndjson").is_none());
		assert!(parse_chunk_date(&pattern, "errors-20240131.ndjson").is_none());
		assert!(parse_chunk_date(&pattern, "vitals.ndjson").is_none());
	}

	#[tokio::test]
	async fn orders_chunks_and_appends_base() {
		let dir = TempDir::new().unwrap();
		for name in [
			format!("vitals-{}.ndjson", day(1)),
			format!("vitals-{}-2.ndjson", day(3)),
			format!("vitals-{}.ndjson", day(3)),
			format!("vitals-{}.ndjson", day(30)),
			"other.ndjson".to_string(),
		] {
			std::fs::write(dir.path().join(name), "").unwrap();
		}
		let base = dir.path().join("vitals.ndjson");
		let files = list_ndjson_files(&base, ChunkOptions::default()).await.unwrap();
		assert_eq!(
			names(&files),
			vec![
				format!("vitals-{}-2.ndjson", day(3)),
				format!("vitals-{}.ndjson", day(3)),
				format!("vitals-{}.ndjson", day(1)),
				"vitals.ndjson".to_string(),
			]
		);

		let all = list_ndjson_files(&base, ChunkOptions::unbounded()).await.unwrap();
		assert_eq!(all.len(), 5);

		let newest = list_ndjson_files(
			&base,
			ChunkOptions {
				max_chunk_days: 0,
				max_chunk_count: 1,
			},
		)
		.await
		.unwrap();
		assert_eq!(
			names(&newest),
			vec![format!("vitals-{}.ndjson", day(1)), "vitals.ndjson".to_string()]
		);
	}

	#[tokio::test]
	async fn missing_directory_yields_base_only() {
		let dir = TempDir::new().unwrap();
		let base = dir.path().join("absent").join("errors.ndjson");
		let files = list_ndjson_files(&base, ChunkOptions::default()).await.unwrap();
		assert_eq!(files, vec![base.clone()]);
		assert!(read_lines(&base).await.unwrap().is_empty());
	}
}
