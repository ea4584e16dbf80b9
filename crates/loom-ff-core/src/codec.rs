// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Override DSL and cookie codec.
//!
//! Grammar accepted by [`parse_ff_query`]:
//!
//! ```text
//! query   := pair ( "," pair )*
//! pair    := name ":" literal
//! literal := "true" | "on" | "false" | "off" | "null"
//!          | '"' chars '"' | number | bare-string
//! ```
//!
//! Commas inside double quotes do not split pairs.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CodecError, FieldError, Result};
use crate::value::{FlagKind, FlagValue};

pub const OVERRIDE_COOKIE_NAME: &str = "sv_flags_override";
pub const MAX_OVERRIDE_SIZE_BYTES: usize = 3000;
pub const MAX_OVERRIDE_KEYS: usize = 50;
pub const MAX_STRING_LEN: usize = 256;
pub const MIN_NUMBER: f64 = -1e6;
pub const MAX_NUMBER: f64 = 1e6;

/// Parsed DSL: `None` deletes the key when applied.
pub type OverrideDiff = BTreeMap<String, Option<FlagValue>>;

/// Effective per-client overrides, as stored in the cookie.
pub type Overrides = BTreeMap<String, FlagValue>;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
	/// Keep `a.b` style keys. Off outside development.
	pub allow_dotted_paths: bool,
}

/// Split on commas that are not inside double quotes.
fn split_pairs(input: &str) -> Vec<&str> {
	let mut out = Vec::new();
	let mut in_quotes = false;
	let mut start = 0;
	for (i, ch) in input.char_indices() {
		match ch {
			'"' => in_quotes = !in_quotes,
			',' if !in_quotes => {
				out.push(input[start..i].trim());
				start = i + 1;
			}
			_ => {}
		}
	}
	out.push(input[start..].trim());
	out.into_iter().filter(|p| !p.is_empty()).collect()
}

/// `[+-]digits[.digits][e[+-]digits]`, also `.5` and `5.`.
fn is_numeric_literal(s: &str) -> bool {
	let bytes = s.as_bytes();
	let mut i = 0;
	if matches!(bytes.first(), Some(b'+' | b'-')) {
		i += 1;
	}
	let int_start = i;
	while i < bytes.len() && bytes[i].is_ascii_digit() {
		i += 1;
	}
	let mut digits = i - int_start;
	if i < bytes.len() && bytes[i] == b'.' {
		i += 1;
		let frac_start = i;
		while i < bytes.len() && bytes[i].is_ascii_digit() {
			i += 1;
		}
		digits += i - frac_start;
	}
	if digits == 0 {
		return false;
	}
	if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
		i += 1;
		if matches!(bytes.get(i), Some(b'+' | b'-')) {
			i += 1;
		}
		let exp_start = i;
		while i < bytes.len() && bytes[i].is_ascii_digit() {
			i += 1;
		}
		if i == exp_start {
			return false;
		}
	}
	i == bytes.len()
}

fn parse_literal(key: &str, raw: &str) -> Result<Option<FlagValue>> {
	let v = raw.trim();
	match v {
		"true" | "on" => return Ok(Some(FlagValue::Bool(true))),
		"false" | "off" => return Ok(Some(FlagValue::Bool(false))),
		"null" => return Ok(None),
		"undefined" => return Err(CodecError::UndefinedValue(key.to_string())),
		_ => {}
	}
	if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
		return Ok(Some(FlagValue::String(v[1..v.len() - 1].to_string())));
	}
	if is_numeric_literal(v) {
		if let Ok(n) = v.parse::<f64>() {
			return Ok(Some(FlagValue::Number(n)));
		}
	}
	Ok(Some(FlagValue::String(v.to_string())))
}

/// Parse `name:value,name2:"str"` into a diff.
pub fn parse_ff_query(input: &str, options: ParseOptions) -> Result<OverrideDiff> {
	let mut out = OverrideDiff::new();
	for pair in split_pairs(input) {
		let Some((key, raw)) = pair.split_once(':') else {
			return Err(CodecError::InvalidPair(pair.to_string()));
		};
		let key = key.trim();
		if key.is_empty() {
			return Err(CodecError::InvalidPair(pair.to_string()));
		}
		if !options.allow_dotted_paths && key.contains('.') {
			debug!(key = %key, "skipping dotted override key");
			continue;
		}
		out.insert(key.to_string(), parse_literal(key, raw)?);
	}
	Ok(out)
}

/// Apply a diff: `None` removes, anything else sets.
pub fn apply_override_diff(existing: &Overrides, diff: &OverrideDiff) -> Overrides {
	let mut next = existing.clone();
	for (key, value) in diff {
		match value {
			Some(value) => {
				next.insert(key.clone(), value.clone());
			}
			None => {
				next.remove(key);
			}
		}
	}
	next
}

/// Enforce the cookie-safety limits on a candidate override set.
pub fn validate_overrides(overrides: &Overrides) -> Result<()> {
	if overrides.len() > MAX_OVERRIDE_KEYS {
		return Err(CodecError::TooManyKeys {
			count: overrides.len(),
			max: MAX_OVERRIDE_KEYS,
		});
	}
	for (key, value) in overrides {
		match value {
			FlagValue::String(s) if s.chars().count() > MAX_STRING_LEN => {
				return Err(CodecError::StringTooLong {
					key: key.clone(),
					max: MAX_STRING_LEN,
				});
			}
			FlagValue::Number(n) if !n.is_finite() || *n < MIN_NUMBER || *n > MAX_NUMBER => {
				return Err(CodecError::NumberOutOfRange {
					key: key.clone(),
					min: MIN_NUMBER,
					max: MAX_NUMBER,
				});
			}
			_ => {}
		}
	}
	Ok(())
}

pub fn encode_overrides_cookie(overrides: &Overrides) -> Result<String> {
	let json =
		serde_json::to_string(overrides).map_err(|e| CodecError::Serialization(e.to_string()))?;
	if json.len() > MAX_OVERRIDE_SIZE_BYTES {
		return Err(CodecError::TooLarge {
			size: json.len(),
			max: MAX_OVERRIDE_SIZE_BYTES,
		});
	}
	Ok(json)
}

/// Parse a `Cookie` header into name/value pairs with percent-decoded values.
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
	header
		.split(';')
		.filter_map(|part| {
			let (name, value) = part.split_once('=')?;
			let value = value.trim();
			let decoded = urlencoding::decode(value)
				.map(|v| v.into_owned())
				.unwrap_or_else(|_| value.to_string());
			Some((name.trim().to_string(), decoded))
		})
		.collect()
}

/// Overrides carried in the cookie header; anything malformed reads as empty.
pub fn read_overrides_from_cookie_header(header: Option<&str>) -> Overrides {
	let Some(header) = header else {
		return Overrides::new();
	};
	let jar = parse_cookie_header(header);
	let Some(raw) = jar.get(OVERRIDE_COOKIE_NAME) else {
		return Overrides::new();
	};
	match serde_json::from_str(raw) {
		Ok(overrides) => overrides,
		Err(e) => {
			debug!(error = %e, "ignoring malformed override cookie");
			Overrides::new()
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
	pub kind: FlagKind,
	#[serde(default)]
	pub ignore_overrides: bool,
}

/// Declared flag types, used to type-check client overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRegistry {
	entries: BTreeMap<String, RegistryEntry>,
}

impl FlagRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, key: impl Into<String>, kind: FlagKind) -> &mut Self {
		self.entries.insert(
			key.into(),
			RegistryEntry {
				kind,
				ignore_overrides: false,
			},
		);
		self
	}

	/// Register a security-sensitive flag that clients may never override.
	pub fn register_protected(&mut self, key: impl Into<String>, kind: FlagKind) -> &mut Self {
		self.entries.insert(
			key.into(),
			RegistryEntry {
				kind,
				ignore_overrides: true,
			},
		);
		self
	}

	pub fn get(&self, key: &str) -> Option<&RegistryEntry> {
		self.entries.get(key)
	}

	/// Type-check every key, collecting all failures.
	pub fn validate(&self, overrides: &Overrides) -> Result<()> {
		validate_overrides(overrides)?;
		let errors: Vec<FieldError> = overrides
			.iter()
			.filter_map(|(key, value)| {
				let message = match self.entries.get(key) {
					None => "unknown flag".to_string(),
					Some(entry) if entry.kind != value.kind() => {
						format!("expected {}, got {}", entry.kind, value.kind())
					}
					Some(_) => return None,
				};
				Some(FieldError {
					key: key.clone(),
					message,
				})
			})
			.collect();
		if errors.is_empty() {
			Ok(())
		} else {
			Err(CodecError::Invalid(errors))
		}
	}

	/// Drop overrides for flags marked `ignoreOverrides`.
	pub fn filter_ignored(&self, overrides: &Overrides) -> Overrides {
		overrides
			.iter()
			.filter(|(key, _)| !self.entries.get(*key).is_some_and(|e| e.ignore_overrides))
			.map(|(k, v)| (k.clone(), v.clone()))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn n(v: f64) -> Option<FlagValue> {
		Some(FlagValue::Number(v))
	}

	#[test]
	fn parses_typed_literals() {
		let diff = parse_ff_query(r#"a:true,b:0,c:10.5,d:"str",e:off"#, ParseOptions::default())
			.unwrap();
		let expected: OverrideDiff = [
			("a".to_string(), Some(FlagValue::Bool(true))),
			("b".to_string(), n(0.0)),
			("c".to_string(), n(10.5)),
			("d".to_string(), Some(FlagValue::from("str"))),
			("e".to_string(), Some(FlagValue::Bool(false))),
		]
		.into_iter()
		.collect();
		assert_eq!(diff, expected);
	}

	#[test]
	fn quoted_commas_do_not_split() {
		let diff = parse_ff_query(r#"msg:"a, b",x:on"#, ParseOptions::default()).unwrap();
		assert_eq!(diff["msg"], Some(FlagValue::from("a, b")));
		assert_eq!(diff["x"], Some(FlagValue::Bool(true)));
	}

	#[test]
	fn bare_strings_and_null() {
		let diff = parse_ff_query("theme:dark,old:null, ,", ParseOptions::default()).unwrap();
		assert_eq!(diff["theme"], Some(FlagValue::from("dark")));
		assert_eq!(diff["old"], None);
		assert_eq!(diff.len(), 2);
	}

	#[test]
	fn non_numeric_words_stay_strings() {
		let diff = parse_ff_query("a:NaN,b:inf,c:1e3,d:-.5", ParseOptions::default()).unwrap();
		assert_eq!(diff["a"], Some(FlagValue::from("NaN")));
		assert_eq!(diff["b"], Some(FlagValue::from("inf")));
		assert_eq!(diff["c"], n(1000.0));
		assert_eq!(diff["d"], n(-0.5));
	}

	#[test]
	fn rejects_malformed_pairs() {
		assert_eq!(
			parse_ff_query("novalue", ParseOptions::default()),
			Err(CodecError::InvalidPair("novalue".to_string()))
		);
		assert_eq!(
			parse_ff_query("a:undefined", ParseOptions::default()),
			Err(CodecError::UndefinedValue("a".to_string()))
		);
	}

	#[test]
	fn dotted_keys_need_opt_in() {
		let diff = parse_ff_query("ui.theme:dark,b:1", ParseOptions::default()).unwrap();
		assert!(!diff.contains_key("ui.theme"));
		let diff = parse_ff_query(
			"ui.theme:dark",
			ParseOptions {
				allow_dotted_paths: true,
			},
		)
		.unwrap();
		assert_eq!(diff["ui.theme"], Some(FlagValue::from("dark")));
	}

	#[test]
	fn null_removes_key_when_applied() {
		let mut existing = Overrides::new();
		existing.insert("a".into(), FlagValue::Bool(true));
		existing.insert("b".into(), FlagValue::Number(2.0));
		let diff = parse_ff_query("a:null,c:x", ParseOptions::default()).unwrap();
		let next = apply_override_diff(&existing, &diff);
		assert!(!next.contains_key("a"));
		assert_eq!(next["b"], FlagValue::Number(2.0));
		assert_eq!(next["c"], FlagValue::from("x"));
	}

	#[test]
	fn limits_are_enforced() {
		let many: Overrides = (0..=MAX_OVERRIDE_KEYS)
			.map(|i| (format!("k{i}"), FlagValue::Bool(true)))
			.collect();
		assert!(matches!(
			validate_overrides(&many),
			Err(CodecError::TooManyKeys { .. })
		));

		let mut long = Overrides::new();
		long.insert("s".into(), FlagValue::String("x".repeat(MAX_STRING_LEN + 1)));
		assert!(matches!(
			validate_overrides(&long),
			Err(CodecError::StringTooLong { .. })
		));

		let mut big = Overrides::new();
		big.insert("n".into(), FlagValue::Number(1e6 + 1.0));
		assert!(matches!(
			validate_overrides(&big),
			Err(CodecError::NumberOutOfRange { .. })
		));
	}

	#[test]
	fn encoded_cookie_is_size_bounded() {
		let overrides: Overrides = (0..40)
			.map(|i| (format!("key{i}"), FlagValue::String("v".repeat(100))))
			.collect();
		assert!(matches!(
			encode_overrides_cookie(&overrides),
			Err(CodecError::TooLarge { .. })
		));

		let mut small = Overrides::new();
		small.insert("b".into(), FlagValue::Number(0.0));
		assert_eq!(encode_overrides_cookie(&small).unwrap(), r#"{"b":0}"#);
	}

	#[test]
	fn reads_cookie_header() {
		let header = format!(
			"sv_id=abc; {OVERRIDE_COOKIE_NAME}={}",
			urlencoding::encode(r#"{"a":true,"b":"x"}"#)
		);
		let overrides = read_overrides_from_cookie_header(Some(&header));
		assert_eq!(overrides["a"], FlagValue::Bool(true));
		assert_eq!(overrides["b"], FlagValue::from("x"));

		let broken = format!("{OVERRIDE_COOKIE_NAME}=not-json");
		assert!(read_overrides_from_cookie_header(Some(&broken)).is_empty());
		assert!(read_overrides_from_cookie_header(None).is_empty());
	}

	#[test]
	fn registry_validation_reports_every_key() {
		let mut registry = FlagRegistry::new();
		registry
			.register("dark_mode", FlagKind::Bool)
			.register("limit", FlagKind::Number);
		let mut overrides = Overrides::new();
		overrides.insert("dark_mode".into(), FlagValue::from("yes"));
		overrides.insert("limit".into(), FlagValue::Number(3.0));
		overrides.insert("ghost".into(), FlagValue::Bool(true));

		let Err(CodecError::Invalid(errors)) = registry.validate(&overrides) else {
			panic!("expected validation errors");
		};
		let keys: Vec<_> = errors.iter().map(|e| e.key.as_str()).collect();
		assert_eq!(keys, vec!["dark_mode", "ghost"]);
	}

	#[test]
	fn protected_flags_are_filtered() {
		let mut registry = FlagRegistry::new();
		registry
			.register("ui", FlagKind::Bool)
			.register_protected("payments", FlagKind::Bool);
		let mut overrides = Overrides::new();
		overrides.insert("ui".into(), FlagValue::Bool(true));
		overrides.insert("payments".into(), FlagValue::Bool(true));
		let filtered = registry.filter_ignored(&overrides);
		assert!(filtered.contains_key("ui"));
		assert!(!filtered.contains_key("payments"));
	}
}
