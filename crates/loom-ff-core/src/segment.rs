// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Segment predicate matching.

use std::borrow::Cow;

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::context::EvaluationContext;
use crate::flag::{EqOperand, LegacyCondition, SegmentConfig, SegmentWhere};

fn alias(field: &str) -> &str {
	match field {
		"user" => "userId",
		"cookie" => "cookieId",
		"ua" => "userAgent",
		other => other,
	}
}

fn walk(mut current: &Value, path: &[&str]) -> Option<Value> {
	for part in path {
		current = current.as_object()?.get(*part)?;
	}
	Some(current.clone())
}

fn opt_string(value: &Option<String>) -> Option<Value> {
	value.as_ref().map(|s| Value::String(s.clone()))
}

/// Resolve a (possibly aliased, possibly dotted) field against the context.
///
/// Unknown top-level names are looked up in `attributes`, so `plan` and
/// `attributes.plan` address the same value.
pub fn resolve_field(ctx: &EvaluationContext, field: &str) -> Option<Value> {
	if field == "tag" || field == "tags" {
		return Some(Value::Array(
			ctx.tags.iter().cloned().map(Value::String).collect(),
		));
	}

	let mapped = alias(field);
	let parts: Vec<&str> = mapped.split('.').collect();
	let (head, rest) = parts.split_first()?;

	let scalar = match *head {
		"stableId" => Some(Value::String(ctx.stable_id.clone())),
		"userId" => opt_string(&ctx.user_id),
		"namespace" => opt_string(&ctx.namespace),
		"cookieId" => opt_string(&ctx.cookie_id),
		"ip" => opt_string(&ctx.ip),
		"userAgent" => opt_string(&ctx.user_agent),
		"path" => opt_string(&ctx.path),
		"attributes" => {
			let attributes = Value::Object(ctx.attributes.clone());
			return walk(&attributes, rest);
		}
		_ => {
			let first = ctx.attributes.get(*head)?;
			return walk(first, rest);
		}
	};

	if rest.is_empty() {
		scalar
	} else {
		None
	}
}

fn any_string(value: &Value, predicate: impl Fn(&str) -> bool) -> bool {
	match value {
		Value::String(s) => predicate(s),
		Value::Array(items) => items.iter().filter_map(Value::as_str).any(predicate),
		_ => false,
	}
}

fn any_number(value: &Value, predicate: impl Fn(f64) -> bool) -> bool {
	match value {
		Value::Number(n) => n.as_f64().is_some_and(predicate),
		Value::Array(items) => items.iter().filter_map(Value::as_f64).any(predicate),
		_ => false,
	}
}

fn in_set(value: &Value, candidates: &[String], negate: bool) -> bool {
	if candidates.is_empty() {
		return false;
	}
	let contains = match value {
		Value::String(s) => candidates.iter().any(|c| c == s),
		Value::Array(items) => items
			.iter()
			.filter_map(Value::as_str)
			.any(|item| candidates.iter().any(|c| c == item)),
		_ => return false,
	};
	contains != negate
}

/// Compile a path glob: `*` matches any run, `?` one character.
///
/// Consecutive stars collapse into one group so patterns like `/a/***/b`
/// cannot trigger runaway backtracking.
pub fn glob_to_regex(pattern: &str) -> Option<Regex> {
	let mut out = String::with_capacity(pattern.len() * 2 + 2);
	out.push('^');
	let chars: Vec<char> = pattern.chars().collect();
	let mut i = 0;
	while i < chars.len() {
		match chars[i] {
			'*' => {
				let mut stars = 1;
				while chars.get(i + stars) == Some(&'*') {
					stars += 1;
				}
				out.push_str(if stars > 1 { "(?:.*)" } else { ".*" });
				i += stars;
				continue;
			}
			'?' => out.push('.'),
			c => {
				let mut buf = [0u8; 4];
				out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
			}
		}
		i += 1;
	}
	out.push('$');
	Regex::new(&out).ok()
}

fn matches_clause(clause: &SegmentWhere, ctx: &EvaluationContext) -> bool {
	let Some(value) = resolve_field(ctx, clause.field()) else {
		return false;
	};

	match clause {
		SegmentWhere::Eq {
			value: EqOperand::Number(expected),
			..
		} => any_number(&value, |n| n == *expected),
		SegmentWhere::Eq {
			value: EqOperand::String(expected),
			..
		} => any_string(&value, |s| s == expected.as_str()),
		SegmentWhere::StartsWith { value: prefix, .. } => {
			any_string(&value, |s| s.starts_with(prefix.as_str()))
		}
		SegmentWhere::Contains { value: needle, .. } => {
			any_string(&value, |s| s.contains(needle.as_str()))
		}
		SegmentWhere::In { values, .. } => in_set(&value, values, false),
		SegmentWhere::NotIn { values, .. } => in_set(&value, values, true),
		SegmentWhere::Gt { value: bound, .. } => any_number(&value, |n| n > *bound),
		SegmentWhere::Lt { value: bound, .. } => any_number(&value, |n| n < *bound),
		SegmentWhere::Between { min, max, .. } => any_number(&value, |n| n >= *min && n <= *max),
		SegmentWhere::Glob { value: pattern, .. } => {
			let Some(re) = glob_to_regex(pattern) else {
				trace!(pattern = %pattern, "glob did not compile");
				return false;
			};
			any_string(&value, |s| re.is_match(s))
		}
	}
}

pub fn legacy_condition_to_where(condition: &LegacyCondition) -> SegmentWhere {
	SegmentWhere::eq(condition.field.as_str(), condition.value.clone())
}

/// `where` clauses, or the legacy conditions converted to `eq` clauses.
pub fn normalize_segment_where(segment: &SegmentConfig) -> Cow<'_, [SegmentWhere]> {
	if !segment.where_.is_empty() {
		return Cow::Borrowed(&segment.where_);
	}
	Cow::Owned(
		segment
			.conditions
			.iter()
			.map(legacy_condition_to_where)
			.collect(),
	)
}

/// All clauses must match; a segment without clauses matches everyone.
pub fn matches_segment(segment: &SegmentConfig, ctx: &EvaluationContext) -> bool {
	normalize_segment_where(segment)
		.iter()
		.all(|clause| matches_clause(clause, ctx))
}
