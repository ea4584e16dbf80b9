// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic user bucketing.
//!
//! A seed string is hashed to a 32-bit value and normalized by `2^32` to a
//! unit in `[0, 1)`. A rollout at `percent` hits when `unit * 100 < percent`.
//! The hash input for a rollout is `"{seed}:{salt}"`, so the same user lands
//! in independent buckets across flags while staying stable for a given flag.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use murmur3::murmur3_32;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::context::{EvaluationContext, SeedHints};
use crate::error::BucketError;
use crate::flag::SeedBy;

const UNIT_DIVISOR: f64 = 4_294_967_296.0;

/// Default bound on cached `salt|seed` units per runtime.
pub const DEFAULT_CACHE_CAPACITY: usize = 5000;

const PRIME32_1: u32 = 0x9e37_79b1;
const PRIME32_2: u32 = 0x85eb_ca77;
const PRIME32_3: u32 = 0xc2b2_ae3d;
const PRIME32_4: u32 = 0x27d4_eb2f;
const PRIME32_5: u32 = 0x1656_67b1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BucketStrategy {
	#[default]
	#[serde(rename = "murmur3_32")]
	Murmur3,
	#[serde(rename = "xxhash32")]
	XxHash32,
}

impl BucketStrategy {
	pub fn name(&self) -> &'static str {
		match self {
			BucketStrategy::Murmur3 => "murmur3_32",
			BucketStrategy::XxHash32 => "xxhash32",
		}
	}

	pub fn hash32(&self, seed: &str) -> u32 {
		match self {
			BucketStrategy::Murmur3 => murmur3_32(&mut Cursor::new(seed.as_bytes()), 0).unwrap_or(0),
			BucketStrategy::XxHash32 => xxhash32(seed.as_bytes(), 0),
		}
	}

	pub fn hash_to_unit(&self, seed: &str) -> f64 {
		f64::from(self.hash32(seed)) / UNIT_DIVISOR
	}

	pub fn pct_hit(&self, seed: &str, percent: f64) -> bool {
		self.hash_to_unit(seed) * 100.0 < clamp_percent(percent)
	}
}

impl fmt::Display for BucketStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl FromStr for BucketStrategy {
	type Err = BucketError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"murmur3_32" | "murmur3" => Ok(BucketStrategy::Murmur3),
			"xxhash32" => Ok(BucketStrategy::XxHash32),
			other => Err(BucketError::UnknownStrategy(other.to_string())),
		}
	}
}

/// Clamp to `[0, 100]`; non-finite input is treated as 0.
pub fn clamp_percent(percent: f64) -> f64 {
	if !percent.is_finite() {
		return 0.0;
	}
	percent.clamp(0.0, 100.0)
}

fn read_u32_le(data: &[u8], offset: usize) -> u32 {
	u32::from_le_bytes([
		data[offset],
		data[offset + 1],
		data[offset + 2],
		data[offset + 3],
	])
}

#[inline]
fn round(acc: u32, lane: u32) -> u32 {
	acc.wrapping_add(lane.wrapping_mul(PRIME32_2))
		.rotate_left(13)
		.wrapping_mul(PRIME32_1)
}

/// XXH32 over `data`.
pub fn xxhash32(data: &[u8], seed: u32) -> u32 {
	let len = data.len();
	let mut index = 0;

	let mut hash = if len >= 16 {
		let mut v1 = seed.wrapping_add(PRIME32_1).wrapping_add(PRIME32_2);
		let mut v2 = seed.wrapping_add(PRIME32_2);
		let mut v3 = seed;
		let mut v4 = seed.wrapping_sub(PRIME32_1);

		while index + 16 <= len {
			v1 = round(v1, read_u32_le(data, index));
			v2 = round(v2, read_u32_le(data, index + 4));
			v3 = round(v3, read_u32_le(data, index + 8));
			v4 = round(v4, read_u32_le(data, index + 12));
			index += 16;
		}

		v1.rotate_left(1)
			.wrapping_add(v2.rotate_left(7))
			.wrapping_add(v3.rotate_left(12))
			.wrapping_add(v4.rotate_left(18))
	} else {
		seed.wrapping_add(PRIME32_5)
	};

	hash = hash.wrapping_add(len as u32);

	while index + 4 <= len {
		let k = read_u32_le(data, index).wrapping_mul(PRIME32_3);
		hash = hash.wrapping_add(k).rotate_left(17).wrapping_mul(PRIME32_4);
		index += 4;
	}

	while index < len {
		let k = u32::from(data[index]).wrapping_mul(PRIME32_5);
		hash = hash.wrapping_add(k).rotate_left(11).wrapping_mul(PRIME32_1);
		index += 1;
	}

	hash ^= hash >> 15;
	hash = hash.wrapping_mul(PRIME32_2);
	hash ^= hash >> 13;
	hash = hash.wrapping_mul(PRIME32_3);
	hash ^= hash >> 16;
	hash
}

/// Inputs for a single rollout bucket computation.
#[derive(Debug, Clone, Copy)]
pub struct RolloutInput<'a> {
	pub seed: &'a str,
	pub salt: &'a str,
	pub percent: f64,
	pub flag_key: &'a str,
	pub segment_id: Option<&'a str>,
}

/// Maps a rollout input to its bucket position in `[0, 100)`.
pub trait RolloutPercent: Send + Sync {
	fn percent(&self, input: &RolloutInput<'_>) -> f64;
}

struct UnitCache {
	capacity: usize,
	units: HashMap<String, f64>,
	order: VecDeque<String>,
}

impl UnitCache {
	fn get(&self, key: &str) -> Option<f64> {
		self.units.get(key).copied()
	}

	fn insert(&mut self, key: String, unit: f64) {
		if self.capacity == 0 || self.units.contains_key(&key) {
			return;
		}
		while self.units.len() >= self.capacity {
			match self.order.pop_front() {
				Some(oldest) => {
					self.units.remove(&oldest);
				}
				None => break,
			}
		}
		self.order.push_back(key.clone());
		self.units.insert(key, unit);
	}
}

/// Strategy plus a bounded cache of computed units.
///
/// The cache is keyed by `salt|seed`; evicting entries never changes output.
pub struct Bucketer {
	strategy: BucketStrategy,
	cache: Mutex<UnitCache>,
}

impl Bucketer {
	pub fn new(strategy: BucketStrategy, capacity: usize) -> Self {
		Self {
			strategy,
			cache: Mutex::new(UnitCache {
				capacity,
				units: HashMap::with_capacity(capacity.min(1024)),
				order: VecDeque::with_capacity(capacity.min(1024)),
			}),
		}
	}

	pub fn strategy(&self) -> BucketStrategy {
		self.strategy
	}

	/// Unit in `[0, 1)` for `seed` under `salt`.
	pub fn unit(&self, seed: &str, salt: &str) -> f64 {
		let key = format!("{salt}|{seed}");
		if let Some(unit) = self.cache.lock().get(&key) {
			return unit;
		}
		let unit = self.strategy.hash_to_unit(&format!("{seed}:{salt}"));
		self.cache.lock().insert(key, unit);
		unit
	}

	pub fn pct_hit(&self, seed: &str, salt: &str, percent: f64) -> bool {
		self.unit(seed, salt) * 100.0 < clamp_percent(percent)
	}

	pub fn cached_len(&self) -> usize {
		self.cache.lock().units.len()
	}
}

impl Default for Bucketer {
	fn default() -> Self {
		Self::new(BucketStrategy::default(), DEFAULT_CACHE_CAPACITY)
	}
}

impl fmt::Debug for Bucketer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Bucketer")
			.field("strategy", &self.strategy)
			.field("cached", &self.cached_len())
			.finish()
	}
}

impl RolloutPercent for Bucketer {
	fn percent(&self, input: &RolloutInput<'_>) -> f64 {
		self.unit(input.seed, input.salt) * 100.0
	}
}

fn non_empty(value: Option<&String>) -> Option<&str> {
	value.map(String::as_str).filter(|s| !s.is_empty())
}

/// Resolve the seed string for `seed_by`.
///
/// Missing identifiers fall back through anonId/stableId, userId, cookie,
/// namespace and finally the literal `"anon"`.
pub fn resolve_seed(ctx: &EvaluationContext, hints: Option<&SeedHints>, seed_by: SeedBy) -> String {
	let hint = |f: fn(&SeedHints) -> Option<&String>| hints.and_then(|h| non_empty(f(h)));
	let stable = Some(ctx.stable_id.as_str()).filter(|s| !s.is_empty());

	let fallback = || {
		hint(|h| h.anon_id.as_ref())
			.or(stable)
			.or_else(|| hint(|h| h.user_id.as_ref()))
			.or_else(|| hint(|h| h.cookie.as_ref()))
			.or_else(|| hint(|h| h.namespace.as_ref()))
			.unwrap_or("anon")
			.to_string()
	};

	match seed_by {
		SeedBy::User | SeedBy::UserId => non_empty(ctx.user_id.as_ref())
			.or_else(|| hint(|h| h.user_id.as_ref()))
			.map(str::to_string)
			.unwrap_or_else(fallback),
		SeedBy::Namespace => non_empty(ctx.namespace.as_ref())
			.or_else(|| hint(|h| h.namespace.as_ref()))
			.map(str::to_string)
			.unwrap_or_else(fallback),
		SeedBy::Cookie => non_empty(ctx.cookie_id.as_ref())
			.or_else(|| hint(|h| h.cookie.as_ref()))
			.map(str::to_string)
			.unwrap_or_else(fallback),
		SeedBy::IpUa => {
			if let Some(ip_ua) = hint(|h| h.ip_ua.as_ref()) {
				return ip_ua.to_string();
			}
			let ip = hint(|h| h.ip.as_ref())
				.or_else(|| non_empty(ctx.ip.as_ref()))
				.unwrap_or("0.0.0.0");
			let ua = hint(|h| h.user_agent.as_ref())
				.or_else(|| non_empty(ctx.user_agent.as_ref()))
				.unwrap_or("unknown");
			format!("{ip}::{ua}")
		}
		SeedBy::StableId | SeedBy::AnonId => hint(|h| h.anon_id.as_ref())
			.or(stable)
			.map(str::to_string)
			.unwrap_or_else(fallback),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn xxhash32_matches_reference_vectors() {
		assert_eq!(xxhash32(b"", 0), 0x02cc_5d05);
		assert_eq!(xxhash32(b"a", 0), 0x550d_7456);
		assert_eq!(xxhash32(b"abc", 0), 0x32d1_53ff);
		assert_eq!(
			xxhash32(b"Nobody inspects the spammish repetition", 0),
			0xe229_3b2f
		);
	}

	#[test]
	fn unknown_strategy_is_rejected() {
		assert_eq!(
			"sha1".parse::<BucketStrategy>(),
			Err(BucketError::UnknownStrategy("sha1".to_string()))
		);
		assert_eq!(
			"XXHASH32".parse::<BucketStrategy>(),
			Ok(BucketStrategy::XxHash32)
		);
	}

	#[test]
	fn units_are_below_one() {
		for strategy in [BucketStrategy::Murmur3, BucketStrategy::XxHash32] {
			for i in 0..1000 {
				let unit = strategy.hash_to_unit(&format!("user-{i}"));
				assert!((0.0..1.0).contains(&unit));
			}
		}
	}

	#[test]
	fn edge_percentages() {
		let strategy = BucketStrategy::Murmur3;
		for i in 0..500 {
			let seed = format!("seed-{i}");
			assert!(!strategy.pct_hit(&seed, 0.0));
			assert!(strategy.pct_hit(&seed, 100.0));
			assert!(!strategy.pct_hit(&seed, -5.0));
			assert!(strategy.pct_hit(&seed, 250.0));
		}
	}

	#[test]
	fn twenty_five_percent_is_statistically_correct() {
		for strategy in [BucketStrategy::Murmur3, BucketStrategy::XxHash32] {
			let bucketer = Bucketer::new(strategy, 0);
			let samples = 100_000;
			let hits = (0..samples)
				.filter(|i| bucketer.pct_hit(&format!("stable-{i:08x}"), "salt", 25.0))
				.count();
			let fraction = hits as f64 / samples as f64;
			assert!(
				(fraction - 0.25).abs() <= 0.005,
				"{strategy}: hit fraction {fraction}"
			);
		}
	}

	#[test]
	fn cache_is_bounded_and_transparent() {
		let bucketer = Bucketer::new(BucketStrategy::Murmur3, 8);
		let uncached = Bucketer::new(BucketStrategy::Murmur3, 0);
		for i in 0..32 {
			let seed = format!("u{i}");
			assert_eq!(bucketer.unit(&seed, "s"), uncached.unit(&seed, "s"));
		}
		assert_eq!(bucketer.cached_len(), 8);
		assert_eq!(uncached.cached_len(), 0);
		assert_eq!(bucketer.unit("u0", "s"), uncached.unit("u0", "s"));
	}

	#[test]
	fn seed_resolution_prefers_requested_field() {
		let ctx = EvaluationContext::new("sid")
			.with_user("uid")
			.with_cookie("cid")
			.with_namespace("ns");
		assert_eq!(resolve_seed(&ctx, None, SeedBy::StableId), "sid");
		assert_eq!(resolve_seed(&ctx, None, SeedBy::User), "uid");
		assert_eq!(resolve_seed(&ctx, None, SeedBy::UserId), "uid");
		assert_eq!(resolve_seed(&ctx, None, SeedBy::Cookie), "cid");
		assert_eq!(resolve_seed(&ctx, None, SeedBy::Namespace), "ns");
	}

	#[test]
	fn seed_resolution_falls_back() {
		let ctx = EvaluationContext::new("sid");
		assert_eq!(resolve_seed(&ctx, None, SeedBy::UserId), "sid");

		let empty = EvaluationContext::new("");
		let hints = SeedHints {
			cookie: Some("cookie-1".into()),
			..Default::default()
		};
		assert_eq!(resolve_seed(&empty, Some(&hints), SeedBy::UserId), "cookie-1");
		assert_eq!(resolve_seed(&empty, None, SeedBy::StableId), "anon");
	}

	#[test]
	fn ip_ua_seed_uses_placeholders() {
		let ctx = EvaluationContext::new("sid");
		assert_eq!(resolve_seed(&ctx, None, SeedBy::IpUa), "0.0.0.0::unknown");
		let ctx = ctx.with_ip_ua("10.0.0.1", "curl");
		assert_eq!(resolve_seed(&ctx, None, SeedBy::IpUa), "10.0.0.1::curl");
		let hints = SeedHints {
			ip_ua: Some("precomputed".into()),
			..Default::default()
		};
		assert_eq!(resolve_seed(&ctx, Some(&hints), SeedBy::IpUa), "precomputed");
	}
}
