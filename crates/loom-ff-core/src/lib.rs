// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom flag runtime.
//!
//! This crate holds everything that does not touch I/O: the persisted flag
//! model, deterministic bucketing, segment predicates, the evaluation engine,
//! the client override codec and the admin wire mapping. Stores, locks and
//! sinks live in `loom-ff-store` and `loom-ff-audit`.
//!
//! # Example
//!
//! ```
//! use loom_ff_core::{
//!     evaluate_flag, Bucketer, EvaluationContext, EvaluationOptions, EvaluationReason,
//!     FlagConfig, FlagValue, MatchedOverrides, RolloutStrategy,
//! };
//!
//! let mut flag = FlagConfig::new("new_checkout", 0);
//! flag.default_value = FlagValue::Bool(true);
//! flag.rollout = Some(RolloutStrategy::with_percent(100.0));
//!
//! let ctx = EvaluationContext::new("visitor-1");
//! let bucketer = Bucketer::default();
//! let result = evaluate_flag(
//!     &flag,
//!     &ctx,
//!     None,
//!     MatchedOverrides::none(),
//!     &bucketer,
//!     EvaluationOptions::default(),
//! );
//! assert_eq!(result.reason, EvaluationReason::GlobalRollout);
//! assert_eq!(result.value, Some(FlagValue::Bool(true)));
//! ```

pub mod admin;
pub mod bucketing;
pub mod codec;
pub mod context;
pub mod error;
pub mod evaluation;
pub mod flag;
pub mod overrides;
pub mod segment;
pub mod value;

pub use admin::{api_to_flag, flag_to_api, ApiFlagConfig, ApiRollout, ApiSeedBy, ApiSegment};
pub use bucketing::{
	clamp_percent, resolve_seed, BucketStrategy, Bucketer, RolloutInput, RolloutPercent,
	DEFAULT_CACHE_CAPACITY,
};
pub use codec::{
	apply_override_diff, encode_overrides_cookie, parse_cookie_header, parse_ff_query,
	read_overrides_from_cookie_header, validate_overrides, FlagRegistry, OverrideDiff, Overrides,
	ParseOptions, OVERRIDE_COOKIE_NAME,
};
pub use context::{EvaluationContext, SeedHints};
pub use error::{BucketError, CodecError, FieldError};
pub use evaluation::{
	evaluate_flag, EvaluationOptions, EvaluationReason, EvaluationResult, MatchedOverrides,
};
pub use flag::{
	FlagConfig, RolloutHysteresis, RolloutShadow, RolloutStep, RolloutStopConditions,
	RolloutStrategy, SeedBy, SegmentConfig, SegmentWhere,
};
pub use overrides::{FlagSnapshot, OverrideEntry, OverrideScope};
pub use segment::matches_segment;
pub use value::{FlagKind, FlagValue};

/// Wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
	chrono::Utc::now().timestamp_millis()
}

/// Random hex identifier of `bytes` bytes.
pub fn random_id(bytes: usize) -> String {
	let mut buf = vec![0u8; bytes];
	rand::Rng::fill(&mut rand::thread_rng(), buf.as_mut_slice());
	hex::encode(buf)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn random_id_is_hex_of_requested_width() {
		let id = random_id(8);
		assert_eq!(id.len(), 16);
		assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
		assert_ne!(random_id(8), id);
	}
}
