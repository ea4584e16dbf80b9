// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The Loom flag runtime.
//!
//! [`FlagRuntime`] owns one resolved store, its lock, a rate limiter, the
//! bucketing cache, the audit and telemetry rings and the self-hosted
//! metrics aggregator. Every mutation runs under the per-key lock and is
//! audited; evaluation never fails.
//!
//! ```ignore
//! let config = loom_ff_config::load_config()?;
//! let runtime = FlagRuntime::from_config(config).await?;
//! let ctx = EvaluationContext::new("visitor-1");
//! if let Some(result) = runtime.evaluate("new_checkout", &ctx, None).await {
//!     println!("{:?} via {}", result.value, result.reason);
//! }
//! ```

pub mod admin;
pub mod error;
pub mod guard;
pub mod privacy;
pub mod resolver;
pub mod rollout;
pub mod runtime;

pub use admin::AdminActor;
pub use error::{Result, RuntimeError};
pub use guard::{client_ip, GuardDecision, RequestHeaders};
pub use privacy::{ErasureReport, ErasureRequest, PrivacyExport};
pub use resolver::{resolve_rate_limiter, resolve_store, ResolvedStore};
pub use rollout::{RolloutOutcome, DEFAULT_ROLLOUT_STEP};
pub use runtime::{FlagRuntime, RuntimeSnapshot};
