// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod bucket;
mod guard;
mod lock;
mod logging;
mod metrics;
mod store;
mod telemetry;

pub use bucket::*;
pub use guard::*;
pub use lock::*;
pub use logging::*;
pub use metrics::*;
pub use store::*;
pub use telemetry::*;
