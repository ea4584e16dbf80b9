// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded audit and telemetry buffers for the Loom flag runtime.
//!
//! Recording never blocks and never returns an error to the caller. File
//! mirrors go through [`NdjsonSink`], which owns its file from a single task.

pub mod audit;
pub mod error;
pub mod ring;
pub mod sink;
pub mod telemetry;

pub use audit::{AuditAction, AuditLog, AuditRecord, AUDIT_CAPACITY};
pub use error::SinkError;
pub use ring::Ring;
pub use sink::{format_json_line, NdjsonSink};
pub use telemetry::{
	clamp_ring, Telemetry, TelemetryEvent, TelemetryOptions, TelemetrySinkKind,
	DEFAULT_TELEMETRY_FILE, DEFAULT_TELEMETRY_RING, MAX_TELEMETRY_RING, MIN_TELEMETRY_RING,
};
