// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration produced by each source.

use serde::{Deserialize, Serialize};

use crate::sections::{
	AuditConfigLayer, BucketConfigLayer, GuardConfigLayer, KillConfigLayer, LockConfigLayer,
	LoggingConfigLayer, MetricsConfigLayer, StoreConfigLayer, TelemetryConfigLayer,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfigLayer {
	pub store: Option<StoreConfigLayer>,
	pub bucket: Option<BucketConfigLayer>,
	pub kill: Option<KillConfigLayer>,
	pub lock: Option<LockConfigLayer>,
	pub telemetry: Option<TelemetryConfigLayer>,
	pub audit: Option<AuditConfigLayer>,
	pub metrics: Option<MetricsConfigLayer>,
	pub guard: Option<GuardConfigLayer>,
	pub logging: Option<LoggingConfigLayer>,
}

fn merge_section<T: Default>(slot: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	if let Some(other) = other {
		merge(slot.get_or_insert_with(T::default), other);
	}
}

impl RuntimeConfigLayer {
	/// Fields set in `other` win.
	pub fn merge(&mut self, other: Self) {
		merge_section(&mut self.store, other.store, StoreConfigLayer::merge);
		merge_section(&mut self.bucket, other.bucket, BucketConfigLayer::merge);
		merge_section(&mut self.kill, other.kill, KillConfigLayer::merge);
		merge_section(&mut self.lock, other.lock, LockConfigLayer::merge);
		merge_section(&mut self.telemetry, other.telemetry, TelemetryConfigLayer::merge);
		merge_section(&mut self.audit, other.audit, AuditConfigLayer::merge);
		merge_section(&mut self.metrics, other.metrics, MetricsConfigLayer::merge);
		merge_section(&mut self.guard, other.guard, GuardConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sections::StoreAdapter;

	#[test]
	fn merge_keeps_unset_sections() {
		let mut base = RuntimeConfigLayer {
			store: Some(StoreConfigLayer {
				adapter: Some(StoreAdapter::File),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(RuntimeConfigLayer {
			kill: Some(KillConfigLayer { all: Some(true) }),
			store: Some(StoreConfigLayer {
				cache_ttl_ms: Some(5),
				..Default::default()
			}),
			..Default::default()
		});
		let store = base.store.unwrap();
		assert_eq!(store.adapter, Some(StoreAdapter::File));
		assert_eq!(store.cache_ttl_ms, Some(5));
		assert_eq!(base.kill.unwrap().all, Some(true));
		assert!(base.lock.is_none());
	}
}
