// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded, shareable ring buffer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

/// Fixed-capacity buffer that evicts its oldest entry when full.
///
/// Clones share the same storage.
#[derive(Debug)]
pub struct Ring<T> {
	inner: Arc<RingInner<T>>,
}

#[derive(Debug)]
struct RingInner<T> {
	entries: RwLock<VecDeque<T>>,
	capacity: usize,
}

impl<T> Clone for Ring<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T: Clone> Ring<T> {
	/// A zero capacity is bumped to one.
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			inner: Arc::new(RingInner {
				entries: RwLock::new(VecDeque::with_capacity(capacity)),
				capacity,
			}),
		}
	}

	pub fn push(&self, entry: T) {
		let mut entries = self.inner.entries.write();
		while entries.len() >= self.inner.capacity {
			entries.pop_front();
		}
		entries.push_back(entry);
	}

	/// The newest `limit` entries, oldest first.
	pub fn tail(&self, limit: usize) -> Vec<T> {
		let entries = self.inner.entries.read();
		let skip = entries.len().saturating_sub(limit);
		entries.iter().skip(skip).cloned().collect()
	}

	pub fn to_vec(&self) -> Vec<T> {
		self.inner.entries.read().iter().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.inner.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.entries.read().is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.inner.capacity
	}

	pub fn clear(&self) {
		self.inner.entries.write().clear();
	}
}
