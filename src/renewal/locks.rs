// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-label renewal leases.
//!
//! At most one renewal may be in flight per wallet label. Two overlapping
//! re-enrollments for the same identity could otherwise interleave their
//! `put`s and leave a certificate paired with the wrong private key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Registry of per-label async mutexes.
///
/// Idle entries are pruned on every acquire, so the map only holds labels
/// with a lease currently held or awaited.
#[derive(Clone, Default)]
pub struct LabelLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Held for the duration of one renewal. Released on drop.
pub struct LabelLease {
    _guard: OwnedMutexGuard<()>,
}

impl LabelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `label`.
    pub async fn acquire(&self, label: &str) -> LabelLease {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(label.to_string()).or_default().clone()
        };

        LabelLease {
            _guard: lock.lock_owned().await,
        }
    }

    /// Labels with a lease held or awaited.
    pub fn active_labels(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .filter(|lock| Arc::strong_count(lock) > 1)
            .count()
    }
}
