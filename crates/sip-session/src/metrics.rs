// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

/// Session-level counters (creation, confirmation, termination, refreshes).
#[derive(Debug, Clone, Default)]
pub struct SessionMetrics {
    inner: Arc<RwLock<MetricsData>>,
}

#[derive(Debug, Default)]
struct MetricsData {
    created: u64,
    confirmed: u64,
    ended: u64,
    failed: u64,
    refreshes_sent: u64,
    watchdog_expirations: u64,
    last_updated: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionMetricsSnapshot {
    pub created: u64,
    pub confirmed: u64,
    pub ended: u64,
    pub failed: u64,
    pub refreshes_sent: u64,
    pub watchdog_expirations: u64,
    pub last_updated: Option<Instant>,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_created(&self) {
        let mut data = self.inner.write();
        data.created += 1;
        data.last_updated = Some(Instant::now());
    }

    pub fn record_confirmed(&self) {
        let mut data = self.inner.write();
        data.confirmed += 1;
        data.last_updated = Some(Instant::now());
    }

    pub fn record_ended(&self) {
        let mut data = self.inner.write();
        data.ended += 1;
        data.last_updated = Some(Instant::now());
    }

    pub fn record_failed(&self) {
        let mut data = self.inner.write();
        data.failed += 1;
        data.last_updated = Some(Instant::now());
    }

    pub fn record_refresh_sent(&self) {
        let mut data = self.inner.write();
        data.refreshes_sent += 1;
        data.last_updated = Some(Instant::now());
    }

    pub fn record_watchdog_expiration(&self) {
        let mut data = self.inner.write();
        data.watchdog_expirations += 1;
        data.last_updated = Some(Instant::now());
    }

    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        let data = self.inner.read();
        SessionMetricsSnapshot {
            created: data.created,
            confirmed: data.confirmed,
            ended: data.ended,
            failed: data.failed,
            refreshes_sent: data.refreshes_sent,
            watchdog_expirations: data.watchdog_expirations,
            last_updated: data.last_updated,
        }
    }
}
