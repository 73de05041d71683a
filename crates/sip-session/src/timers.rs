// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Session timer runtime.
//!
//! Each armed timer is a spawned task with a cancel channel; when it fires
//! it posts a [`TimerEvent`] into the session's mailbox. The session driver
//! feeds those events back into `Session::on_timer`, so all protocol
//! reactions stay on the session's execution context.
//!
//! Covered timers:
//! - 2xx retransmission for an unacknowledged INVITE answer, doubling from
//!   T1 up to T2 (RFC 3261 §13.3.1.4)
//! - Timer H ACK wait (RFC 3261 §17.2.1)
//! - RFC 4028 refresh (fires at Session-Expires × 0.5) and watchdog
//!   (× 1.1)
//! - incoming-INVITE Expires and user no-answer windows

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::sleep;

/// Timers a session can have armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Retransmit2xx,
    AckWait,
    SessionRefresh,
    SessionExpiry,
    NoAnswer,
    InviteExpires,
}

/// Events posted into the session mailbox when timers fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Retransmit2xx,
    AckTimeout,
    SessionRefresh,
    SessionExpired,
    NoAnswer,
    InviteExpired,
}

fn event_for(kind: TimerKind) -> TimerEvent {
    match kind {
        TimerKind::Retransmit2xx => TimerEvent::Retransmit2xx,
        TimerKind::AckWait => TimerEvent::AckTimeout,
        TimerKind::SessionRefresh => TimerEvent::SessionRefresh,
        TimerKind::SessionExpiry => TimerEvent::SessionExpired,
        TimerKind::NoAnswer => TimerEvent::NoAnswer,
        TimerKind::InviteExpires => TimerEvent::InviteExpired,
    }
}

#[derive(Debug)]
struct TimerTask {
    generation: u64,
    cancel_tx: mpsc::Sender<()>,
}

/// RFC 4028 bookkeeping the session keeps between timer fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionTimerState {
    pub current_expires: u32,
    /// This endpoint is the refresher.
    pub refresher: bool,
    pub running: bool,
}

/// Per-session timer table.
///
/// Arming a kind cancels any previous instance of it. Fired one-shot tasks
/// deregister themselves; the generation counter keeps a late fire from
/// removing a newer incarnation of the same kind.
pub struct RuntimeTimers {
    tasks: Arc<DashMap<TimerKind, TimerTask>>,
    event_tx: mpsc::UnboundedSender<TimerEvent>,
    generation: AtomicU64,
}

impl RuntimeTimers {
    /// Creates the timer table and the mailbox receiver the session driver
    /// must drain into `Session::on_timer`.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                tasks: Arc::new(DashMap::new()),
                event_tx,
                generation: AtomicU64::new(0),
            },
            event_rx,
        )
    }

    /// Arms a one-shot timer; replaces any armed timer of the same kind.
    pub fn arm(&self, kind: TimerKind, delay: Duration) {
        self.stop(kind);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, mut cancel_rx) = mpsc::channel(1);
        self.tasks.insert(
            kind,
            TimerTask {
                generation,
                cancel_tx,
            },
        );

        let tasks = self.tasks.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(delay) => {
                    tasks.remove_if(&kind, |_, task| task.generation == generation);
                    let _ = event_tx.send(event_for(kind));
                }
                _ = cancel_rx.recv() => {}
            }
        });
    }

    /// Arms the 2xx retransmission schedule: first fire after T1, interval
    /// doubling each fire, capped at T2. Runs until stopped.
    pub fn arm_retransmit_2xx(&self, t1: Duration, t2: Duration) {
        self.stop(TimerKind::Retransmit2xx);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, mut cancel_rx) = mpsc::channel(1);
        self.tasks.insert(
            TimerKind::Retransmit2xx,
            TimerTask {
                generation,
                cancel_tx,
            },
        );

        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let mut interval = t1;
            loop {
                tokio::select! {
                    _ = sleep(interval) => {
                        if event_tx.send(TimerEvent::Retransmit2xx).is_err() {
                            return;
                        }
                        interval = (interval * 2).min(t2);
                    }
                    _ = cancel_rx.recv() => return,
                }
            }
        });
    }

    /// Cancels the timer of the given kind, if armed.
    pub fn stop(&self, kind: TimerKind) {
        if let Some((_, task)) = self.tasks.remove(&kind) {
            let _ = task.cancel_tx.try_send(());
        }
    }

    /// Cancels every armed timer.
    pub fn clear(&self) {
        let kinds: Vec<TimerKind> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for kind in kinds {
            self.stop(kind);
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.tasks.contains_key(&kind)
    }

    pub fn armed_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Delay until the refresher must refresh: Session-Expires × 0.5 (RFC 4028 §10).
pub fn refresh_delay(current_expires: u32) -> Duration {
    Duration::from_millis(u64::from(current_expires) * 500)
}

/// Delay until the non-refresher gives up on the session: Session-Expires × 1.1.
pub fn expiry_delay(current_expires: u32) -> Duration {
    Duration::from_millis(u64::from(current_expires) * 1100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn one_shot_fires_and_deregisters() {
        let (timers, mut rx) = RuntimeTimers::new();
        timers.arm(TimerKind::AckWait, Duration::from_millis(20));
        assert!(timers.is_armed(TimerKind::AckWait));

        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timer should fire")
            .unwrap();
        assert_eq!(event, TimerEvent::AckTimeout);
        assert!(!timers.is_armed(TimerKind::AckWait));
    }

    #[tokio::test]
    async fn stop_prevents_fire() {
        let (timers, mut rx) = RuntimeTimers::new();
        timers.arm(TimerKind::NoAnswer, Duration::from_millis(30));
        timers.stop(TimerKind::NoAnswer);

        let fired = tokio::time::timeout(Duration::from_millis(80), rx.recv()).await;
        assert!(fired.is_err(), "canceled timer must not fire");
    }

    #[tokio::test]
    async fn rearm_replaces_previous() {
        let (timers, mut rx) = RuntimeTimers::new();
        timers.arm(TimerKind::SessionRefresh, Duration::from_millis(500));
        timers.arm(TimerKind::SessionRefresh, Duration::from_millis(20));

        let event = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("replacement timer should fire")
            .unwrap();
        assert_eq!(event, TimerEvent::SessionRefresh);

        // The replaced long timer must not fire a second event.
        let second = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn retransmit_interval_doubles_up_to_t2() {
        tokio::time::pause();
        let (timers, mut rx) = RuntimeTimers::new();
        let t1 = Duration::from_millis(500);
        let t2 = Duration::from_secs(4);
        timers.arm_retransmit_2xx(t1, t2);

        // Expected fire offsets: 0.5, 1.5, 3.5, 7.5, 11.5 (interval capped at 4s).
        let mut last = Duration::ZERO;
        let mut gaps = Vec::new();
        let start = tokio::time::Instant::now();
        for _ in 0..5 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event, TimerEvent::Retransmit2xx);
            let now = start.elapsed();
            gaps.push(now - last);
            last = now;
        }
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
        timers.stop(TimerKind::Retransmit2xx);
    }

    #[tokio::test]
    async fn clear_disarms_everything() {
        let (timers, mut rx) = RuntimeTimers::new();
        timers.arm(TimerKind::AckWait, Duration::from_millis(50));
        timers.arm(TimerKind::SessionExpiry, Duration::from_millis(50));
        timers.arm_retransmit_2xx(Duration::from_millis(50), Duration::from_millis(200));
        assert_eq!(timers.armed_count(), 3);

        timers.clear();
        assert_eq!(timers.armed_count(), 0);

        let fired = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
        assert!(fired.is_err(), "cleared timers must not fire");
    }

    #[test]
    fn rfc4028_delays() {
        assert_eq!(refresh_delay(90), Duration::from_secs(45));
        assert_eq!(expiry_delay(90), Duration::from_millis(99_000));
        assert_eq!(refresh_delay(1800), Duration::from_secs(900));
        assert_eq!(expiry_delay(1800), Duration::from_millis(1_980_000));
    }
}
