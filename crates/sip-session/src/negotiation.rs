// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Serial media negotiation pipeline.
//!
//! Every peer-connection mutation a session performs goes through the
//! [`NegotiationQueue`], which guarantees that only one offer/answer
//! transition is in flight at a time and that operations complete in the
//! order they were enqueued (the gate is a fair mutex). Local descriptions
//! are not considered usable until ICE gathering has finished or a
//! subscriber forces readiness through [`IceReady::ready`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use smol_str::SmolStr;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

use crate::events::{Originator, PeerConnectionErrorKind, SessionEvent, SessionEvents, SessionHooks};

/// Which side of the offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

/// Peer-connection signaling state, mirrored from the media engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

/// ICE candidate gathering progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceGatheringState {
    New,
    Gathering,
    Complete,
}

/// Events pushed by the media engine while gathering candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IceEvent {
    /// A trickled candidate became available.
    Candidate(SmolStr),
    /// The engine signaled the end of candidates (null candidate).
    EndOfCandidates,
    GatheringStateChange(IceGatheringState),
}

/// Abstract peer-connection engine the session drives.
///
/// Implementations wrap a real WebRTC peer connection (or any SDP-capable
/// media stack). Engine callbacks must not re-enter the session; candidate
/// and gathering-state changes are delivered through the broadcast channel
/// returned by [`MediaEngine::ice_events`].
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_offer(&self, constraints: Option<&str>) -> Result<String>;
    async fn create_answer(&self, constraints: Option<&str>) -> Result<String>;
    async fn set_local_description(&self, kind: SdpType, sdp: &str) -> Result<()>;
    async fn set_remote_description(&self, kind: SdpType, sdp: &str) -> Result<()>;
    fn signaling_state(&self) -> SignalingState;
    fn ice_gathering_state(&self) -> IceGatheringState;
    /// The currently applied local description, with any trickled candidates.
    fn local_description(&self) -> Option<String>;
    fn ice_events(&self) -> broadcast::Receiver<IceEvent>;
    /// Releases engine resources. Called when the session reaches a terminal state.
    fn close(&self) {}
}

/// Handle given to `icecandidate` subscribers to force early SDP readiness.
#[derive(Clone, Default)]
pub struct IceReady {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl IceReady {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop waiting for further candidates and use the SDP as it stands.
    pub fn ready(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_ready(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Error from a negotiation step, tagged with the failing operation so the
/// session can emit the matching `peerconnection:*` event.
#[derive(Debug)]
pub struct NegotiationError {
    pub kind: PeerConnectionErrorKind,
    pub source: anyhow::Error,
}

impl NegotiationError {
    fn new(kind: PeerConnectionErrorKind, source: anyhow::Error) -> Self {
        Self { kind, source }
    }
}

impl std::fmt::Display for NegotiationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.source)
    }
}

impl std::error::Error for NegotiationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

/// Strictly serial pipeline of peer-connection operations for one session.
pub struct NegotiationQueue {
    engine: Arc<dyn MediaEngine>,
    gate: tokio::sync::Mutex<()>,
    rtc_ready: AtomicBool,
}

impl NegotiationQueue {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            gate: tokio::sync::Mutex::new(()),
            rtc_ready: AtomicBool::new(true),
        }
    }

    pub fn engine(&self) -> &Arc<dyn MediaEngine> {
        &self.engine
    }

    /// True once the local description is applied and ICE gathering finished.
    /// Cleared whenever a new local description is being produced.
    pub fn is_ready(&self) -> bool {
        self.rtc_ready.load(Ordering::SeqCst)
    }

    /// Produces a local description of the given kind and waits for ICE.
    ///
    /// Emits `icecandidate` for each trickled candidate (subscribers may call
    /// `ready()` to cut the wait short) followed by one `sdp` event whose
    /// subscriber-visible text is returned.
    pub async fn local_description(
        &self,
        kind: SdpType,
        constraints: Option<&str>,
        events: &SessionEvents,
        hooks: &[Arc<dyn SessionHooks>],
    ) -> std::result::Result<String, NegotiationError> {
        self.rtc_ready.store(false, Ordering::SeqCst);
        let _gate = self.gate.lock().await;

        let created = match kind {
            SdpType::Offer => self
                .engine
                .create_offer(constraints)
                .await
                .map_err(|e| NegotiationError::new(PeerConnectionErrorKind::CreateOffer, e))?,
            SdpType::Answer => self
                .engine
                .create_answer(constraints)
                .await
                .map_err(|e| NegotiationError::new(PeerConnectionErrorKind::CreateAnswer, e))?,
        };

        self.engine
            .set_local_description(kind, &created)
            .await
            .map_err(|e| {
                NegotiationError::new(PeerConnectionErrorKind::SetLocalDescription, e)
            })?;

        self.wait_ice_completion(events, hooks).await;
        self.rtc_ready.store(true, Ordering::SeqCst);

        let mut sdp = self.engine.local_description().unwrap_or(created);
        for hook in hooks {
            hook.on_sdp(Originator::Local, kind, &mut sdp);
        }
        events.emit(SessionEvent::Sdp {
            originator: Originator::Local,
            kind,
            sdp: sdp.clone(),
        });
        Ok(sdp)
    }

    /// Applies a remote description through the serial pipeline. Hooks may
    /// rewrite the text first; the applied text is returned so callers can
    /// surface it (the provisional-answer path emits it as an `sdp` event).
    pub async fn apply_remote(
        &self,
        kind: SdpType,
        sdp: &str,
        hooks: &[Arc<dyn SessionHooks>],
    ) -> std::result::Result<String, NegotiationError> {
        let mut sdp = sdp.to_owned();
        for hook in hooks {
            hook.on_sdp(Originator::Remote, kind, &mut sdp);
        }

        let _gate = self.gate.lock().await;
        self.engine
            .set_remote_description(kind, &sdp)
            .await
            .map_err(|e| {
                NegotiationError::new(PeerConnectionErrorKind::SetRemoteDescription, e)
            })?;
        Ok(sdp)
    }

    /// Applies a late 2xx answer, issuing a fresh offer first when the
    /// engine already settled back into `Stable` (an early-dialog answer was
    /// applied before this final one arrived). Any other signaling state
    /// applies the answer directly.
    pub async fn apply_answer_with_reoffer(
        &self,
        sdp: &str,
        hooks: &[Arc<dyn SessionHooks>],
    ) -> std::result::Result<(), NegotiationError> {
        let mut sdp = sdp.to_owned();
        for hook in hooks {
            hook.on_sdp(Originator::Remote, SdpType::Answer, &mut sdp);
        }

        let _gate = self.gate.lock().await;
        if self.engine.signaling_state() == SignalingState::Stable {
            debug!("signaling stable before final answer, issuing fresh offer");
            let offer = self
                .engine
                .create_offer(None)
                .await
                .map_err(|e| NegotiationError::new(PeerConnectionErrorKind::CreateOffer, e))?;
            self.engine
                .set_local_description(SdpType::Offer, &offer)
                .await
                .map_err(|e| {
                    NegotiationError::new(PeerConnectionErrorKind::SetLocalDescription, e)
                })?;
        }
        self.engine
            .set_remote_description(SdpType::Answer, &sdp)
            .await
            .map_err(|e| {
                NegotiationError::new(PeerConnectionErrorKind::SetRemoteDescription, e)
            })
    }

    /// Waits until ICE gathering finishes, a subscriber forces readiness, or
    /// the engine reports the null candidate. Trickled candidates are
    /// surfaced as `icecandidate` events while waiting.
    async fn wait_ice_completion(
        &self,
        events: &SessionEvents,
        hooks: &[Arc<dyn SessionHooks>],
    ) {
        if self.engine.ice_gathering_state() == IceGatheringState::Complete {
            return;
        }

        let mut rx = self.engine.ice_events();
        let ready = IceReady::new();

        loop {
            if ready.is_ready()
                || self.engine.ice_gathering_state() == IceGatheringState::Complete
            {
                return;
            }
            tokio::select! {
                _ = ready.wait() => return,
                event = rx.recv() => match event {
                    Ok(IceEvent::Candidate(candidate)) => {
                        events.emit(SessionEvent::IceCandidate {
                            candidate: candidate.clone(),
                        });
                        for hook in hooks {
                            hook.on_ice_candidate(candidate.as_str(), &ready);
                        }
                    }
                    Ok(IceEvent::EndOfCandidates) => return,
                    Ok(IceEvent::GatheringStateChange(IceGatheringState::Complete)) => return,
                    Ok(IceEvent::GatheringStateChange(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "lagged behind ICE event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Minimal engine scripted for queue tests.
    struct StubEngine {
        log: Mutex<Vec<String>>,
        ice_tx: broadcast::Sender<IceEvent>,
        gathering_complete: AtomicBool,
        signaling: Mutex<SignalingState>,
        fail_remote: bool,
    }

    impl StubEngine {
        fn new(gathering_complete: bool) -> Self {
            let (ice_tx, _) = broadcast::channel(16);
            Self {
                log: Mutex::new(Vec::new()),
                ice_tx,
                gathering_complete: AtomicBool::new(gathering_complete),
                signaling: Mutex::new(SignalingState::Stable),
                fail_remote: false,
            }
        }
    }

    #[async_trait]
    impl MediaEngine for StubEngine {
        async fn create_offer(&self, _constraints: Option<&str>) -> Result<String> {
            self.log.lock().push("create_offer".into());
            Ok("v=0\r\no=offer\r\n".into())
        }

        async fn create_answer(&self, _constraints: Option<&str>) -> Result<String> {
            self.log.lock().push("create_answer".into());
            Ok("v=0\r\no=answer\r\n".into())
        }

        async fn set_local_description(&self, _kind: SdpType, _sdp: &str) -> Result<()> {
            self.log.lock().push("set_local".into());
            Ok(())
        }

        async fn set_remote_description(&self, _kind: SdpType, _sdp: &str) -> Result<()> {
            if self.fail_remote {
                anyhow::bail!("rejected");
            }
            self.log.lock().push("set_remote".into());
            Ok(())
        }

        fn signaling_state(&self) -> SignalingState {
            *self.signaling.lock()
        }

        fn ice_gathering_state(&self) -> IceGatheringState {
            if self.gathering_complete.load(Ordering::SeqCst) {
                IceGatheringState::Complete
            } else {
                IceGatheringState::Gathering
            }
        }

        fn local_description(&self) -> Option<String> {
            Some("v=0\r\no=local-final\r\n".into())
        }

        fn ice_events(&self) -> broadcast::Receiver<IceEvent> {
            self.ice_tx.subscribe()
        }
    }

    #[tokio::test]
    async fn local_description_completes_when_gathering_done() {
        let engine = Arc::new(StubEngine::new(true));
        let queue = NegotiationQueue::new(engine.clone());
        let events = SessionEvents::new();

        let sdp = queue
            .local_description(SdpType::Offer, None, &events, &[])
            .await
            .unwrap();
        assert_eq!(sdp, "v=0\r\no=local-final\r\n");
        assert!(queue.is_ready());
        assert_eq!(
            engine.log.lock().as_slice(),
            ["create_offer", "set_local"]
        );
    }

    #[tokio::test]
    async fn ready_cleared_while_in_flight() {
        let engine = Arc::new(StubEngine::new(false));
        let queue = Arc::new(NegotiationQueue::new(engine.clone()));
        let events = SessionEvents::new();

        let task = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .local_description(SdpType::Offer, None, &events, &[])
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!queue.is_ready());

        engine
            .ice_tx
            .send(IceEvent::GatheringStateChange(IceGatheringState::Complete))
            .unwrap();
        task.await.unwrap().unwrap();
        assert!(queue.is_ready());
    }

    #[tokio::test]
    async fn null_candidate_finishes_wait() {
        let engine = Arc::new(StubEngine::new(false));
        let queue = Arc::new(NegotiationQueue::new(engine.clone()));
        let events = SessionEvents::new();

        let task = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .local_description(SdpType::Answer, None, &events, &[])
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.ice_tx.send(IceEvent::EndOfCandidates).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn candidates_are_surfaced_before_completion() {
        let engine = Arc::new(StubEngine::new(false));
        let queue = Arc::new(NegotiationQueue::new(engine.clone()));
        let events = SessionEvents::new();
        let mut rx = events.subscribe();

        let task = {
            let queue = queue.clone();
            let events = events.clone();
            tokio::spawn(async move {
                queue
                    .local_description(SdpType::Offer, None, &events, &[])
                    .await
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine
            .ice_tx
            .send(IceEvent::Candidate(SmolStr::new("candidate:1 1 UDP 1 10.0.0.1 4444 typ host")))
            .unwrap();
        engine.ice_tx.send(IceEvent::EndOfCandidates).unwrap();
        task.await.unwrap().unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, SessionEvent::IceCandidate { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            SessionEvent::Sdp {
                originator: Originator::Local,
                kind: SdpType::Offer,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn operations_complete_in_enqueue_order() {
        let engine = Arc::new(StubEngine::new(true));
        let queue = Arc::new(NegotiationQueue::new(engine.clone()));
        let events = SessionEvents::new();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            let events = events.clone();
            tasks.push(tokio::spawn(async move {
                queue
                    .local_description(SdpType::Offer, None, &events, &[])
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Each operation ran create_offer then set_local without interleaving.
        let log = engine.log.lock();
        for pair in log.chunks(2) {
            assert_eq!(pair, ["create_offer", "set_local"]);
        }
    }

    #[tokio::test]
    async fn remote_failure_reports_kind() {
        let mut engine = StubEngine::new(true);
        engine.fail_remote = true;
        let queue = NegotiationQueue::new(Arc::new(engine));

        let err = queue
            .apply_remote(SdpType::Answer, "v=0\r\n", &[])
            .await
            .unwrap_err();
        assert_eq!(err.kind, PeerConnectionErrorKind::SetRemoteDescription);
    }

    #[tokio::test]
    async fn stable_state_triggers_fresh_offer() {
        let engine = Arc::new(StubEngine::new(true));
        let queue = NegotiationQueue::new(engine.clone());

        queue
            .apply_answer_with_reoffer("v=0\r\n", &[])
            .await
            .unwrap();
        assert_eq!(
            engine.log.lock().as_slice(),
            ["create_offer", "set_local", "set_remote"]
        );
    }

    #[tokio::test]
    async fn non_stable_state_applies_answer_directly() {
        let engine = Arc::new(StubEngine::new(true));
        *engine.signaling.lock() = SignalingState::HaveLocalOffer;
        let queue = NegotiationQueue::new(engine.clone());

        queue
            .apply_answer_with_reoffer("v=0\r\n", &[])
            .await
            .unwrap();
        assert_eq!(engine.log.lock().as_slice(), ["set_remote"]);
    }
}
