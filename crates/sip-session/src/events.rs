// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Typed session event surface.
//!
//! Notifications flow over a broadcast channel as [`SessionEvent`] values
//! with a fixed payload per event name. The interception points whose
//! subscribers mutate data in place (outgoing request body, SDP text, BYE
//! response headers, re-INVITE rejection) are a separate [`SessionHooks`]
//! trait so the mutation happens synchronously before the engine proceeds.

use smol_str::SmolStr;
use tokio::sync::broadcast;

use sip_core::{reason_phrase, Header, Headers, Request, Response};

use crate::causes::Cause;
use crate::negotiation::{IceReady, SdpType};

/// Who initiated a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originator {
    Local,
    Remote,
    System,
}

impl Originator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Originator::Local => "local",
            Originator::Remote => "remote",
            Originator::System => "system",
        }
    }
}

/// Which peer-connection operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionErrorKind {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
}

impl PeerConnectionErrorKind {
    /// Normative event name for this failure.
    pub fn name(&self) -> &'static str {
        match self {
            PeerConnectionErrorKind::CreateOffer => "peerconnection:createofferfailed",
            PeerConnectionErrorKind::CreateAnswer => "peerconnection:createanswerfailed",
            PeerConnectionErrorKind::SetLocalDescription => {
                "peerconnection:setlocaldescriptionfailed"
            }
            PeerConnectionErrorKind::SetRemoteDescription => {
                "peerconnection:setremotedescriptionfailed"
            }
        }
    }
}

/// Session lifecycle events.
///
/// Variant names map one-to-one onto the normative event names returned by
/// [`SessionEvent::name`].
#[derive(Debug, Clone)]
pub enum SessionEvent {
    NewRtcSession {
        originator: Originator,
    },
    Connecting {
        request: Request,
    },
    Sending {
        request: Request,
    },
    Progress {
        originator: Originator,
        response: Option<Response>,
    },
    Accepted {
        originator: Originator,
        response: Option<Response>,
    },
    Confirmed {
        originator: Originator,
    },
    Ended {
        originator: Originator,
        cause: Cause,
    },
    Failed {
        originator: Originator,
        cause: Cause,
    },
    Sdp {
        originator: Originator,
        kind: SdpType,
        sdp: String,
    },
    IceCandidate {
        candidate: SmolStr,
    },
    ReInvite {
        request: Request,
    },
    Update {
        request: Request,
    },
    AckReceived,
    ByeReceived {
        request: Request,
    },
    NewDtmf {
        originator: Originator,
        tone: char,
        duration_ms: u32,
    },
    NewInfo {
        originator: Originator,
        content_type: SmolStr,
        body: bytes::Bytes,
    },
    PeerConnectionError {
        kind: PeerConnectionErrorKind,
    },
}

impl SessionEvent {
    /// Normative event name.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::NewRtcSession { .. } => "newRTCSession",
            SessionEvent::Connecting { .. } => "connecting",
            SessionEvent::Sending { .. } => "sending",
            SessionEvent::Progress { .. } => "progress",
            SessionEvent::Accepted { .. } => "accepted",
            SessionEvent::Confirmed { .. } => "confirmed",
            SessionEvent::Ended { .. } => "ended",
            SessionEvent::Failed { .. } => "failed",
            SessionEvent::Sdp { .. } => "sdp",
            SessionEvent::IceCandidate { .. } => "icecandidate",
            SessionEvent::ReInvite { .. } => "reinvite",
            SessionEvent::Update { .. } => "update",
            SessionEvent::AckReceived => "ackReceived",
            SessionEvent::ByeReceived { .. } => "byeReceived",
            SessionEvent::NewDtmf { .. } => "newDTMF",
            SessionEvent::NewInfo { .. } => "newInfo",
            SessionEvent::PeerConnectionError { kind } => kind.name(),
        }
    }
}

/// Broadcast bus carrying [`SessionEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Emits an event; dropped silently when nobody is subscribed.
    pub fn emit(&self, event: SessionEvent) {
        tracing::trace!(event = event.name(), "session event");
        let _ = self.tx.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejection of an incoming re-INVITE or UPDATE.
#[derive(Debug, Clone)]
pub struct Reject {
    pub status_code: u16,
    pub reason_phrase: SmolStr,
    pub extra_headers: Vec<Header>,
}

impl Reject {
    /// Builds a rejection; `None` when the code is outside 300..=699.
    pub fn new(status_code: u16) -> Option<Self> {
        if !(300..=699).contains(&status_code) {
            return None;
        }
        Some(Self {
            status_code,
            reason_phrase: SmolStr::new(reason_phrase(status_code)),
            extra_headers: Vec::new(),
        })
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason_phrase = SmolStr::new(reason);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push(Header::new(name, value));
        self
    }
}

/// Synchronous interception points.
///
/// All methods default to no-ops; applications implement what they need and
/// register the hook set on the session. Hooks run on the session's
/// execution context and must not block.
pub trait SessionHooks: Send + Sync {
    /// Last chance to mutate the initial INVITE before it hits the wire.
    fn on_sending(&self, _request: &mut Request) {}

    /// Inspect or rewrite SDP text before it is applied or returned.
    fn on_sdp(&self, _originator: Originator, _kind: SdpType, _sdp: &mut String) {}

    /// A trickled candidate; call `ready.ready()` to stop waiting for more.
    fn on_ice_candidate(&self, _candidate: &str, _ready: &IceReady) {}

    /// Append headers to the 200 answering a received BYE.
    fn on_bye_received(&self, _request: &Request, _extra_headers: &mut Headers) {}

    /// Return `Some` to reject an incoming re-INVITE.
    fn on_reinvite(&self, _request: &Request) -> Option<Reject> {
        None
    }

    /// Return `Some` to reject an incoming UPDATE.
    fn on_update(&self, _request: &Request) -> Option<Reject> {
        None
    }
}
