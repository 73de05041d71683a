// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! RFC 3261 INVITE session engine.
//!
//! A [`Session`] owns one call attempt end to end: the initial INVITE
//! transaction (either direction), the confirmed dialog and any early
//! dialogs forked provisionals created, the serial SDP offer/answer
//! pipeline against an abstract [`MediaEngine`], in-dialog requests (ACK,
//! BYE, re-INVITE, UPDATE, INFO, DTMF-over-INFO), and RFC 4028 session
//! timers.
//!
//! The transaction/transport layer below feeds parsed messages in through
//! [`Session::receive_request`] / [`Session::receive_response`] and is
//! handed outgoing messages through the [`SignalingTransport`] it supplies.
//! Timer fires arrive through the mailbox receiver returned at
//! construction; the owner drains it into [`Session::on_timer`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use sip_session::{Session, SessionConfig, SignalingTransport, MediaEngine};
//! # async fn run(config: SessionConfig,
//! #              transport: Arc<dyn SignalingTransport>,
//! #              engine: Arc<dyn MediaEngine>) {
//! let (session, mut timer_rx) = Session::outgoing(config, transport, engine);
//! let driver = session.clone();
//! tokio::spawn(async move {
//!     while let Some(event) = timer_rx.recv().await {
//!         driver.on_timer(event).await;
//!     }
//! });
//! session.connect("sip:bob@example.com", Default::default()).await.unwrap();
//! # }
//! ```
//!
//! All session-visible mutations are serialized: shared state sits behind a
//! short-held mutex that is never kept across an await point, media
//! operations run through the session's [`NegotiationQueue`], and the
//! cancel latch plus terminal-status guard are re-checked after every
//! suspension.

pub mod causes;
pub mod config;
pub mod dialog;
pub mod dtmf;
pub mod events;
pub mod info;
pub mod metrics;
pub mod negotiation;
pub mod timers;

pub use causes::Cause;
pub use config::{DtmfSettings, RefreshMethod, SessionConfig, TimerSettings};
pub use dialog::{Dialog, DialogError, DialogId, DialogState, EarlyDialogs};
pub use dtmf::DtmfOptions;
pub use events::{
    Originator, PeerConnectionErrorKind, Reject, SessionEvent, SessionEvents, SessionHooks,
};
pub use metrics::{SessionMetrics, SessionMetricsSnapshot};
pub use negotiation::{
    IceEvent, IceGatheringState, IceReady, MediaEngine, NegotiationQueue, SdpType, SignalingState,
};
pub use timers::{SessionTimerState, TimerEvent, TimerKind};

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use smol_str::SmolStr;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use sip_core::{
    reason_phrase, Header, Headers, Method, NameAddr, ReasonHeader, Request, RequestLine,
    Response, SessionExpires, SipUri, StatusLine,
};

use dtmf::DtmfQueue;
use negotiation::NegotiationError;
use timers::{expiry_delay, refresh_delay, RuntimeTimers};

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStatus {
    Null,
    InviteSent,
    Received1xx,
    InviteReceived,
    WaitingForAnswer,
    Answered,
    WaitingForAck,
    Canceled,
    Terminated,
    Confirmed,
}

impl SessionStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Canceled | SessionStatus::Terminated)
    }
}

/// Whether this endpoint placed or received the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Synchronous errors surfaced to the caller of a user operation. These
/// never mutate session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The operation is not allowed in the current status.
    InvalidState(SessionStatus),
    /// The connect target is not a valid SIP URI.
    InvalidTarget,
    /// Status code outside the range the operation accepts.
    InvalidStatusCode(u16),
    /// DTMF tone string contains characters outside `[0-9A-DR#*,]`.
    InvalidTones,
    /// The operation requires a confirmed dialog.
    NoDialog,
    /// The request is not a usable initial INVITE.
    InvalidRequest(&'static str),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidState(status) => {
                write!(f, "invalid status for operation: {:?}", status)
            }
            SessionError::InvalidTarget => write!(f, "target is not a valid SIP URI"),
            SessionError::InvalidStatusCode(code) => {
                write!(f, "invalid status code: {}", code)
            }
            SessionError::InvalidTones => write!(f, "invalid DTMF tones"),
            SessionError::NoDialog => write!(f, "no confirmed dialog"),
            SessionError::InvalidRequest(what) => write!(f, "invalid request: {}", what),
        }
    }
}

impl std::error::Error for SessionError {}

/// Outgoing message sink provided by the transaction/transport layer.
///
/// Retransmissions of requests, authentication retries, and Via handling
/// happen below this trait; the session only hands over complete messages.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    async fn send_request(&self, request: Request) -> Result<()>;
    async fn send_response(&self, response: Response) -> Result<()>;
}

/// Options for [`Session::connect`].
#[derive(Default)]
pub struct ConnectOptions {
    /// Pre-built SDP offer; generated through the media engine when absent.
    pub sdp: Option<String>,
    pub extra_headers: Vec<Header>,
    /// Withhold the caller identity (RFC 3323 Privacy + P-Preferred-Identity).
    pub anonymous: bool,
    /// Engine-specific offer constraints.
    pub constraints: Option<String>,
}

/// Options for [`Session::answer`].
#[derive(Default)]
pub struct AnswerOptions {
    pub extra_headers: Vec<Header>,
    /// Engine-specific answer constraints.
    pub constraints: Option<String>,
}

/// Options for [`Session::terminate`].
#[derive(Default)]
pub struct TerminateOptions {
    /// Status code for the Reason header (BYE/CANCEL) or the rejection
    /// response (unanswered incoming INVITE). Must be within 200..=699.
    pub status_code: Option<u16>,
    pub reason_phrase: Option<SmolStr>,
    pub extra_headers: Vec<Header>,
}

/// Options for [`Session::renegotiate`].
#[derive(Default)]
pub struct RenegotiateOptions {
    /// Use UPDATE (RFC 3311) instead of re-INVITE.
    pub use_update: bool,
    pub extra_headers: Vec<Header>,
    pub constraints: Option<String>,
}

/// Options for [`Session::send_request`].
#[derive(Default)]
pub struct RequestOptions {
    pub extra_headers: Vec<Header>,
    pub body: Option<(SmolStr, Bytes)>,
}

/// Mutable session state, guarded by a mutex that is never held across an
/// await point.
struct State {
    status: SessionStatus,
    direction: Direction,
    call_id: SmolStr,
    local_tag: SmolStr,
    remote_tag: Option<SmolStr>,
    local_identity: Option<NameAddr>,
    remote_identity: Option<NameAddr>,
    /// The active initial INVITE (sent or received).
    invite: Option<Request>,
    invite_cseq: u32,
    dialog: Option<Dialog>,
    early: EarlyDialogs,
    is_canceled: bool,
    cancel_reason: Option<ReasonHeader>,
    is_confirmed: bool,
    /// Latch: exactly one of `ended`/`failed` may ever fire.
    terminal_reported: bool,
    late_sdp: bool,
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
    /// Retained 2xx for retransmission while waiting for the ACK.
    last_2xx: Option<Response>,
    /// Retained ACK, re-sent on 2xx retransmissions.
    last_ack: Option<Request>,
    /// An outbound re-INVITE/UPDATE awaiting its final response.
    pending_renegotiation: Option<Method>,
    session_timers: SessionTimerState,
    dtmf: DtmfQueue,
    data: Option<Box<dyn Any + Send + Sync>>,
}

struct Inner {
    config: SessionConfig,
    transport: Arc<dyn SignalingTransport>,
    negotiation: NegotiationQueue,
    events: SessionEvents,
    hooks: RwLock<Vec<Arc<dyn SessionHooks>>>,
    timers: RuntimeTimers,
    metrics: SessionMetrics,
    state: Mutex<State>,
}

/// One INVITE session. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Creates a session for an outgoing call. Nothing is sent until
    /// [`Session::connect`] runs.
    ///
    /// The returned receiver is the timer mailbox; the owner must drain it
    /// into [`Session::on_timer`].
    pub fn outgoing(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        engine: Arc<dyn MediaEngine>,
    ) -> (Session, mpsc::UnboundedReceiver<TimerEvent>) {
        let (timers, timer_rx) = RuntimeTimers::new();
        let local_identity = NameAddr::new(config.display_name.as_deref(), config.uri.clone());
        let state = State {
            status: SessionStatus::Null,
            direction: Direction::Outgoing,
            call_id: generate_call_id(&config.uri.host),
            local_tag: generate_tag(),
            remote_tag: None,
            local_identity: Some(local_identity),
            remote_identity: None,
            invite: None,
            invite_cseq: 0,
            dialog: None,
            early: EarlyDialogs::new(),
            is_canceled: false,
            cancel_reason: None,
            is_confirmed: false,
            terminal_reported: false,
            late_sdp: false,
            start_time: None,
            end_time: None,
            last_2xx: None,
            last_ack: None,
            pending_renegotiation: None,
            session_timers: SessionTimerState::default(),
            dtmf: DtmfQueue::default(),
            data: None,
        };
        let metrics = SessionMetrics::new();
        metrics.record_created();
        let session = Session {
            inner: Arc::new(Inner {
                config,
                transport,
                negotiation: NegotiationQueue::new(engine),
                events: SessionEvents::new(),
                hooks: RwLock::new(Vec::new()),
                timers,
                metrics,
                state: Mutex::new(state),
            }),
        };
        (session, timer_rx)
    }

    /// Creates a session for a received initial INVITE.
    ///
    /// Emits `newRTCSession` (remote), moves to `WaitingForAnswer`, and arms
    /// the no-answer window plus, when the INVITE carries `Expires`, the
    /// expiration timer. Must run inside a tokio runtime.
    pub fn incoming(
        config: SessionConfig,
        transport: Arc<dyn SignalingTransport>,
        engine: Arc<dyn MediaEngine>,
        request: Request,
    ) -> std::result::Result<(Session, mpsc::UnboundedReceiver<TimerEvent>), SessionError> {
        if *request.method() != Method::Invite {
            return Err(SessionError::InvalidRequest("method is not INVITE"));
        }
        let call_id = request
            .call_id()
            .cloned()
            .ok_or(SessionError::InvalidRequest("missing Call-ID"))?;
        let remote_identity = request
            .from_addr()
            .ok_or(SessionError::InvalidRequest("unparseable From"))?;
        if request.from_tag().is_none() {
            return Err(SessionError::InvalidRequest("missing From tag"));
        }
        let local_identity = request
            .to_addr()
            .ok_or(SessionError::InvalidRequest("unparseable To"))?;

        let expires = request
            .headers
            .get("Expires")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let late_sdp = !request.has_body();

        let (timers, timer_rx) = RuntimeTimers::new();
        let state = State {
            status: SessionStatus::InviteReceived,
            direction: Direction::Incoming,
            call_id,
            local_tag: generate_tag(),
            remote_tag: request.from_tag(),
            local_identity: Some(local_identity),
            remote_identity: Some(remote_identity),
            invite: Some(request),
            invite_cseq: 0,
            dialog: None,
            early: EarlyDialogs::new(),
            is_canceled: false,
            cancel_reason: None,
            is_confirmed: false,
            terminal_reported: false,
            late_sdp,
            start_time: None,
            end_time: None,
            last_2xx: None,
            last_ack: None,
            pending_renegotiation: None,
            session_timers: SessionTimerState::default(),
            dtmf: DtmfQueue::default(),
            data: None,
        };
        let metrics = SessionMetrics::new();
        metrics.record_created();
        let session = Session {
            inner: Arc::new(Inner {
                config,
                transport,
                negotiation: NegotiationQueue::new(engine),
                events: SessionEvents::new(),
                hooks: RwLock::new(Vec::new()),
                timers,
                metrics,
                state: Mutex::new(state),
            }),
        };

        session.inner.events.emit(SessionEvent::NewRtcSession {
            originator: Originator::Remote,
        });
        session.inner.state.lock().status = SessionStatus::WaitingForAnswer;
        session
            .inner
            .timers
            .arm(TimerKind::NoAnswer, session.inner.config.no_answer_timeout);
        if let Some(expires) = expires {
            session.inner.timers.arm(TimerKind::InviteExpires, expires);
        }
        Ok((session, timer_rx))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Session identity: Call-ID concatenated with the local tag.
    pub fn id(&self) -> SmolStr {
        let state = self.inner.state.lock();
        SmolStr::new(format!("{}{}", state.call_id, state.local_tag))
    }

    pub fn call_id(&self) -> SmolStr {
        self.inner.state.lock().call_id.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    pub fn direction(&self) -> Direction {
        self.inner.state.lock().direction
    }

    /// From tag of the initial INVITE: ours when outgoing, the peer's when
    /// incoming.
    pub fn from_tag(&self) -> Option<SmolStr> {
        let state = self.inner.state.lock();
        match state.direction {
            Direction::Outgoing => Some(state.local_tag.clone()),
            Direction::Incoming => state.remote_tag.clone(),
        }
    }

    /// To tag of the dialog, once known.
    pub fn to_tag(&self) -> Option<SmolStr> {
        let state = self.inner.state.lock();
        match state.direction {
            Direction::Outgoing => state.remote_tag.clone(),
            Direction::Incoming => Some(state.local_tag.clone()),
        }
    }

    pub fn local_identity(&self) -> Option<NameAddr> {
        self.inner.state.lock().local_identity.clone()
    }

    pub fn remote_identity(&self) -> Option<NameAddr> {
        self.inner.state.lock().remote_identity.clone()
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.inner.state.lock().start_time
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.inner.state.lock().end_time
    }

    pub fn contact(&self) -> SipUri {
        self.inner.config.contact.clone()
    }

    /// The peer-connection handle this session exclusively owns.
    pub fn connection(&self) -> Arc<dyn MediaEngine> {
        self.inner.negotiation.engine().clone()
    }

    pub fn is_confirmed(&self) -> bool {
        self.inner.state.lock().is_confirmed
    }

    pub fn metrics(&self) -> SessionMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_hooks(&self, hooks: Arc<dyn SessionHooks>) {
        self.inner.hooks.write().push(hooks);
    }

    /// Attaches an opaque user payload to the session.
    pub fn set_data(&self, data: Box<dyn Any + Send + Sync>) {
        self.inner.state.lock().data = Some(data);
    }

    pub fn take_data(&self) -> Option<Box<dyn Any + Send + Sync>> {
        self.inner.state.lock().data.take()
    }

    // ------------------------------------------------------------------
    // User operations
    // ------------------------------------------------------------------

    /// Places the call: builds and sends the initial INVITE.
    ///
    /// Allowed only in `Null`. Emits `newRTCSession` (local), `connecting`,
    /// and `sending` (hooks may mutate the request in between), then
    /// transitions to `InviteSent`.
    pub async fn connect(
        &self,
        target: &str,
        options: ConnectOptions,
    ) -> std::result::Result<(), SessionError> {
        let target_uri = SipUri::parse(target).ok_or(SessionError::InvalidTarget)?;
        {
            let mut state = self.inner.state.lock();
            if state.status != SessionStatus::Null {
                return Err(SessionError::InvalidState(state.status));
            }
            state.remote_identity = Some(NameAddr::new(None, target_uri.clone()));
            if options.anonymous {
                state.local_identity =
                    Some(NameAddr::new(Some("Anonymous"), SipUri::anonymous()));
            }
        }

        self.inner.events.emit(SessionEvent::NewRtcSession {
            originator: Originator::Local,
        });

        let request = {
            let mut state = self.inner.state.lock();
            let request = self.build_invite(&state, &target_uri, &options);
            state.invite = Some(request.clone());
            state.invite_cseq = 1;
            state.status = SessionStatus::InviteSent;
            request
        };
        info!(
            call_id = %request.call_id().map(|c| c.as_str()).unwrap_or(""),
            to = target,
            "connecting"
        );
        self.inner
            .events
            .emit(SessionEvent::Connecting { request });

        let sdp = match options.sdp {
            Some(sdp) => sdp,
            None => {
                match self
                    .inner
                    .negotiation
                    .local_description(
                        SdpType::Offer,
                        options.constraints.as_deref(),
                        &self.inner.events,
                        &self.hooks(),
                    )
                    .await
                {
                    Ok(sdp) => sdp,
                    Err(error) => {
                        self.report_media_error(&error);
                        self.fail(Originator::System, Cause::WebrtcError, SessionStatus::Terminated)
                            .await;
                        return Ok(());
                    }
                }
            }
        };

        // The user may have terminated while the offer was being produced.
        let canceled = {
            let state = self.inner.state.lock();
            state.is_canceled || state.status.is_terminal()
        };
        if canceled {
            self.fail(Originator::Local, Cause::Canceled, SessionStatus::Canceled)
                .await;
            return Ok(());
        }

        let mut request = {
            let mut state = self.inner.state.lock();
            let invite = state.invite.as_mut().expect("invite set above");
            set_sdp_body(invite, &sdp);
            invite.clone()
        };
        for hook in self.hooks() {
            hook.on_sending(&mut request);
        }
        self.inner.state.lock().invite = Some(request.clone());
        self.inner.events.emit(SessionEvent::Sending {
            request: request.clone(),
        });

        if self.inner.transport.send_request(request).await.is_err() {
            self.fail(
                Originator::System,
                Cause::ConnectionError,
                SessionStatus::Terminated,
            )
            .await;
        }
        Ok(())
    }

    /// Answers an incoming call with a locally generated SDP answer (or, in
    /// late-SDP mode, a fresh offer the ACK must answer).
    ///
    /// Allowed only in `WaitingForAnswer`. On success the 200 is sent, the
    /// session moves to `WaitingForAck`, and the 2xx-retransmission and
    /// ACK-wait timers are armed.
    pub async fn answer(
        &self,
        options: AnswerOptions,
    ) -> std::result::Result<(), SessionError> {
        let (invite, late_sdp, local_tag) = {
            let mut state = self.inner.state.lock();
            if state.status != SessionStatus::WaitingForAnswer {
                return Err(SessionError::InvalidState(state.status));
            }
            state.status = SessionStatus::Answered;
            (
                state.invite.clone().expect("incoming session has INVITE"),
                state.late_sdp,
                state.local_tag.clone(),
            )
        };
        self.inner.timers.stop(TimerKind::NoAnswer);
        self.inner.timers.stop(TimerKind::InviteExpires);

        // The dialog must exist before any media work so a parallel CANCEL
        // can tear everything down consistently.
        let dialog = match Dialog::uas(&invite, &local_tag, DialogState::Confirmed) {
            Ok(dialog) => dialog,
            Err(error) => {
                warn!(%error, "failed to build UAS dialog");
                self.reply(&invite, 500, Vec::new(), None).await;
                self.fail(
                    Originator::System,
                    Cause::InternalError,
                    SessionStatus::Terminated,
                )
                .await;
                return Ok(());
            }
        };
        self.inner.state.lock().dialog = Some(dialog);

        // Media: apply the remote offer (when present), produce our
        // description. In late-SDP mode the 200 carries a fresh offer.
        if !late_sdp {
            if let Some(offer) = invite.body_str() {
                if let Err(error) = self
                    .inner
                    .negotiation
                    .apply_remote(SdpType::Offer, offer, &self.hooks())
                    .await
                {
                    self.report_media_error(&error);
                    self.reply(&invite, 488, Vec::new(), None).await;
                    self.fail(
                        Originator::System,
                        Cause::BadMediaDescription,
                        SessionStatus::Terminated,
                    )
                    .await;
                    return Ok(());
                }
            }
        }
        let kind = if late_sdp {
            SdpType::Offer
        } else {
            SdpType::Answer
        };
        let sdp = match self
            .inner
            .negotiation
            .local_description(
                kind,
                options.constraints.as_deref(),
                &self.inner.events,
                &self.hooks(),
            )
            .await
        {
            Ok(sdp) => sdp,
            Err(error) => {
                self.report_media_error(&error);
                self.reply(&invite, 500, Vec::new(), None).await;
                self.fail(
                    Originator::System,
                    Cause::WebrtcError,
                    SessionStatus::Terminated,
                )
                .await;
                return Ok(());
            }
        };

        // A CANCEL may have landed while the answer was being produced.
        if self.status() != SessionStatus::Answered {
            debug!("session left Answered during media setup, dropping 200");
            return Ok(());
        }

        let session_expires = self.negotiate_session_timers_request(&invite);
        let mut response = self.response_for(&invite, 200, None);
        response
            .headers
            .push("Contact", format!("<{}>", self.inner.config.contact));
        response.headers.push("Allow", ALLOWED_METHODS);
        if let Some(se) = &session_expires {
            response.headers.push("Session-Expires", se.clone());
        }
        for header in options.extra_headers {
            response.headers.push(header.name, header.value);
        }
        set_sdp_body_response(&mut response, &sdp);

        {
            let mut state = self.inner.state.lock();
            state.last_2xx = Some(response.clone());
            state.status = SessionStatus::WaitingForAck;
        }
        if self.inner.transport.send_response(response).await.is_err() {
            self.fail(
                Originator::System,
                Cause::ConnectionError,
                SessionStatus::Terminated,
            )
            .await;
            return Ok(());
        }

        let timers = &self.inner.config.timers;
        self.inner
            .timers
            .arm_retransmit_2xx(timers.t1, timers.t2);
        self.inner.timers.arm(TimerKind::AckWait, timers.timer_h);

        self.inner.state.lock().start_time = Some(SystemTime::now());
        self.inner.events.emit(SessionEvent::Accepted {
            originator: Originator::Local,
            response: None,
        });
        self.start_session_timer();
        Ok(())
    }

    /// Ends the call attempt, whatever phase it is in.
    ///
    /// - `Null`/`InviteSent`: latch the cancel intent; the CANCEL goes out
    ///   once a provisional arrives (or the 2xx is accepted and released).
    /// - `Received1xx`: send CANCEL now.
    /// - unanswered incoming: reject the INVITE (default 480).
    /// - `WaitingForAck`/`Confirmed`: send BYE.
    pub async fn terminate(
        &self,
        options: TerminateOptions,
    ) -> std::result::Result<(), SessionError> {
        if let Some(code) = options.status_code {
            if !(200..=699).contains(&code) {
                return Err(SessionError::InvalidStatusCode(code));
            }
        }
        let status = self.status();
        match status {
            SessionStatus::Canceled | SessionStatus::Terminated => {
                Err(SessionError::InvalidState(status))
            }
            SessionStatus::Null | SessionStatus::InviteSent => {
                let mut state = self.inner.state.lock();
                state.is_canceled = true;
                state.cancel_reason = reason_from(&options);
                Ok(())
            }
            SessionStatus::Received1xx => {
                let (invite, reason) = {
                    let mut state = self.inner.state.lock();
                    state.is_canceled = true;
                    state.cancel_reason = reason_from(&options);
                    (state.invite.clone(), state.cancel_reason.clone())
                };
                if let Some(invite) = invite {
                    let cancel = build_cancel(&invite, reason.as_ref());
                    let _ = self.inner.transport.send_request(cancel).await;
                }
                self.fail(Originator::Local, Cause::Canceled, SessionStatus::Canceled)
                    .await;
                Ok(())
            }
            SessionStatus::InviteReceived
            | SessionStatus::WaitingForAnswer
            | SessionStatus::Answered => {
                let invite = self.inner.state.lock().invite.clone();
                if let Some(invite) = invite {
                    let code = options.status_code.unwrap_or(480);
                    let mut extra = Vec::new();
                    for header in options.extra_headers {
                        extra.push(header);
                    }
                    let response = {
                        let mut response = self.response_for(
                            &invite,
                            code,
                            options.reason_phrase.as_deref(),
                        );
                        for header in extra {
                            response.headers.push(header.name, header.value);
                        }
                        response
                    };
                    let _ = self.inner.transport.send_response(response).await;
                }
                self.fail(Originator::Local, Cause::Rejected, SessionStatus::Terminated)
                    .await;
                Ok(())
            }
            SessionStatus::WaitingForAck | SessionStatus::Confirmed => {
                self.send_bye(reason_from(&options), options.extra_headers)
                    .await;
                self.end(Originator::Local, Cause::Bye).await;
                Ok(())
            }
        }
    }

    /// Queues DTMF tones, each sent as an INFO with `application/dtmf-relay`.
    ///
    /// Allowed in `Confirmed` and `WaitingForAck`. If a tone run is already
    /// in progress the new tones are appended to it. A send failure drops
    /// the remaining queue.
    pub async fn send_dtmf(
        &self,
        tones: &str,
        options: DtmfOptions,
    ) -> std::result::Result<(), SessionError> {
        let status = self.status();
        if !matches!(
            status,
            SessionStatus::Confirmed | SessionStatus::WaitingForAck
        ) {
            return Err(SessionError::InvalidState(status));
        }
        if !dtmf::is_valid_tones(tones) {
            return Err(SessionError::InvalidTones);
        }

        let settings = &self.inner.config.dtmf;
        let duration = dtmf::clamp_duration(options.duration_ms, settings);
        let gap = dtmf::clamp_gap(options.inter_tone_gap_ms, settings);

        {
            let mut state = self.inner.state.lock();
            state.dtmf.duration_ms = duration;
            state.dtmf.gap_ms = gap;
            state
                .dtmf
                .queue
                .extend(tones.chars().map(|c| c.to_ascii_uppercase()));
            if state.dtmf.sending {
                return Ok(());
            }
            state.dtmf.sending = true;
        }

        loop {
            let (tone, duration, gap) = {
                let mut state = self.inner.state.lock();
                if state.status.is_terminal() {
                    state.dtmf.reset();
                    return Ok(());
                }
                match state.dtmf.queue.pop_front() {
                    Some(tone) => (tone, state.dtmf.duration_ms, state.dtmf.gap_ms),
                    None => {
                        state.dtmf.sending = false;
                        return Ok(());
                    }
                }
            };

            if tone == ',' {
                tokio::time::sleep(dtmf::COMMA_PAUSE).await;
                continue;
            }

            let request = {
                let mut state = self.inner.state.lock();
                match self.in_dialog_request(&mut state, Method::Info, &options.extra_headers) {
                    Some(mut request) => {
                        set_body(
                            &mut request,
                            info::DTMF_CONTENT_TYPE,
                            dtmf::dtmf_body(tone, duration).as_bytes(),
                        );
                        request
                    }
                    None => {
                        state.dtmf.reset();
                        return Ok(());
                    }
                }
            };
            if self.inner.transport.send_request(request).await.is_err() {
                warn!("INFO send failed, dropping queued DTMF");
                self.inner.state.lock().dtmf.reset();
                return Ok(());
            }
            self.inner.events.emit(SessionEvent::NewDtmf {
                originator: Originator::Local,
                tone,
                duration_ms: duration,
            });
            tokio::time::sleep(Duration::from_millis(
                u64::from(duration) + u64::from(gap),
            ))
            .await;
        }
    }

    /// Sends an in-dialog INFO with an arbitrary payload.
    pub async fn send_info(
        &self,
        content_type: &str,
        body: &str,
        extra_headers: Vec<Header>,
    ) -> std::result::Result<(), SessionError> {
        let status = self.status();
        if !matches!(
            status,
            SessionStatus::Confirmed | SessionStatus::WaitingForAck
        ) {
            return Err(SessionError::InvalidState(status));
        }
        let request = {
            let mut state = self.inner.state.lock();
            let mut request = self
                .in_dialog_request(&mut state, Method::Info, &extra_headers)
                .ok_or(SessionError::NoDialog)?;
            set_body(&mut request, content_type, body.as_bytes());
            request
        };
        let _ = self.inner.transport.send_request(request).await;
        Ok(())
    }

    /// Starts an SDP renegotiation (re-INVITE, or UPDATE with
    /// `use_update`).
    ///
    /// Returns `Ok(false)` without side effects when the session is not
    /// eligible: the local description must be ready, a confirmed dialog
    /// must exist, and no in-dialog transaction may be pending in either
    /// direction.
    pub async fn renegotiate(
        &self,
        options: RenegotiateOptions,
    ) -> std::result::Result<bool, SessionError> {
        let method = if options.use_update {
            Method::Update
        } else {
            Method::Invite
        };
        {
            let mut state = self.inner.state.lock();
            let eligible = self.inner.negotiation.is_ready()
                && state
                    .dialog
                    .as_ref()
                    .map(|d| !d.uac_pending_reply && !d.uas_pending_reply)
                    .unwrap_or(false);
            if !eligible {
                return Ok(false);
            }
            let dialog = state.dialog.as_mut().expect("checked above");
            dialog.uac_pending_reply = true;
            state.pending_renegotiation = Some(method.clone());
        }

        let sdp = match self
            .inner
            .negotiation
            .local_description(
                SdpType::Offer,
                options.constraints.as_deref(),
                &self.inner.events,
                &self.hooks(),
            )
            .await
        {
            Ok(sdp) => sdp,
            Err(error) => {
                self.report_media_error(&error);
                self.terminate_established(Some(500), "Internal Server Error", Cause::WebrtcError)
                    .await;
                return Ok(true);
            }
        };

        if self.status().is_terminal() {
            return Ok(true);
        }

        let request = {
            let mut state = self.inner.state.lock();
            let mut request = match self.in_dialog_request(
                &mut state,
                method.clone(),
                &options.extra_headers,
            ) {
                Some(request) => request,
                None => return Ok(true),
            };
            if let Some(se) = self.session_expires_for_request(&state) {
                request.headers.push("Session-Expires", se);
            }
            set_sdp_body(&mut request, &sdp);
            request
        };
        let _ = self.inner.transport.send_request(request).await;
        Ok(true)
    }

    /// Sends an arbitrary in-dialog request through the confirmed dialog.
    pub async fn send_request(
        &self,
        method: Method,
        options: RequestOptions,
    ) -> std::result::Result<(), SessionError> {
        let request = {
            let mut state = self.inner.state.lock();
            let mut request = self
                .in_dialog_request(&mut state, method, &options.extra_headers)
                .ok_or(SessionError::NoDialog)?;
            if let Some((content_type, body)) = &options.body {
                set_body(&mut request, content_type, body);
            }
            request
        };
        let _ = self.inner.transport.send_request(request).await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound requests
    // ------------------------------------------------------------------

    /// Delivers an in-dialog request (or CANCEL/ACK for the initial INVITE).
    pub async fn receive_request(&self, request: Request) {
        // In-dialog CSeq discipline for everything except CANCEL (matched
        // to the INVITE transaction) and ACK (validated inside the dialog).
        if !matches!(request.method(), Method::Cancel) {
            let stale = {
                let mut state = self.inner.state.lock();
                match state.dialog.as_mut() {
                    Some(dialog) => dialog.update_from_request(&request).is_err(),
                    None => false,
                }
            };
            if stale {
                if *request.method() != Method::Ack {
                    self.reply(&request, 500, Vec::new(), None).await;
                }
                return;
            }
        }

        match request.method().clone() {
            Method::Cancel => self.receive_cancel(request).await,
            Method::Ack => self.receive_ack(request).await,
            Method::Bye => self.receive_bye(request).await,
            Method::Invite => self.receive_reinvite(request).await,
            Method::Update => self.receive_update(request).await,
            Method::Info => self.receive_info(request).await,
            Method::Options => {
                let mut response = self.response_for(&request, 200, None);
                response.headers.push("Allow", ALLOWED_METHODS);
                let _ = self.inner.transport.send_response(response).await;
            }
            Method::Unknown(token) => {
                debug!(method = token.as_str(), "unsupported in-dialog method");
                self.reply(&request, 501, Vec::new(), None).await;
            }
        }
    }

    async fn receive_cancel(&self, request: Request) {
        let invite = {
            let mut state = self.inner.state.lock();
            if !matches!(
                state.status,
                SessionStatus::WaitingForAnswer | SessionStatus::Answered
            ) {
                // RFC 3261 §15: too late (or too early) to cancel.
                return;
            }
            state.status = SessionStatus::Canceled;
            state.cancel_reason = request
                .headers
                .get("Reason")
                .and_then(|v| parse_reason(v.as_str()));
            state.invite.clone()
        };
        if let Some(invite) = invite {
            let response = self.response_for(&invite, 487, None);
            let _ = self.inner.transport.send_response(response).await;
        }
        self.fail(Originator::Remote, Cause::Canceled, SessionStatus::Canceled)
            .await;
    }

    async fn receive_ack(&self, request: Request) {
        self.inner.events.emit(SessionEvent::AckReceived);

        let late_sdp = {
            let mut state = self.inner.state.lock();
            if state.status != SessionStatus::WaitingForAck {
                return;
            }
            state.status = SessionStatus::Confirmed;
            state.last_2xx = None;
            state.late_sdp
        };
        self.inner.timers.stop(TimerKind::Retransmit2xx);
        self.inner.timers.stop(TimerKind::AckWait);

        if late_sdp {
            let Some(answer) = request.body_str().filter(|b| !b.is_empty()) else {
                self.terminate_established(
                    Some(400),
                    "Missing session description",
                    Cause::MissingSdp,
                )
                .await;
                return;
            };
            match self
                .inner
                .negotiation
                .apply_remote(SdpType::Answer, answer, &self.hooks())
                .await
            {
                Ok(_) => {
                    self.inner.state.lock().late_sdp = false;
                    self.confirm_once(Originator::Remote);
                }
                Err(error) => {
                    self.report_media_error(&error);
                    self.terminate_established(
                        Some(488),
                        "Not Acceptable Here",
                        Cause::BadMediaDescription,
                    )
                    .await;
                }
            }
        } else {
            self.confirm_once(Originator::Remote);
        }
    }

    async fn receive_bye(&self, request: Request) {
        let allowed = matches!(
            self.status(),
            SessionStatus::Confirmed | SessionStatus::WaitingForAck
        );
        if !allowed {
            self.reply(&request, 403, Vec::new(), Some("Wrong Status")).await;
            return;
        }

        let mut extra = Headers::new();
        for hook in self.hooks() {
            hook.on_bye_received(&request, &mut extra);
        }
        self.inner.events.emit(SessionEvent::ByeReceived {
            request: request.clone(),
        });

        let mut response = self.response_for(&request, 200, None);
        response.headers.extend_from(&extra);
        let _ = self.inner.transport.send_response(response).await;

        self.end(Originator::Remote, Cause::Bye).await;
    }

    async fn receive_reinvite(&self, request: Request) {
        if self.status() != SessionStatus::Confirmed {
            self.reply(&request, 403, Vec::new(), Some("Wrong Status")).await;
            return;
        }
        self.inner.events.emit(SessionEvent::ReInvite {
            request: request.clone(),
        });
        if let Some(reject) = self.hooks().iter().find_map(|h| h.on_reinvite(&request)) {
            self.reply_reject(&request, reject).await;
            return;
        }

        self.set_uas_pending(true);

        let sdp = if !request.has_body() {
            // Offerless re-INVITE: we supply the offer, the ACK answers.
            self.inner.state.lock().late_sdp = true;
            match self
                .inner
                .negotiation
                .local_description(SdpType::Offer, None, &self.inner.events, &self.hooks())
                .await
            {
                Ok(sdp) => sdp,
                Err(error) => {
                    self.report_media_error(&error);
                    self.reply(&request, 500, Vec::new(), None).await;
                    self.set_uas_pending(false);
                    return;
                }
            }
        } else {
            if !is_sdp(&request) {
                self.reply(&request, 415, Vec::new(), None).await;
                self.set_uas_pending(false);
                return;
            }
            let offer = request.body_str().unwrap_or_default().to_owned();
            if let Err(error) = self
                .inner
                .negotiation
                .apply_remote(SdpType::Offer, &offer, &self.hooks())
                .await
            {
                self.report_media_error(&error);
                self.reply(&request, 488, Vec::new(), None).await;
                self.set_uas_pending(false);
                return;
            }
            match self
                .inner
                .negotiation
                .local_description(SdpType::Answer, None, &self.inner.events, &self.hooks())
                .await
            {
                Ok(sdp) => sdp,
                Err(error) => {
                    self.report_media_error(&error);
                    self.reply(&request, 500, Vec::new(), None).await;
                    self.set_uas_pending(false);
                    return;
                }
            }
        };

        if self.status().is_terminal() {
            return;
        }

        let session_expires = self.negotiate_session_timers_request(&request);
        let mut response = self.response_for(&request, 200, None);
        response
            .headers
            .push("Contact", format!("<{}>", self.inner.config.contact));
        response.headers.push("Allow", ALLOWED_METHODS);
        if let Some(se) = &session_expires {
            response.headers.push("Session-Expires", se.clone());
        }
        set_sdp_body_response(&mut response, &sdp);

        {
            let mut state = self.inner.state.lock();
            state.last_2xx = Some(response.clone());
            state.status = SessionStatus::WaitingForAck;
        }
        self.set_uas_pending(false);
        let _ = self.inner.transport.send_response(response).await;

        let timers = &self.inner.config.timers;
        self.inner.timers.arm_retransmit_2xx(timers.t1, timers.t2);
        self.inner.timers.arm(TimerKind::AckWait, timers.timer_h);
        self.start_session_timer();
    }

    async fn receive_update(&self, request: Request) {
        if self.status() != SessionStatus::Confirmed {
            self.reply(&request, 403, Vec::new(), Some("Wrong Status")).await;
            return;
        }
        self.inner.events.emit(SessionEvent::Update {
            request: request.clone(),
        });
        if let Some(reject) = self.hooks().iter().find_map(|h| h.on_update(&request)) {
            self.reply_reject(&request, reject).await;
            return;
        }

        self.set_uas_pending(true);

        let sdp = if !request.has_body() {
            // Bodyless UPDATE (e.g. a bare session refresh): 200 with no body.
            None
        } else {
            if !is_sdp(&request) {
                self.reply(&request, 415, Vec::new(), None).await;
                self.set_uas_pending(false);
                return;
            }
            let offer = request.body_str().unwrap_or_default().to_owned();
            if let Err(error) = self
                .inner
                .negotiation
                .apply_remote(SdpType::Offer, &offer, &self.hooks())
                .await
            {
                self.report_media_error(&error);
                self.reply(&request, 488, Vec::new(), None).await;
                self.set_uas_pending(false);
                return;
            }
            match self
                .inner
                .negotiation
                .local_description(SdpType::Answer, None, &self.inner.events, &self.hooks())
                .await
            {
                Ok(sdp) => Some(sdp),
                Err(error) => {
                    self.report_media_error(&error);
                    self.reply(&request, 500, Vec::new(), None).await;
                    self.set_uas_pending(false);
                    return;
                }
            }
        };

        if self.status().is_terminal() {
            return;
        }

        let session_expires = self.negotiate_session_timers_request(&request);
        let mut response = self.response_for(&request, 200, None);
        response
            .headers
            .push("Contact", format!("<{}>", self.inner.config.contact));
        if let Some(se) = &session_expires {
            response.headers.push("Session-Expires", se.clone());
        }
        if let Some(sdp) = &sdp {
            set_sdp_body_response(&mut response, sdp);
        }
        self.set_uas_pending(false);
        let _ = self.inner.transport.send_response(response).await;
        self.start_session_timer();
    }

    async fn receive_info(&self, request: Request) {
        let allowed = matches!(
            self.status(),
            SessionStatus::Received1xx
                | SessionStatus::WaitingForAnswer
                | SessionStatus::Answered
                | SessionStatus::WaitingForAck
                | SessionStatus::Confirmed
        );
        if !allowed {
            self.reply(&request, 403, Vec::new(), Some("Wrong Status")).await;
            return;
        }

        let content_type = request.content_type();
        match info::classify_info(content_type.as_deref()) {
            info::InfoDisposition::Dtmf => {
                self.reply(&request, 200, Vec::new(), None).await;
                let body = request.body_str().unwrap_or_default();
                let default = self.inner.config.dtmf.default_duration_ms;
                match dtmf::parse_dtmf_body(body, default) {
                    Some((tone, duration_ms)) => {
                        self.inner.events.emit(SessionEvent::NewDtmf {
                            originator: Originator::Remote,
                            tone,
                            duration_ms,
                        });
                    }
                    None => debug!("unparseable dtmf-relay body"),
                }
            }
            info::InfoDisposition::Generic => {
                self.reply(&request, 200, Vec::new(), None).await;
                self.inner.events.emit(SessionEvent::NewInfo {
                    originator: Originator::Remote,
                    content_type: content_type.unwrap_or_default(),
                    body: request.body.clone(),
                });
            }
            info::InfoDisposition::Unsupported => {
                self.reply(&request, 415, Vec::new(), None).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound responses
    // ------------------------------------------------------------------

    /// Delivers a response belonging to this session. Responses to the
    /// initial INVITE and to renegotiation requests are told apart by CSeq.
    pub async fn receive_response(&self, response: Response) {
        let Some((cseq, method)) = response.cseq() else {
            return;
        };
        match method {
            Method::Invite => {
                let initial = {
                    let state = self.inner.state.lock();
                    state.direction == Direction::Outgoing && cseq == state.invite_cseq
                };
                if initial {
                    self.receive_invite_response(response).await;
                } else {
                    self.receive_renegotiation_response(response).await;
                }
            }
            Method::Update => self.receive_renegotiation_response(response).await,
            _ => {}
        }
    }

    async fn receive_invite_response(&self, response: Response) {
        let code = response.code();

        // 2xx retransmissions from the confirmed endpoint are re-ACKed;
        // 2xx from any other branch gets ACK + BYE (accept-and-terminate).
        enum Established {
            Retransmission,
            Fork,
        }
        let established = {
            let state = self.inner.state.lock();
            match (&state.dialog, response.is_success()) {
                (Some(dialog), true) => {
                    if dialog.matches_response(&response) {
                        Some(Established::Retransmission)
                    } else {
                        Some(Established::Fork)
                    }
                }
                _ => None,
            }
        };
        match established {
            Some(Established::Retransmission) => {
                let ack = self.inner.state.lock().last_ack.clone();
                if let Some(ack) = ack {
                    let _ = self.inner.transport.send_request(ack).await;
                }
                return;
            }
            Some(Established::Fork) => {
                debug!(code, "2xx from forked branch, accepting and releasing");
                self.accept_and_terminate(&response, None, None).await;
                return;
            }
            None => {}
        }

        // Latched cancel: release whatever the peer sends next.
        if self.inner.state.lock().is_canceled {
            if code < 200 {
                let (invite, reason) = {
                    let state = self.inner.state.lock();
                    (state.invite.clone(), state.cancel_reason.clone())
                };
                if let Some(invite) = invite {
                    let cancel = build_cancel(&invite, reason.as_ref());
                    let _ = self.inner.transport.send_request(cancel).await;
                }
            } else if response.is_success() {
                self.accept_and_terminate(&response, None, None).await;
            }
            self.fail(Originator::Local, Cause::Canceled, SessionStatus::Canceled)
                .await;
            return;
        }

        if !matches!(
            self.status(),
            SessionStatus::InviteSent | SessionStatus::Received1xx
        ) {
            return;
        }

        if code == 100 {
            self.inner.state.lock().status = SessionStatus::Received1xx;
            return;
        }

        if code < 200 {
            self.receive_invite_provisional(response).await;
        } else if code < 300 {
            self.receive_invite_success(response).await;
        } else {
            let cause = Cause::from_status(code);
            info!(code, cause = cause.as_str(), "INVITE rejected");
            self.fail(Originator::Remote, cause, SessionStatus::Terminated)
                .await;
        }
    }

    async fn receive_invite_provisional(&self, response: Response) {
        let Some(to_tag) = response.to_tag() else {
            debug!("provisional without to-tag, ignoring");
            return;
        };

        if response.headers.contains("Contact") {
            let invite = self.inner.state.lock().invite.clone();
            let dialog = invite.and_then(|inv| Dialog::uac(&inv, &response).ok());
            match dialog {
                Some(dialog) => {
                    let mut state = self.inner.state.lock();
                    state.early.insert(dialog);
                }
                None => {
                    warn!("failed to build early dialog from provisional");
                    self.fail(
                        Originator::Remote,
                        Cause::InternalError,
                        SessionStatus::Terminated,
                    )
                    .await;
                    return;
                }
            }
        }

        {
            let mut state = self.inner.state.lock();
            state.status = SessionStatus::Received1xx;
            state.remote_tag = Some(to_tag);
        }
        self.inner.events.emit(SessionEvent::Progress {
            originator: Originator::Remote,
            response: Some(response.clone()),
        });

        if let Some(answer) = response.body_str().filter(|b| !b.is_empty()) {
            match self
                .inner
                .negotiation
                .apply_remote(SdpType::Answer, answer, &self.hooks())
                .await
            {
                Ok(sdp) => self.inner.events.emit(SessionEvent::Sdp {
                    originator: Originator::Remote,
                    kind: SdpType::Answer,
                    sdp,
                }),
                // Provisional media failure does not kill the session.
                Err(error) => self.report_media_error(&error),
            }
        }
    }

    async fn receive_invite_success(&self, response: Response) {
        let Some(to_tag) = response.to_tag() else {
            debug!("2xx without to-tag, ignoring");
            return;
        };

        if !response.has_body() {
            self.accept_and_terminate(&response, Some(400), Some("Missing session description"))
                .await;
            self.fail(
                Originator::Remote,
                Cause::BadMediaDescription,
                SessionStatus::Terminated,
            )
            .await;
            return;
        }

        // A 2xx from a branch none of our early dialogs know is a fork we
        // do not want; release it and keep waiting for the chosen branch.
        let fork = {
            let state = self.inner.state.lock();
            !state.early.is_empty() && !state.early.contains_remote_tag(&to_tag)
        };
        if fork {
            debug!("2xx from unknown branch while early dialogs exist, releasing");
            self.accept_and_terminate(&response, None, None).await;
            return;
        }

        // Promote the matching early dialog or build the confirmed dialog.
        let dialog_ok = {
            let mut state = self.inner.state.lock();
            let id = DialogId::new(
                state.call_id.clone(),
                state.local_tag.clone(),
                to_tag.clone(),
            );
            match state.early.promote(&id) {
                Some(mut dialog) => {
                    dialog.update_from_response(&response);
                    state.dialog = Some(dialog);
                    true
                }
                None => match state
                    .invite
                    .as_ref()
                    .ok_or(DialogError::MissingHeader("INVITE"))
                    .and_then(|inv| Dialog::uac(inv, &response))
                {
                    Ok(dialog) => {
                        state.dialog = Some(dialog);
                        true
                    }
                    Err(_) => false,
                },
            }
        };
        if !dialog_ok {
            warn!("failed to build confirmed dialog from 2xx");
            self.fail(
                Originator::Remote,
                Cause::InternalError,
                SessionStatus::Terminated,
            )
            .await;
            return;
        }

        let answer = response.body_str().unwrap_or_default().to_owned();
        let applied = self
            .inner
            .negotiation
            .apply_answer_with_reoffer(&answer, &self.hooks())
            .await;

        if self.status().is_terminal() {
            return;
        }

        if let Err(error) = applied {
            self.report_media_error(&error);
            self.accept_and_terminate(&response, Some(488), Some("Not Acceptable Here"))
                .await;
            self.fail(
                Originator::Remote,
                Cause::BadMediaDescription,
                SessionStatus::Terminated,
            )
            .await;
            return;
        }

        {
            let mut state = self.inner.state.lock();
            state.status = SessionStatus::Confirmed;
            state.remote_tag = Some(to_tag);
            state.early.clear();
            state.start_time = Some(SystemTime::now());
        }
        self.handle_session_timers_response(&response);
        self.inner.events.emit(SessionEvent::Accepted {
            originator: Originator::Remote,
            response: Some(response.clone()),
        });

        let ack = {
            let mut state = self.inner.state.lock();
            let ack = state.invite.as_ref().map(|invite| {
                build_ack(
                    invite,
                    &response,
                    state.dialog.as_ref().map(|d| &d.remote_target),
                    None,
                )
            });
            state.last_ack = ack.clone();
            ack
        };
        if let Some(ack) = ack {
            let _ = self.inner.transport.send_request(ack).await;
        }
        self.confirm_once(Originator::Local);
    }

    async fn receive_renegotiation_response(&self, response: Response) {
        if response.is_provisional() {
            return;
        }
        let (method, invite_like) = {
            let mut state = self.inner.state.lock();
            let method = state.pending_renegotiation.take();
            if let Some(dialog) = state.dialog.as_mut() {
                dialog.uac_pending_reply = false;
                if response.is_success() {
                    dialog.update_from_response(&response);
                }
            }
            let invite_like = matches!(method, Some(Method::Invite));
            (method, invite_like)
        };
        if method.is_none() {
            return;
        }

        if response.is_success() {
            if invite_like {
                let ack = {
                    let state = self.inner.state.lock();
                    state
                        .dialog
                        .as_ref()
                        .map(|dialog| build_reinvite_ack(&response, &dialog.remote_target))
                };
                if let Some(ack) = ack {
                    let _ = self.inner.transport.send_request(ack).await;
                }
            }
            if let Some(answer) = response.body_str().filter(|b| !b.is_empty()) {
                if let Err(error) = self
                    .inner
                    .negotiation
                    .apply_remote(SdpType::Answer, answer, &self.hooks())
                    .await
                {
                    self.report_media_error(&error);
                }
            }
            self.handle_session_timers_response(&response);
        } else {
            // Peer declined the renegotiation; the session itself stays up.
            info!(code = response.code(), "renegotiation rejected by peer");
        }
    }

    // ------------------------------------------------------------------
    // Timer and collaborator failure entry points
    // ------------------------------------------------------------------

    /// Reacts to a timer fire from the mailbox.
    pub async fn on_timer(&self, event: TimerEvent) {
        match event {
            TimerEvent::Retransmit2xx => {
                let response = {
                    let state = self.inner.state.lock();
                    if state.status == SessionStatus::WaitingForAck {
                        state.last_2xx.clone()
                    } else {
                        None
                    }
                };
                match response {
                    Some(response) => {
                        debug!("retransmitting 2xx");
                        let _ = self.inner.transport.send_response(response).await;
                    }
                    None => self.inner.timers.stop(TimerKind::Retransmit2xx),
                }
            }
            TimerEvent::AckTimeout => {
                if self.status() != SessionStatus::WaitingForAck {
                    return;
                }
                warn!("no ACK before Timer H, closing");
                self.inner.timers.stop(TimerKind::Retransmit2xx);
                self.send_bye(None, Vec::new()).await;
                self.end(Originator::Remote, Cause::NoAck).await;
            }
            TimerEvent::SessionRefresh => self.refresh_session().await,
            TimerEvent::SessionExpired => {
                if self.status().is_terminal() {
                    return;
                }
                self.inner.metrics.record_watchdog_expiration();
                warn!("session timer expired without refresh");
                self.terminate_established(
                    Some(408),
                    "Session Timer Expired",
                    Cause::RequestTimeout,
                )
                .await;
            }
            TimerEvent::NoAnswer => {
                if self.status() != SessionStatus::WaitingForAnswer {
                    return;
                }
                let invite = self.inner.state.lock().invite.clone();
                if let Some(invite) = invite {
                    let response = self.response_for(&invite, 408, None);
                    let _ = self.inner.transport.send_response(response).await;
                }
                self.fail(
                    Originator::Local,
                    Cause::RequestTimeout,
                    SessionStatus::Terminated,
                )
                .await;
            }
            TimerEvent::InviteExpired => {
                if self.status() != SessionStatus::WaitingForAnswer {
                    return;
                }
                let invite = self.inner.state.lock().invite.clone();
                if let Some(invite) = invite {
                    let response = self.response_for(&invite, 487, None);
                    let _ = self.inner.transport.send_response(response).await;
                }
                self.fail(
                    Originator::System,
                    Cause::Unavailable,
                    SessionStatus::Terminated,
                )
                .await;
            }
        }
    }

    /// The transport layer lost the connection under this session.
    pub async fn on_transport_error(&self) {
        self.collaborator_failure(Cause::ConnectionError).await;
    }

    /// A request of this session timed out in the transaction layer.
    pub async fn on_request_timeout(&self) {
        self.collaborator_failure(Cause::RequestTimeout).await;
    }

    /// The transaction layer reported an unrecoverable dialog error.
    pub async fn on_dialog_error(&self) {
        self.collaborator_failure(Cause::DialogError).await;
    }

    async fn collaborator_failure(&self, cause: Cause) {
        if self.status().is_terminal() {
            return;
        }
        let accepted = self.inner.state.lock().start_time.is_some();
        if accepted {
            self.end(Originator::System, cause).await;
        } else {
            self.fail(Originator::System, cause, SessionStatus::Terminated)
                .await;
        }
    }

    // ------------------------------------------------------------------
    // Session timers (RFC 4028)
    // ------------------------------------------------------------------

    /// Adopts the peer's Session-Expires from a request we are answering
    /// and returns the value to mirror into the 2xx.
    fn negotiate_session_timers_request(&self, request: &Request) -> Option<String> {
        let config = &self.inner.config;
        if !config.session_timers {
            return None;
        }
        let requested = request
            .headers
            .get("Session-Expires")
            .and_then(|v| SessionExpires::parse(v));
        let (expires, self_is_refresher) = match requested {
            Some(se) if se.delta_seconds >= config.min_session_expires => match se.refresher {
                Some(sip_core::RefresherRole::Uac) => (se.delta_seconds, false),
                // No preference defaults the refresher onto us, the UAS.
                Some(sip_core::RefresherRole::Uas) | None => (se.delta_seconds, true),
            },
            _ => (config.session_expires, true),
        };
        {
            let mut state = self.inner.state.lock();
            state.session_timers = SessionTimerState {
                current_expires: expires,
                refresher: self_is_refresher,
                running: true,
            };
        }
        let role = if self_is_refresher {
            sip_core::RefresherRole::Uas
        } else {
            sip_core::RefresherRole::Uac
        };
        Some(SessionExpires::new(expires, Some(role)).to_string())
    }

    /// Adopts Session-Expires from a 2xx to a request we sent.
    fn handle_session_timers_response(&self, response: &Response) {
        let config = &self.inner.config;
        if !config.session_timers {
            return;
        }
        let negotiated = response
            .headers
            .get("Session-Expires")
            .and_then(|v| SessionExpires::parse(v));
        let (expires, self_is_refresher) = match negotiated {
            Some(se) if se.delta_seconds >= config.min_session_expires => match se.refresher {
                Some(sip_core::RefresherRole::Uas) => (se.delta_seconds, false),
                // We are the UAC of this transaction; absent means us.
                Some(sip_core::RefresherRole::Uac) | None => (se.delta_seconds, true),
            },
            _ => (config.session_expires, true),
        };
        {
            let mut state = self.inner.state.lock();
            state.session_timers = SessionTimerState {
                current_expires: expires,
                refresher: self_is_refresher,
                running: true,
            };
        }
        self.start_session_timer();
    }

    /// Arms the refresh or watchdog timer from the negotiated state.
    fn start_session_timer(&self) {
        let timer_state = {
            let state = self.inner.state.lock();
            state.session_timers
        };
        if !timer_state.running || timer_state.current_expires == 0 {
            return;
        }
        if timer_state.refresher {
            self.inner.timers.arm(
                TimerKind::SessionRefresh,
                refresh_delay(timer_state.current_expires),
            );
        } else {
            self.inner.timers.arm(
                TimerKind::SessionExpiry,
                expiry_delay(timer_state.current_expires),
            );
        }
    }

    /// The Session-Expires value to attach to a refresh or renegotiation
    /// request we send.
    fn session_expires_for_request(&self, state: &State) -> Option<String> {
        if !self.inner.config.session_timers || !state.session_timers.running {
            return None;
        }
        let role = if state.session_timers.refresher {
            sip_core::RefresherRole::Uac
        } else {
            sip_core::RefresherRole::Uas
        };
        Some(
            SessionExpires::new(state.session_timers.current_expires, Some(role)).to_string(),
        )
    }

    /// Issues the periodic refresh using the configured method.
    async fn refresh_session(&self) {
        if self.status() != SessionStatus::Confirmed {
            return;
        }
        let refresher = self.inner.state.lock().session_timers.refresher;
        if !refresher {
            return;
        }
        debug!("sending session refresh");
        self.inner.metrics.record_refresh_sent();

        match self.inner.config.session_timers_refresh_method {
            RefreshMethod::Update => {
                let request = {
                    let mut state = self.inner.state.lock();
                    let mut request =
                        match self.in_dialog_request(&mut state, Method::Update, &[]) {
                            Some(request) => request,
                            None => return,
                        };
                    if let Some(se) = self.session_expires_for_request(&state) {
                        request.headers.push("Session-Expires", se);
                    }
                    if let Some(dialog) = state.dialog.as_mut() {
                        dialog.uac_pending_reply = true;
                    }
                    state.pending_renegotiation = Some(Method::Update);
                    request
                };
                let _ = self.inner.transport.send_request(request).await;
            }
            RefreshMethod::Invite => {
                // Re-offer the current description rather than renegotiate.
                let sdp = self.connection().local_description();
                let request = {
                    let mut state = self.inner.state.lock();
                    let mut request =
                        match self.in_dialog_request(&mut state, Method::Invite, &[]) {
                            Some(request) => request,
                            None => return,
                        };
                    if let Some(se) = self.session_expires_for_request(&state) {
                        request.headers.push("Session-Expires", se);
                    }
                    if let Some(sdp) = &sdp {
                        set_sdp_body(&mut request, sdp);
                    }
                    if let Some(dialog) = state.dialog.as_mut() {
                        dialog.uac_pending_reply = true;
                    }
                    state.pending_renegotiation = Some(Method::Invite);
                    request
                };
                let _ = self.inner.transport.send_request(request).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Terminal transitions
    // ------------------------------------------------------------------

    fn confirm_once(&self, originator: Originator) {
        let first = {
            let mut state = self.inner.state.lock();
            if state.is_confirmed {
                false
            } else {
                state.is_confirmed = true;
                true
            }
        };
        if first {
            self.inner.metrics.record_confirmed();
            self.inner
                .events
                .emit(SessionEvent::Confirmed { originator });
        }
    }

    /// Sends BYE (with optional Reason) and reports `ended` with the given
    /// cause. Used by user termination, session-timer expiry, and late-SDP
    /// failures after confirmation.
    async fn terminate_established(
        &self,
        status_code: Option<u16>,
        reason_phrase: &str,
        cause: Cause,
    ) {
        let reason = status_code.map(|code| ReasonHeader::sip(code, Some(reason_phrase)));
        self.send_bye(reason, Vec::new()).await;
        self.end(Originator::Local, cause).await;
    }

    async fn send_bye(&self, reason: Option<ReasonHeader>, extra_headers: Vec<Header>) {
        let request = {
            let mut state = self.inner.state.lock();
            let mut request = match self.in_dialog_request(&mut state, Method::Bye, &extra_headers)
            {
                Some(request) => request,
                None => return,
            };
            if let Some(reason) = &reason {
                request.headers.push("Reason", reason.to_string());
            }
            request
        };
        let _ = self.inner.transport.send_request(request).await;
    }

    /// ACKs an unwanted 2xx and immediately BYEs the dialog it created.
    async fn accept_and_terminate(
        &self,
        response: &Response,
        status_code: Option<u16>,
        reason_phrase: Option<&str>,
    ) {
        let invite = self.inner.state.lock().invite.clone();
        let Some(invite) = invite else { return };
        let Ok(mut dialog) = Dialog::uac(&invite, response) else {
            warn!("cannot release forked 2xx without a dialog");
            return;
        };

        let ack = build_ack(&invite, response, Some(&dialog.remote_target), None);
        let _ = self.inner.transport.send_request(ack).await;

        let (local, remote) = {
            let state = self.inner.state.lock();
            (state.local_identity.clone(), state.remote_identity.clone())
        };
        let mut bye = build_for_dialog(
            &mut dialog,
            Method::Bye,
            local.as_ref(),
            remote.as_ref(),
            &self.inner.config,
        );
        if let Some(code) = status_code {
            bye.headers
                .push("Reason", ReasonHeader::sip(code, reason_phrase).to_string());
        }
        let _ = self.inner.transport.send_request(bye).await;
    }

    /// Reports `failed` exactly once, closing dialogs and timers first.
    async fn fail(&self, originator: Originator, cause: Cause, terminal: SessionStatus) {
        let proceed = self.enter_terminal(terminal);
        if !proceed {
            return;
        }
        info!(cause = cause.as_str(), originator = originator.as_str(), "session failed");
        self.inner.metrics.record_failed();
        self.inner
            .events
            .emit(SessionEvent::Failed { originator, cause });
    }

    /// Reports `ended` exactly once, closing dialogs and timers first.
    async fn end(&self, originator: Originator, cause: Cause) {
        let proceed = self.enter_terminal(SessionStatus::Terminated);
        if !proceed {
            return;
        }
        info!(cause = cause.as_str(), originator = originator.as_str(), "session ended");
        self.inner.metrics.record_ended();
        self.inner
            .events
            .emit(SessionEvent::Ended { originator, cause });
    }

    /// Common terminal bookkeeping; true when this call won the latch.
    fn enter_terminal(&self, terminal: SessionStatus) -> bool {
        {
            let mut state = self.inner.state.lock();
            if state.terminal_reported {
                return false;
            }
            state.terminal_reported = true;
            state.status = terminal;
            state.end_time = Some(SystemTime::now());
            state.dialog = None;
            state.early.clear();
            state.last_2xx = None;
            state.dtmf.reset();
            state.session_timers.running = false;
        }
        self.inner.timers.clear();
        self.connection().close();
        true
    }

    // ------------------------------------------------------------------
    // Builders and small helpers
    // ------------------------------------------------------------------

    fn hooks(&self) -> Vec<Arc<dyn SessionHooks>> {
        self.inner.hooks.read().clone()
    }

    fn report_media_error(&self, error: &NegotiationError) {
        warn!(error = %error, "media engine operation failed");
        self.inner
            .events
            .emit(SessionEvent::PeerConnectionError { kind: error.kind });
    }

    fn set_uas_pending(&self, pending: bool) {
        let mut state = self.inner.state.lock();
        if let Some(dialog) = state.dialog.as_mut() {
            dialog.uas_pending_reply = pending;
        }
    }

    fn build_invite(
        &self,
        state: &State,
        target: &SipUri,
        options: &ConnectOptions,
    ) -> Request {
        let config = &self.inner.config;
        let mut headers = Headers::new();
        headers.push(
            "Via",
            format!("SIP/2.0/UDP placeholder;branch={}", generate_branch()),
        );
        let local = state
            .local_identity
            .clone()
            .unwrap_or_else(|| NameAddr::new(None, config.uri.clone()));
        headers.push("From", format!("{};tag={}", local, state.local_tag));
        headers.push("To", format!("<{}>", target));
        headers.push("Call-ID", state.call_id.clone());
        headers.push("CSeq", "1 INVITE");
        headers.push("Contact", format!("<{}>", config.contact));
        headers.push("Allow", ALLOWED_METHODS);
        headers.push("Max-Forwards", "70");
        headers.push("User-Agent", config.user_agent.clone());
        if config.session_timers {
            headers.push("Supported", "timer");
            headers.push(
                "Session-Expires",
                SessionExpires::new(config.session_expires, None).to_string(),
            );
        }
        if options.anonymous {
            headers.push(
                "P-Preferred-Identity",
                format!("<{}>", config.uri),
            );
            headers.push("Privacy", "id");
        }
        for header in &options.extra_headers {
            headers.push(header.name.clone(), header.value.clone());
        }
        headers.push("Content-Length", "0");
        Request::new(
            RequestLine::new(Method::Invite, target.clone()),
            headers,
            Bytes::new(),
        )
    }

    /// Builds a request routed through the session's confirmed dialog,
    /// advancing the local CSeq.
    fn in_dialog_request(
        &self,
        state: &mut State,
        method: Method,
        extra_headers: &[Header],
    ) -> Option<Request> {
        let local = state.local_identity.clone();
        let remote = state.remote_identity.clone();
        let dialog = state.dialog.as_mut()?;
        let mut request = build_for_dialog(
            dialog,
            method,
            local.as_ref(),
            remote.as_ref(),
            &self.inner.config,
        );
        for header in extra_headers {
            request
                .headers
                .push(header.name.clone(), header.value.clone());
        }
        Some(request)
    }

    /// Builds a response echoing the request's transaction headers, adding
    /// our To-tag to dialog-forming replies.
    fn response_for(&self, request: &Request, code: u16, reason: Option<&str>) -> Response {
        let local_tag = self.inner.state.lock().local_tag.clone();
        let mut headers = Headers::new();
        for via in request.headers.get_all("Via") {
            headers.push("Via", via.clone());
        }
        for record_route in request.headers.get_all("Record-Route") {
            headers.push("Record-Route", record_route.clone());
        }
        if let Some(from) = request.headers.get("From") {
            headers.push("From", from.clone());
        }
        if let Some(to) = request.headers.get("To") {
            if code != 100 && sip_core::extract_tag(to).is_none() {
                headers.push("To", format!("{};tag={}", to, local_tag));
            } else {
                headers.push("To", to.clone());
            }
        }
        if let Some(call_id) = request.headers.get("Call-ID") {
            headers.push("Call-ID", call_id.clone());
        }
        if let Some(cseq) = request.headers.get("CSeq") {
            headers.push("CSeq", cseq.clone());
        }
        headers.push("Content-Length", "0");
        Response::new(
            StatusLine::new(code, reason.unwrap_or_else(|| reason_phrase(code))),
            headers,
            Bytes::new(),
        )
    }

    async fn reply(
        &self,
        request: &Request,
        code: u16,
        extra_headers: Vec<Header>,
        reason: Option<&str>,
    ) {
        let mut response = self.response_for(request, code, reason);
        for header in extra_headers {
            response.headers.push(header.name, header.value);
        }
        let _ = self.inner.transport.send_response(response).await;
    }

    async fn reply_reject(&self, request: &Request, reject: Reject) {
        let mut response =
            self.response_for(request, reject.status_code, Some(&reject.reason_phrase));
        for header in reject.extra_headers {
            response.headers.push(header.name, header.value);
        }
        let _ = self.inner.transport.send_response(response).await;
    }
}

const ALLOWED_METHODS: &str = "INVITE, ACK, BYE, CANCEL, INFO, UPDATE, OPTIONS";

fn reason_from(options: &TerminateOptions) -> Option<ReasonHeader> {
    options.status_code.map(|code| {
        ReasonHeader::sip(
            code,
            options
                .reason_phrase
                .as_deref()
                .or_else(|| Some(reason_phrase(code))),
        )
    })
}

fn parse_reason(value: &str) -> Option<ReasonHeader> {
    let mut parts = value.split(';');
    let protocol = parts.next()?.trim();
    let mut cause = None;
    let mut text = None;
    for part in parts {
        let (name, v) = match part.trim().split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        if name.trim().eq_ignore_ascii_case("cause") {
            cause = v.trim().parse::<u16>().ok();
        } else if name.trim().eq_ignore_ascii_case("text") {
            text = Some(v.trim().trim_matches('"').to_owned());
        }
    }
    if !protocol.eq_ignore_ascii_case("SIP") {
        return None;
    }
    Some(ReasonHeader::sip(cause?, text.as_deref()))
}

fn is_sdp(request: &Request) -> bool {
    request
        .content_type()
        .map(|ct| ct.eq_ignore_ascii_case("application/sdp"))
        .unwrap_or(false)
}

fn set_body(request: &mut Request, content_type: &str, body: &[u8]) {
    request.headers.set("Content-Type", content_type);
    request.headers.set("Content-Length", body.len().to_string());
    request.body = Bytes::copy_from_slice(body);
}

fn set_sdp_body(request: &mut Request, sdp: &str) {
    set_body(request, "application/sdp", sdp.as_bytes());
}

fn set_sdp_body_response(response: &mut Response, sdp: &str) {
    response.headers.set("Content-Type", "application/sdp");
    response
        .headers
        .set("Content-Length", sdp.len().to_string());
    response.body = Bytes::copy_from_slice(sdp.as_bytes());
}

/// ACK for a 2xx: new branch, CSeq number of the INVITE, To from the
/// response (RFC 3261 §13.2.2.4).
fn build_ack(
    invite: &Request,
    response: &Response,
    remote_target: Option<&SipUri>,
    sdp: Option<&str>,
) -> Request {
    let mut headers = Headers::new();
    headers.push(
        "Via",
        format!("SIP/2.0/UDP placeholder;branch={}", generate_branch()),
    );
    if let Some(from) = invite.headers.get("From") {
        headers.push("From", from.clone());
    }
    if let Some(to) = response.headers.get("To") {
        headers.push("To", to.clone());
    }
    if let Some(call_id) = invite.headers.get("Call-ID") {
        headers.push("Call-ID", call_id.clone());
    }
    if let Some((number, _)) = invite.cseq() {
        headers.push("CSeq", format!("{} ACK", number));
    }
    headers.push("Max-Forwards", "70");
    let uri = remote_target
        .cloned()
        .unwrap_or_else(|| invite.start.uri.clone());
    let mut request = Request::new(RequestLine::new(Method::Ack, uri), headers, Bytes::new());
    match sdp {
        Some(sdp) => set_sdp_body(&mut request, sdp),
        None => request.headers.push("Content-Length", "0"),
    }
    request
}

/// ACK for a re-INVITE 2xx, reusing the response's CSeq number.
fn build_reinvite_ack(response: &Response, remote_target: &SipUri) -> Request {
    let mut headers = Headers::new();
    headers.push(
        "Via",
        format!("SIP/2.0/UDP placeholder;branch={}", generate_branch()),
    );
    if let Some(from) = response.headers.get("From") {
        headers.push("From", from.clone());
    }
    if let Some(to) = response.headers.get("To") {
        headers.push("To", to.clone());
    }
    if let Some(call_id) = response.headers.get("Call-ID") {
        headers.push("Call-ID", call_id.clone());
    }
    if let Some((number, _)) = response.cseq() {
        headers.push("CSeq", format!("{} ACK", number));
    }
    headers.push("Max-Forwards", "70");
    headers.push("Content-Length", "0");
    Request::new(
        RequestLine::new(Method::Ack, remote_target.clone()),
        headers,
        Bytes::new(),
    )
}

/// CANCEL for a pending INVITE: same Via branch, URI, From/To, and CSeq
/// number (RFC 3261 §9.1).
fn build_cancel(invite: &Request, reason: Option<&ReasonHeader>) -> Request {
    let mut headers = Headers::new();
    for name in ["Via", "From", "To", "Call-ID"] {
        if let Some(value) = invite.headers.get(name) {
            headers.push(name, value.clone());
        }
    }
    if let Some((number, _)) = invite.cseq() {
        headers.push("CSeq", format!("{} CANCEL", number));
    }
    headers.push("Max-Forwards", "70");
    if let Some(reason) = reason {
        headers.push("Reason", reason.to_string());
    }
    headers.push("Content-Length", "0");
    Request::new(
        RequestLine::new(Method::Cancel, invite.start.uri.clone()),
        headers,
        Bytes::new(),
    )
}

/// In-dialog request skeleton: dialog route set, tags, next CSeq.
fn build_for_dialog(
    dialog: &mut Dialog,
    method: Method,
    local: Option<&NameAddr>,
    remote: Option<&NameAddr>,
    config: &SessionConfig,
) -> Request {
    let mut headers = Headers::new();
    headers.push(
        "Via",
        format!("SIP/2.0/UDP placeholder;branch={}", generate_branch()),
    );
    let from_body = match local {
        Some(addr) => addr.to_string(),
        None => format!("<{}>", config.uri),
    };
    headers.push("From", format!("{};tag={}", from_body, dialog.id.local_tag));
    let to_body = match remote {
        Some(addr) => format!("<{}>", addr.uri),
        None => format!("<{}>", dialog.remote_target),
    };
    headers.push("To", format!("{};tag={}", to_body, dialog.id.remote_tag));
    headers.push("Call-ID", dialog.id.call_id.clone());
    let cseq = dialog.next_local_cseq();
    headers.push("CSeq", format!("{} {}", cseq, method.as_str()));
    for route in &dialog.route_set {
        headers.push("Route", route.clone());
    }
    if matches!(method, Method::Invite | Method::Update) {
        headers.push("Contact", format!("<{}>", config.contact));
        headers.push("Allow", ALLOWED_METHODS);
    }
    headers.push("Max-Forwards", "70");
    headers.push("User-Agent", config.user_agent.clone());
    headers.push("Content-Length", "0");
    Request::new(
        RequestLine::new(method, dialog.remote_target.clone()),
        headers,
        Bytes::new(),
    )
}

fn generate_tag() -> SmolStr {
    let tag: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    SmolStr::new(tag)
}

fn generate_branch() -> String {
    let random: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("z9hG4bK{}", random)
}

fn generate_call_id(host: &str) -> SmolStr {
    let random: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    SmolStr::new(format!("{}@{}", random, host))
}
