// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Test harness for the session engine.
//!
//! Provides builders for the requests and responses a session exchanges
//! with its peer, a [`FakeMediaEngine`] scripted with canned SDP, and a
//! [`RecordingTransport`] capturing everything the session sends.
//!
//! # Example
//! ```
//! use sip_testkit::build_invite;
//! let invite = build_invite("sip:bob@example.com", "call-1@example.com", "tag1", None);
//! assert_eq!(invite.method().as_str(), "INVITE");
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use smol_str::SmolStr;
use tokio::sync::broadcast;

use sip_core::{
    reason_phrase, Headers, Method, Request, RequestLine, Response, SipUri, StatusLine,
};
use sip_session::{
    IceEvent, IceGatheringState, MediaEngine, SdpType, SignalingState, SignalingTransport,
};

/// Canned SDP offer used across scenario tests.
pub const OFFER_SDP: &str = "v=0\r\no=alice 2890844526 2890844526 IN IP4 client.example.com\r\ns=-\r\nc=IN IP4 192.0.2.101\r\nt=0 0\r\nm=audio 49172 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";

/// Canned SDP answer used across scenario tests.
pub const ANSWER_SDP: &str = "v=0\r\no=bob 2808844564 2808844564 IN IP4 server.example.com\r\ns=-\r\nc=IN IP4 192.0.2.201\r\nt=0 0\r\nm=audio 3456 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";

/// Constructs an initial INVITE from alice toward the given URI.
pub fn build_invite(uri: &str, call_id: &str, from_tag: &str, sdp: Option<&str>) -> Request {
    let mut headers = Headers::new();
    headers.push(
        "Via",
        "SIP/2.0/UDP client.example.com:5060;branch=z9hG4bKtest",
    );
    headers.push(
        "From",
        format!("<sip:alice@example.com>;tag={}", from_tag),
    );
    headers.push("To", format!("<{}>", uri));
    headers.push("Call-ID", call_id);
    headers.push("CSeq", "1 INVITE");
    headers.push("Max-Forwards", "70");
    headers.push("Contact", "<sip:alice@client.example.com:5060>");

    let body = match sdp {
        Some(sdp) => {
            headers.push("Content-Type", "application/sdp");
            headers.push("Content-Length", sdp.len().to_string());
            Bytes::copy_from_slice(sdp.as_bytes())
        }
        None => {
            headers.push("Content-Length", "0");
            Bytes::new()
        }
    };

    Request::new(
        RequestLine::new(Method::Invite, SipUri::parse(uri).unwrap()),
        headers,
        body,
    )
}

/// Builds a response to the given request, echoing its transaction headers
/// and tagging To when a tag is supplied.
pub fn respond_to(
    request: &Request,
    code: u16,
    to_tag: Option<&str>,
    sdp: Option<&str>,
) -> Response {
    let mut headers = Headers::new();
    for via in request.headers.get_all("Via") {
        headers.push("Via", via.clone());
    }
    if let Some(from) = request.headers.get("From") {
        headers.push("From", from.clone());
    }
    let to = request
        .headers
        .get("To")
        .map(|v| v.to_string())
        .unwrap_or_else(|| "<sip:bob@example.com>".to_owned());
    match to_tag {
        Some(tag) => headers.push("To", format!("{};tag={}", to, tag)),
        None => headers.push("To", to),
    }
    if let Some(call_id) = request.headers.get("Call-ID") {
        headers.push("Call-ID", call_id.clone());
    }
    if let Some(cseq) = request.headers.get("CSeq") {
        headers.push("CSeq", cseq.clone());
    }
    if code != 100 {
        headers.push("Contact", "<sip:bob@server.example.com:5060>");
    }

    let body = match sdp {
        Some(sdp) => {
            headers.push("Content-Type", "application/sdp");
            headers.push("Content-Length", sdp.len().to_string());
            Bytes::copy_from_slice(sdp.as_bytes())
        }
        None => {
            headers.push("Content-Length", "0");
            Bytes::new()
        }
    };

    Response::new(
        StatusLine::new(code, reason_phrase(code)),
        headers,
        body,
    )
}

/// An in-dialog request from the remote side toward the session under test.
///
/// The session's own tag goes into To (the remote party addresses us), its
/// peer tag into From.
pub fn build_in_dialog_request(
    method: Method,
    call_id: &str,
    remote_tag: &str,
    local_tag: &str,
    cseq: u32,
    content_type: Option<&str>,
    body: &str,
) -> Request {
    let mut headers = Headers::new();
    headers.push(
        "Via",
        "SIP/2.0/UDP server.example.com:5060;branch=z9hG4bKindlg",
    );
    headers.push(
        "From",
        format!("<sip:bob@example.com>;tag={}", remote_tag),
    );
    headers.push(
        "To",
        format!("<sip:alice@example.com>;tag={}", local_tag),
    );
    headers.push("Call-ID", call_id);
    headers.push("CSeq", format!("{} {}", cseq, method.as_str()));
    headers.push("Max-Forwards", "70");
    headers.push("Contact", "<sip:bob@server.example.com:5060>");

    let bytes = if body.is_empty() {
        headers.push("Content-Length", "0");
        Bytes::new()
    } else {
        if let Some(ct) = content_type {
            headers.push("Content-Type", ct);
        }
        headers.push("Content-Length", body.len().to_string());
        Bytes::copy_from_slice(body.as_bytes())
    };

    Request::new(
        RequestLine::new(method, SipUri::parse("sip:alice@client.example.com").unwrap()),
        headers,
        bytes,
    )
}

/// ACK for a 2xx the session under test produced (UAS scenarios).
pub fn build_ack(call_id: &str, remote_tag: &str, local_tag: &str, sdp: Option<&str>) -> Request {
    build_in_dialog_request(
        Method::Ack,
        call_id,
        remote_tag,
        local_tag,
        1,
        sdp.map(|_| "application/sdp"),
        sdp.unwrap_or(""),
    )
}

/// Media engine scripted with canned SDP and controllable failures.
pub struct FakeMediaEngine {
    offer: Mutex<String>,
    answer: Mutex<String>,
    signaling: Mutex<SignalingState>,
    gathering: Mutex<IceGatheringState>,
    local: Mutex<Option<String>>,
    ice_tx: broadcast::Sender<IceEvent>,
    fail_create: AtomicBool,
    fail_set_local: AtomicBool,
    fail_set_remote: AtomicBool,
    closed: AtomicBool,
    /// Operation log, in call order.
    ops: Mutex<Vec<String>>,
}

impl Default for FakeMediaEngine {
    fn default() -> Self {
        let (ice_tx, _) = broadcast::channel(16);
        Self {
            offer: Mutex::new(OFFER_SDP.to_owned()),
            answer: Mutex::new(ANSWER_SDP.to_owned()),
            signaling: Mutex::new(SignalingState::Stable),
            gathering: Mutex::new(IceGatheringState::Complete),
            local: Mutex::new(None),
            ice_tx,
            fail_create: AtomicBool::new(false),
            fail_set_local: AtomicBool::new(false),
            fail_set_remote: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            ops: Mutex::new(Vec::new()),
        }
    }
}

impl FakeMediaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that trickles candidates: gathering starts incomplete and
    /// tests drive it with [`FakeMediaEngine::emit_candidate`] and
    /// [`FakeMediaEngine::finish_gathering`].
    pub fn trickling() -> Self {
        let engine = Self::new();
        *engine.gathering.lock() = IceGatheringState::Gathering;
        engine
    }

    pub fn set_offer(&self, sdp: &str) {
        *self.offer.lock() = sdp.to_owned();
    }

    pub fn fail_create_descriptions(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_set_local_description(&self) {
        self.fail_set_local.store(true, Ordering::SeqCst);
    }

    pub fn fail_set_remote_description(&self) {
        self.fail_set_remote.store(true, Ordering::SeqCst);
    }

    pub fn set_signaling(&self, state: SignalingState) {
        *self.signaling.lock() = state;
    }

    pub fn emit_candidate(&self, candidate: &str) {
        let _ = self
            .ice_tx
            .send(IceEvent::Candidate(SmolStr::new(candidate)));
    }

    pub fn finish_gathering(&self) {
        *self.gathering.lock() = IceGatheringState::Complete;
        let _ = self
            .ice_tx
            .send(IceEvent::GatheringStateChange(IceGatheringState::Complete));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn operations(&self) -> Vec<String> {
        self.ops.lock().clone()
    }
}

#[async_trait]
impl MediaEngine for FakeMediaEngine {
    async fn create_offer(&self, _constraints: Option<&str>) -> Result<String> {
        self.ops.lock().push("create_offer".to_owned());
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("scripted create_offer failure");
        }
        Ok(self.offer.lock().clone())
    }

    async fn create_answer(&self, _constraints: Option<&str>) -> Result<String> {
        self.ops.lock().push("create_answer".to_owned());
        if self.fail_create.load(Ordering::SeqCst) {
            bail!("scripted create_answer failure");
        }
        Ok(self.answer.lock().clone())
    }

    async fn set_local_description(&self, kind: SdpType, sdp: &str) -> Result<()> {
        self.ops
            .lock()
            .push(format!("set_local_{}", kind.as_str()));
        if self.fail_set_local.load(Ordering::SeqCst) {
            bail!("scripted set_local_description failure");
        }
        *self.local.lock() = Some(sdp.to_owned());
        *self.signaling.lock() = match kind {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            SdpType::Answer => SignalingState::Stable,
        };
        Ok(())
    }

    async fn set_remote_description(&self, kind: SdpType, _sdp: &str) -> Result<()> {
        self.ops
            .lock()
            .push(format!("set_remote_{}", kind.as_str()));
        if self.fail_set_remote.load(Ordering::SeqCst) {
            bail!("scripted set_remote_description failure");
        }
        *self.signaling.lock() = match kind {
            SdpType::Offer => SignalingState::HaveRemoteOffer,
            SdpType::Answer => SignalingState::Stable,
        };
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        *self.signaling.lock()
    }

    fn ice_gathering_state(&self) -> IceGatheringState {
        *self.gathering.lock()
    }

    fn local_description(&self) -> Option<String> {
        self.local.lock().clone()
    }

    fn ice_events(&self) -> broadcast::Receiver<IceEvent> {
        self.ice_tx.subscribe()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport double recording everything a session sends.
#[derive(Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<Request>>,
    responses: Mutex<Vec<Response>>,
    fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent send return an error.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn sent_requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn sent_responses(&self) -> Vec<Response> {
        self.responses.lock().clone()
    }

    /// Method tokens of sent requests, in order.
    pub fn request_methods(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.method().as_str().to_owned())
            .collect()
    }

    /// Status codes of sent responses, in order.
    pub fn response_codes(&self) -> Vec<u16> {
        self.responses.lock().iter().map(|r| r.code()).collect()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.requests.lock().last().cloned()
    }

    pub fn last_response(&self) -> Option<Response> {
        self.responses.lock().last().cloned()
    }
}

#[async_trait]
impl SignalingTransport for RecordingTransport {
    async fn send_request(&self, request: Request) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("scripted transport failure");
        }
        self.requests.lock().push(request);
        Ok(())
    }

    async fn send_response(&self, response: Response) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            bail!("scripted transport failure");
        }
        self.responses.lock().push(response);
        Ok(())
    }
}
