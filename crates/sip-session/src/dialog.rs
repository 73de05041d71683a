// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dialog state and the per-session early-dialog registry (RFC 3261 §12).

use std::collections::HashMap;

use smol_str::SmolStr;

use sip_core::{contact_uri, Method, Request, Response, SipUri};

/// Unique dialog identifier: Call-ID plus local and remote tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: SmolStr,
    pub local_tag: SmolStr,
    pub remote_tag: SmolStr,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<SmolStr>,
        local_tag: impl Into<SmolStr>,
        remote_tag: impl Into<SmolStr>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }
}

/// Dialog state per RFC 3261 §12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    /// Established by a provisional response carrying a to-tag.
    Early,
    /// Established by a 2xx response.
    Confirmed,
}

/// Dialog-level errors surfaced to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogError {
    /// A header required to build or match the dialog is missing.
    MissingHeader(&'static str),
    /// In-dialog CSeq did not advance (or ACK CSeq mismatched).
    InvalidCSeq,
}

impl std::fmt::Display for DialogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogError::MissingHeader(name) => write!(f, "missing {} header", name),
            DialogError::InvalidCSeq => write!(f, "invalid CSeq number"),
        }
    }
}

impl std::error::Error for DialogError {}

/// One SIP dialog: route information plus the CSeq spaces and the pending
/// transaction flags that gate renegotiation.
#[derive(Debug, Clone)]
pub struct Dialog {
    pub id: DialogId,
    pub state: DialogState,
    /// Request-URI for in-dialog requests (peer's Contact).
    pub remote_target: SipUri,
    /// Raw Route values, already ordered for outgoing requests.
    pub route_set: Vec<SmolStr>,
    pub local_cseq: u32,
    pub remote_cseq: u32,
    /// An in-dialog request we sent still awaits its final response.
    pub uac_pending_reply: bool,
    /// An in-dialog request we received still awaits our final response.
    pub uas_pending_reply: bool,
}

impl Dialog {
    /// Builds a dialog from the UAC perspective out of the INVITE we sent
    /// and a dialog-forming response (RFC 3261 §12.1.2).
    pub fn uac(request: &Request, response: &Response) -> Result<Self, DialogError> {
        let call_id = response
            .call_id()
            .or_else(|| request.call_id())
            .ok_or(DialogError::MissingHeader("Call-ID"))?
            .clone();
        let local_tag = response
            .from_tag()
            .ok_or(DialogError::MissingHeader("From tag"))?;
        let remote_tag = response
            .to_tag()
            .ok_or(DialogError::MissingHeader("To tag"))?;

        let state = if response.is_success() {
            DialogState::Confirmed
        } else {
            DialogState::Early
        };

        // Remote target from the response Contact; fall back to the To URI
        // for peers that omit it on provisionals.
        let remote_target = contact_uri(&response.headers)
            .or_else(|| response.to_addr().map(|addr| addr.uri))
            .ok_or(DialogError::MissingHeader("Contact"))?;

        // Route set from Record-Route, reversed for the UAC (RFC 3261 §12.1.2).
        let mut route_set: Vec<SmolStr> = response
            .headers
            .get_all("Record-Route")
            .cloned()
            .collect();
        route_set.reverse();

        let local_cseq = request.cseq().map(|(n, _)| n).unwrap_or(1);

        Ok(Self {
            id: DialogId::new(call_id, local_tag, remote_tag),
            state,
            remote_target,
            route_set,
            local_cseq,
            remote_cseq: 0,
            uac_pending_reply: false,
            uas_pending_reply: false,
        })
    }

    /// Builds a dialog from the UAS perspective out of a received INVITE and
    /// the local tag our response carries (RFC 3261 §12.1.1).
    pub fn uas(
        request: &Request,
        local_tag: &SmolStr,
        state: DialogState,
    ) -> Result<Self, DialogError> {
        let call_id = request
            .call_id()
            .ok_or(DialogError::MissingHeader("Call-ID"))?
            .clone();
        let remote_tag = request
            .from_tag()
            .ok_or(DialogError::MissingHeader("From tag"))?;

        let remote_target = contact_uri(&request.headers)
            .or_else(|| request.from_addr().map(|addr| addr.uri))
            .ok_or(DialogError::MissingHeader("Contact"))?;

        // UAS route set keeps the Record-Route order as received.
        let route_set: Vec<SmolStr> = request
            .headers
            .get_all("Record-Route")
            .cloned()
            .collect();

        let remote_cseq = request.cseq().map(|(n, _)| n).unwrap_or(0);

        Ok(Self {
            id: DialogId::new(call_id, local_tag.clone(), remote_tag),
            state,
            remote_target,
            route_set,
            local_cseq: 0,
            remote_cseq,
            uac_pending_reply: false,
            uas_pending_reply: false,
        })
    }

    pub fn confirm(&mut self) {
        self.state = DialogState::Confirmed;
    }

    /// Allocates the next CSeq for a request we send within this dialog.
    pub fn next_local_cseq(&mut self) -> u32 {
        self.local_cseq += 1;
        self.local_cseq
    }

    /// Validates and absorbs a received in-dialog request.
    ///
    /// Non-ACK requests must advance the remote CSeq strictly; an ACK reuses
    /// the CSeq of the INVITE it acknowledges. A Contact header refreshes
    /// the remote target.
    pub fn update_from_request(&mut self, request: &Request) -> Result<(), DialogError> {
        let (cseq, method) = request
            .cseq()
            .ok_or(DialogError::MissingHeader("CSeq"))?;
        if cseq == 0 {
            return Err(DialogError::InvalidCSeq);
        }

        if method == Method::Ack {
            if self.remote_cseq != 0 && cseq != self.remote_cseq {
                return Err(DialogError::InvalidCSeq);
            }
        } else {
            if cseq <= self.remote_cseq {
                return Err(DialogError::InvalidCSeq);
            }
            self.remote_cseq = cseq;
        }

        if let Some(contact) = contact_uri(&request.headers) {
            self.remote_target = contact;
        }
        Ok(())
    }

    /// Absorbs a response to a request we sent: target refresh and, for a
    /// 2xx, promotion to confirmed.
    pub fn update_from_response(&mut self, response: &Response) {
        if let Some(contact) = contact_uri(&response.headers) {
            self.remote_target = contact;
        }
        if response.is_success() {
            self.confirm();
        }
    }

    /// Whether a response (UAC view: From is local, To is remote) addresses
    /// this dialog.
    pub fn matches_response(&self, response: &Response) -> bool {
        response.call_id().map(|c| *c == self.id.call_id) == Some(true)
            && response.from_tag().as_ref() == Some(&self.id.local_tag)
            && response.to_tag().as_ref() == Some(&self.id.remote_tag)
    }
}

/// Early dialogs a session accumulated from provisional responses, keyed by
/// the composite dialog id.
#[derive(Debug, Default)]
pub struct EarlyDialogs {
    map: HashMap<DialogId, Dialog>,
}

impl EarlyDialogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an early dialog. Re-inserting an existing id is a no-op, so
    /// retransmitted provisionals are harmless.
    pub fn insert(&mut self, dialog: Dialog) {
        self.map.entry(dialog.id.clone()).or_insert(dialog);
    }

    /// Removes the dialog with the given id and confirms it, handing it to
    /// the caller to install as the session's confirmed dialog.
    pub fn promote(&mut self, id: &DialogId) -> Option<Dialog> {
        let mut dialog = self.map.remove(id)?;
        dialog.confirm();
        Some(dialog)
    }

    /// True when any early dialog was established by the given remote tag.
    pub fn contains_remote_tag(&self, tag: &SmolStr) -> bool {
        self.map.keys().any(|id| id.remote_tag == *tag)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
