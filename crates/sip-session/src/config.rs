// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-UA configuration consumed by sessions.

use std::time::Duration;

use smol_str::SmolStr;

use sip_core::SipUri;

/// RFC 4028 minimum session expiration the engine will accept (90 seconds).
pub const MIN_SESSION_EXPIRES: u32 = 90;

/// RFC 4028 recommended default session expiration (1800 seconds).
pub const DEFAULT_SESSION_EXPIRES: u32 = 1800;

/// Method used for RFC 4028 session refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMethod {
    Invite,
    Update,
}

/// RFC 3261 §17 base timer values plus the derived Timer H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSettings {
    /// RTT estimate, initial 2xx retransmission interval - default 500ms
    pub t1: Duration,
    /// Retransmission interval cap - default 4s
    pub t2: Duration,
    /// ACK wait timeout - default 64*T1
    pub timer_h: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        let t1 = Duration::from_millis(500);
        Self {
            t1,
            t2: Duration::from_secs(4),
            timer_h: t1.saturating_mul(64),
        }
    }
}

/// DTMF tone timing bounds (RFC 2833 events carried via INFO).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DtmfSettings {
    pub default_duration_ms: u32,
    pub min_duration_ms: u32,
    pub max_duration_ms: u32,
    pub default_inter_tone_gap_ms: u32,
    pub min_inter_tone_gap_ms: u32,
}

impl Default for DtmfSettings {
    fn default() -> Self {
        Self {
            default_duration_ms: 100,
            min_duration_ms: 70,
            max_duration_ms: 6000,
            default_inter_tone_gap_ms: 500,
            min_inter_tone_gap_ms: 50,
        }
    }
}

/// UA-level settings a session reads at construction time.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Local address-of-record, used in From/To identities.
    pub uri: SipUri,
    /// Contact URI placed in dialog-forming requests and responses.
    pub contact: SipUri,
    /// Optional display name for the local identity.
    pub display_name: Option<SmolStr>,
    /// User-Agent header value.
    pub user_agent: SmolStr,
    /// Whether RFC 4028 session timers are negotiated at all.
    pub session_timers: bool,
    /// Refresh method used when this side is the refresher.
    pub session_timers_refresh_method: RefreshMethod,
    /// Session-Expires value offered and used as fallback.
    pub session_expires: u32,
    /// Smallest Session-Expires this UA adopts from a peer.
    pub min_session_expires: u32,
    pub timers: TimerSettings,
    pub dtmf: DtmfSettings,
    /// How long an incoming session may ring unanswered.
    pub no_answer_timeout: Duration,
}

impl SessionConfig {
    pub fn new(uri: SipUri, contact: SipUri) -> Self {
        Self {
            uri,
            contact,
            display_name: None,
            user_agent: SmolStr::new("siphon-rs/0.1.0"),
            session_timers: true,
            session_timers_refresh_method: RefreshMethod::Update,
            session_expires: DEFAULT_SESSION_EXPIRES,
            min_session_expires: MIN_SESSION_EXPIRES,
            timers: TimerSettings::default(),
            dtmf: DtmfSettings::default(),
            no_answer_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_display_name(mut self, name: &str) -> Self {
        self.display_name = Some(SmolStr::new(name));
        self
    }
}
