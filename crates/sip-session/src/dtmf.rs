// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! DTMF tone queue and the `application/dtmf-relay` body format.
//!
//! Tones are sent one INFO request at a time; additional `send_dtmf` calls
//! while a run is in progress append to the queue, so the INFO sequence for
//! `send_dtmf("1"); send_dtmf("2")` equals the one for `send_dtmf("12")`.
//! A `,` inserts a fixed 2 second pause between tones.

use std::collections::VecDeque;
use std::time::Duration;

use sip_core::Header;

use crate::config::DtmfSettings;

/// Pause inserted for a `,` in a tone string.
pub const COMMA_PAUSE: Duration = Duration::from_millis(2000);

/// Options accepted by `Session::send_dtmf`.
#[derive(Debug, Clone, Default)]
pub struct DtmfOptions {
    pub duration_ms: Option<u32>,
    pub inter_tone_gap_ms: Option<u32>,
    pub extra_headers: Vec<Header>,
}

/// Pending tone state kept inside the session.
#[derive(Debug, Default)]
pub(crate) struct DtmfQueue {
    pub queue: VecDeque<char>,
    pub sending: bool,
    pub duration_ms: u32,
    pub gap_ms: u32,
}

impl DtmfQueue {
    pub fn reset(&mut self) {
        self.queue.clear();
        self.sending = false;
    }
}

/// Validates a tone string: `0-9`, `A-D`, `R`, `#`, `*`, and `,`
/// (case-insensitive), at least one tone.
pub fn is_valid_tones(tones: &str) -> bool {
    !tones.is_empty()
        && tones.chars().all(|c| {
            matches!(
                c.to_ascii_uppercase(),
                '0'..='9' | 'A'..='D' | 'R' | '#' | '*' | ','
            )
        })
}

/// Clamps a requested tone duration into the configured bounds.
pub fn clamp_duration(requested: Option<u32>, settings: &DtmfSettings) -> u32 {
    match requested {
        Some(value) => value.clamp(settings.min_duration_ms, settings.max_duration_ms),
        None => settings.default_duration_ms,
    }
}

/// Clamps a requested inter-tone gap to at least the configured minimum.
pub fn clamp_gap(requested: Option<u32>, settings: &DtmfSettings) -> u32 {
    match requested {
        Some(value) => value.max(settings.min_inter_tone_gap_ms),
        None => settings.default_inter_tone_gap_ms,
    }
}

/// Renders the INFO body for one tone.
pub fn dtmf_body(tone: char, duration_ms: u32) -> String {
    format!(
        "Signal={}\r\nDuration={}\r\n",
        tone.to_ascii_uppercase(),
        duration_ms
    )
}

/// Parses an `application/dtmf-relay` body into (tone, duration).
///
/// A missing Duration line falls back to the given default; an unparseable
/// Signal yields `None`.
pub fn parse_dtmf_body(body: &str, default_duration_ms: u32) -> Option<(char, u32)> {
    let mut tone = None;
    let mut duration = default_duration_ms;
    for line in body.lines() {
        let (name, value) = match line.split_once('=') {
            Some(pair) => pair,
            None => continue,
        };
        let value = value.trim();
        if name.trim().eq_ignore_ascii_case("signal") {
            let mut chars = value.chars();
            let first = chars.next()?;
            if chars.next().is_some() {
                return None;
            }
            let first = first.to_ascii_uppercase();
            if !matches!(first, '0'..='9' | 'A'..='D' | 'R' | '#' | '*') {
                return None;
            }
            tone = Some(first);
        } else if name.trim().eq_ignore_ascii_case("duration") {
            if let Ok(parsed) = value.parse::<u32>() {
                duration = parsed;
            }
        }
    }
    tone.map(|t| (t, duration))
}
