// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-dialog INFO content-type dispatch (RFC 6086).

/// Content type carrying DTMF events.
pub const DTMF_CONTENT_TYPE: &str = "application/dtmf-relay";

/// Routing decision for a received INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoDisposition {
    /// `application/dtmf-relay` (any parameters): feed the DTMF ingester.
    Dtmf,
    /// Any other declared content type: surface as a generic `newInfo`.
    Generic,
    /// No Content-Type at all: reply 415.
    Unsupported,
}

/// Classifies an INFO request by its Content-Type header value.
pub fn classify_info(content_type: Option<&str>) -> InfoDisposition {
    match content_type {
        Some(ct) => {
            let base = ct.split(';').next().unwrap_or(ct).trim();
            if base.eq_ignore_ascii_case(DTMF_CONTENT_TYPE) {
                InfoDisposition::Dtmf
            } else {
                InfoDisposition::Generic
            }
        }
        None => InfoDisposition::Unsupported,
    }
}
