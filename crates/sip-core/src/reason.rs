// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

use smol_str::SmolStr;

/// Reason header value (RFC 3326), as attached to CANCEL and BYE requests.
///
/// The session engine only ever generates the SIP protocol form:
/// `SIP ;cause=488 ;text="Not Acceptable Here"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonHeader {
    pub protocol: SmolStr,
    pub cause: u16,
    pub text: Option<SmolStr>,
}

impl ReasonHeader {
    /// Builds a `SIP` protocol Reason with the given cause code and text.
    pub fn sip(cause: u16, text: Option<&str>) -> Self {
        Self {
            protocol: SmolStr::new("SIP"),
            cause,
            text: text.map(SmolStr::new),
        }
    }
}

impl fmt::Display for ReasonHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ;cause={}", self.protocol, self.cause)?;
        if let Some(text) = &self.text {
            write!(f, " ;text=\"{}\"", text)?;
        }
        Ok(())
    }
}
