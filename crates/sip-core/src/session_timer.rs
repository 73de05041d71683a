// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fmt;

/// Which side of the dialog is responsible for session refreshes (RFC 4028 §4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefresherRole {
    Uac,
    Uas,
}

impl RefresherRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefresherRole::Uac => "uac",
            RefresherRole::Uas => "uas",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("uac") {
            Some(RefresherRole::Uac)
        } else if token.eq_ignore_ascii_case("uas") {
            Some(RefresherRole::Uas)
        } else {
            None
        }
    }
}

/// `Session-Expires` header value (RFC 4028 §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpires {
    pub delta_seconds: u32,
    pub refresher: Option<RefresherRole>,
}

impl SessionExpires {
    pub fn new(delta_seconds: u32, refresher: Option<RefresherRole>) -> Self {
        Self {
            delta_seconds,
            refresher,
        }
    }

    /// Parses a `Session-Expires` header value such as `1800;refresher=uac`.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.split(';');
        let delta_seconds = parts.next()?.trim().parse::<u32>().ok()?;
        let mut refresher = None;
        for param in parts {
            let (name, token) = match param.trim().split_once('=') {
                Some((name, token)) => (name.trim(), token.trim()),
                None => continue,
            };
            if name.eq_ignore_ascii_case("refresher") {
                refresher = RefresherRole::from_token(token);
            }
        }
        Some(Self {
            delta_seconds,
            refresher,
        })
    }
}

impl fmt::Display for SessionExpires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.delta_seconds)?;
        if let Some(refresher) = self.refresher {
            write!(f, ";refresher={}", refresher.as_str())?;
        }
        Ok(())
    }
}

/// `Min-SE` header value (RFC 4028 §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinSessionExpires {
    pub delta_seconds: u32,
}

impl MinSessionExpires {
    pub fn parse(value: &str) -> Option<Self> {
        let delta_seconds = value.split(';').next()?.trim().parse::<u32>().ok()?;
        Some(Self { delta_seconds })
    }
}

impl fmt::Display for MinSessionExpires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.delta_seconds)
    }
}
