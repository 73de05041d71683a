// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

use crate::headers::Headers;
use crate::uri::SipUri;

/// SIP name-addr: optional display name plus URI plus header parameters.
///
/// Used for the From/To/Contact values the session engine exposes as local
/// and remote identities (RFC 3261 §20.10, §20.20, §20.39).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub display_name: Option<SmolStr>,
    pub uri: SipUri,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl NameAddr {
    pub fn new(display_name: Option<&str>, uri: SipUri) -> Self {
        Self {
            display_name: display_name.map(SmolStr::new),
            uri,
            params: BTreeMap::new(),
        }
    }

    /// Parses a name-addr or addr-spec header value.
    ///
    /// Handles `"Display" <sip:uri>;params`, `<sip:uri>`, and bare
    /// `sip:uri;params` forms. Returns `None` on malformed input.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();

        let (display_name, rest) = if let Some(open) = value.find('<') {
            let display = value[..open].trim().trim_matches('"').trim();
            let display = if display.is_empty() {
                None
            } else {
                Some(SmolStr::new(display))
            };
            (display, &value[open..])
        } else {
            (None, value)
        };

        let (uri_part, params_part) = if rest.starts_with('<') {
            let close = rest.find('>')?;
            (&rest[..=close], rest.get(close + 1..).unwrap_or(""))
        } else {
            // Bare addr-spec: parameters after ';' belong to the header,
            // not the URI (RFC 3261 §20).
            match rest.split_once(';') {
                Some((uri, params)) => (uri, params),
                None => (rest, ""),
            }
        };

        let uri = SipUri::parse(uri_part)?;

        let mut params = BTreeMap::new();
        for param in params_part.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            match param.split_once('=') {
                Some((k, v)) => params.insert(
                    SmolStr::new(k.trim().to_ascii_lowercase()),
                    Some(SmolStr::new(v.trim())),
                ),
                None => params.insert(SmolStr::new(param.to_ascii_lowercase()), None),
            };
        }

        Some(Self {
            display_name,
            uri,
            params,
        })
    }

    /// Returns a header parameter value (e.g. `tag`).
    pub fn param(&self, name: &str) -> Option<&SmolStr> {
        self.params
            .get(&SmolStr::new(name.to_ascii_lowercase()))
            .and_then(|v| v.as_ref())
    }
}

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(display) = &self.display_name {
            write!(f, "\"{}\" ", display)?;
        }
        write!(f, "<{}>", self.uri)?;
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}

/// Extracts the URI of the first Contact header, if parseable.
pub fn contact_uri(headers: &Headers) -> Option<SipUri> {
    let value = headers.get("Contact")?;
    NameAddr::parse(value.as_str()).map(|addr| addr.uri)
}
