// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

/// Parsed representation of a SIP or SIPS URI (RFC 3261 §19.1).
///
/// Only the components the session engine dispatches on are modeled:
/// scheme security, user, host, port, and URI parameters. URI headers and
/// escaping rules beyond what identities and Contact values need are left
/// to the wire-level parser.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SipUri {
    pub secure: bool,
    pub user: Option<SmolStr>,
    pub host: SmolStr,
    pub port: Option<u16>,
    pub params: BTreeMap<SmolStr, Option<SmolStr>>,
}

impl SipUri {
    /// Constructs a plain `sip:` URI for the given user and host.
    pub fn new(user: Option<&str>, host: &str) -> Self {
        Self {
            secure: false,
            user: user.map(SmolStr::new),
            host: SmolStr::new(host),
            port: None,
            params: BTreeMap::new(),
        }
    }

    /// The anonymous URI used for privacy-requesting From headers (RFC 3323).
    pub fn anonymous() -> Self {
        Self::new(Some("anonymous"), "anonymous.invalid")
    }

    /// Attempts to parse a `sip:`/`sips:` URI.
    ///
    /// Accepts an optional surrounding `<...>` so callers can feed name-addr
    /// fragments directly. Returns `None` on any malformation.
    pub fn parse(input: &str) -> Option<Self> {
        let mut input = input.trim();
        if let Some(stripped) = input.strip_prefix('<') {
            input = stripped.strip_suffix('>')?;
        }

        let (scheme, rest) = input.split_once(':')?;
        let secure = scheme.eq_ignore_ascii_case("sips");
        if !secure && !scheme.eq_ignore_ascii_case("sip") {
            return None;
        }

        let (addr, params_part) = match rest.split_once(';') {
            Some((addr, params)) => (addr, Some(params)),
            None => (rest, None),
        };

        let (user, host_port) = match addr.split_once('@') {
            Some((user, host_port)) => {
                if user.is_empty() {
                    return None;
                }
                (Some(SmolStr::new(user.trim())), host_port.trim())
            }
            None => (None, addr.trim()),
        };

        if host_port.is_empty() {
            return None;
        }

        let (host, port) = match host_port.rsplit_once(':') {
            // IPv6 references keep their brackets and are not split on ':'
            Some((host, port)) if !host_port.starts_with('[') => {
                (host, Some(port.parse::<u16>().ok()?))
            }
            _ => (host_port, None),
        };

        let mut params = BTreeMap::new();
        if let Some(params_part) = params_part {
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
        }

        Some(Self {
            secure,
            user,
            host: SmolStr::new(host.to_ascii_lowercase()),
            port,
            params,
        })
    }

    /// Returns the value of a URI parameter, if present with a value.
    pub fn param(&self, name: &str) -> Option<&SmolStr> {
        self.params
            .get(&SmolStr::new(name.to_ascii_lowercase()))
            .and_then(|v| v.as_ref())
    }

    /// Returns `true` when the named parameter is present, valued or not.
    pub fn has_param(&self, name: &str) -> bool {
        self.params
            .contains_key(&SmolStr::new(name.to_ascii_lowercase()))
    }
}

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", if self.secure { "sips" } else { "sip" })?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{}={}", name, value)?,
                None => write!(f, ";{}", name)?,
            }
        }
        Ok(())
    }
}
