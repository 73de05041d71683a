// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

use bytes::Bytes;
use smol_str::SmolStr;

use crate::headers::{extract_tag, parse_cseq, Headers};
use crate::method::Method;
use crate::name_addr::NameAddr;
use crate::uri::SipUri;

/// First line of a SIP request: `Method SP Request-URI SP SIP/2.0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SipUri,
}

impl RequestLine {
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self { method, uri }
    }
}

/// First line of a SIP response: `SIP/2.0 SP Status-Code SP Reason-Phrase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub reason: SmolStr,
}

impl StatusLine {
    pub fn new(code: u16, reason: impl Into<SmolStr>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// In-memory SIP request the session engine dispatches on.
///
/// Wire parsing and serialization live in the transport layer; the session
/// engine only ever constructs and inspects these structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub start: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(start: RequestLine, headers: Headers, body: Bytes) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    pub fn method(&self) -> &Method {
        &self.start.method
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Returns the body as UTF-8 text, if it is valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn call_id(&self) -> Option<&SmolStr> {
        self.headers.get("Call-ID")
    }

    pub fn from_tag(&self) -> Option<SmolStr> {
        self.headers.get("From").and_then(|v| extract_tag(v))
    }

    pub fn to_tag(&self) -> Option<SmolStr> {
        self.headers.get("To").and_then(|v| extract_tag(v))
    }

    pub fn from_addr(&self) -> Option<NameAddr> {
        self.headers.get("From").and_then(|v| NameAddr::parse(v))
    }

    pub fn to_addr(&self) -> Option<NameAddr> {
        self.headers.get("To").and_then(|v| NameAddr::parse(v))
    }

    /// Returns the CSeq sequence number and method.
    pub fn cseq(&self) -> Option<(u32, Method)> {
        let value = self.headers.get("CSeq")?;
        let (number, token) = parse_cseq(value)?;
        Some((number, Method::from_token(token)))
    }

    /// Returns the Content-Type value with any parameters stripped.
    pub fn content_type(&self) -> Option<SmolStr> {
        self.headers
            .get("Content-Type")
            .and_then(|v| v.split(';').next().map(|t| SmolStr::new(t.trim())))
    }
}

/// In-memory SIP response the session engine dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub start: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn new(start: StatusLine, headers: Headers, body: Bytes) -> Self {
        Self {
            start,
            headers,
            body,
        }
    }

    pub fn code(&self) -> u16 {
        self.start.code
    }

    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn call_id(&self) -> Option<&SmolStr> {
        self.headers.get("Call-ID")
    }

    pub fn from_tag(&self) -> Option<SmolStr> {
        self.headers.get("From").and_then(|v| extract_tag(v))
    }

    pub fn to_tag(&self) -> Option<SmolStr> {
        self.headers.get("To").and_then(|v| extract_tag(v))
    }

    pub fn to_addr(&self) -> Option<NameAddr> {
        self.headers.get("To").and_then(|v| NameAddr::parse(v))
    }

    pub fn cseq(&self) -> Option<(u32, Method)> {
        let value = self.headers.get("CSeq")?;
        let (number, token) = parse_cseq(value)?;
        Some((number, Method::from_token(token)))
    }

    pub fn content_type(&self) -> Option<SmolStr> {
        self.headers
            .get("Content-Type")
            .and_then(|v| v.split(';').next().map(|t| SmolStr::new(t.trim())))
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.start.code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.start.code)
    }

    pub fn is_final(&self) -> bool {
        self.start.code >= 200
    }
}

/// Either a SIP request or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipMessage {
    Request(Request),
    Response(Response),
}

impl SipMessage {
    pub fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(req) => &req.headers,
            SipMessage::Response(res) => &res.headers,
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            SipMessage::Request(req) => &req.body,
            SipMessage::Response(res) => &res.body,
        }
    }
}

/// Default reason phrase for a SIP status code (RFC 3261 §21 and extensions).
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        200 => "OK",
        202 => "Accepted",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        305 => "Use Proxy",
        380 => "Alternative Service",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        410 => "Gone",
        415 => "Unsupported Media Type",
        416 => "Unsupported URI Scheme",
        420 => "Bad Extension",
        422 => "Session Interval Too Small",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        482 => "Loop Detected",
        483 => "Too Many Hops",
        484 => "Address Incomplete",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        491 => "Request Pending",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        600 => "Busy Everywhere",
        603 => "Decline",
        604 => "Does Not Exist Anywhere",
        606 => "Not Acceptable",
        _ => "Unknown",
    }
}
