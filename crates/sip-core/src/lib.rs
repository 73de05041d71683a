// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core SIP message model for the session engine.
//!
//! This crate provides the in-memory types the INVITE session machine
//! dispatches on:
//! - **Messages**: [`Request`], [`Response`], [`SipMessage`]
//! - **Headers**: [`Headers`] container plus tag/CSeq field helpers
//! - **Methods**: [`Method`] (INVITE dialog usage plus `Unknown`)
//! - **Identities**: [`SipUri`] and [`NameAddr`]
//! - **Extensions**: Reason (RFC 3326), Session Timers (RFC 4028)
//!
//! Wire parsing, serialization, and transport concerns are deliberately
//! absent; they belong to the transaction/transport layer that feeds this
//! engine. Strings use [`SmolStr`](smol_str::SmolStr) and bodies use
//! [`Bytes`](bytes::Bytes) throughout.
//!
//! # Examples
//!
//! ```
//! use sip_core::{Method, Request, RequestLine, Headers, SipUri};
//! use bytes::Bytes;
//!
//! let uri = SipUri::parse("sip:bob@example.com").unwrap();
//! let mut headers = Headers::new();
//! headers.push("Call-ID", "a84b4c76e66710");
//! let invite = Request::new(RequestLine::new(Method::Invite, uri), headers, Bytes::new());
//! assert_eq!(invite.method().as_str(), "INVITE");
//! ```

pub mod headers;
pub mod method;
pub mod msg;
pub mod name_addr;
pub mod reason;
pub mod session_timer;
pub mod uri;

pub use headers::{extract_tag, parse_cseq, Header, Headers};
pub use method::Method;
pub use msg::{reason_phrase, Request, RequestLine, Response, SipMessage, StatusLine};
pub use name_addr::{contact_uri, NameAddr};
pub use reason::ReasonHeader;
pub use session_timer::{MinSessionExpires, RefresherRole, SessionExpires};
pub use uri::SipUri;
