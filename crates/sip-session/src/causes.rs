// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-of-session cause vocabulary and the status-code mapping used when an
//! initial INVITE is answered with a final error response.

/// Why a session ended or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    Bye,
    Canceled,
    NoAck,
    Busy,
    Rejected,
    Redirected,
    Unavailable,
    NotFound,
    AddressIncomplete,
    IncompatibleSdp,
    MissingSdp,
    BadMediaDescription,
    AuthenticationError,
    RequestTimeout,
    DialogError,
    ConnectionError,
    WebrtcError,
    InternalError,
    UserDeniedMediaAccess,
}

impl Cause {
    /// Returns the canonical token for this cause.
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::Bye => "BYE",
            Cause::Canceled => "CANCELED",
            Cause::NoAck => "NO_ACK",
            Cause::Busy => "BUSY",
            Cause::Rejected => "REJECTED",
            Cause::Redirected => "REDIRECTED",
            Cause::Unavailable => "UNAVAILABLE",
            Cause::NotFound => "NOT_FOUND",
            Cause::AddressIncomplete => "ADDRESS_INCOMPLETE",
            Cause::IncompatibleSdp => "INCOMPATIBLE_SDP",
            Cause::MissingSdp => "MISSING_SDP",
            Cause::BadMediaDescription => "BAD_MEDIA_DESCRIPTION",
            Cause::AuthenticationError => "AUTHENTICATION_ERROR",
            Cause::RequestTimeout => "REQUEST_TIMEOUT",
            Cause::DialogError => "DIALOG_ERROR",
            Cause::ConnectionError => "CONNECTION_ERROR",
            Cause::WebrtcError => "WEBRTC_ERROR",
            Cause::InternalError => "INTERNAL_ERROR",
            Cause::UserDeniedMediaAccess => "USER_DENIED_MEDIA_ACCESS",
        }
    }

    /// Maps a final non-2xx response status to a session failure cause.
    ///
    /// Follows the standard SIP class rules: specific codes first, then the
    /// 3xx class as REDIRECTED, then anything >= 400 as REJECTED.
    pub fn from_status(code: u16) -> Cause {
        match code {
            401 | 407 => Cause::AuthenticationError,
            404 => Cause::NotFound,
            408 => Cause::RequestTimeout,
            410 | 480 => Cause::Unavailable,
            484 => Cause::AddressIncomplete,
            486 | 600 => Cause::Busy,
            488 | 606 => Cause::IncompatibleSdp,
            300..=399 => Cause::Redirected,
            _ => Cause::Rejected,
        }
    }
}

impl std::fmt::Display for Cause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
