// siphon-rs - The Siphon SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end call flow tests driving a session against scripted
//! transport and media doubles.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use sip_core::{Method, Request, SipUri};
use sip_session::{
    AnswerOptions, Cause, ConnectOptions, DtmfOptions, MediaEngine, Originator, Reject,
    RenegotiateOptions, Session, SessionConfig, SessionEvent, SessionHooks, SessionStatus,
    TerminateOptions,
};
use sip_testkit::{
    build_ack, build_in_dialog_request, build_invite, respond_to, FakeMediaEngine,
    RecordingTransport, ANSWER_SDP, OFFER_SDP,
};

struct Peer {
    session: Session,
    transport: Arc<RecordingTransport>,
    engine: Arc<FakeMediaEngine>,
    events: broadcast::Receiver<SessionEvent>,
}

fn alice_config() -> SessionConfig {
    SessionConfig::new(
        SipUri::parse("sip:alice@example.com").unwrap(),
        SipUri::parse("sip:alice@client.example.com:5060").unwrap(),
    )
}

fn spawn_driver(session: &Session, mut timer_rx: tokio::sync::mpsc::UnboundedReceiver<sip_session::TimerEvent>) {
    let driver = session.clone();
    tokio::spawn(async move {
        while let Some(event) = timer_rx.recv().await {
            driver.on_timer(event).await;
        }
    });
}

fn outgoing_peer() -> Peer {
    let transport = Arc::new(RecordingTransport::new());
    let engine = Arc::new(FakeMediaEngine::new());
    let (session, timer_rx) =
        Session::outgoing(alice_config(), transport.clone(), engine.clone());
    spawn_driver(&session, timer_rx);
    let events = session.subscribe();
    Peer {
        session,
        transport,
        engine,
        events,
    }
}

fn incoming_peer(invite: Request) -> Peer {
    let transport = Arc::new(RecordingTransport::new());
    let engine = Arc::new(FakeMediaEngine::new());
    let (session, timer_rx) =
        Session::incoming(alice_config(), transport.clone(), engine.clone(), invite)
            .expect("valid INVITE");
    spawn_driver(&session, timer_rx);
    let events = session.subscribe();
    Peer {
        session,
        transport,
        engine,
        events,
    }
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.name()).collect()
}

fn terminal_count(events: &[SessionEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SessionEvent::Ended { .. } | SessionEvent::Failed { .. }))
        .count()
}

/// Runs the happy-path outbound flow and returns the peer plus the sent
/// INVITE, confirmed with remote tag `uas-tag`.
async fn confirmed_outgoing() -> (Peer, Request) {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let invite = peer.transport.sent_requests()[0].clone();
    peer.session
        .receive_response(respond_to(&invite, 200, Some("uas-tag"), Some(ANSWER_SDP)))
        .await;
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
    drain(&mut peer.events);
    (peer, invite)
}

// --------------------------------------------------------------------
// S1: outgoing happy path
// --------------------------------------------------------------------

#[tokio::test]
async fn outgoing_happy_path() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(peer.session.status(), SessionStatus::InviteSent);

    let invite = peer.transport.last_request().unwrap();
    assert_eq!(*invite.method(), Method::Invite);
    assert!(invite.headers.contains("Contact"));
    assert_eq!(invite.content_type().as_deref(), Some("application/sdp"));
    assert!(invite.headers.contains("Session-Expires"));

    peer.session
        .receive_response(respond_to(&invite, 100, None, None))
        .await;
    assert_eq!(peer.session.status(), SessionStatus::Received1xx);

    peer.session
        .receive_response(respond_to(&invite, 180, Some("uas-tag"), None))
        .await;
    assert_eq!(peer.session.status(), SessionStatus::Received1xx);

    peer.session
        .receive_response(respond_to(&invite, 200, Some("uas-tag"), Some(ANSWER_SDP)))
        .await;
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
    assert!(peer.session.is_confirmed());
    assert!(peer.session.start_time().is_some());

    // ACK went out to the confirmed dialog.
    let ack = peer.transport.last_request().unwrap();
    assert_eq!(*ack.method(), Method::Ack);
    assert_eq!(ack.to_tag().as_deref(), Some("uas-tag"));
    assert_eq!(ack.cseq().map(|(n, _)| n), Some(1));

    let events = drain(&mut peer.events);
    assert_eq!(
        names(&events),
        vec![
            "newRTCSession",
            "connecting",
            "sending",
            "progress",
            "accepted",
            "confirmed",
        ]
    );
    assert!(matches!(
        events[events.len() - 2],
        SessionEvent::Accepted {
            originator: Originator::Remote,
            ..
        }
    ));
    assert!(matches!(
        events[events.len() - 1],
        SessionEvent::Confirmed {
            originator: Originator::Local
        }
    ));
}

#[tokio::test]
async fn connect_generates_offer_when_absent() {
    let mut peer = outgoing_peer();
    peer.session
        .connect("sip:bob@example.com", ConnectOptions::default())
        .await
        .unwrap();

    let invite = peer.transport.last_request().unwrap();
    assert_eq!(invite.body_str(), peer.engine.local_description().as_deref());

    let events = drain(&mut peer.events);
    assert!(names(&events).contains(&"sdp"));
}

#[tokio::test]
async fn connect_rejects_bad_target_and_wrong_state() {
    let peer = outgoing_peer();
    assert!(peer
        .session
        .connect("not-a-uri", ConnectOptions::default())
        .await
        .is_err());

    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(matches!(
        peer.session
            .connect("sip:carol@example.com", ConnectOptions::default())
            .await,
        Err(sip_session::SessionError::InvalidState(_))
    ));
}

#[tokio::test]
async fn anonymous_connect_masks_identity() {
    let peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                anonymous: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let invite = peer.transport.last_request().unwrap();
    let from = invite.headers.get("From").unwrap();
    assert!(from.contains("anonymous.invalid"));
    assert!(from.contains("Anonymous"));
    assert_eq!(
        invite.headers.get("Privacy").map(|v| v.as_str()),
        Some("id")
    );
    assert!(invite
        .headers
        .get("P-Preferred-Identity")
        .unwrap()
        .contains("alice@example.com"));
}

#[tokio::test]
async fn invite_rejection_maps_cause() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let invite = peer.transport.last_request().unwrap();
    peer.session
        .receive_response(respond_to(&invite, 486, Some("uas-tag"), None))
        .await;

    assert_eq!(peer.session.status(), SessionStatus::Terminated);
    assert!(peer.session.end_time().is_some());
    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Failed {
            originator: Originator::Remote,
            cause: Cause::Busy
        }
    )));
}

#[tokio::test]
async fn missing_sdp_in_2xx_is_released() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let invite = peer.transport.last_request().unwrap();
    peer.session
        .receive_response(respond_to(&invite, 200, Some("uas-tag"), None))
        .await;

    // Accept-and-terminate: ACK then BYE with the 400 reason.
    let methods = peer.transport.request_methods();
    assert_eq!(methods, vec!["INVITE", "ACK", "BYE"]);
    let bye = peer.transport.last_request().unwrap();
    assert!(bye.headers.get("Reason").unwrap().contains("cause=400"));

    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Failed {
            cause: Cause::BadMediaDescription,
            ..
        }
    )));
}

// --------------------------------------------------------------------
// S2: cancel before any provisional
// --------------------------------------------------------------------

#[tokio::test]
async fn cancel_before_provisional() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    peer.session
        .terminate(TerminateOptions {
            status_code: Some(487),
            ..Default::default()
        })
        .await
        .unwrap();
    // Nothing sent yet beyond the INVITE; CANCEL waits for a provisional.
    assert_eq!(peer.transport.request_methods(), vec!["INVITE"]);

    let invite = peer.transport.sent_requests()[0].clone();
    peer.session
        .receive_response(respond_to(&invite, 100, None, None))
        .await;

    assert_eq!(peer.transport.request_methods(), vec!["INVITE", "CANCEL"]);
    let cancel = peer.transport.last_request().unwrap();
    assert!(cancel.headers.get("Reason").unwrap().contains("cause=487"));
    assert_eq!(peer.session.status(), SessionStatus::Canceled);

    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Failed {
            originator: Originator::Local,
            cause: Cause::Canceled
        }
    )));
}

#[tokio::test]
async fn cancel_after_provisional_is_immediate() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let invite = peer.transport.sent_requests()[0].clone();
    peer.session
        .receive_response(respond_to(&invite, 180, Some("uas-tag"), None))
        .await;

    peer.session
        .terminate(TerminateOptions::default())
        .await
        .unwrap();
    assert_eq!(peer.transport.request_methods(), vec!["INVITE", "CANCEL"]);
    assert_eq!(peer.session.status(), SessionStatus::Canceled);
    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
}

#[tokio::test]
async fn canceled_2xx_is_accepted_and_released() {
    let peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    peer.session
        .terminate(TerminateOptions::default())
        .await
        .unwrap();

    let invite = peer.transport.sent_requests()[0].clone();
    peer.session
        .receive_response(respond_to(&invite, 200, Some("uas-tag"), Some(ANSWER_SDP)))
        .await;

    assert_eq!(
        peer.transport.request_methods(),
        vec!["INVITE", "ACK", "BYE"]
    );
    assert_eq!(peer.session.status(), SessionStatus::Canceled);
}

// --------------------------------------------------------------------
// S3: forked 2xx from an unknown branch
// --------------------------------------------------------------------

#[tokio::test]
async fn forked_2xx_is_released_and_chosen_branch_wins() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let invite = peer.transport.sent_requests()[0].clone();

    // 180 from branch A establishes an early dialog.
    peer.session
        .receive_response(respond_to(&invite, 180, Some("tag-a"), None))
        .await;

    // 2xx from branch B: ACK it, BYE it, keep waiting.
    peer.session
        .receive_response(respond_to(&invite, 200, Some("tag-b"), Some(ANSWER_SDP)))
        .await;
    let methods = peer.transport.request_methods();
    assert_eq!(methods, vec!["INVITE", "ACK", "BYE"]);
    let ack = peer.transport.sent_requests()[1].clone();
    let bye = peer.transport.sent_requests()[2].clone();
    assert_eq!(ack.to_tag().as_deref(), Some("tag-b"));
    assert_eq!(bye.to_tag().as_deref(), Some("tag-b"));
    assert_eq!(peer.session.status(), SessionStatus::Received1xx);

    // 2xx from branch A confirms the session.
    peer.session
        .receive_response(respond_to(&invite, 200, Some("tag-a"), Some(ANSWER_SDP)))
        .await;
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
    let ack_a = peer.transport.last_request().unwrap();
    assert_eq!(*ack_a.method(), Method::Ack);
    assert_eq!(ack_a.to_tag().as_deref(), Some("tag-a"));

    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 0);
    assert!(names(&events).contains(&"confirmed"));
}

#[tokio::test]
async fn retransmitted_2xx_is_reacked() {
    let (peer, invite) = confirmed_outgoing().await;
    let before = peer.transport.request_methods();

    peer.session
        .receive_response(respond_to(&invite, 200, Some("uas-tag"), Some(ANSWER_SDP)))
        .await;
    let mut expected = before;
    expected.push("ACK".to_owned());
    assert_eq!(peer.transport.request_methods(), expected);
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
}

// --------------------------------------------------------------------
// S4: late SDP (offerless INVITE)
// --------------------------------------------------------------------

#[tokio::test]
async fn late_sdp_answer_confirmed_by_ack() {
    let invite = build_invite("sip:alice@example.com", "late-1@example.com", "bob-tag", None);
    let mut peer = incoming_peer(invite);
    assert_eq!(peer.session.status(), SessionStatus::WaitingForAnswer);

    peer.session.answer(AnswerOptions::default()).await.unwrap();
    assert_eq!(peer.session.status(), SessionStatus::WaitingForAck);

    // The 200 carries our offer.
    let ok = peer.transport.last_response().unwrap();
    assert_eq!(ok.code(), 200);
    assert!(ok.has_body());
    assert!(ok.headers.contains("Contact"));
    let local_tag = ok.to_tag().unwrap();

    // ACK brings the remote answer.
    peer.session
        .receive_request(build_ack(
            "late-1@example.com",
            "bob-tag",
            local_tag.as_str(),
            Some(ANSWER_SDP),
        ))
        .await;
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);

    let events = drain(&mut peer.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Confirmed {
            originator: Originator::Remote
        }
    )));
    assert_eq!(terminal_count(&events), 0);
}

#[tokio::test]
async fn late_sdp_ack_without_body_terminates() {
    let invite = build_invite("sip:alice@example.com", "late-2@example.com", "bob-tag", None);
    let mut peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();
    let local_tag = peer.transport.last_response().unwrap().to_tag().unwrap();

    peer.session
        .receive_request(build_ack(
            "late-2@example.com",
            "bob-tag",
            local_tag.as_str(),
            None,
        ))
        .await;

    assert_eq!(peer.session.status(), SessionStatus::Terminated);
    let bye = peer.transport.last_request().unwrap();
    assert_eq!(*bye.method(), Method::Bye);
    assert!(bye.headers.get("Reason").unwrap().contains("cause=400"));

    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Ended {
            cause: Cause::MissingSdp,
            ..
        }
    )));
}

#[tokio::test]
async fn incoming_with_offer_is_answered() {
    let invite = build_invite(
        "sip:alice@example.com",
        "in-1@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    let mut peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();

    // Remote offer applied, answer created.
    let ops = peer.engine.operations();
    assert_eq!(
        ops,
        vec!["set_remote_offer", "create_answer", "set_local_answer"]
    );

    let ok = peer.transport.last_response().unwrap();
    let local_tag = ok.to_tag().unwrap();
    peer.session
        .receive_request(build_ack("in-1@example.com", "bob-tag", local_tag.as_str(), None))
        .await;
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
    let events = drain(&mut peer.events);
    assert!(names(&events).contains(&"accepted"));
    assert!(names(&events).contains(&"ackReceived"));
    assert!(names(&events).contains(&"confirmed"));
}

#[tokio::test]
async fn cancel_while_waiting_for_answer() {
    let invite = build_invite(
        "sip:alice@example.com",
        "in-2@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    let mut peer = incoming_peer(invite);

    let cancel = build_in_dialog_request(
        Method::Cancel,
        "in-2@example.com",
        "bob-tag",
        "",
        1,
        None,
        "",
    );
    peer.session.receive_request(cancel).await;

    assert_eq!(peer.session.status(), SessionStatus::Canceled);
    assert_eq!(peer.transport.response_codes(), vec![487]);
    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Failed {
            originator: Originator::Remote,
            cause: Cause::Canceled
        }
    )));
}

// --------------------------------------------------------------------
// S5: renegotiation gating
// --------------------------------------------------------------------

#[tokio::test]
async fn renegotiate_blocked_while_transaction_pending() {
    let (peer, _invite) = confirmed_outgoing().await;

    assert!(peer
        .session
        .renegotiate(RenegotiateOptions::default())
        .await
        .unwrap());
    let reinvite = peer.transport.last_request().unwrap();
    assert_eq!(*reinvite.method(), Method::Invite);
    assert!(reinvite.has_body());

    // Second renegotiation while the first awaits its final response.
    assert!(!peer
        .session
        .renegotiate(RenegotiateOptions::default())
        .await
        .unwrap());

    // Final response clears the gate.
    peer.session
        .receive_response(respond_to(&reinvite, 200, None, Some(ANSWER_SDP)))
        .await;
    let ack = peer.transport.last_request().unwrap();
    assert_eq!(*ack.method(), Method::Ack);
    assert_eq!(ack.cseq().map(|(n, _)| n), reinvite.cseq().map(|(n, _)| n));

    assert!(peer
        .session
        .renegotiate(RenegotiateOptions::default())
        .await
        .unwrap());
}

#[tokio::test]
async fn renegotiate_with_update() {
    let (peer, _invite) = confirmed_outgoing().await;
    assert!(peer
        .session
        .renegotiate(RenegotiateOptions {
            use_update: true,
            ..Default::default()
        })
        .await
        .unwrap());
    let update = peer.transport.last_request().unwrap();
    assert_eq!(*update.method(), Method::Update);
    assert!(update.has_body());
    assert!(update.headers.contains("Session-Expires"));

    let before = peer.transport.request_methods().len();
    peer.session
        .receive_response(respond_to(&update, 200, None, Some(ANSWER_SDP)))
        .await;
    // No ACK for UPDATE.
    assert_eq!(peer.transport.request_methods().len(), before);
}

#[tokio::test]
async fn peer_rejecting_renegotiation_keeps_session_up() {
    let (mut peer, _invite) = confirmed_outgoing().await;
    assert!(peer
        .session
        .renegotiate(RenegotiateOptions::default())
        .await
        .unwrap());
    let reinvite = peer.transport.last_request().unwrap();
    peer.session
        .receive_response(respond_to(&reinvite, 488, None, None))
        .await;

    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
    assert_eq!(terminal_count(&drain(&mut peer.events)), 0);
    // Eligible again after the rejection.
    assert!(peer
        .session
        .renegotiate(RenegotiateOptions::default())
        .await
        .unwrap());
}

// --------------------------------------------------------------------
// In-dialog requests toward the session
// --------------------------------------------------------------------

#[tokio::test]
async fn remote_bye_ends_session() {
    let (mut peer, invite) = confirmed_outgoing().await;
    let bye = build_in_dialog_request(
        Method::Bye,
        peer.session.call_id().as_str(),
        "uas-tag",
        invite.from_tag().unwrap().as_str(),
        1,
        None,
        "",
    );
    peer.session.receive_request(bye).await;

    assert_eq!(peer.session.status(), SessionStatus::Terminated);
    assert_eq!(peer.transport.response_codes(), vec![200]);
    let events = drain(&mut peer.events);
    assert!(names(&events).contains(&"byeReceived"));
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Ended {
            originator: Originator::Remote,
            cause: Cause::Bye
        }
    )));
}

#[tokio::test]
async fn bye_in_wrong_state_is_403() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let bye = build_in_dialog_request(
        Method::Bye,
        peer.session.call_id().as_str(),
        "uas-tag",
        "whatever",
        1,
        None,
        "",
    );
    peer.session.receive_request(bye).await;
    assert_eq!(peer.transport.response_codes(), vec![403]);
    assert_eq!(peer.session.status(), SessionStatus::InviteSent);
    assert_eq!(terminal_count(&drain(&mut peer.events)), 0);
}

#[tokio::test]
async fn unknown_method_gets_501() {
    let (peer, invite) = confirmed_outgoing().await;
    let refer = build_in_dialog_request(
        Method::Unknown(smol_str::SmolStr::new("REFER")),
        peer.session.call_id().as_str(),
        "uas-tag",
        invite.from_tag().unwrap().as_str(),
        1,
        None,
        "",
    );
    peer.session.receive_request(refer).await;
    assert_eq!(peer.transport.response_codes(), vec![501]);
}

#[tokio::test]
async fn info_dispatch_by_content_type() {
    let (mut peer, invite) = confirmed_outgoing().await;
    let local_tag = invite.from_tag().unwrap();

    let dtmf = build_in_dialog_request(
        Method::Info,
        peer.session.call_id().as_str(),
        "uas-tag",
        local_tag.as_str(),
        1,
        Some("application/dtmf-relay"),
        "Signal=5\r\nDuration=160\r\n",
    );
    peer.session.receive_request(dtmf).await;

    let generic = build_in_dialog_request(
        Method::Info,
        peer.session.call_id().as_str(),
        "uas-tag",
        local_tag.as_str(),
        2,
        Some("application/json"),
        "{\"x\":1}",
    );
    peer.session.receive_request(generic).await;

    let untyped = build_in_dialog_request(
        Method::Info,
        peer.session.call_id().as_str(),
        "uas-tag",
        local_tag.as_str(),
        3,
        None,
        "",
    );
    peer.session.receive_request(untyped).await;

    assert_eq!(peer.transport.response_codes(), vec![200, 200, 415]);
    let events = drain(&mut peer.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::NewDtmf {
            originator: Originator::Remote,
            tone: '5',
            duration_ms: 160
        }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::NewInfo {
            originator: Originator::Remote,
            ..
        }
    )));
}

#[tokio::test]
async fn stale_cseq_gets_500() {
    let (peer, invite) = confirmed_outgoing().await;
    let local_tag = invite.from_tag().unwrap();
    let first = build_in_dialog_request(
        Method::Info,
        peer.session.call_id().as_str(),
        "uas-tag",
        local_tag.as_str(),
        5,
        Some("application/json"),
        "{}",
    );
    peer.session.receive_request(first).await;
    let replay = build_in_dialog_request(
        Method::Info,
        peer.session.call_id().as_str(),
        "uas-tag",
        local_tag.as_str(),
        5,
        Some("application/json"),
        "{}",
    );
    peer.session.receive_request(replay).await;
    assert_eq!(peer.transport.response_codes(), vec![200, 500]);
}

#[tokio::test]
async fn incoming_reinvite_renegotiates() {
    let invite = build_invite(
        "sip:alice@example.com",
        "re-1@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    let mut peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();
    let local_tag = peer.transport.last_response().unwrap().to_tag().unwrap();
    peer.session
        .receive_request(build_ack("re-1@example.com", "bob-tag", local_tag.as_str(), None))
        .await;
    drain(&mut peer.events);

    let reinvite = build_in_dialog_request(
        Method::Invite,
        "re-1@example.com",
        "bob-tag",
        local_tag.as_str(),
        2,
        Some("application/sdp"),
        OFFER_SDP,
    );
    peer.session.receive_request(reinvite).await;

    assert_eq!(peer.session.status(), SessionStatus::WaitingForAck);
    let ok = peer.transport.last_response().unwrap();
    assert_eq!(ok.code(), 200);
    assert!(ok.has_body());

    let events = drain(&mut peer.events);
    assert!(names(&events).contains(&"reinvite"));

    peer.session
        .receive_request(build_in_dialog_request(
            Method::Ack,
            "re-1@example.com",
            "bob-tag",
            local_tag.as_str(),
            2,
            None,
            "",
        ))
        .await;
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
    // `confirmed` already fired for the initial exchange; not again.
    assert_eq!(terminal_count(&drain(&mut peer.events)), 0);
}

struct RejectReinvites;

impl SessionHooks for RejectReinvites {
    fn on_reinvite(&self, _request: &Request) -> Option<Reject> {
        Reject::new(488).map(|r| r.with_reason("No Renegotiation"))
    }
}

#[tokio::test]
async fn reinvite_rejected_by_hook() {
    let invite = build_invite(
        "sip:alice@example.com",
        "re-2@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    let peer = incoming_peer(invite);
    peer.session.add_hooks(Arc::new(RejectReinvites));
    peer.session.answer(AnswerOptions::default()).await.unwrap();
    let local_tag = peer.transport.last_response().unwrap().to_tag().unwrap();
    peer.session
        .receive_request(build_ack("re-2@example.com", "bob-tag", local_tag.as_str(), None))
        .await;

    let reinvite = build_in_dialog_request(
        Method::Invite,
        "re-2@example.com",
        "bob-tag",
        local_tag.as_str(),
        2,
        Some("application/sdp"),
        OFFER_SDP,
    );
    peer.session.receive_request(reinvite).await;

    let rejection = peer.transport.last_response().unwrap();
    assert_eq!(rejection.code(), 488);
    assert_eq!(rejection.start.reason.as_str(), "No Renegotiation");
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
}

#[tokio::test]
async fn bodyless_update_gets_bodyless_200() {
    let invite = build_invite(
        "sip:alice@example.com",
        "up-1@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    let mut peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();
    let local_tag = peer.transport.last_response().unwrap().to_tag().unwrap();
    peer.session
        .receive_request(build_ack("up-1@example.com", "bob-tag", local_tag.as_str(), None))
        .await;
    drain(&mut peer.events);

    let update = build_in_dialog_request(
        Method::Update,
        "up-1@example.com",
        "bob-tag",
        local_tag.as_str(),
        2,
        None,
        "",
    );
    peer.session.receive_request(update).await;

    let ok = peer.transport.last_response().unwrap();
    assert_eq!(ok.code(), 200);
    assert!(!ok.has_body());
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
    assert!(names(&drain(&mut peer.events)).contains(&"update"));
}

// --------------------------------------------------------------------
// DTMF
// --------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dtmf_enqueue_matches_single_batch() {
    let (split_peer, _) = confirmed_outgoing().await;
    let split_before = split_peer.transport.request_methods().len();
    let first = split_peer.session.send_dtmf("1", DtmfOptions::default());
    let second = split_peer.session.send_dtmf("2", DtmfOptions::default());
    let (a, b) = tokio::join!(first, second);
    a.unwrap();
    b.unwrap();

    let (batch_peer, _) = confirmed_outgoing().await;
    let batch_before = batch_peer.transport.request_methods().len();
    batch_peer
        .session
        .send_dtmf("12", DtmfOptions::default())
        .await
        .unwrap();

    let split_infos: Vec<String> = split_peer.transport.sent_requests()[split_before..]
        .iter()
        .map(|r| r.body_str().unwrap().to_owned())
        .collect();
    let batch_infos: Vec<String> = batch_peer.transport.sent_requests()[batch_before..]
        .iter()
        .map(|r| r.body_str().unwrap().to_owned())
        .collect();
    assert_eq!(split_infos, batch_infos);
    assert_eq!(split_infos.len(), 2);
    assert!(split_infos[0].contains("Signal=1"));
    assert!(split_infos[1].contains("Signal=2"));
}

#[tokio::test(start_paused = true)]
async fn dtmf_validation_and_clamping() {
    let (peer, _) = confirmed_outgoing().await;
    assert!(matches!(
        peer.session.send_dtmf("1E", DtmfOptions::default()).await,
        Err(sip_session::SessionError::InvalidTones)
    ));
    assert!(matches!(
        peer.session.send_dtmf("", DtmfOptions::default()).await,
        Err(sip_session::SessionError::InvalidTones)
    ));

    let before = peer.transport.request_methods().len();
    peer.session
        .send_dtmf(
            "5",
            DtmfOptions {
                duration_ms: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let info = peer.transport.sent_requests()[before..].last().cloned().unwrap();
    // Clamped up to the 70ms minimum.
    assert!(info.body_str().unwrap().contains("Duration=70"));
}

#[tokio::test]
async fn dtmf_requires_established_session() {
    let peer = outgoing_peer();
    assert!(matches!(
        peer.session.send_dtmf("1", DtmfOptions::default()).await,
        Err(sip_session::SessionError::InvalidState(_))
    ));
}

// --------------------------------------------------------------------
// Timers: 2xx retransmission, Timer H, session timers (S6)
// --------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unacked_200_retransmits_then_times_out() {
    let invite = build_invite(
        "sip:alice@example.com",
        "timer-1@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    let mut peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();

    tokio::time::sleep(Duration::from_secs(33)).await;

    let codes = peer.transport.response_codes();
    let retransmissions = codes.iter().filter(|&&c| c == 200).count();
    // First fire at T1, doubling up to T2: 10 fires inside 32s, plus the
    // original 200.
    assert!(retransmissions >= 4, "got {} transmissions", retransmissions);

    let bye = peer.transport.last_request().unwrap();
    assert_eq!(*bye.method(), Method::Bye);
    assert_eq!(peer.session.status(), SessionStatus::Terminated);

    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Ended {
            originator: Originator::Remote,
            cause: Cause::NoAck
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn ack_stops_retransmissions() {
    let invite = build_invite(
        "sip:alice@example.com",
        "timer-2@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    let peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();
    let local_tag = peer.transport.last_response().unwrap().to_tag().unwrap();
    peer.session
        .receive_request(build_ack(
            "timer-2@example.com",
            "bob-tag",
            local_tag.as_str(),
            None,
        ))
        .await;

    let after_ack = peer.transport.response_codes().len();
    tokio::time::sleep(Duration::from_secs(40)).await;
    assert_eq!(peer.transport.response_codes().len(), after_ack);
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
}

// S6: non-refresher watchdog fires at 1.1 × Session-Expires.
#[tokio::test(start_paused = true)]
async fn session_timer_expiry_as_non_refresher() {
    let mut invite = build_invite(
        "sip:alice@example.com",
        "timer-3@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    invite.headers.push("Session-Expires", "90;refresher=uac");
    let mut peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();

    // The 200 mirrors the negotiated interval and refresher.
    let ok = peer.transport.last_response().unwrap();
    assert_eq!(
        ok.headers.get("Session-Expires").map(|v| v.as_str()),
        Some("90;refresher=uac")
    );
    let local_tag = ok.to_tag().unwrap();
    peer.session
        .receive_request(build_ack(
            "timer-3@example.com",
            "bob-tag",
            local_tag.as_str(),
            None,
        ))
        .await;
    drain(&mut peer.events);

    // Watchdog at 90 × 1.1 = 99s; no refresh arrives.
    tokio::time::sleep(Duration::from_secs(100)).await;

    assert_eq!(peer.session.status(), SessionStatus::Terminated);
    let bye = peer.transport.last_request().unwrap();
    assert_eq!(*bye.method(), Method::Bye);
    let reason = bye.headers.get("Reason").unwrap();
    assert!(reason.contains("cause=408"));
    assert!(reason.contains("Session Timer Expired"));

    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Ended {
            cause: Cause::RequestTimeout,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn refresher_sends_update_at_half_interval() {
    let mut invite = build_invite(
        "sip:alice@example.com",
        "timer-4@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    // Peer asks us (the UAS) to be the refresher.
    invite.headers.push("Session-Expires", "90;refresher=uas");
    let peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();
    let local_tag = peer.transport.last_response().unwrap().to_tag().unwrap();
    peer.session
        .receive_request(build_ack(
            "timer-4@example.com",
            "bob-tag",
            local_tag.as_str(),
            None,
        ))
        .await;

    tokio::time::sleep(Duration::from_secs(46)).await;

    let refresh = peer.transport.last_request().unwrap();
    assert_eq!(*refresh.method(), Method::Update);
    assert!(refresh.headers.contains("Session-Expires"));
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
}

#[tokio::test(start_paused = true)]
async fn low_session_expires_request_falls_back_to_default() {
    let mut invite = build_invite(
        "sip:alice@example.com",
        "timer-5@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    invite.headers.push("Session-Expires", "30");
    let peer = incoming_peer(invite);
    peer.session.answer(AnswerOptions::default()).await.unwrap();
    let ok = peer.transport.last_response().unwrap();
    assert_eq!(
        ok.headers.get("Session-Expires").map(|v| v.as_str()),
        Some("1800;refresher=uas")
    );
}

#[tokio::test(start_paused = true)]
async fn no_answer_timeout_rejects_incoming() {
    let invite = build_invite(
        "sip:alice@example.com",
        "timer-6@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    let mut peer = incoming_peer(invite);

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(peer.session.status(), SessionStatus::Terminated);
    assert_eq!(peer.transport.response_codes(), vec![408]);
    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Failed {
            cause: Cause::RequestTimeout,
            ..
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn invite_expires_header_is_honored() {
    let mut invite = build_invite(
        "sip:alice@example.com",
        "timer-7@example.com",
        "bob-tag",
        Some(OFFER_SDP),
    );
    invite.headers.push("Expires", "5");
    let mut peer = incoming_peer(invite);

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(peer.session.status(), SessionStatus::Terminated);
    assert_eq!(peer.transport.response_codes(), vec![487]);
    let events = drain(&mut peer.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Failed {
            originator: Originator::System,
            cause: Cause::Unavailable
        }
    )));
}

// --------------------------------------------------------------------
// Termination surface
// --------------------------------------------------------------------

#[tokio::test]
async fn terminate_confirmed_sends_bye_with_reason() {
    let (mut peer, _invite) = confirmed_outgoing().await;
    peer.session
        .terminate(TerminateOptions {
            status_code: Some(600),
            reason_phrase: Some(smol_str::SmolStr::new("Busy Everywhere")),
            ..Default::default()
        })
        .await
        .unwrap();

    let bye = peer.transport.last_request().unwrap();
    assert_eq!(*bye.method(), Method::Bye);
    assert_eq!(
        bye.headers.get("Reason").map(|v| v.as_str()),
        Some("SIP ;cause=600 ;text=\"Busy Everywhere\"")
    );
    assert_eq!(peer.session.status(), SessionStatus::Terminated);
    let events = drain(&mut peer.events);
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Ended {
            originator: Originator::Local,
            cause: Cause::Bye
        }
    )));
}

#[tokio::test]
async fn terminate_validates_status_code() {
    let (peer, _invite) = confirmed_outgoing().await;
    assert!(matches!(
        peer.session
            .terminate(TerminateOptions {
                status_code: Some(180),
                ..Default::default()
            })
            .await,
        Err(sip_session::SessionError::InvalidStatusCode(180))
    ));
    // Session untouched by the invalid call.
    assert_eq!(peer.session.status(), SessionStatus::Confirmed);
}

#[tokio::test]
async fn terminate_twice_is_invalid_state() {
    let (peer, _invite) = confirmed_outgoing().await;
    peer.session
        .terminate(TerminateOptions::default())
        .await
        .unwrap();
    assert!(matches!(
        peer.session.terminate(TerminateOptions::default()).await,
        Err(sip_session::SessionError::InvalidState(_))
    ));
}

#[tokio::test]
async fn transport_error_fails_unaccepted_session() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    peer.session.on_transport_error().await;
    assert_eq!(peer.session.status(), SessionStatus::Terminated);
    let events = drain(&mut peer.events);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Failed {
            cause: Cause::ConnectionError,
            ..
        }
    )));
}

#[tokio::test]
async fn engine_closed_after_termination() {
    let (peer, _invite) = confirmed_outgoing().await;
    assert!(!peer.engine.is_closed());
    peer.session
        .terminate(TerminateOptions::default())
        .await
        .unwrap();
    assert!(peer.engine.is_closed());
}

#[tokio::test]
async fn remote_description_failure_on_2xx_releases_call() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let invite = peer.transport.last_request().unwrap();
    peer.engine.fail_set_remote_description();
    peer.session
        .receive_response(respond_to(&invite, 200, Some("uas-tag"), Some(ANSWER_SDP)))
        .await;

    // ACK + BYE with 488, then failed(BAD_MEDIA_DESCRIPTION).
    let methods = peer.transport.request_methods();
    assert_eq!(methods, vec!["INVITE", "ACK", "BYE"]);
    let bye = peer.transport.last_request().unwrap();
    assert!(bye.headers.get("Reason").unwrap().contains("cause=488"));

    let events = drain(&mut peer.events);
    assert!(names(&events).contains(&"peerconnection:setremotedescriptionfailed"));
    assert_eq!(terminal_count(&events), 1);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Failed {
            cause: Cause::BadMediaDescription,
            ..
        }
    )));
}

#[tokio::test]
async fn provisional_media_failure_is_survivable() {
    let mut peer = outgoing_peer();
    peer.session
        .connect(
            "sip:bob@example.com",
            ConnectOptions {
                sdp: Some(OFFER_SDP.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let invite = peer.transport.last_request().unwrap();
    peer.engine.fail_set_remote_description();
    peer.session
        .receive_response(respond_to(&invite, 183, Some("uas-tag"), Some(ANSWER_SDP)))
        .await;

    assert_eq!(peer.session.status(), SessionStatus::Received1xx);
    let events = drain(&mut peer.events);
    assert!(names(&events).contains(&"peerconnection:setremotedescriptionfailed"));
    assert_eq!(terminal_count(&events), 0);
}
