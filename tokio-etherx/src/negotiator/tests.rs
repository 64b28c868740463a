// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use sasl::common::{Credentials, Identity};
use sasl::server::{Mechanism as ServerMechanism, MechanismError, Response};

use super::bind::{Bind, BindServer};
use super::sasl::{External, Sasl, SaslServer};
use super::starttls::{StartTls, StartTlsServer};
use super::*;
use crate::error::AuthError;
use crate::xmlstream::BoxTransport;

async fn open_pair() -> (XmlStream, XmlStream) {
    let (lhs, rhs) = tokio::io::duplex(65536);
    let mut client = XmlStream::new(Box::new(lhs), ns::CLIENT);
    let mut server = XmlStream::new(Box::new(rhs), ns::CLIENT);
    client.send_header(&StreamHeader::default()).await.unwrap();
    server.recv_header().await.unwrap();
    server.send_header(&StreamHeader::default()).await.unwrap();
    client.recv_header().await.unwrap();
    (client, server)
}

fn plain_client() -> Sasl {
    Sasl::new(vec![Box::new(|| {
        Box::new(
            sasl::client::mechanisms::Plain::from_credentials(
                Credentials::default()
                    .with_username("test")
                    .with_password(""),
            )
            .unwrap(),
        )
    })])
}

fn mechanisms_advert(names: &[&str]) -> Element {
    let mut xml = String::from("<mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>");
    for name in names {
        xml.push_str(&format!("<mechanism>{}</mechanism>", name));
    }
    xml.push_str("</mechanisms>");
    xml.parse().unwrap()
}

/// PLAIN for the receiving side: `authzid \0 user \0 password`, any
/// password accepted.
struct TestPlain;

impl ServerMechanism for TestPlain {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn respond(&mut self, payload: &[u8]) -> Result<Response, MechanismError> {
        let mut parts = payload.split(|&b| b == 0);
        let _authzid = parts.next();
        let user = parts
            .next()
            .ok_or(MechanismError::FailedToDecodeMessage)?;
        Ok(Response::Success(
            Identity::Username(String::from_utf8_lossy(user).into_owned()),
            Vec::new(),
        ))
    }
}

/// A two-step mechanism: one challenge round, then success.
struct TwoStep;

impl ServerMechanism for TwoStep {
    fn name(&self) -> &str {
        "TWO-STEP"
    }

    fn respond(&mut self, payload: &[u8]) -> Result<Response, MechanismError> {
        if payload.is_empty() {
            Ok(Response::Proceed(b"step2".to_vec()))
        } else {
            Ok(Response::Success(Identity::None, Vec::new()))
        }
    }
}

fn plain_server(permit: bool) -> SaslServer {
    SaslServer::new(
        vec![Box::new(|| Box::new(TestPlain))],
        Box::new(move |_identity| permit),
    )
}

fn passthrough_upgrader() -> crate::xmlstream::TransportUpgrader {
    Box::new(|io: BoxTransport| Box::pin(async move { Ok(io) }))
}

#[test]
#[should_panic(expected = "without mechanisms")]
fn sasl_without_mechanisms_panics() {
    let _ = Sasl::new(Vec::new());
}

#[test]
#[should_panic(expected = "without mechanisms")]
fn sasl_server_without_mechanisms_panics() {
    let _ = SaslServer::new(Vec::new(), Box::new(|_| true));
}

#[tokio::test]
async fn sasl_client_plain_success() {
    let (mut client, server) = open_pair().await;
    let server_task = tokio::spawn(async move {
        let mut server = server;
        let elem = server.read_element().await.unwrap().unwrap();
        assert!(elem.is("auth", ns::SASL));
        assert_eq!(elem.attr("mechanism"), Some("PLAIN"));
        assert_eq!(elem.text(), "AHRlc3QA");
        server
            .send_element(&Element::builder("success", ns::SASL).build())
            .await
            .unwrap();
    });

    let feature = plain_client();
    let (required, data) = feature
        .parse(SessionState::EMPTY, &mechanisms_advert(&["PLAIN"]))
        .unwrap();
    assert!(required);
    assert!(feature.needs_restart());
    let outcome = feature
        .negotiate(&mut client, SessionState::EMPTY, data)
        .await
        .unwrap();
    assert!(outcome.mask.contains(SessionState::AUTHN));
    server_task.await.unwrap();
}

#[tokio::test]
async fn sasl_client_failure_condition() {
    let (mut client, server) = open_pair().await;
    let server_task = tokio::spawn(async move {
        let mut server = server;
        let _auth = server.read_element().await.unwrap().unwrap();
        let failure: Element =
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>"
                .parse()
                .unwrap();
        server.send_element(&failure).await.unwrap();
    });

    let feature = plain_client();
    let (_, data) = feature
        .parse(SessionState::EMPTY, &mechanisms_advert(&["PLAIN"]))
        .unwrap();
    match feature.negotiate(&mut client, SessionState::EMPTY, data).await {
        Err(Error::Auth(AuthError::Fail(condition))) => {
            assert_eq!(condition.name(), "not-authorized");
        }
        other => panic!("unexpected outcome: {:?}", other.map(|_| ()).err()),
    }
    server_task.await.unwrap();
}

#[tokio::test]
async fn sasl_client_unexpected_payload() {
    let (mut client, server) = open_pair().await;
    let server_task = tokio::spawn(async move {
        let mut server = server;
        let _auth = server.read_element().await.unwrap().unwrap();
        let stray: Element = "<abb xmlns='urn:example:stray'/>".parse().unwrap();
        server.send_element(&stray).await.unwrap();
    });

    let feature = plain_client();
    let (_, data) = feature
        .parse(SessionState::EMPTY, &mechanisms_advert(&["PLAIN"]))
        .unwrap();
    match feature.negotiate(&mut client, SessionState::EMPTY, data).await {
        Err(Error::Protocol(ProtocolError::UnexpectedPayload)) => (),
        other => panic!("unexpected outcome: {:?}", other.map(|_| ()).err()),
    }
    server_task.await.unwrap();
}

#[tokio::test]
async fn sasl_client_prefers_local_order() {
    let (mut client, server) = open_pair().await;
    let server_task = tokio::spawn(async move {
        let mut server = server;
        let elem = server.read_element().await.unwrap().unwrap();
        // The peer offered PLAIN first, but EXTERNAL is first in the local
        // configuration.
        assert_eq!(elem.attr("mechanism"), Some("EXTERNAL"));
        server
            .send_element(&Element::builder("success", ns::SASL).build())
            .await
            .unwrap();
    });

    let feature = Sasl::new(vec![
        Box::new(|| Box::new(External::new())),
        Box::new(|| {
            Box::new(
                sasl::client::mechanisms::Plain::from_credentials(
                    Credentials::default()
                        .with_username("test")
                        .with_password(""),
                )
                .unwrap(),
            )
        }),
    ]);
    let (_, data) = feature
        .parse(
            SessionState::EMPTY,
            &mechanisms_advert(&["PLAIN", "EXTERNAL"]),
        )
        .unwrap();
    let outcome = feature
        .negotiate(&mut client, SessionState::EMPTY, data)
        .await
        .unwrap();
    assert!(outcome.mask.contains(SessionState::AUTHN));
    server_task.await.unwrap();
}

#[tokio::test]
async fn sasl_client_no_common_mechanism() {
    let (mut client, _server) = open_pair().await;
    let feature = plain_client();
    let (_, data) = feature
        .parse(SessionState::EMPTY, &mechanisms_advert(&["SCRAM-SHA-1"]))
        .unwrap();
    match feature.negotiate(&mut client, SessionState::EMPTY, data).await {
        Err(Error::Auth(AuthError::NoMechanism)) => (),
        other => panic!("unexpected outcome: {:?}", other.map(|_| ()).err()),
    }
}

async fn run_server_negotiate(
    feature: SaslServer,
    opener: Element,
) -> (Result<Negotiated, Error>, Vec<Element>) {
    let (client, mut server) = open_pair().await;
    let client_task = tokio::spawn(async move {
        let mut client = client;
        let mut written = Vec::new();
        while let Ok(Some(elem)) = client.read_element().await {
            written.push(elem);
        }
        written
    });
    let result = feature
        .negotiate(&mut server, SessionState::RECEIVED, Box::new(opener))
        .await;
    // Let the scripted peer observe everything we wrote.
    server.send_footer().await.unwrap();
    let written = client_task.await.unwrap();
    (result, written)
}

#[tokio::test]
async fn sasl_server_plain_success() {
    let auth: Element =
        "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>AHRlc3QA</auth>"
            .parse()
            .unwrap();
    let (result, written) = run_server_negotiate(plain_server(true), auth).await;
    let outcome = result.unwrap();
    assert!(outcome.mask.contains(SessionState::AUTHN));
    assert_eq!(outcome.identity.as_deref(), Some("test"));
    assert_eq!(written.len(), 1);
    assert!(written[0].is("success", ns::SASL));
}

#[tokio::test]
async fn sasl_server_rejected_identity() {
    let auth: Element =
        "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>AHRlc3QA</auth>"
            .parse()
            .unwrap();
    let (result, written) = run_server_negotiate(plain_server(false), auth).await;
    match result {
        Err(Error::Auth(AuthError::Authn)) => (),
        other => panic!("unexpected outcome: {:?}", other.map(|_| ()).err()),
    }
    assert!(written[0].is("failure", ns::SASL));
    assert!(written[0]
        .children()
        .next()
        .unwrap()
        .is("not-authorized", ns::SASL));
}

#[tokio::test]
async fn sasl_server_abort() {
    let abort: Element = "<abort xmlns='urn:ietf:params:xml:ns:xmpp-sasl'/>".parse().unwrap();
    let (result, written) = run_server_negotiate(plain_server(true), abort).await;
    match result {
        Err(Error::Protocol(ProtocolError::Terminated)) => (),
        other => panic!("unexpected outcome: {:?}", other.map(|_| ()).err()),
    }
    assert!(written[0].is("failure", ns::SASL));
    assert!(written[0].children().next().unwrap().is("aborted", ns::SASL));
}

#[tokio::test]
async fn sasl_server_malformed_opener() {
    let stray: Element = "<abb xmlns='urn:example:stray'/>".parse().unwrap();
    let (result, written) = run_server_negotiate(plain_server(true), stray).await;
    match result {
        Err(Error::Protocol(ProtocolError::UnexpectedPayload)) => (),
        other => panic!("unexpected outcome: {:?}", other.map(|_| ()).err()),
    }
    assert!(written[0].is("failure", ns::SASL));
    assert!(written[0]
        .children()
        .next()
        .unwrap()
        .is("malformed-request", ns::SASL));
}

#[tokio::test]
async fn sasl_server_unknown_mechanism() {
    let auth: Element =
        "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='SCRAM-SHA-1'/>"
            .parse()
            .unwrap();
    let (result, written) = run_server_negotiate(plain_server(true), auth).await;
    match result {
        Err(Error::Auth(AuthError::NoMechanism)) => (),
        other => panic!("unexpected outcome: {:?}", other.map(|_| ()).err()),
    }
    assert!(written[0]
        .children()
        .next()
        .unwrap()
        .is("invalid-mechanism", ns::SASL));
}

#[tokio::test]
async fn sasl_server_challenge_round() {
    let (client, mut server) = open_pair().await;
    let client_task = tokio::spawn(async move {
        let mut client = client;
        let challenge = client.read_element().await.unwrap().unwrap();
        assert!(challenge.is("challenge", ns::SASL));
        // base64("step2")
        assert_eq!(challenge.text(), "c3RlcDI=");
        let response: Element =
            "<response xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>eA==</response>"
                .parse()
                .unwrap();
        client.send_element(&response).await.unwrap();
        let success = client.read_element().await.unwrap().unwrap();
        assert!(success.is("success", ns::SASL));
    });

    let feature = SaslServer::new(
        vec![Box::new(|| Box::new(TwoStep))],
        Box::new(|_| true),
    );
    let auth: Element =
        "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='TWO-STEP'/>"
            .parse()
            .unwrap();
    let outcome = feature
        .negotiate(&mut server, SessionState::RECEIVED, Box::new(auth))
        .await
        .unwrap();
    assert!(outcome.mask.contains(SessionState::AUTHN));
    client_task.await.unwrap();
}

#[tokio::test]
async fn bind_client_adopts_assigned_jid() {
    let (mut client, server) = open_pair().await;
    let server_task = tokio::spawn(async move {
        let mut server = server;
        let elem = server.read_element().await.unwrap().unwrap();
        let iq = crate::parsers::iq::Iq::from_element(&elem, ns::CLIENT).unwrap();
        let id = iq.id.clone();
        match iq.payload {
            crate::parsers::iq::IqType::Set(payload) => {
                let query = crate::parsers::bind::BindQuery::try_from(payload).unwrap();
                assert_eq!(query.resource(), Some("balcony"));
            }
            other => panic!("wrong iq payload: {:?}", other),
        }
        let reply: Element = format!(
            "<iq xmlns='jabber:client' type='result' id='{}'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@example.com/balcony</jid></bind></iq>",
            id
        )
        .parse()
        .unwrap();
        server.send_element(&reply).await.unwrap();
    });

    let feature = Bind::new(Some("balcony".to_owned()));
    let advert: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>".parse().unwrap();
    let (required, data) = feature.parse(SessionState::AUTHN, &advert).unwrap();
    assert!(required);
    let outcome = feature
        .negotiate(&mut client, SessionState::AUTHN, data)
        .await
        .unwrap();
    assert_eq!(
        outcome.bound.unwrap(),
        jid::Jid::new("juliet@example.com/balcony").unwrap()
    );
    server_task.await.unwrap();
}

#[tokio::test]
async fn bind_server_assigns_resource() {
    let (client, mut server) = open_pair().await;
    let client_task = tokio::spawn(async move {
        let mut client = client;
        let elem = client.read_element().await.unwrap().unwrap();
        let iq = crate::parsers::iq::Iq::from_element(&elem, ns::CLIENT).unwrap();
        assert_eq!(iq.id, "bind-1");
        match iq.payload {
            crate::parsers::iq::IqType::Result(Some(payload)) => {
                let response = crate::parsers::bind::BindResponse::try_from(payload).unwrap();
                assert_eq!(
                    jid::FullJid::from(response),
                    jid::FullJid::new("test@example.net/mobile").unwrap()
                );
            }
            other => panic!("wrong iq payload: {:?}", other),
        }
    });

    let feature = BindServer::new(Box::new(|resource| {
        let resource = resource.unwrap_or_else(|| "generated".to_owned());
        Ok(jid::FullJid::new(&format!("test@example.net/{}", resource)).unwrap())
    }));
    let opener: Element = "<iq xmlns='jabber:client' type='set' id='bind-1'><bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><resource>mobile</resource></bind></iq>"
        .parse()
        .unwrap();
    let outcome = feature
        .negotiate(&mut server, SessionState::RECEIVED | SessionState::AUTHN, Box::new(opener))
        .await
        .unwrap();
    assert_eq!(
        outcome.bound.unwrap(),
        jid::Jid::new("test@example.net/mobile").unwrap()
    );
    client_task.await.unwrap();
}

#[tokio::test]
async fn starttls_client_proceed() {
    let (mut client, server) = open_pair().await;
    let server_task = tokio::spawn(async move {
        let mut server = server;
        let elem = server.read_element().await.unwrap().unwrap();
        assert!(elem.is("starttls", ns::TLS));
        server
            .send_element(&Element::builder("proceed", ns::TLS).build())
            .await
            .unwrap();
    });

    let feature = StartTls::new(passthrough_upgrader());
    let advert: Element =
        "<starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>"
            .parse()
            .unwrap();
    let (required, data) = feature.parse(SessionState::EMPTY, &advert).unwrap();
    assert!(required);
    let outcome = feature
        .negotiate(&mut client, SessionState::EMPTY, data)
        .await
        .unwrap();
    assert!(outcome.mask.contains(SessionState::SECURE));
    assert!(outcome.upgrade.is_some());
    server_task.await.unwrap();
}

#[tokio::test]
async fn full_negotiation_reaches_ready_on_both_sides() {
    let (lhs, rhs) = tokio::io::duplex(65536);

    let client_task = tokio::spawn(async move {
        let negotiator = Negotiator::new(vec![
            Box::new(StartTls::new(passthrough_upgrader())),
            Box::new(plain_client()),
            Box::new(Bind::new(Some("balcony".to_owned()))),
        ]);
        let stream = XmlStream::new(Box::new(lhs), ns::CLIENT);
        let header = StreamHeader {
            from: Some("test@example.net".to_owned()),
            to: Some("example.net".to_owned()),
            ..StreamHeader::default()
        };
        let make_id = || -> String { unreachable!("the initiating side mints no stream ids") };
        negotiator
            .run(stream, SessionState::EMPTY, &header, &make_id)
            .await
    });

    let server_task = tokio::spawn(async move {
        let negotiator = Negotiator::new(vec![
            Box::new(StartTlsServer::new(passthrough_upgrader())),
            Box::new(plain_server(true)),
            Box::new(BindServer::new(Box::new(|resource| {
                let resource = resource.unwrap_or_else(|| "generated".to_owned());
                Ok(jid::FullJid::new(&format!("test@example.net/{}", resource)).unwrap())
            }))),
        ]);
        let stream = XmlStream::new(Box::new(rhs), ns::CLIENT);
        let header = StreamHeader {
            from: Some("example.net".to_owned()),
            ..StreamHeader::default()
        };
        let make_id = || "sid".to_owned();
        negotiator
            .run(stream, SessionState::RECEIVED, &header, &make_id)
            .await
    });

    let server_outcome = server_task.await.unwrap().expect("server negotiation");
    let client_outcome = client_task.await.unwrap().expect("client negotiation");

    assert!(client_outcome.state.contains(
        SessionState::READY | SessionState::SECURE | SessionState::AUTHN
    ));
    assert_eq!(
        client_outcome.bound.unwrap(),
        jid::Jid::new("test@example.net/balcony").unwrap()
    );

    assert!(server_outcome.state.contains(
        SessionState::RECEIVED | SessionState::READY | SessionState::SECURE | SessionState::AUTHN
    ));
    assert_eq!(
        server_outcome.bound.unwrap(),
        jid::Jid::new("test@example.net/balcony").unwrap()
    );
    assert_eq!(server_outcome.identity.as_deref(), Some("test"));
}

#[tokio::test]
async fn required_unimplemented_advertisement_is_fatal() {
    let (lhs, rhs) = tokio::io::duplex(65536);

    let server_task = tokio::spawn(async move {
        let mut server = XmlStream::new(Box::new(rhs), ns::CLIENT);
        server.recv_header().await.unwrap();
        server.send_header(&StreamHeader::default()).await.unwrap();
        let exotic: Element = "<exotic xmlns='urn:example:exotic'><required/></exotic>"
            .parse()
            .unwrap();
        server.send_features(vec![exotic]).await.unwrap();
    });

    let negotiator = Negotiator::new(vec![Box::new(plain_client())]);
    let stream = XmlStream::new(Box::new(lhs), ns::CLIENT);
    let make_id = || -> String { unreachable!("the initiating side mints no stream ids") };
    match negotiator
        .run(stream, SessionState::EMPTY, &StreamHeader::default(), &make_id)
        .await
    {
        Err(Error::Protocol(ProtocolError::UnsupportedRequiredFeature)) => (),
        other => panic!("unexpected outcome: {:?}", other.map(|_| ()).err()),
    }
    server_task.await.unwrap();
}

#[tokio::test]
async fn optional_unimplemented_advertisement_is_skipped() {
    let (lhs, rhs) = tokio::io::duplex(65536);

    let server_task = tokio::spawn(async move {
        let mut server = XmlStream::new(Box::new(rhs), ns::CLIENT);
        server.recv_header().await.unwrap();
        server.send_header(&StreamHeader::default()).await.unwrap();
        let exotic: Element = "<exotic xmlns='urn:example:exotic'/>".parse().unwrap();
        server.send_features(vec![exotic]).await.unwrap();
    });

    let negotiator = Negotiator::new(vec![Box::new(plain_client())]);
    let stream = XmlStream::new(Box::new(lhs), ns::CLIENT);
    let make_id = || -> String { unreachable!("the initiating side mints no stream ids") };
    let outcome = negotiator
        .run(stream, SessionState::EMPTY, &StreamHeader::default(), &make_id)
        .await
        .expect("optional unknown features must not block readiness");
    assert!(outcome.state.contains(SessionState::READY));
    assert!(!outcome.state.contains(SessionState::AUTHN));
    server_task.await.unwrap();
}

#[tokio::test]
async fn sasl_and_bind_without_tls() {
    let (lhs, rhs) = tokio::io::duplex(65536);

    let client_task = tokio::spawn(async move {
        let negotiator = Negotiator::new(vec![
            Box::new(plain_client()),
            Box::new(Bind::new(None)),
        ]);
        let stream = XmlStream::new(Box::new(lhs), ns::CLIENT);
        let make_id = || -> String { unreachable!("the initiating side mints no stream ids") };
        negotiator
            .run(stream, SessionState::EMPTY, &StreamHeader::default(), &make_id)
            .await
    });

    let server_task = tokio::spawn(async move {
        let negotiator = Negotiator::new(vec![
            Box::new(plain_server(true)),
            Box::new(BindServer::new(Box::new(|_resource| {
                Ok(jid::FullJid::new("test@example.net/generated").unwrap())
            }))),
        ]);
        let stream = XmlStream::new(Box::new(rhs), ns::CLIENT);
        let make_id = || "sid".to_owned();
        negotiator
            .run(stream, SessionState::RECEIVED, &StreamHeader::default(), &make_id)
            .await
    });

    let server_outcome = server_task.await.unwrap().expect("server negotiation");
    let client_outcome = client_task.await.unwrap().expect("client negotiation");
    assert!(!client_outcome.state.contains(SessionState::SECURE));
    assert!(client_outcome.state.contains(SessionState::READY | SessionState::AUTHN));
    assert_eq!(
        client_outcome.bound.unwrap(),
        jid::Jid::new("test@example.net/generated").unwrap()
    );
    assert!(server_outcome.state.contains(SessionState::READY));
}
