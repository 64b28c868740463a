// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Two in-process sessions over a pipe: one accepts, one initiates, and a
//! ping makes the round trip. No network, no TLS; the point is the shape
//! of the API.

use std::sync::Arc;

use sasl::common::{Credentials, Identity};
use sasl::server::{Mechanism, MechanismError, Response};

use tokio_etherx::jid::{FullJid, Jid};
use tokio_etherx::minidom::Element;
use tokio_etherx::mux::{Name, ServeMux};
use tokio_etherx::negotiator::bind::{Bind, BindServer};
use tokio_etherx::negotiator::sasl::{Sasl, SaslServer};
use tokio_etherx::parsers::iq::Iq;
use tokio_etherx::parsers::ns;
use tokio_etherx::{Error, Session, SessionConfig};

/// PLAIN which accepts every password. Do not deploy this.
struct AnyPassword;

impl Mechanism for AnyPassword {
    fn name(&self) -> &str {
        "PLAIN"
    }

    fn respond(&mut self, payload: &[u8]) -> Result<Response, MechanismError> {
        let mut parts = payload.split(|&b| b == 0);
        let _authzid = parts.next();
        let user = parts.next().ok_or(MechanismError::FailedToDecodeMessage)?;
        Ok(Response::Success(
            Identity::Username(String::from_utf8_lossy(user).into_owned()),
            Vec::new(),
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let (client_io, server_io) = tokio::io::duplex(65536);

    let server = tokio::spawn(async move {
        let config = SessionConfig::new(Jid::new("example.net")?)
            .feature(SaslServer::new(
                vec![Box::new(|| Box::new(AnyPassword))],
                Box::new(|_identity| true),
            ))
            .feature(BindServer::new(Box::new(|resource| {
                let resource = resource.unwrap_or_else(|| "pipe".to_owned());
                Ok(FullJid::new(&format!("romeo@example.net/{}", resource))
                    .expect("static jid"))
            })));
        let session = Session::server(config, Box::new(server_io)).await?;
        println!("server: peer bound to {}", session.remote_addr().unwrap());

        let mux = Arc::new(
            ServeMux::builder()
                .iq_fn("get", Name::new(ns::PING, "ping"), |_session, iq| async move {
                    println!("server: ping {} received", iq.id);
                    Ok(None)
                })
                .build(),
        );
        session.serve(mux).await
    });

    let config = SessionConfig::new(Jid::new("romeo@example.net")?)
        .feature(Sasl::for_credentials(
            Credentials::default()
                .with_username("romeo")
                .with_password("wherefore"),
        ))
        .feature(Bind::new(None));
    let session = Session::client(config, Box::new(client_io)).await?;
    println!("client: bound to {}", session.local_addr());

    let handle = session.handle();
    let serving = tokio::spawn(session.serve(Arc::new(ServeMux::builder().build())));

    let ping: Element = "<ping xmlns='urn:xmpp:ping'/>".parse().expect("static xml");
    let response = handle.send_iq(Iq::from_get("ping", ping)).await?.await?;
    println!("client: pong {}", response.id);

    handle.close().await?;
    serving.await.expect("serve task")?;
    server.await.expect("server task")?;
    Ok(())
}
