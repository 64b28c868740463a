// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The resource binding stream feature (RFC 6120 § 7).

use futures::future::BoxFuture;
use jid::{FullJid, Jid};
use minidom::Element;

use crate::error::{Error, ProtocolError};
use crate::parsers::bind::{BindQuery, BindResponse};
use crate::parsers::iq::{Iq, IqType};
use crate::parsers::ns;
use crate::parsers::stanza_error::{DefinedCondition, ErrorType, StanzaError};
use crate::state::SessionState;
use crate::xmlstream::XmlStream;

use super::{FeatureData, Negotiated, StreamFeature};

const BIND_REQ_ID: &str = "resource-bind";

/// Resource binding in the initiating role.
pub struct Bind {
    resource: Option<String>,
}

impl Bind {
    /// Request the given resource, or let the server pick one if `None`.
    pub fn new(resource: Option<String>) -> Bind {
        Bind { resource }
    }
}

impl StreamFeature for Bind {
    fn name(&self) -> (&'static str, &'static str) {
        (ns::BIND, "bind")
    }

    fn advertise(&self, _state: SessionState) -> Option<(Element, bool)> {
        None
    }

    fn parse(&self, _state: SessionState, _elem: &Element) -> Result<(bool, FeatureData), Error> {
        Ok((true, Box::new(())))
    }

    fn negotiate<'a>(
        &'a self,
        stream: &'a mut XmlStream,
        _state: SessionState,
        _data: FeatureData,
    ) -> BoxFuture<'a, Result<Negotiated, Error>> {
        Box::pin(async move {
            let iq = Iq::from_set(
                BIND_REQ_ID,
                Element::from(BindQuery::new(self.resource.clone())),
            );
            stream
                .send_element(&iq.into_element(stream.stream_ns()))
                .await?;

            loop {
                let elem = stream.read_element().await?.ok_or(Error::Disconnected)?;
                let iq = match Iq::from_element(&elem, stream.stream_ns()) {
                    Ok(iq) if iq.id == BIND_REQ_ID => iq,
                    Ok(_) | Err(_) => {
                        log::warn!("ignoring unexpected element during resource binding");
                        continue;
                    }
                };
                match iq.payload {
                    IqType::Result(Some(payload)) => {
                        let response = BindResponse::try_from(payload)
                            .map_err(|_| ProtocolError::InvalidBindResponse)?;
                        return Ok(Negotiated {
                            bound: Some(Jid::from(FullJid::from(response))),
                            ..Negotiated::default()
                        });
                    }
                    _ => return Err(ProtocolError::InvalidBindResponse.into()),
                }
            }
        })
    }
}

/// The capability to assign a resource, injected by the host application.
///
/// Receives the resource requested by the peer (if any) and returns the
/// full JID the session is bound to.
pub type ResourceAssigner = Box<dyn Fn(Option<String>) -> Result<FullJid, Error> + Send + Sync>;

/// Resource binding in the receiving role.
///
/// Advertised once the peer has authenticated.
pub struct BindServer {
    assign: ResourceAssigner,
}

impl BindServer {
    /// Build the feature around a resource assigner.
    pub fn new(assign: ResourceAssigner) -> BindServer {
        BindServer { assign }
    }
}

impl StreamFeature for BindServer {
    fn name(&self) -> (&'static str, &'static str) {
        (ns::BIND, "bind")
    }

    fn advertise(&self, state: SessionState) -> Option<(Element, bool)> {
        if !state.contains(SessionState::AUTHN) {
            return None;
        }
        Some((Element::builder("bind", ns::BIND).build(), true))
    }

    fn parse(&self, _state: SessionState, _elem: &Element) -> Result<(bool, FeatureData), Error> {
        Ok((true, Box::new(())))
    }

    fn negotiate<'a>(
        &'a self,
        stream: &'a mut XmlStream,
        _state: SessionState,
        data: FeatureData,
    ) -> BoxFuture<'a, Result<Negotiated, Error>> {
        Box::pin(async move {
            let opener = *data.downcast::<Element>().map_err(|_| Error::InvalidState)?;
            let iq = Iq::from_element(&opener, stream.stream_ns())?;
            let query = match &iq.payload {
                IqType::Set(payload) => BindQuery::try_from(payload.clone()),
                _ => {
                    let reply = iq
                        .error_reply(StanzaError::new(ErrorType::Modify, DefinedCondition::BadRequest));
                    stream
                        .send_element(&reply.into_element(stream.stream_ns()))
                        .await?;
                    return Err(ProtocolError::UnexpectedPayload.into());
                }
            };
            let query = match query {
                Ok(query) => query,
                Err(e) => {
                    let reply = iq
                        .error_reply(StanzaError::new(ErrorType::Modify, DefinedCondition::BadRequest));
                    stream
                        .send_element(&reply.into_element(stream.stream_ns()))
                        .await?;
                    return Err(e.into());
                }
            };

            let jid = (self.assign)(query.resource().map(str::to_owned))?;
            let reply = iq.result_reply(Some(Element::from(BindResponse::new(jid.clone()))));
            stream
                .send_element(&reply.into_element(stream.stream_ns()))
                .await?;
            Ok(Negotiated {
                bound: Some(Jid::from(jid)),
                ..Negotiated::default()
            })
        })
    }
}
