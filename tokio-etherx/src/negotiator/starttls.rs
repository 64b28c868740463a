// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The STARTTLS stream feature (RFC 6120 § 5).
//!
//! TLS itself is not implemented here; the feature is constructed around a
//! [`TransportUpgrader`] capability provided by the host application and
//! only drives the `<starttls/>`/`<proceed/>` exchange around it.

use std::sync::Arc;

use futures::future::BoxFuture;
use minidom::Element;

use crate::error::{Error, ProtocolError};
use crate::parsers::ns;
use crate::state::SessionState;
use crate::xmlstream::{TransportUpgrader, XmlStream};

use super::{FeatureData, Negotiated, StreamFeature};

/// STARTTLS in the initiating role.
pub struct StartTls {
    upgrade: Arc<TransportUpgrader>,
}

impl StartTls {
    /// Build the feature around a transport upgrade capability.
    pub fn new(upgrade: TransportUpgrader) -> StartTls {
        StartTls {
            upgrade: Arc::new(upgrade),
        }
    }
}

impl StreamFeature for StartTls {
    fn name(&self) -> (&'static str, &'static str) {
        (ns::TLS, "starttls")
    }

    fn needs_restart(&self) -> bool {
        true
    }

    fn advertise(&self, _state: SessionState) -> Option<(Element, bool)> {
        None
    }

    fn parse(&self, _state: SessionState, elem: &Element) -> Result<(bool, FeatureData), Error> {
        let required = elem.children().any(|child| child.is("required", ns::TLS));
        Ok((required, Box::new(())))
    }

    fn negotiate<'a>(
        &'a self,
        stream: &'a mut XmlStream,
        _state: SessionState,
        _data: FeatureData,
    ) -> BoxFuture<'a, Result<Negotiated, Error>> {
        Box::pin(async move {
            let starttls = Element::builder("starttls", ns::TLS).build();
            stream.send_element(&starttls).await?;

            let elem = stream.read_element().await?.ok_or(Error::Disconnected)?;
            if elem.is("proceed", ns::TLS) {
                Ok(Negotiated {
                    mask: SessionState::SECURE,
                    upgrade: Some(Arc::clone(&self.upgrade)),
                    ..Negotiated::default()
                })
            } else if elem.is("failure", ns::TLS) {
                Err(ProtocolError::Terminated.into())
            } else {
                Err(ProtocolError::UnexpectedPayload.into())
            }
        })
    }
}

/// STARTTLS in the receiving role.
///
/// Advertised as mandatory until the transport is secured.
pub struct StartTlsServer {
    upgrade: Arc<TransportUpgrader>,
}

impl StartTlsServer {
    /// Build the feature around a transport acceptor capability.
    pub fn new(upgrade: TransportUpgrader) -> StartTlsServer {
        StartTlsServer {
            upgrade: Arc::new(upgrade),
        }
    }
}

impl StreamFeature for StartTlsServer {
    fn name(&self) -> (&'static str, &'static str) {
        (ns::TLS, "starttls")
    }

    fn needs_restart(&self) -> bool {
        true
    }

    fn advertise(&self, state: SessionState) -> Option<(Element, bool)> {
        if state.contains(SessionState::SECURE) {
            return None;
        }
        let advert = Element::builder("starttls", ns::TLS)
            .append(Element::builder("required", ns::TLS))
            .build();
        Some((advert, true))
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
            if !opener.is("starttls", ns::TLS) {
                stream
                    .send_element(&Element::builder("failure", ns::TLS).build())
                    .await?;
                return Err(ProtocolError::UnexpectedPayload.into());
            }
            // The proceed must be the last element on the unencrypted
            // transport; the negotiator applies the upgrade right after.
            stream
                .send_element(&Element::builder("proceed", ns::TLS).build())
                .await?;
            Ok(Negotiated {
                mask: SessionState::SECURE,
                upgrade: Some(Arc::clone(&self.upgrade)),
                ..Negotiated::default()
            })
        })
    }
}
