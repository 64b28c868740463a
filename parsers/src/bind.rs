// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resource binding (RFC 6120 § 7).

use core::str::FromStr;

use jid::{FullJid, Jid};
use minidom::Element;
use xso::error::{Error, FromElementError};

use crate::ns;

/// The request by which a client obtains a full JID.
#[derive(Debug, Clone, PartialEq)]
pub struct BindQuery {
    resource: Option<String>,
}

impl BindQuery {
    /// Request the given resource, or a server-generated one if `None`.
    pub fn new(resource: Option<String>) -> BindQuery {
        BindQuery { resource }
    }

    /// The requested resource, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }
}

impl TryFrom<Element> for BindQuery {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<BindQuery, FromElementError> {
        if !elem.is("bind", ns::BIND) {
            return Err(FromElementError::Mismatch(elem));
        }

        let mut resource = None;
        for child in elem.children() {
            if resource.is_some() {
                return Err(Error::Other("Bind can only have one child.").into());
            }
            if child.is("resource", ns::BIND) {
                resource = Some(child.text());
            } else {
                return Err(Error::Other("Unknown element in bind request.").into());
            }
        }

        Ok(BindQuery { resource })
    }
}

impl From<BindQuery> for Element {
    fn from(bind: BindQuery) -> Element {
        Element::builder("bind", ns::BIND)
            .append_all(
                bind.resource
                    .map(|resource| Element::builder("resource", ns::BIND).append(resource)),
            )
            .build()
    }
}

/// The server's answer, carrying the bound full JID.
#[derive(Debug, Clone, PartialEq)]
pub struct BindResponse {
    jid: FullJid,
}

impl BindResponse {
    /// Wrap an assigned JID.
    pub fn new(jid: FullJid) -> BindResponse {
        BindResponse { jid }
    }
}

impl From<BindResponse> for FullJid {
    fn from(bind: BindResponse) -> FullJid {
        bind.jid
    }
}

impl From<BindResponse> for Jid {
    fn from(bind: BindResponse) -> Jid {
        Jid::from(bind.jid)
    }
}

impl TryFrom<Element> for BindResponse {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<BindResponse, FromElementError> {
        if !elem.is("bind", ns::BIND) {
            return Err(FromElementError::Mismatch(elem));
        }

        let mut jid = None;
        for child in elem.children() {
            if jid.is_some() {
                return Err(Error::Other("Bind can only have one child.").into());
            }
            if child.is("jid", ns::BIND) {
                jid = Some(FullJid::from_str(&child.text()).map_err(Error::text_parse_error)?);
            } else {
                return Err(Error::Other("Unknown element in bind response.").into());
            }
        }

        match jid {
            Some(jid) => Ok(BindResponse { jid }),
            None => Err(Error::Other("Bind response must contain a jid element.").into()),
        }
    }
}

impl From<BindResponse> for Element {
    fn from(bind: BindResponse) -> Element {
        Element::builder("bind", ns::BIND)
            .append(Element::builder("jid", ns::BIND).append(bind.jid.to_string()))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_without_resource() {
        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>"
            .parse()
            .unwrap();
        let bind = BindQuery::try_from(elem).unwrap();
        assert_eq!(bind.resource(), None);
    }

    #[test]
    fn query_with_resource() {
        let elem: Element =
            "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><resource>balcony</resource></bind>"
                .parse()
                .unwrap();
        let bind = BindQuery::try_from(elem).unwrap();
        assert_eq!(bind.resource(), Some("balcony"));
    }

    #[test]
    fn response() {
        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'><jid>juliet@example.com/balcony</jid></bind>"
            .parse()
            .unwrap();
        let bind = BindResponse::try_from(elem).unwrap();
        assert_eq!(
            FullJid::from(bind),
            FullJid::new("juliet@example.com/balcony").unwrap()
        );
    }

    #[test]
    fn response_without_jid_is_rejected() {
        let elem: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>"
            .parse()
            .unwrap();
        assert!(BindResponse::try_from(elem).is_err());
    }

    #[test]
    fn query_round_trip() {
        let bind = BindQuery::new(Some(String::from("orchard")));
        let elem = Element::from(bind.clone());
        assert_eq!(BindQuery::try_from(elem).unwrap(), bind);
    }
}
