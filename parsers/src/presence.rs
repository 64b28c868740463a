// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<presence/>` stanza (RFC 6120 § 8.2.2, RFC 6121 § 4).

use core::fmt;
use core::str::FromStr;

use jid::Jid;
use minidom::rxml::NcName;
use minidom::Element;
use xso::error::Error;

/// The `type` attribute of a presence.
///
/// Availability is signalled by the *absence* of the attribute, represented
/// here as [`PresenceType::None`], which serialises to no attribute at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceType {
    /// No type attribute: the sender is available.
    #[default]
    None,

    /// An error occurred processing a previously sent presence.
    Error,

    /// A server-generated request for the recipient's current presence.
    Probe,

    /// The sender wishes to subscribe to the recipient's presence.
    Subscribe,

    /// The sender has allowed the recipient to receive their presence.
    Subscribed,

    /// The sender is no longer available.
    Unavailable,

    /// The sender is unsubscribing from the recipient's presence.
    Unsubscribe,

    /// The subscription has been denied or cancelled.
    Unsubscribed,
}

impl FromStr for PresenceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<PresenceType, Error> {
        Ok(match s {
            "" => PresenceType::None,
            "error" => PresenceType::Error,
            "probe" => PresenceType::Probe,
            "subscribe" => PresenceType::Subscribe,
            "subscribed" => PresenceType::Subscribed,
            "unavailable" => PresenceType::Unavailable,
            "unsubscribe" => PresenceType::Unsubscribe,
            "unsubscribed" => PresenceType::Unsubscribed,
            _ => return Err(Error::Other("Invalid 'type' attribute on presence.")),
        })
    }
}

impl PresenceType {
    /// The wire value; empty for [`PresenceType::None`].
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceType::None => "",
            PresenceType::Error => "error",
            PresenceType::Probe => "probe",
            PresenceType::Subscribe => "subscribe",
            PresenceType::Subscribed => "subscribed",
            PresenceType::Unavailable => "unavailable",
            PresenceType::Unsubscribe => "unsubscribe",
            PresenceType::Unsubscribed => "unsubscribed",
        }
    }
}

impl fmt::Display for PresenceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presence stanza.
#[derive(Debug, Clone, PartialEq)]
pub struct Presence {
    /// The sender.
    pub from: Option<Jid>,

    /// The recipient; broadcast via the server when absent.
    pub to: Option<Jid>,

    /// The optional stanza identifier.
    pub id: Option<String>,

    /// The presence type.
    pub type_: PresenceType,

    /// The `xml:lang` of the stanza, if any.
    pub lang: Option<String>,

    /// The payload elements, in document order.
    pub payloads: Vec<Element>,
}

impl Presence {
    /// Create a presence of the given type with no payloads.
    pub fn new(type_: PresenceType) -> Presence {
        Presence {
            from: None,
            to: None,
            id: None,
            type_,
            lang: None,
            payloads: Vec::new(),
        }
    }

    /// Create an available presence.
    pub fn available() -> Presence {
        Presence::new(PresenceType::None)
    }

    /// Create an unavailable presence.
    pub fn unavailable() -> Presence {
        Presence::new(PresenceType::Unavailable)
    }

    /// Set the recipient.
    pub fn with_to(mut self, to: Jid) -> Presence {
        self.to = Some(to);
        self
    }

    /// Append a payload.
    pub fn with_payload(mut self, payload: Element) -> Presence {
        self.payloads.push(payload);
        self
    }

    /// The qualified name of the first payload, used for routing.
    pub fn payload_name(&self) -> Option<(String, String)> {
        let payload = self.payloads.first()?;
        Some((payload.ns(), payload.name().to_owned()))
    }

    /// Parse a presence from an element qualified by the given stanza
    /// namespace.
    pub fn from_element(elem: &Element, namespace: &str) -> Result<Presence, Error> {
        if !elem.is("presence", namespace) {
            return Err(Error::Other("Not a presence element."));
        }
        Ok(Presence {
            from: parse_jid(elem.attr("from"))?,
            to: parse_jid(elem.attr("to"))?,
            id: elem.attr("id").map(str::to_owned),
            type_: match elem.attr("type") {
                Some(type_) => type_.parse()?,
                None => PresenceType::None,
            },
            lang: elem.attr("xml:lang").map(str::to_owned),
            payloads: elem.children().cloned().collect(),
        })
    }

    /// Serialise into an element qualified by the given stanza namespace.
    pub fn into_element(self, namespace: &str) -> Element {
        let mut builder = Element::builder("presence", namespace);
        if self.type_ != PresenceType::None {
            builder = builder.attr(NcName::try_from("type").unwrap(), self.type_.as_str());
        }
        if let Some(from) = self.from {
            builder = builder.attr(NcName::try_from("from").unwrap(), from.to_string());
        }
        if let Some(to) = self.to {
            builder = builder.attr(NcName::try_from("to").unwrap(), to.to_string());
        }
        if let Some(id) = self.id {
            builder = builder.attr(NcName::try_from("id").unwrap(), id);
        }
        if let Some(lang) = self.lang {
            builder = builder.attr(NcName::try_from("xml:lang").unwrap(), lang);
        }
        builder.append_all(self.payloads).build()
    }
}

fn parse_jid(attr: Option<&str>) -> Result<Option<Jid>, Error> {
    match attr {
        Some(s) => Jid::new(s).map(Some).map_err(Error::text_parse_error),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ns;

    #[test]
    fn parse_available() {
        let elem: Element = "<presence xmlns='jabber:client'/>".parse().unwrap();
        let presence = Presence::from_element(&elem, ns::CLIENT).unwrap();
        assert_eq!(presence.type_, PresenceType::None);
        assert!(presence.payloads.is_empty());
    }

    #[test]
    fn parse_unavailable() {
        let elem: Element = "<presence xmlns='jabber:client' type='unavailable'/>"
            .parse()
            .unwrap();
        let presence = Presence::from_element(&elem, ns::CLIENT).unwrap();
        assert_eq!(presence.type_, PresenceType::Unavailable);
    }

    #[test]
    fn available_serialises_without_type() {
        let elem = Presence::available().into_element(ns::CLIENT);
        assert_eq!(elem.attr("type"), None);
    }

    #[test]
    fn invalid_type_is_rejected() {
        let elem: Element = "<presence xmlns='jabber:client' type='online'/>"
            .parse()
            .unwrap();
        assert!(Presence::from_element(&elem, ns::CLIENT).is_err());
    }

    #[test]
    fn round_trip() {
        let show: Element = "<show xmlns='jabber:client'>dnd</show>".parse().unwrap();
        let presence = Presence::new(PresenceType::None)
            .with_to(Jid::new("example.net").unwrap())
            .with_payload(show);
        let elem = presence.clone().into_element(ns::CLIENT);
        assert_eq!(Presence::from_element(&elem, ns::CLIENT).unwrap(), presence);
    }
}
