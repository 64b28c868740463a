// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XEP-0203: Delayed Delivery.

use jid::Jid;
use minidom::Element;
use xso::{text::EmptyAsNone, AsXml, FromXml};

use crate::date::DateTime;
use crate::ns;

/// Notes when and by whom a stanza got stored for later delivery.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::DELAY, name = "delay")]
pub struct Delay {
    /// The entity which delayed the stanza. May be absent.
    #[xml(attribute(default))]
    pub from: Option<Jid>,

    /// When the stanza was originally sent or stored.
    #[xml(attribute)]
    pub stamp: DateTime,

    /// An optional natural-language reason for the delay.
    #[xml(text = EmptyAsNone)]
    pub reason: Option<String>,
}

impl Delay {
    /// Append this delay marker to a stanza element.
    pub fn splice_into(&self, stanza: &mut Element) {
        stanza.append_child(Element::from(self.clone()));
    }

    /// Append this delay marker to `stanza` if it is a stanza element in the
    /// given content namespace.
    ///
    /// Elements in another namespace, or with a non-stanza name, are left
    /// untouched. Returns whether the marker was inserted.
    pub fn splice_into_stanza(&self, stanza: &mut Element, namespace: &str) -> bool {
        let is_stanza = stanza.is("message", namespace)
            || stanza.is("presence", namespace)
            || stanza.is("iq", namespace);
        if is_stanza {
            self.splice_into(stanza);
        }
        is_stanza
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::str::FromStr;
    use jid::BareJid;

    #[test]
    fn parse() {
        let elem: Element =
            "<delay xmlns='urn:xmpp:delay' from='capulet.com' stamp='2002-09-10T23:08:25Z'/>"
                .parse()
                .unwrap();
        let delay = Delay::try_from(elem).unwrap();
        assert_eq!(delay.from.unwrap(), BareJid::new("capulet.com").unwrap());
        assert_eq!(
            delay.stamp,
            DateTime::from_str("2002-09-10T23:08:25Z").unwrap()
        );
        assert_eq!(delay.reason, None);
    }

    #[test]
    fn parse_with_reason() {
        let elem: Element =
            "<delay xmlns='urn:xmpp:delay' stamp='2002-09-10T23:08:25Z'>Offline Storage</delay>"
                .parse()
                .unwrap();
        let delay = Delay::try_from(elem).unwrap();
        assert_eq!(delay.from, None);
        assert_eq!(delay.reason.unwrap(), "Offline Storage");
    }

    #[test]
    fn wrong_element_is_mismatch() {
        let elem: Element = "<replace xmlns='urn:xmpp:message-correct:0'/>"
            .parse()
            .unwrap();
        assert!(Delay::try_from(elem).is_err());
    }

    #[test]
    fn round_trip() {
        let delay = Delay {
            from: Some(Jid::new("me@example.net").unwrap()),
            stamp: DateTime::from_str("2002-09-10T23:08:25Z").unwrap(),
            reason: Some(String::from("foo")),
        };
        let elem = Element::from(delay.clone());
        assert_eq!(Delay::try_from(elem).unwrap(), delay);
    }

    #[test]
    fn splice_into_message() {
        let delay = Delay {
            from: Some(Jid::new("me@example.net").unwrap()),
            stamp: DateTime::from_str("0001-01-01T00:00:00Z").unwrap(),
            reason: Some(String::from("foo")),
        };
        let mut message: Element = "<message xmlns='jabber:client'/>".parse().unwrap();
        assert!(delay.splice_into_stanza(&mut message, ns::CLIENT));
        let expected: Element = "<message xmlns='jabber:client'><delay xmlns='urn:xmpp:delay' stamp='0001-01-01T00:00:00Z' from='me@example.net'>foo</delay></message>"
            .parse()
            .unwrap();
        assert_eq!(message, expected);
    }

    #[test]
    fn splice_skips_foreign_namespace() {
        let delay = Delay {
            from: None,
            stamp: DateTime::from_str("0001-01-01T00:00:00Z").unwrap(),
            reason: None,
        };
        let mut message: Element = "<message xmlns='jabber:badns'/>".parse().unwrap();
        assert!(!delay.splice_into_stanza(&mut message, ns::CLIENT));
        let untouched: Element = "<message xmlns='jabber:badns'/>".parse().unwrap();
        assert_eq!(message, untouched);
    }

    #[test]
    fn splice_applies_to_server_namespace_when_asked() {
        let delay = Delay {
            from: None,
            stamp: DateTime::from_str("0001-01-02T00:00:00Z").unwrap(),
            reason: None,
        };
        let mut message: Element =
            "<message xmlns='jabber:server'><body>test</body></message>"
                .parse()
                .unwrap();
        assert!(delay.splice_into_stanza(&mut message, ns::SERVER));
        assert_eq!(message.children().count(), 2);
    }
}
