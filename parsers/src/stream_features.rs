// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<stream:features/>` advertisement container.

use minidom::Element;
use xso::error::FromElementError;

use crate::ns;

/// The feature listing sent by the receiving entity after each stream
/// header.
///
/// Features are negotiated by pluggable implementations, so the container
/// keeps every advertisement as a raw element; callers look advertisements
/// up by qualified name and hand them to whichever feature owns them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFeatures {
    /// The advertised feature elements, in advertisement order.
    pub features: Vec<Element>,
}

impl StreamFeatures {
    /// Wrap a list of advertisements.
    pub fn new(features: Vec<Element>) -> StreamFeatures {
        StreamFeatures { features }
    }

    /// Whether the peer advertised nothing at all.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Look up an advertisement by qualified name.
    pub fn get(&self, name: &str, namespace: &str) -> Option<&Element> {
        self.features.iter().find(|f| f.is(name, namespace))
    }

    /// Whether SASL mechanisms were advertised.
    pub fn can_authenticate(&self) -> bool {
        self.get("mechanisms", ns::SASL).is_some()
    }

    /// Whether STARTTLS was advertised.
    pub fn can_starttls(&self) -> bool {
        self.get("starttls", ns::TLS).is_some()
    }

    /// Whether resource binding was advertised.
    pub fn can_bind(&self) -> bool {
        self.get("bind", ns::BIND).is_some()
    }
}

impl TryFrom<Element> for StreamFeatures {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<StreamFeatures, FromElementError> {
        if !elem.is("features", ns::STREAM) {
            return Err(FromElementError::Mismatch(elem));
        }
        Ok(StreamFeatures {
            features: elem.children().cloned().collect(),
        })
    }
}

impl From<StreamFeatures> for Element {
    fn from(features: StreamFeatures) -> Element {
        Element::builder("features", ns::STREAM)
            .append_all(features.features)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_features() {
        let elem: Element = "<features xmlns='http://etherx.jabber.org/streams'/>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert!(features.is_empty());
        assert!(!features.can_bind());
        assert!(!features.can_starttls());
        assert!(!features.can_authenticate());
    }

    #[test]
    fn known_and_unknown_features_are_kept() {
        let elem: Element = "<features xmlns='http://etherx.jabber.org/streams'>
            <starttls xmlns='urn:ietf:params:xml:ns:xmpp-tls'><required/></starttls>
            <mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism>PLAIN</mechanism></mechanisms>
            <sm xmlns='urn:xmpp:sm:3'/>
        </features>"
            .parse()
            .unwrap();
        let features = StreamFeatures::try_from(elem).unwrap();
        assert_eq!(features.features.len(), 3);
        assert!(features.can_starttls());
        assert!(features.can_authenticate());
        assert!(!features.can_bind());
        assert!(features.get("sm", "urn:xmpp:sm:3").is_some());
    }

    #[test]
    fn wrong_container_is_rejected() {
        let elem: Element = "<features xmlns='jabber:client'/>".parse().unwrap();
        assert!(StreamFeatures::try_from(elem).is_err());
    }

    #[test]
    fn round_trip() {
        let advert: Element = "<bind xmlns='urn:ietf:params:xml:ns:xmpp-bind'/>"
            .parse()
            .unwrap();
        let features = StreamFeatures::new(vec![advert]);
        let elem = Element::from(features.clone());
        assert_eq!(StreamFeatures::try_from(elem).unwrap(), features);
    }
}
