// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL negotiation elements as defined in RFC 6120 § 6.

use minidom::Element;
use xso::{error::FromElementError, text::Base64, AsXml, FromXml};

use crate::ns;

/// The mechanism listing advertised by the receiving entity inside
/// `<stream:features/>`.
///
/// Mechanism names are kept as plain strings: the set of mechanisms is open
/// ended and unknown names must survive a round trip so that the negotiator
/// can skip them rather than fail on them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mechanisms {
    /// The advertised mechanism names, in advertisement order.
    pub mechanisms: Vec<String>,
}

impl TryFrom<Element> for Mechanisms {
    type Error = FromElementError;

    fn try_from(elem: Element) -> Result<Mechanisms, FromElementError> {
        if !elem.is("mechanisms", ns::SASL) {
            return Err(FromElementError::Mismatch(elem));
        }
        let mut mechanisms = Vec::new();
        for child in elem.children() {
            // Mechanism elements scoped to another namespace are not ours
            // to interpret.
            if child.is("mechanism", ns::SASL) {
                mechanisms.push(child.text());
            }
        }
        Ok(Mechanisms { mechanisms })
    }
}

impl From<Mechanisms> for Element {
    fn from(mechanisms: Mechanisms) -> Element {
        Element::builder("mechanisms", ns::SASL)
            .append_all(
                mechanisms
                    .mechanisms
                    .into_iter()
                    .map(|name| Element::builder("mechanism", ns::SASL).append(name)),
            )
            .build()
    }
}

/// Selects a mechanism and opens the authentication exchange.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::SASL, name = "auth")]
pub struct Auth {
    /// The name of the chosen mechanism.
    #[xml(attribute)]
    pub mechanism: String,

    /// The initial response, if the mechanism is client-first.
    #[xml(text = Base64)]
    pub data: Vec<u8>,
}

/// Additional data from the server for mechanisms which need more than one
/// round trip.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::SASL, name = "challenge")]
pub struct Challenge {
    /// The challenge data.
    #[xml(text = Base64)]
    pub data: Vec<u8>,
}

/// The client's answer to a [`Challenge`].
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::SASL, name = "response")]
pub struct Response {
    /// The response data.
    #[xml(text = Base64)]
    pub data: Vec<u8>,
}

/// Sent by the client to cancel the exchange.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::SASL, name = "abort")]
pub struct Abort;

/// Terminal success token, optionally carrying server-final data.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone, Default)]
#[xml(namespace = ns::SASL, name = "success")]
pub struct Success {
    /// Additional data with success, if any.
    #[xml(text = Base64)]
    pub data: Vec<u8>,
}

/// The SASL failure conditions of RFC 6120 § 6.5.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::SASL)]
pub enum DefinedCondition {
    /// The client sent an `<abort/>`.
    #[xml(name = "aborted")]
    Aborted,

    /// The account is disabled.
    #[xml(name = "account-disabled")]
    AccountDisabled,

    /// The credentials for this account have expired.
    #[xml(name = "credentials-expired")]
    CredentialsExpired,

    /// The mechanism may only be used over an encrypted stream.
    #[xml(name = "encryption-required")]
    EncryptionRequired,

    /// The base64 data sent by the peer is invalid.
    #[xml(name = "incorrect-encoding")]
    IncorrectEncoding,

    /// The authzid asserted by the client is invalid.
    #[xml(name = "invalid-authzid")]
    InvalidAuthzid,

    /// The client selected a mechanism which is not offered.
    #[xml(name = "invalid-mechanism")]
    InvalidMechanism,

    /// The request violated the SASL framing rules.
    #[xml(name = "malformed-request")]
    MalformedRequest,

    /// The selected mechanism is weaker than the server permits.
    #[xml(name = "mechanism-too-weak")]
    MechanismTooWeak,

    /// The credentials provided are invalid.
    #[xml(name = "not-authorized")]
    NotAuthorized,

    /// A transient server-side failure; the client may retry.
    #[xml(name = "temporary-auth-failure")]
    TemporaryAuthFailure,
}

impl DefinedCondition {
    /// The wire name of the condition element.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aborted => "aborted",
            Self::AccountDisabled => "account-disabled",
            Self::CredentialsExpired => "credentials-expired",
            Self::EncryptionRequired => "encryption-required",
            Self::IncorrectEncoding => "incorrect-encoding",
            Self::InvalidAuthzid => "invalid-authzid",
            Self::InvalidMechanism => "invalid-mechanism",
            Self::MalformedRequest => "malformed-request",
            Self::MechanismTooWeak => "mechanism-too-weak",
            Self::NotAuthorized => "not-authorized",
            Self::TemporaryAuthFailure => "temporary-auth-failure",
        }
    }
}

impl core::fmt::Display for DefinedCondition {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal failure token.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::SASL, name = "failure")]
pub struct Failure {
    /// The enumerated failure condition.
    #[xml(child)]
    pub condition: DefinedCondition,

    /// Optional descriptive text.
    #[xml(extract(default, fields(attribute(name = "xml:lang", default, type_ = Option<String>), text(type_ = String))))]
    pub text: Option<(Option<String>, String)>,
}

impl From<DefinedCondition> for Failure {
    fn from(condition: DefinedCondition) -> Failure {
        Failure {
            condition,
            text: None,
        }
    }
}

/// Any SASL element which may appear on the stream during negotiation.
#[derive(FromXml, AsXml, Debug, Clone)]
#[xml()]
pub enum Nonza {
    /// Opening of the exchange.
    #[xml(transparent)]
    Auth(Auth),

    /// Server challenge.
    #[xml(transparent)]
    Challenge(Challenge),

    /// Client response.
    #[xml(transparent)]
    Response(Response),

    /// Client-side cancellation.
    #[xml(transparent)]
    Abort(Abort),

    /// Terminal success.
    #[xml(transparent)]
    Success(Success),

    /// Terminal failure.
    #[xml(transparent)]
    Failure(Failure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth() {
        let elem: Element =
            "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='PLAIN'>AHRlc3QA</auth>"
                .parse()
                .unwrap();
        let auth = Auth::try_from(elem).unwrap();
        assert_eq!(auth.mechanism, "PLAIN");
        assert_eq!(auth.data, b"\0test\0");
    }

    #[test]
    fn parse_empty_auth() {
        let elem: Element = "<auth xmlns='urn:ietf:params:xml:ns:xmpp-sasl' mechanism='EXTERNAL'/>"
            .parse()
            .unwrap();
        let auth = Auth::try_from(elem).unwrap();
        assert_eq!(auth.mechanism, "EXTERNAL");
        assert!(auth.data.is_empty());
    }

    #[test]
    fn parse_mechanisms() {
        let elem: Element = "<mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>
            <mechanism>EXTERNAL</mechanism>
            <mechanism>SCRAM-SHA-1</mechanism>
            <mechanism>PLAIN</mechanism>
        </mechanisms>"
            .parse()
            .unwrap();
        let mechanisms = Mechanisms::try_from(elem).unwrap();
        assert_eq!(mechanisms.mechanisms, ["EXTERNAL", "SCRAM-SHA-1", "PLAIN"]);
    }

    #[test]
    fn mechanisms_in_foreign_namespace_are_ignored() {
        let elem: Element = "<mechanisms xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><mechanism xmlns='nope'>PLAIN</mechanism></mechanisms>"
            .parse()
            .unwrap();
        let mechanisms = Mechanisms::try_from(elem).unwrap();
        assert!(mechanisms.mechanisms.is_empty());
    }

    #[test]
    fn mechanisms_container_in_wrong_namespace_is_rejected() {
        let elem: Element = "<mechanisms xmlns='badns'><mechanism>PLAIN</mechanism></mechanisms>"
            .parse()
            .unwrap();
        assert!(Mechanisms::try_from(elem).is_err());
    }

    #[test]
    fn failure_condition() {
        let elem: Element =
            "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'><not-authorized/></failure>"
                .parse()
                .unwrap();
        let failure = Failure::try_from(elem).unwrap();
        assert_eq!(failure.condition, DefinedCondition::NotAuthorized);
        assert_eq!(failure.text, None);
    }

    #[test]
    fn failure_with_text() {
        let elem: Element = "<failure xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>
            <account-disabled/>
            <text xml:lang='en'>Call 212-555-1212 for assistance.</text>
        </failure>"
            .parse()
            .unwrap();
        let failure = Failure::try_from(elem).unwrap();
        assert_eq!(failure.condition, DefinedCondition::AccountDisabled);
        let (_, text) = failure.text.unwrap();
        assert_eq!(text, "Call 212-555-1212 for assistance.");
    }

    #[test]
    fn success_round_trip() {
        let success = Success {
            data: b"v=abcdef".to_vec(),
        };
        let elem = Element::from(success.clone());
        assert_eq!(Success::try_from(elem).unwrap(), success);
    }

    #[test]
    fn nonza_dispatch() {
        let elem: Element = "<challenge xmlns='urn:ietf:params:xml:ns:xmpp-sasl'>cmVhbG09ImV4YW1wbGUi</challenge>"
            .parse()
            .unwrap();
        match Nonza::try_from(elem).unwrap() {
            Nonza::Challenge(challenge) => {
                assert_eq!(challenge.data, b"realm=\"example\"");
            }
            other => panic!("wrong nonza: {:?}", other),
        }
    }
}
