// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream-level errors as defined in RFC 6120 § 4.9.

use core::fmt;
use std::error::Error as StdError;

use minidom::Element;
use xso::{AsXml, FromXml};

use crate::ns;

/// Enumeration of the stream error conditions defined in RFC 6120 § 4.9.3.
///
/// The condition elements live in the `urn:ietf:params:xml:ns:xmpp-streams`
/// namespace, while the enclosing `<error/>` element is qualified by the
/// stream namespace itself.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::STREAMS)]
pub enum DefinedCondition {
    /// The entity has sent XML that cannot be processed. Generic fallback
    /// for the more specific XML-related conditions.
    #[xml(name = "bad-format")]
    BadFormat,

    /// An unsupported or missing namespace prefix.
    #[xml(name = "bad-namespace-prefix")]
    BadNamespacePrefix,

    /// A new stream for this entity conflicts with an existing stream.
    #[xml(name = "conflict")]
    Conflict,

    /// The peer has not responded to traffic over the stream.
    #[xml(name = "connection-timeout")]
    ConnectionTimeout,

    /// The `to` address is an FQDN no longer serviced by this entity.
    #[xml(name = "host-gone")]
    HostGone,

    /// The `to` address is not serviced by this entity.
    #[xml(name = "host-unknown")]
    HostUnknown,

    /// A stanza between two servers lacks a valid `to` or `from` address.
    #[xml(name = "improper-addressing")]
    ImproperAddressing,

    /// A misconfiguration or other internal error.
    #[xml(name = "internal-server-error")]
    InternalServerError,

    /// The `from` attribute does not match an authorized JID.
    #[xml(name = "invalid-from")]
    InvalidFrom,

    /// The stream or content namespace is not supported.
    #[xml(name = "invalid-namespace")]
    InvalidNamespace,

    /// The entity has sent invalid XML to a validating server.
    #[xml(name = "invalid-xml")]
    InvalidXml,

    /// Data was sent before the stream was authenticated or authorized.
    #[xml(name = "not-authorized")]
    NotAuthorized,

    /// The peer has sent XML violating well-formedness rules.
    #[xml(name = "not-well-formed")]
    NotWellFormed,

    /// The entity has violated a local service policy.
    #[xml(name = "policy-violation")]
    PolicyViolation,

    /// A remote entity needed for authentication or authorization could not
    /// be reached.
    #[xml(name = "remote-connection-failed")]
    RemoteConnectionFailed,

    /// The stream is being closed so that security can be renegotiated.
    #[xml(name = "reset")]
    Reset,

    /// The server lacks the resources to service the stream.
    #[xml(name = "resource-constraint")]
    ResourceConstraint,

    /// The entity has attempted to send restricted XML features such as a
    /// comment, processing instruction, DTD subset, or entity reference.
    #[xml(name = "restricted-xml")]
    RestrictedXml,

    /// Traffic is redirected to another host; the character data names the
    /// alternate address.
    #[xml(name = "see-other-host")]
    SeeOtherHost(#[xml(text)] String),

    /// The server is being shut down.
    #[xml(name = "system-shutdown")]
    SystemShutdown,

    /// None of the other conditions apply.
    #[xml(name = "undefined-condition")]
    UndefinedCondition,

    /// The stream uses an encoding the server does not support.
    #[xml(name = "unsupported-encoding")]
    UnsupportedEncoding,

    /// A mandatory-to-negotiate feature is not supported by the initiator.
    #[xml(name = "unsupported-feature")]
    UnsupportedFeature,

    /// A first-level child of the stream is not supported.
    #[xml(name = "unsupported-stanza-type")]
    UnsupportedStanzaType,

    /// The `version` attribute names an unsupported XMPP version.
    #[xml(name = "unsupported-version")]
    UnsupportedVersion,
}

impl DefinedCondition {
    /// The wire name of the condition element.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BadFormat => "bad-format",
            Self::BadNamespacePrefix => "bad-namespace-prefix",
            Self::Conflict => "conflict",
            Self::ConnectionTimeout => "connection-timeout",
            Self::HostGone => "host-gone",
            Self::HostUnknown => "host-unknown",
            Self::ImproperAddressing => "improper-addressing",
            Self::InternalServerError => "internal-server-error",
            Self::InvalidFrom => "invalid-from",
            Self::InvalidNamespace => "invalid-namespace",
            Self::InvalidXml => "invalid-xml",
            Self::NotAuthorized => "not-authorized",
            Self::NotWellFormed => "not-well-formed",
            Self::PolicyViolation => "policy-violation",
            Self::RemoteConnectionFailed => "remote-connection-failed",
            Self::Reset => "reset",
            Self::ResourceConstraint => "resource-constraint",
            Self::RestrictedXml => "restricted-xml",
            Self::SeeOtherHost(_) => "see-other-host",
            Self::SystemShutdown => "system-shutdown",
            Self::UndefinedCondition => "undefined-condition",
            Self::UnsupportedEncoding => "unsupported-encoding",
            Self::UnsupportedFeature => "unsupported-feature",
            Self::UnsupportedStanzaType => "unsupported-stanza-type",
            Self::UnsupportedVersion => "unsupported-version",
        }
    }
}

impl fmt::Display for DefinedCondition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SeeOtherHost(host) => write!(f, "see-other-host: {}", host),
            other => f.write_str(other.name()),
        }
    }
}

/// The `<stream:error/>` document as specified in RFC 6120.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::STREAM, name = "error")]
pub struct StreamError {
    /// The enumerated condition which triggered this stream error.
    #[xml(child)]
    pub condition: DefinedCondition,

    /// Optional descriptive text: the optional `xml:lang` tag and the text
    /// content.
    #[xml(extract(default, fields(attribute(name = "xml:lang", default, type_ = Option<String>), text(type_ = String))))]
    pub text: Option<(Option<String>, String)>,

    /// Optional application-specific elements refining the condition.
    #[xml(element(n = ..))]
    pub application_specific: Vec<Element>,
}

impl StreamError {
    /// Build a stream error carrying only a condition.
    pub fn new(condition: DefinedCondition) -> StreamError {
        StreamError {
            condition,
            text: None,
            application_specific: Vec::new(),
        }
    }

    /// Attach untagged descriptive text.
    pub fn with_text<T: Into<String>>(mut self, text: T) -> StreamError {
        self.text = Some((None, text.into()));
        self
    }
}

impl From<DefinedCondition> for StreamError {
    fn from(condition: DefinedCondition) -> StreamError {
        StreamError::new(condition)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stream error: {}", self.condition)?;
        if let Some((_, ref text)) = self.text {
            write!(f, " ({:?})", text)?;
        }
        Ok(())
    }
}

impl StdError for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_condition_only() {
        let elem: Element = "<error xmlns='http://etherx.jabber.org/streams'><system-shutdown xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></error>"
            .parse()
            .unwrap();
        let err = StreamError::try_from(elem).unwrap();
        assert_eq!(err.condition, DefinedCondition::SystemShutdown);
        assert_eq!(err.text, None);
        assert!(err.application_specific.is_empty());
    }

    #[test]
    fn parse_with_text() {
        let elem: Element = "<error xmlns='http://etherx.jabber.org/streams'><policy-violation xmlns='urn:ietf:params:xml:ns:xmpp-streams'/><text xmlns='urn:ietf:params:xml:ns:xmpp-streams' xml:lang='en'>too many stanzas</text></error>"
            .parse()
            .unwrap();
        let err = StreamError::try_from(elem).unwrap();
        assert_eq!(err.condition, DefinedCondition::PolicyViolation);
        let (lang, text) = err.text.unwrap();
        assert_eq!(lang.unwrap(), "en");
        assert_eq!(text, "too many stanzas");
    }

    #[test]
    fn parse_see_other_host() {
        let elem: Element = "<error xmlns='http://etherx.jabber.org/streams'><see-other-host xmlns='urn:ietf:params:xml:ns:xmpp-streams'>alt.example.net:5222</see-other-host></error>"
            .parse()
            .unwrap();
        let err = StreamError::try_from(elem).unwrap();
        assert_eq!(
            err.condition,
            DefinedCondition::SeeOtherHost(String::from("alt.example.net:5222"))
        );
    }

    #[test]
    fn all_conditions_round_trip() {
        // Every wire code from RFC 6120 § 4.9.3 must survive a round trip
        // through the element form.
        for name in [
            "bad-format",
            "bad-namespace-prefix",
            "conflict",
            "connection-timeout",
            "host-gone",
            "host-unknown",
            "improper-addressing",
            "internal-server-error",
            "invalid-from",
            "invalid-namespace",
            "invalid-xml",
            "not-authorized",
            "not-well-formed",
            "policy-violation",
            "remote-connection-failed",
            "reset",
            "resource-constraint",
            "restricted-xml",
            "see-other-host",
            "system-shutdown",
            "undefined-condition",
            "unsupported-encoding",
            "unsupported-feature",
            "unsupported-stanza-type",
            "unsupported-version",
        ] {
            let xml = format!(
                "<error xmlns='http://etherx.jabber.org/streams'><{} xmlns='urn:ietf:params:xml:ns:xmpp-streams'/></error>",
                name
            );
            let elem: Element = xml.parse().unwrap();
            let err = StreamError::try_from(elem).unwrap();
            assert_eq!(err.condition.name(), name);
            let elem2 = Element::from(err.clone());
            let err2 = StreamError::try_from(elem2).unwrap();
            assert_eq!(err, err2);
        }
    }

    #[test]
    fn serialise() {
        let err = StreamError::new(DefinedCondition::Conflict);
        let elem = Element::from(err);
        assert!(elem.is("error", ns::STREAM));
        let cond = elem.children().next().unwrap();
        assert!(cond.is("conflict", ns::STREAMS));
    }
}
