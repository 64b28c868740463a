// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza-level errors as defined in RFC 6120 § 8.3.
//!
//! The `<error/>` element is qualified by the stanza namespace of the stream
//! it travels on, which is only known at runtime; it is therefore converted
//! explicitly rather than through a fixed-namespace derive.

use core::fmt;
use core::str::FromStr;
use std::error::Error as StdError;

use jid::Jid;
use minidom::rxml::NcName;
use minidom::Element;
use xso::{error::Error, AsXml, FromXml};

use crate::ns;

/// The `type` attribute of a stanza error: how the sender should react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Retry after providing credentials.
    Auth,

    /// Do not retry; the error cannot be remedied.
    Cancel,

    /// Proceed; the condition was only a warning.
    Continue,

    /// Retry after changing the data sent.
    Modify,

    /// Retry after waiting; the error is temporary.
    Wait,
}

impl FromStr for ErrorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<ErrorType, Error> {
        Ok(match s {
            "auth" => ErrorType::Auth,
            "cancel" => ErrorType::Cancel,
            "continue" => ErrorType::Continue,
            "modify" => ErrorType::Modify,
            "wait" => ErrorType::Wait,
            _ => return Err(Error::Other("Invalid 'type' attribute on error element.")),
        })
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ErrorType::Auth => "auth",
            ErrorType::Cancel => "cancel",
            ErrorType::Continue => "continue",
            ErrorType::Modify => "modify",
            ErrorType::Wait => "wait",
        })
    }
}

/// The defined stanza error conditions of RFC 6120 § 8.3.3.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::XMPP_STANZAS)]
pub enum DefinedCondition {
    /// The stanza does not conform to the expected schema.
    #[xml(name = "bad-request")]
    BadRequest,

    /// A resource with the same name or address already exists.
    #[xml(name = "conflict")]
    Conflict,

    /// The feature is not implemented by the recipient.
    #[xml(name = "feature-not-implemented")]
    FeatureNotImplemented,

    /// The requester lacks the required permissions.
    #[xml(name = "forbidden")]
    Forbidden,

    /// The recipient is gone; the character data may carry a new address.
    #[xml(name = "gone")]
    Gone(#[xml(text)] String),

    /// A misconfiguration or other internal server error.
    #[xml(name = "internal-server-error")]
    InternalServerError,

    /// The addressed JID or item cannot be found.
    #[xml(name = "item-not-found")]
    ItemNotFound,

    /// An address violates the XMPP address format.
    #[xml(name = "jid-malformed")]
    JidMalformed,

    /// The request does not meet criteria defined by the recipient.
    #[xml(name = "not-acceptable")]
    NotAcceptable,

    /// No entity is allowed to perform the action.
    #[xml(name = "not-allowed")]
    NotAllowed,

    /// Credentials are missing or wrong.
    #[xml(name = "not-authorized")]
    NotAuthorized,

    /// A local service policy was violated.
    #[xml(name = "policy-violation")]
    PolicyViolation,

    /// The intended recipient is temporarily unavailable.
    #[xml(name = "recipient-unavailable")]
    RecipientUnavailable,

    /// Requests are redirected; the character data may carry the new
    /// address.
    #[xml(name = "redirect")]
    Redirect(#[xml(text)] String),

    /// Registration is required before this action is allowed.
    #[xml(name = "registration-required")]
    RegistrationRequired,

    /// The remote server does not exist or could not be resolved.
    #[xml(name = "remote-server-not-found")]
    RemoteServerNotFound,

    /// Communication with the remote server timed out.
    #[xml(name = "remote-server-timeout")]
    RemoteServerTimeout,

    /// The server lacks the resources to service the request.
    #[xml(name = "resource-constraint")]
    ResourceConstraint,

    /// The service is not provided, or the entity is unreachable. Also the
    /// catch-all for stanzas nobody routes.
    #[xml(name = "service-unavailable")]
    ServiceUnavailable,

    /// A subscription is required before this action is allowed.
    #[xml(name = "subscription-required")]
    SubscriptionRequired,

    /// None of the other conditions apply.
    #[xml(name = "undefined-condition")]
    UndefinedCondition,

    /// The request was out of order.
    #[xml(name = "unexpected-request")]
    UnexpectedRequest,
}

/// A stanza error: the payload of `type="error"` stanzas.
#[derive(Debug, Clone, PartialEq)]
pub struct StanzaError {
    /// How the sender should react.
    pub type_: ErrorType,

    /// The entity which generated the error, when different from the
    /// addressed one.
    pub by: Option<Jid>,

    /// The enumerated condition.
    pub condition: DefinedCondition,

    /// Optional descriptive text.
    pub text: Option<String>,
}

impl StanzaError {
    /// Build an error from a type and a condition.
    pub fn new(type_: ErrorType, condition: DefinedCondition) -> StanzaError {
        StanzaError {
            type_,
            by: None,
            condition,
            text: None,
        }
    }

    /// The canonical reply for stanzas with no registered route.
    pub fn service_unavailable() -> StanzaError {
        StanzaError::new(ErrorType::Cancel, DefinedCondition::ServiceUnavailable)
    }

    /// The canonical reply when a handler fails internally.
    pub fn internal_server_error() -> StanzaError {
        StanzaError::new(ErrorType::Cancel, DefinedCondition::InternalServerError)
    }

    /// Attach descriptive text.
    pub fn with_text<T: Into<String>>(mut self, text: T) -> StanzaError {
        self.text = Some(text.into());
        self
    }

    /// Parse an `<error/>` element qualified by the given stanza namespace.
    pub fn from_element(elem: &Element, namespace: &str) -> Result<StanzaError, Error> {
        if !elem.is("error", namespace) {
            return Err(Error::Other("Not a stanza error element."));
        }
        let type_ = elem
            .attr("type")
            .ok_or(Error::Other("Missing 'type' attribute on error element."))?
            .parse()?;
        let by = match elem.attr("by") {
            Some(by) => Some(Jid::new(by).map_err(Error::text_parse_error)?),
            None => None,
        };

        let mut condition = None;
        let mut text = None;
        for child in elem.children() {
            if child.is("text", ns::XMPP_STANZAS) {
                text = Some(child.text());
            } else if condition.is_none() && child.ns() == ns::XMPP_STANZAS {
                condition = Some(
                    DefinedCondition::try_from(child.clone())
                        .map_err(|_| Error::Other("Unknown stanza error condition."))?,
                );
            }
            // Application-specific elements in other namespaces are allowed
            // and skipped.
        }

        Ok(StanzaError {
            type_,
            by,
            condition: condition
                .ok_or(Error::Other("Missing defined condition in error element."))?,
            text,
        })
    }

    /// Serialise into an `<error/>` element qualified by the given stanza
    /// namespace.
    pub fn to_element(&self, namespace: &str) -> Element {
        let mut builder = Element::builder("error", namespace).attr(NcName::try_from("type").unwrap(), self.type_.to_string());
        if let Some(ref by) = self.by {
            builder = builder.attr(NcName::try_from("by").unwrap(), by.to_string());
        }
        builder = builder.append(Element::from(self.condition.clone()));
        if let Some(ref text) = self.text {
            builder = builder.append(Element::builder("text", ns::XMPP_STANZAS).append(text.clone()));
        }
        builder.build()
    }
}

impl fmt::Display for StanzaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "stanza error ({})", self.type_)?;
        if let Some(ref text) = self.text {
            write!(f, ": {}", text)?;
        }
        Ok(())
    }
}

impl StdError for StanzaError {}
