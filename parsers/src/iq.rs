// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<iq/>` stanza (RFC 6120 § 8.2.3).
//!
//! IQ stanzas are qualified by the content namespace of the stream they
//! travel on (`jabber:client` or `jabber:server`), so conversion functions
//! take the namespace as a parameter instead of fixing it at compile time.

use jid::Jid;
use minidom::rxml::NcName;
use minidom::Element;
use xso::error::Error;

use crate::stanza_error::StanzaError;

/// The type attribute and payload of an IQ, together.
///
/// The payload arity rules of RFC 6120 are enforced structurally: a request
/// carries exactly one payload, a result at most one, an error carries the
/// error itself plus optionally the original payload.
#[derive(Debug, Clone, PartialEq)]
pub enum IqType {
    /// An information request with exactly one payload.
    Get(Element),

    /// A state change request with exactly one payload.
    Set(Element),

    /// A response, with an optional payload.
    Result(Option<Element>),

    /// An error response.
    Error {
        /// The stanza error itself.
        error: StanzaError,

        /// The payload of the request this error answers, if echoed.
        payload: Option<Element>,
    },
}

impl IqType {
    /// The wire value of the `type` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            IqType::Get(_) => "get",
            IqType::Set(_) => "set",
            IqType::Result(_) => "result",
            IqType::Error { .. } => "error",
        }
    }
}

/// An IQ stanza.
#[derive(Debug, Clone, PartialEq)]
pub struct Iq {
    /// The sender.
    pub from: Option<Jid>,

    /// The recipient; the enclosing server when absent.
    pub to: Option<Jid>,

    /// The stanza identifier; responses echo it.
    pub id: String,

    /// The `xml:lang` of the stanza, if any.
    pub lang: Option<String>,

    /// Type and payload.
    pub payload: IqType,
}

impl Iq {
    /// Build a `get` request.
    pub fn from_get<I: Into<String>>(id: I, payload: Element) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            lang: None,
            payload: IqType::Get(payload),
        }
    }

    /// Build a `set` request.
    pub fn from_set<I: Into<String>>(id: I, payload: Element) -> Iq {
        Iq {
            from: None,
            to: None,
            id: id.into(),
            lang: None,
            payload: IqType::Set(payload),
        }
    }

    /// Set the recipient.
    pub fn with_to(mut self, to: Jid) -> Iq {
        self.to = Some(to);
        self
    }

    /// Set the sender.
    pub fn with_from(mut self, from: Jid) -> Iq {
        self.from = Some(from);
        self
    }

    /// The qualified name of the payload used for routing, if there is one.
    ///
    /// A `result` without payload and an `error` without echoed payload
    /// have none.
    pub fn payload_name(&self) -> Option<(String, String)> {
        let payload = match &self.payload {
            IqType::Get(payload) | IqType::Set(payload) => Some(payload),
            IqType::Result(payload) => payload.as_ref(),
            IqType::Error { payload, .. } => payload.as_ref(),
        }?;
        Some((payload.ns(), payload.name().to_owned()))
    }

    /// Build the `result` answering this request, with addresses swapped and
    /// the same `id`.
    pub fn result_reply(&self, payload: Option<Element>) -> Iq {
        Iq {
            from: self.to.clone(),
            to: self.from.clone(),
            id: self.id.clone(),
            lang: None,
            payload: IqType::Result(payload),
        }
    }

    /// Build the error answering this request, with addresses swapped and
    /// the same `id`.
    pub fn error_reply(&self, error: StanzaError) -> Iq {
        Iq {
            from: self.to.clone(),
            to: self.from.clone(),
            id: self.id.clone(),
            lang: None,
            payload: IqType::Error {
                error,
                payload: None,
            },
        }
    }

    /// Parse an IQ from an element qualified by the given stanza namespace.
    pub fn from_element(elem: &Element, namespace: &str) -> Result<Iq, Error> {
        if !elem.is("iq", namespace) {
            return Err(Error::Other("Not an iq element."));
        }
        let from = parse_jid(elem.attr("from"))?;
        let to = parse_jid(elem.attr("to"))?;
        let id = elem
            .attr("id")
            .ok_or(Error::Other("Missing 'id' attribute on iq."))?
            .to_owned();
        let lang = elem.attr("xml:lang").map(str::to_owned);

        let type_ = elem
            .attr("type")
            .ok_or(Error::Other("Missing 'type' attribute on iq."))?;
        let mut children = elem.children().cloned();
        let payload = match type_ {
            "get" | "set" => {
                let payload = children
                    .next()
                    .ok_or(Error::Other("Request iq without a payload."))?;
                if children.next().is_some() {
                    return Err(Error::Other("Request iq with more than one payload."));
                }
                if type_ == "get" {
                    IqType::Get(payload)
                } else {
                    IqType::Set(payload)
                }
            }
            "result" => {
                let payload = children.next();
                if children.next().is_some() {
                    return Err(Error::Other("Result iq with more than one payload."));
                }
                IqType::Result(payload)
            }
            "error" => {
                let mut error = None;
                let mut payload = None;
                for child in elem.children() {
                    if child.is("error", namespace) {
                        error = Some(StanzaError::from_element(child, namespace)?);
                    } else if payload.is_none() {
                        payload = Some(child.clone());
                    }
                }
                IqType::Error {
                    error: error.ok_or(Error::Other("Error iq without an error child."))?,
                    payload,
                }
            }
            _ => return Err(Error::Other("Invalid 'type' attribute on iq.")),
        };

        Ok(Iq {
            from,
            to,
            id,
            lang,
            payload,
        })
    }

    /// Serialise into an element qualified by the given stanza namespace.
    pub fn into_element(self, namespace: &str) -> Element {
        let mut builder = Element::builder("iq", namespace)
            .attr(NcName::try_from("id").unwrap(), self.id)
            .attr(NcName::try_from("type").unwrap(), self.payload.as_str());
        if let Some(from) = self.from {
            builder = builder.attr(NcName::try_from("from").unwrap(), from.to_string());
        }
        if let Some(to) = self.to {
            builder = builder.attr(NcName::try_from("to").unwrap(), to.to_string());
        }
        if let Some(lang) = self.lang {
            builder = builder.attr(NcName::try_from("xml:lang").unwrap(), lang);
        }
        match self.payload {
            IqType::Get(payload) | IqType::Set(payload) => builder = builder.append(payload),
            IqType::Result(Some(payload)) => builder = builder.append(payload),
            IqType::Result(None) => (),
            IqType::Error { error, payload } => {
                if let Some(payload) = payload {
                    builder = builder.append(payload);
                }
                builder = builder.append(error.to_element(namespace));
            }
        }
        builder.build()
    }
}

fn parse_jid(attr: Option<&str>) -> Result<Option<Jid>, Error> {
    match attr {
        Some(s) => Jid::new(s).map(Some).map_err(Error::text_parse_error),
        None => Ok(None),
    }
}
