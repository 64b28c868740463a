// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The `<message/>` stanza (RFC 6120 § 8.2.1, RFC 6121 § 5).

use core::fmt;
use core::str::FromStr;

use jid::Jid;
use minidom::rxml::NcName;
use minidom::Element;
use xso::error::Error;

/// The `type` attribute of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    /// A one-to-one chat message.
    Chat,

    /// An error response to a previously sent message.
    Error,

    /// A message sent within a multi-user chat.
    Groupchat,

    /// An alert or broadcast which expects no reply.
    Headline,

    /// A standalone message. The default when the attribute is absent.
    #[default]
    Normal,
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<MessageType, Error> {
        Ok(match s {
            "chat" => MessageType::Chat,
            "error" => MessageType::Error,
            "groupchat" => MessageType::Groupchat,
            "headline" => MessageType::Headline,
            "normal" => MessageType::Normal,
            _ => return Err(Error::Other("Invalid 'type' attribute on message.")),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            MessageType::Chat => "chat",
            MessageType::Error => "error",
            MessageType::Groupchat => "groupchat",
            MessageType::Headline => "headline",
            MessageType::Normal => "normal",
        })
    }
}

/// A message stanza.
///
/// Unlike IQ, messages carry an arbitrary list of payload elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The sender.
    pub from: Option<Jid>,

    /// The recipient.
    pub to: Option<Jid>,

    /// The optional stanza identifier.
    pub id: Option<String>,

    /// The message type.
    pub type_: MessageType,

    /// The `xml:lang` of the stanza, if any.
    pub lang: Option<String>,

    /// The payload elements, in document order.
    pub payloads: Vec<Element>,
}

impl Message {
    /// Create a message of the given type with no payloads.
    pub fn new(type_: MessageType) -> Message {
        Message {
            from: None,
            to: None,
            id: None,
            type_,
            lang: None,
            payloads: Vec::new(),
        }
    }

    /// Create a chat message addressed to `to`.
    pub fn chat(to: Jid) -> Message {
        let mut message = Message::new(MessageType::Chat);
        message.to = Some(to);
        message
    }

    /// Append a payload.
    pub fn with_payload(mut self, payload: Element) -> Message {
        self.payloads.push(payload);
        self
    }

    /// The qualified name of the first payload, used for routing.
    pub fn payload_name(&self) -> Option<(String, String)> {
        let payload = self.payloads.first()?;
        Some((payload.ns(), payload.name().to_owned()))
    }

    /// Parse a message from an element qualified by the given stanza
    /// namespace.
    pub fn from_element(elem: &Element, namespace: &str) -> Result<Message, Error> {
        if !elem.is("message", namespace) {
            return Err(Error::Other("Not a message element."));
        }
        Ok(Message {
            from: parse_jid(elem.attr("from"))?,
            to: parse_jid(elem.attr("to"))?,
            id: elem.attr("id").map(str::to_owned),
            type_: match elem.attr("type") {
                Some(type_) => type_.parse()?,
                None => MessageType::Normal,
            },
            lang: elem.attr("xml:lang").map(str::to_owned),
            payloads: elem.children().cloned().collect(),
        })
    }

    /// Serialise into an element qualified by the given stanza namespace.
    pub fn into_element(self, namespace: &str) -> Element {
        let mut builder = Element::builder("message", namespace).attr(NcName::try_from("type").unwrap(), self.type_.to_string());
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
