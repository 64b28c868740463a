// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stanza multiplexing.
//!
//! A [`ServeMux`] routes inbound stanzas to handlers by stanza kind, type
//! string, and the qualified name of the first payload element. It is
//! immutable once built; registration mistakes (duplicate patterns, stanza
//! names on the generic route) are programming errors and panic at build
//! time.

use core::future::Future;
use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use minidom::Element;

use crate::error::{Error, ProtocolError};
use crate::parsers::disco;
use crate::parsers::iq::{Iq, IqType};
use crate::parsers::message::Message;
use crate::parsers::ns;
use crate::parsers::presence::Presence;
use crate::parsers::stanza_error::StanzaError;
use crate::session::SessionHandle;

/// A qualified XML name used as a routing key.
///
/// The default (empty) name is the zero name, which acts as a wildcard in
/// the documented fallback lookups only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Name {
    /// The namespace URI.
    pub ns: String,

    /// The local name.
    pub local: String,
}

impl Name {
    /// Build a qualified name.
    pub fn new<N: Into<String>, L: Into<String>>(ns: N, local: L) -> Name {
        Name {
            ns: ns.into(),
            local: local.into(),
        }
    }

    /// The zero name.
    pub fn zero() -> Name {
        Name::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Pattern {
    typ: String,
    payload: Name,
}

/// The outcome of an IQ handler: an optional result payload, or a stanza
/// error to be sent back.
pub type IqResult = Result<Option<Element>, StanzaError>;

/// A handler for IQ stanzas.
///
/// For `get`/`set` requests the returned payload (or error) is written
/// back automatically as the matching `result`/`error` IQ.
pub trait IqHandler: Send + Sync {
    /// Handle one IQ.
    fn handle_iq(&self, session: SessionHandle, iq: Iq) -> BoxFuture<'_, IqResult>;

    /// Features this handler advertises for service discovery.
    fn advertised_features(&self) -> Vec<disco::Feature> {
        Vec::new()
    }

    /// Identities this handler advertises for service discovery.
    fn advertised_identities(&self) -> Vec<disco::Identity> {
        Vec::new()
    }
}

/// A handler for message stanzas.
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    fn handle_message(&self, session: SessionHandle, message: Message)
        -> BoxFuture<'_, Result<(), Error>>;

    /// Features this handler advertises for service discovery.
    fn advertised_features(&self) -> Vec<disco::Feature> {
        Vec::new()
    }

    /// Identities this handler advertises for service discovery.
    fn advertised_identities(&self) -> Vec<disco::Identity> {
        Vec::new()
    }
}

/// A handler for presence stanzas.
pub trait PresenceHandler: Send + Sync {
    /// Handle one presence.
    fn handle_presence(
        &self,
        session: SessionHandle,
        presence: Presence,
    ) -> BoxFuture<'_, Result<(), Error>>;

    /// Features this handler advertises for service discovery.
    fn advertised_features(&self) -> Vec<disco::Feature> {
        Vec::new()
    }

    /// Identities this handler advertises for service discovery.
    fn advertised_identities(&self) -> Vec<disco::Identity> {
        Vec::new()
    }
}

/// A handler for stream-level elements which are not stanzas (nonzas).
pub trait ElementHandler: Send + Sync {
    /// Handle one element.
    fn handle_element(&self, session: SessionHandle, elem: Element)
        -> BoxFuture<'_, Result<(), Error>>;

    /// Features this handler advertises for service discovery.
    fn advertised_features(&self) -> Vec<disco::Feature> {
        Vec::new()
    }

    /// Identities this handler advertises for service discovery.
    fn advertised_identities(&self) -> Vec<disco::Identity> {
        Vec::new()
    }
}

/// Adapter implementing [`IqHandler`] for a closure.
pub struct IqHandlerFn<F>(pub F);

impl<F, Fut> IqHandler for IqHandlerFn<F>
where
    F: Fn(SessionHandle, Iq) -> Fut + Send + Sync,
    Fut: Future<Output = IqResult> + Send + 'static,
{
    fn handle_iq(&self, session: SessionHandle, iq: Iq) -> BoxFuture<'_, IqResult> {
        Box::pin((self.0)(session, iq))
    }
}

/// Adapter implementing [`MessageHandler`] for a closure.
pub struct MessageHandlerFn<F>(pub F);

impl<F, Fut> MessageHandler for MessageHandlerFn<F>
where
    F: Fn(SessionHandle, Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn handle_message(
        &self,
        session: SessionHandle,
        message: Message,
    ) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin((self.0)(session, message))
    }
}

/// Adapter implementing [`PresenceHandler`] for a closure.
pub struct PresenceHandlerFn<F>(pub F);

impl<F, Fut> PresenceHandler for PresenceHandlerFn<F>
where
    F: Fn(SessionHandle, Presence) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn handle_presence(
        &self,
        session: SessionHandle,
        presence: Presence,
    ) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin((self.0)(session, presence))
    }
}

/// Adapter implementing [`ElementHandler`] for a closure.
pub struct ElementHandlerFn<F>(pub F);

impl<F, Fut> ElementHandler for ElementHandlerFn<F>
where
    F: Fn(SessionHandle, Element) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn handle_element(
        &self,
        session: SessionHandle,
        elem: Element,
    ) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin((self.0)(session, elem))
    }
}

/// Registration-ordered record of every handler, for the service
/// discovery surface.
enum Registered {
    Iq(Arc<dyn IqHandler>),
    Message(Arc<dyn MessageHandler>),
    Presence(Arc<dyn PresenceHandler>),
    Element(Arc<dyn ElementHandler>),
}

impl Registered {
    fn features(&self) -> Vec<disco::Feature> {
        match self {
            Registered::Iq(h) => h.advertised_features(),
            Registered::Message(h) => h.advertised_features(),
            Registered::Presence(h) => h.advertised_features(),
            Registered::Element(h) => h.advertised_features(),
        }
    }

    fn identities(&self) -> Vec<disco::Identity> {
        match self {
            Registered::Iq(h) => h.advertised_identities(),
            Registered::Message(h) => h.advertised_identities(),
            Registered::Presence(h) => h.advertised_identities(),
            Registered::Element(h) => h.advertised_identities(),
        }
    }
}

/// Builder for [`ServeMux`].
#[derive(Default)]
pub struct ServeMuxBuilder {
    iq: HashMap<Pattern, Arc<dyn IqHandler>>,
    message: HashMap<Pattern, Arc<dyn MessageHandler>>,
    presence: HashMap<Pattern, Arc<dyn PresenceHandler>>,
    elements: HashMap<Name, Arc<dyn ElementHandler>>,
    order: Vec<Registered>,
    features: Vec<disco::Feature>,
    identities: Vec<disco::Identity>,
}

impl ServeMuxBuilder {
    /// Route IQ stanzas of the given type and payload name.
    ///
    /// An empty type or the zero name registers the fallback pattern for
    /// that position.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate pattern.
    pub fn iq(mut self, typ: &str, payload: Name, handler: impl IqHandler + 'static) -> Self {
        let pattern = Pattern {
            typ: typ.to_owned(),
            payload,
        };
        let handler = Arc::new(handler);
        if self.iq.insert(pattern.clone(), handler.clone()).is_some() {
            panic!(
                "mux: multiple registrations for iq type {:?} payload {{{}}}{}",
                pattern.typ, pattern.payload.ns, pattern.payload.local
            );
        }
        self.order.push(Registered::Iq(handler));
        self
    }

    /// Route IQ stanzas to a closure. See [`ServeMuxBuilder::iq`].
    pub fn iq_fn<F, Fut>(self, typ: &str, payload: Name, handler: F) -> Self
    where
        F: Fn(SessionHandle, Iq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = IqResult> + Send + 'static,
    {
        self.iq(typ, payload, IqHandlerFn(handler))
    }

    /// Route message stanzas of the given type and payload name.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate pattern.
    pub fn message(
        mut self,
        typ: &str,
        payload: Name,
        handler: impl MessageHandler + 'static,
    ) -> Self {
        let pattern = Pattern {
            typ: typ.to_owned(),
            payload,
        };
        let handler = Arc::new(handler);
        if self.message.insert(pattern.clone(), handler.clone()).is_some() {
            panic!(
                "mux: multiple registrations for message type {:?} payload {{{}}}{}",
                pattern.typ, pattern.payload.ns, pattern.payload.local
            );
        }
        self.order.push(Registered::Message(handler));
        self
    }

    /// Route message stanzas to a closure. See [`ServeMuxBuilder::message`].
    pub fn message_fn<F, Fut>(self, typ: &str, payload: Name, handler: F) -> Self
    where
        F: Fn(SessionHandle, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.message(typ, payload, MessageHandlerFn(handler))
    }

    /// Route presence stanzas of the given type and payload name.
    ///
    /// The empty type is both the available presence and the type
    /// wildcard; for available presences the two coincide.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate pattern.
    pub fn presence(
        mut self,
        typ: &str,
        payload: Name,
        handler: impl PresenceHandler + 'static,
    ) -> Self {
        let pattern = Pattern {
            typ: typ.to_owned(),
            payload,
        };
        let handler = Arc::new(handler);
        if self.presence.insert(pattern.clone(), handler.clone()).is_some() {
            panic!(
                "mux: multiple registrations for presence type {:?} payload {{{}}}{}",
                pattern.typ, pattern.payload.ns, pattern.payload.local
            );
        }
        self.order.push(Registered::Presence(handler));
        self
    }

    /// Route presence stanzas to a closure. See
    /// [`ServeMuxBuilder::presence`].
    pub fn presence_fn<F, Fut>(self, typ: &str, payload: Name, handler: F) -> Self
    where
        F: Fn(SessionHandle, Presence) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.presence(typ, payload, PresenceHandlerFn(handler))
    }

    /// Route non-stanza stream elements by qualified name.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate name, and when `name` is a stanza name: those
    /// must go through the typed registrations.
    pub fn handle(mut self, name: Name, handler: impl ElementHandler + 'static) -> Self {
        let is_stanza_local =
            name.local == "iq" || name.local == "message" || name.local == "presence";
        let is_stanza_ns = name.ns.is_empty() || name.ns == ns::CLIENT || name.ns == ns::SERVER;
        if is_stanza_local && is_stanza_ns {
            panic!("mux: tried to register a stanza handler with handle(), use iq(), message(), or presence() instead");
        }
        let handler = Arc::new(handler);
        if self.elements.insert(name.clone(), handler.clone()).is_some() {
            panic!(
                "mux: multiple registrations for {{{}}}{}",
                name.ns, name.local
            );
        }
        self.order.push(Registered::Element(handler));
        self
    }

    /// Route non-stanza stream elements to a closure. See
    /// [`ServeMuxBuilder::handle`].
    pub fn handle_fn<F, Fut>(self, name: Name, handler: F) -> Self
    where
        F: Fn(SessionHandle, Element) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.handle(name, ElementHandlerFn(handler))
    }

    /// Advertise a feature which has no corresponding handler.
    pub fn feature(mut self, feature: disco::Feature) -> Self {
        self.features.push(feature);
        self
    }

    /// Advertise an identity which has no corresponding handler.
    pub fn identity(mut self, identity: disco::Identity) -> Self {
        self.identities.push(identity);
        self
    }

    /// Finish the mux.
    pub fn build(self) -> ServeMux {
        ServeMux {
            iq: self.iq,
            message: self.message,
            presence: self.presence,
            elements: self.elements,
            order: self.order,
            features: self.features,
            identities: self.identities,
        }
    }
}

/// An immutable dispatch table for inbound stanzas and nonzas.
pub struct ServeMux {
    iq: HashMap<Pattern, Arc<dyn IqHandler>>,
    message: HashMap<Pattern, Arc<dyn MessageHandler>>,
    presence: HashMap<Pattern, Arc<dyn PresenceHandler>>,
    elements: HashMap<Name, Arc<dyn ElementHandler>>,
    order: Vec<Registered>,
    features: Vec<disco::Feature>,
    identities: Vec<disco::Identity>,
}

/// Look a pattern up with the wildcard fallback order: exact, type-only,
/// payload-only, catch-all.
fn lookup<'m, H: ?Sized>(
    map: &'m HashMap<Pattern, Arc<H>>,
    typ: &str,
    payload: Option<(String, String)>,
) -> Option<&'m Arc<H>> {
    let name = match payload {
        Some((ns, local)) => Name { ns, local },
        None => Name::zero(),
    };
    let exact = Pattern {
        typ: typ.to_owned(),
        payload: name.clone(),
    };
    if let Some(h) = map.get(&exact) {
        return Some(h);
    }
    if let Some(h) = map.get(&Pattern {
        typ: typ.to_owned(),
        payload: Name::zero(),
    }) {
        return Some(h);
    }
    if let Some(h) = map.get(&Pattern {
        typ: String::new(),
        payload: name,
    }) {
        return Some(h);
    }
    map.get(&Pattern {
        typ: String::new(),
        payload: Name::zero(),
    })
}

impl ServeMux {
    /// Start building a mux.
    pub fn builder() -> ServeMuxBuilder {
        ServeMuxBuilder::default()
    }

    fn iq_handler(&self, iq: &Iq) -> Option<&Arc<dyn IqHandler>> {
        lookup(&self.iq, iq.payload.as_str(), iq.payload_name())
    }

    fn message_handler(&self, message: &Message) -> Option<&Arc<dyn MessageHandler>> {
        lookup(
            &self.message,
            &message.type_.to_string(),
            message.payload_name(),
        )
    }

    fn presence_handler(&self, presence: &Presence) -> Option<&Arc<dyn PresenceHandler>> {
        lookup(
            &self.presence,
            presence.type_.as_str(),
            presence.payload_name(),
        )
    }

    /// Look up the handler for a non-stanza element.
    pub(crate) fn element_handler(&self, elem: &Element) -> Option<&Arc<dyn ElementHandler>> {
        self.elements.get(&Name::new(elem.ns(), elem.name()))
    }

    /// Dispatch one IQ.
    ///
    /// Requests with no route are answered with `service-unavailable`;
    /// handler outcomes for requests are written back as the matching
    /// response.
    pub async fn dispatch_iq(&self, session: &SessionHandle, iq: Iq) -> Result<(), Error> {
        let request = match &iq.payload {
            IqType::Get(_) | IqType::Set(_) => true,
            IqType::Result(_) | IqType::Error { .. } => false,
        };
        let handler = match self.iq_handler(&iq) {
            Some(handler) => Arc::clone(handler),
            None => {
                if request {
                    let reply = iq.error_reply(StanzaError::service_unavailable());
                    session
                        .send_element(&reply.into_element(session.stanza_ns()))
                        .await?;
                } else {
                    log::trace!("dropping unrouted iq response with id {:?}", iq.id);
                }
                return Ok(());
            }
        };

        let reply_to = if request {
            Some(iq.clone())
        } else {
            None
        };
        let outcome = handler.handle_iq(session.clone(), iq).await;
        let Some(request) = reply_to else {
            if let Err(e) = outcome {
                log::warn!("iq response handler failed: {}", e);
            }
            return Ok(());
        };
        let reply = match outcome {
            Ok(payload) => request.result_reply(payload),
            Err(error) => request.error_reply(error),
        };
        session
            .send_element(&reply.into_element(session.stanza_ns()))
            .await
    }

    /// Dispatch one message. Messages with no route are dropped silently.
    pub async fn dispatch_message(
        &self,
        session: &SessionHandle,
        message: Message,
    ) -> Result<(), Error> {
        match self.message_handler(&message) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                if let Err(e) = handler.handle_message(session.clone(), message).await {
                    log::warn!("message handler failed: {}", e);
                }
            }
            None => log::trace!("dropping unrouted message"),
        }
        Ok(())
    }

    /// Dispatch one presence. Presences with no route are dropped
    /// silently.
    pub async fn dispatch_presence(
        &self,
        session: &SessionHandle,
        presence: Presence,
    ) -> Result<(), Error> {
        match self.presence_handler(&presence) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                if let Err(e) = handler.handle_presence(session.clone(), presence).await {
                    log::warn!("presence handler failed: {}", e);
                }
            }
            None => log::trace!("dropping unrouted presence"),
        }
        Ok(())
    }

    /// Dispatch one non-stanza element.
    ///
    /// Unlike unrouted messages and presences, an unrouted nonza is a
    /// stream violation.
    pub async fn dispatch_element(
        &self,
        session: &SessionHandle,
        elem: Element,
    ) -> Result<(), Error> {
        match self.element_handler(&elem) {
            Some(handler) => {
                let handler = Arc::clone(handler);
                handler.handle_element(session.clone(), elem).await
            }
            None => Err(ProtocolError::UnknownStreamElement.into()),
        }
    }

    /// Every feature advertised by registered handlers and explicit
    /// registrations, in registration order, de-duplicated by `var` (first
    /// wins).
    pub fn features(&self) -> Vec<disco::Feature> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        let handler_features = self.order.iter().flat_map(Registered::features);
        for feature in handler_features.chain(self.features.iter().cloned()) {
            if seen.insert(feature.var.clone()) {
                out.push(feature);
            }
        }
        out
    }

    /// Every identity advertised by registered handlers and explicit
    /// registrations, in registration order.
    pub fn identities(&self) -> Vec<disco::Identity> {
        let mut out = Vec::new();
        for registered in &self.order {
            out.extend(registered.identities());
        }
        out.extend(self.identities.iter().cloned());
        out
    }
}
