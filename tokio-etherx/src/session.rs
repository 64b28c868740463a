// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sessions: a negotiated stream bound to a multiplexer.

use std::sync::Arc;

use jid::Jid;
use minidom::Element;
use rand::{thread_rng, Rng};
use tokio::sync::Mutex;

use crate::error::{Error, ProtocolError};
use crate::iq::{IqCorrelator, PendingIq};
use crate::mux::ServeMux;
use crate::negotiator::Negotiator;
use crate::parsers::iq::{Iq, IqType};
use crate::parsers::message::Message;
use crate::parsers::ns;
use crate::parsers::presence::Presence;
use crate::parsers::stream_error::StreamError;
use crate::state::SessionState;
use crate::xmlstream::{BoxTransport, StreamHeader, StreamReader, StreamWriter, XmlStream};

/// A source of unique stanza and stream ids.
pub type IdSource = Arc<dyn Fn() -> String + Send + Sync>;

fn default_id_source() -> IdSource {
    Arc::new(|| {
        let id: u64 = thread_rng().gen();
        format!("{}", id)
    })
}

/// Construction-time configuration of a session.
///
/// Everything a session could otherwise reach for globally (the id source,
/// the feature set, the stanza namespace) is injected here.
pub struct SessionConfig {
    jid: Jid,
    peer: Option<Jid>,
    lang: Option<String>,
    s2s: bool,
    features: Vec<Box<dyn crate::negotiator::StreamFeature>>,
    make_id: IdSource,
}

impl SessionConfig {
    /// Configuration for the given local address with no features.
    pub fn new(jid: Jid) -> SessionConfig {
        SessionConfig {
            jid,
            peer: None,
            lang: None,
            s2s: false,
            features: Vec::new(),
            make_id: default_id_source(),
        }
    }

    /// Address the stream to an explicit peer. Defaults to the domain of
    /// the local address.
    pub fn peer(mut self, peer: Jid) -> SessionConfig {
        self.peer = Some(peer);
        self
    }

    /// Declare the stream language.
    pub fn lang<L: Into<String>>(mut self, lang: L) -> SessionConfig {
        self.lang = Some(lang.into());
        self
    }

    /// Use the server-to-server stanza namespace.
    pub fn s2s(mut self, s2s: bool) -> SessionConfig {
        self.s2s = s2s;
        self
    }

    /// Append a stream feature. Order is advertisement and preference
    /// order.
    pub fn feature(mut self, feature: impl crate::negotiator::StreamFeature + 'static) -> SessionConfig {
        self.features.push(Box::new(feature));
        self
    }

    /// Replace the id source. The default draws random 64-bit ids.
    pub fn id_source(mut self, make_id: IdSource) -> SessionConfig {
        self.make_id = make_id;
        self
    }

    fn stanza_ns(&self) -> &'static str {
        if self.s2s {
            ns::SERVER
        } else {
            ns::CLIENT
        }
    }
}

/// A cheaply cloneable handle for writing to a session.
///
/// Handed to every dispatched handler; writes of whole stanzas are atomic
/// under the session write lock.
#[derive(Clone)]
pub struct SessionHandle {
    writer: Arc<Mutex<StreamWriter>>,
    correlator: Arc<IqCorrelator>,
    make_id: IdSource,
    ns: &'static str,
}

impl SessionHandle {
    /// The stanza namespace of this session.
    pub fn stanza_ns(&self) -> &'static str {
        self.ns
    }

    /// Mint a fresh stanza id.
    pub fn make_id(&self) -> String {
        (self.make_id)()
    }

    /// Serialise one element under the session write lock.
    pub async fn send_element(&self, elem: &Element) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        writer.send_element(elem).await
    }

    /// Send a message stanza.
    pub async fn send_message(&self, message: Message) -> Result<(), Error> {
        self.send_element(&message.into_element(self.ns)).await
    }

    /// Send a presence stanza.
    pub async fn send_presence(&self, presence: Presence) -> Result<(), Error> {
        self.send_element(&presence.into_element(self.ns)).await
    }

    /// Send an IQ without response tracking (results, errors, or requests
    /// correlated by the caller).
    pub async fn send_iq_stanza(&self, iq: Iq) -> Result<(), Error> {
        self.send_element(&iq.into_element(self.ns)).await
    }

    /// Send a `get` or `set` IQ and return a future resolving to the
    /// matching response.
    ///
    /// The request is assigned a fresh id; the correlation entry is
    /// removed when the returned future is dropped.
    pub async fn send_iq(&self, mut iq: Iq) -> Result<PendingIq, Error> {
        match iq.payload {
            IqType::Get(_) | IqType::Set(_) => (),
            _ => return Err(Error::InvalidState),
        }
        iq.id = self.make_id();
        let pending = self.correlator.register(iq.to.clone(), iq.id.clone());
        self.send_element(&iq.into_element(self.ns)).await?;
        Ok(pending)
    }

    /// Best-effort emission of a stream error document.
    pub async fn send_stream_error(&self, error: StreamError) -> Result<(), Error> {
        self.send_element(&Element::from(error)).await
    }

    /// Close the outbound stream with the closing `</stream:stream>`.
    pub async fn close(&self) -> Result<(), Error> {
        let mut writer = self.writer.lock().await;
        writer.send_footer().await
    }
}

/// A negotiated XMPP session over some transport.
pub struct Session {
    state: SessionState,
    local: Jid,
    peer: Option<Jid>,
    identity: Option<String>,
    reader: StreamReader,
    handle: SessionHandle,
}

impl Session {
    /// Initiate a session: open the stream, drive the configured features
    /// to readiness.
    pub async fn client(config: SessionConfig, io: BoxTransport) -> Result<Session, Error> {
        let to = match &config.peer {
            Some(peer) => peer.to_string(),
            None => config.jid.domain().to_string(),
        };
        let header = StreamHeader {
            from: Some(config.jid.to_string()),
            to: Some(to),
            id: None,
            lang: config.lang.clone(),
        };
        Session::negotiate(config, io, SessionState::EMPTY, header).await
    }

    /// Accept a session on the receiving side.
    pub async fn server(config: SessionConfig, io: BoxTransport) -> Result<Session, Error> {
        let header = StreamHeader {
            from: Some(config.jid.to_string()),
            to: None,
            id: None,
            lang: config.lang.clone(),
        };
        Session::negotiate(config, io, SessionState::RECEIVED, header).await
    }

    async fn negotiate(
        config: SessionConfig,
        io: BoxTransport,
        mut state: SessionState,
        header: StreamHeader,
    ) -> Result<Session, Error> {
        if config.s2s {
            state.insert(SessionState::S2S);
        }
        let stanza_ns = config.stanza_ns();
        let stream = XmlStream::new(io, stanza_ns);
        let make_id = Arc::clone(&config.make_id);
        let negotiator = Negotiator::new(config.features);
        let outcome = negotiator
            .run(stream, state, &header, &*make_id)
            .await?;

        let receiving = outcome.state.contains(SessionState::RECEIVED);
        let (local, peer) = if receiving {
            // On the receiving side a bound address belongs to the peer.
            let peer = match outcome.bound {
                Some(bound) => Some(bound),
                None => match &outcome.peer_header.from {
                    Some(from) => Some(Jid::new(from)?),
                    None => None,
                },
            };
            (config.jid, peer)
        } else {
            let local = outcome.bound.unwrap_or(config.jid);
            let peer = match &outcome.peer_header.from {
                Some(from) => Some(Jid::new(from)?),
                None => config.peer,
            };
            (local, peer)
        };

        let (reader, writer) = outcome.stream.split();
        Ok(Session {
            state: outcome.state,
            local,
            peer,
            identity: outcome.identity,
            reader,
            handle: SessionHandle {
                writer: Arc::new(Mutex::new(writer)),
                correlator: Arc::new(IqCorrelator::new()),
                make_id,
                ns: stanza_ns,
            },
        })
    }

    /// The session state mask.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The local address, as bound during negotiation.
    pub fn local_addr(&self) -> &Jid {
        &self.local
    }

    /// The peer address, when one is known.
    pub fn remote_addr(&self) -> Option<&Jid> {
        self.peer.as_ref()
    }

    /// The authentication identity asserted by the peer, when this side
    /// accepted the connection.
    pub fn peer_identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// A handle for writing to this session from any task.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Close the outbound stream.
    pub async fn close(&self) -> Result<(), Error> {
        self.handle.close().await
    }

    /// Read stanzas until the stream ends, dispatching each through `mux`.
    ///
    /// Response IQs matching an outstanding [`SessionHandle::send_iq`] are
    /// resolved before the mux sees them. Handlers run concurrently on
    /// spawned tasks; the reader only waits for a stanza to be fully
    /// parsed, never for its handler.
    ///
    /// Stream-fatal conditions emit a best-effort `<stream:error/>` and
    /// footer before returning the error.
    pub async fn serve(mut self, mux: Arc<ServeMux>) -> Result<(), Error> {
        let result = self.serve_inner(&mux).await;
        match &result {
            Ok(()) => {
                let _: Result<_, _> = self.handle.close().await;
            }
            Err(e) => {
                if let Some(stream_error) = e.to_stream_error() {
                    let _: Result<_, _> = self.handle.send_stream_error(stream_error).await;
                }
                let _: Result<_, _> = self.handle.close().await;
            }
        }
        result
    }

    async fn serve_inner(&mut self, mux: &Arc<ServeMux>) -> Result<(), Error> {
        loop {
            let elem = match self.reader.read_element().await? {
                Some(elem) => elem,
                // Peer closed the stream.
                None => return Ok(()),
            };
            let ns = self.handle.ns;

            if elem.is("iq", ns) {
                let iq = Iq::from_element(&elem, ns)?;
                let iq = match self.handle.correlator.resolve(iq) {
                    core::ops::ControlFlow::Break(()) => continue,
                    core::ops::ControlFlow::Continue(iq) => iq,
                };
                let mux = Arc::clone(mux);
                let session = self.handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = mux.dispatch_iq(&session, iq).await {
                        log::warn!("iq dispatch failed: {}", e);
                    }
                });
            } else if elem.is("message", ns) {
                let message = Message::from_element(&elem, ns)?;
                let mux = Arc::clone(mux);
                let session = self.handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = mux.dispatch_message(&session, message).await {
                        log::warn!("message dispatch failed: {}", e);
                    }
                });
            } else if elem.is("presence", ns) {
                let presence = Presence::from_element(&elem, ns)?;
                let mux = Arc::clone(mux);
                let session = self.handle.clone();
                tokio::spawn(async move {
                    if let Err(e) = mux.dispatch_presence(&session, presence).await {
                        log::warn!("presence dispatch failed: {}", e);
                    }
                });
            } else {
                // A nonza. Routing misses here are stream-fatal, so the
                // lookup happens before anything is spawned.
                match mux.element_handler(&elem) {
                    Some(handler) => {
                        let handler = Arc::clone(handler);
                        let session = self.handle.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_element(session, elem).await {
                                log::warn!("element handler failed: {}", e);
                            }
                        });
                    }
                    None => return Err(ProtocolError::UnknownStreamElement.into()),
                }
            }
        }
    }
}
