// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Stream feature negotiation.
//!
//! Negotiation proceeds in rounds: the receiving side advertises features
//! inside `<stream:features/>`, the initiating side selects one and drives
//! its protocol, and a feature may demand a stream restart, after which the
//! next round begins on fresh stream state. The negotiator itself knows
//! nothing about TLS, SASL, or binding; features are pluggable
//! implementations of [`StreamFeature`].

use std::any::Any;
use std::sync::Arc;

use futures::future::BoxFuture;
use jid::Jid;
use minidom::Element;

use crate::error::{Error, ProtocolError};
use crate::parsers::ns;
use crate::parsers::stream_features::StreamFeatures;
use crate::state::SessionState;
use crate::xmlstream::{StreamHeader, TransportUpgrader, XmlStream};

pub mod bind;
pub mod sasl;
pub mod starttls;

#[cfg(test)]
mod tests;

/// Opaque data handed from [`StreamFeature::parse`] to
/// [`StreamFeature::negotiate`].
///
/// On the receiving side the negotiator passes the peer's opening element
/// as a boxed [`Element`] instead.
pub type FeatureData = Box<dyn Any + Send>;

/// The result of one successful feature negotiation.
#[derive(Default)]
pub struct Negotiated {
    /// State bits to OR into the session mask.
    pub mask: SessionState,

    /// A negotiated address: on the initiating side the local address
    /// assigned by the peer, on the receiving side the address bound for
    /// the peer.
    pub bound: Option<Jid>,

    /// The authentication identity asserted by the peer, if this feature
    /// established one.
    pub identity: Option<String>,

    /// A transport replacement to apply together with the stream restart.
    pub upgrade: Option<Arc<TransportUpgrader>>,
}

impl Negotiated {
    /// A result carrying only state bits.
    pub fn bits(mask: SessionState) -> Negotiated {
        Negotiated {
            mask,
            ..Negotiated::default()
        }
    }
}

/// A pluggable stream feature.
///
/// A feature is identified by the qualified name of the element it
/// advertises and consists of three operations: advertising itself
/// (receiving side), parsing a peer advertisement (initiating side), and
/// driving its own wire protocol.
pub trait StreamFeature: Send + Sync {
    /// The qualified name of the advertised feature element.
    fn name(&self) -> (&'static str, &'static str);

    /// Whether completing this feature requires a stream restart.
    fn needs_restart(&self) -> bool {
        false
    }

    /// Produce the advertisement for the current state, and whether the
    /// feature is mandatory this round. `None` keeps the feature out of
    /// this round's listing.
    fn advertise(&self, state: SessionState) -> Option<(Element, bool)>;

    /// Parse a peer advertisement matching [`StreamFeature::name`],
    /// returning whether the feature is mandatory and data for
    /// [`StreamFeature::negotiate`].
    fn parse(&self, state: SessionState, elem: &Element) -> Result<(bool, FeatureData), Error>;

    /// Whether an opening element qualified by `namespace` belongs to this
    /// feature. Used on the receiving side to route the peer's selection.
    fn handles(&self, namespace: &str) -> bool {
        namespace == self.name().0
    }

    /// Run the feature's own protocol over the stream.
    ///
    /// On the initiating side `data` is whatever [`StreamFeature::parse`]
    /// returned; on the receiving side it is the peer's opening element as
    /// a boxed [`Element`].
    fn negotiate<'a>(
        &'a self,
        stream: &'a mut XmlStream,
        state: SessionState,
        data: FeatureData,
    ) -> BoxFuture<'a, Result<Negotiated, Error>>;
}

/// Everything a completed negotiation hands back to the session.
pub struct NegotiationOutcome {
    /// The stream, post-restarts, ready for stanza traffic.
    pub stream: XmlStream,

    /// The final state mask, with [`SessionState::READY`] set.
    pub state: SessionState,

    /// The address bound during negotiation, if any feature bound one.
    pub bound: Option<Jid>,

    /// The authentication identity asserted by the peer, if any.
    pub identity: Option<String>,

    /// The header received on the last stream open.
    pub peer_header: StreamHeader,
}

/// Drives a session through feature rounds until it is ready.
pub struct Negotiator {
    features: Vec<Box<dyn StreamFeature>>,
}

impl Negotiator {
    /// Build a negotiator over an ordered feature list. The order is the
    /// advertisement order on the receiving side.
    pub fn new(features: Vec<Box<dyn StreamFeature>>) -> Negotiator {
        Negotiator { features }
    }

    /// Run negotiation to completion.
    ///
    /// `local_header` supplies the attributes of this side's stream
    /// headers; `make_id` mints stream ids on the receiving side.
    pub async fn run(
        &self,
        mut stream: XmlStream,
        mut state: SessionState,
        local_header: &StreamHeader,
        make_id: &(dyn Fn() -> String + Send + Sync),
    ) -> Result<NegotiationOutcome, Error> {
        let receiving = state.contains(SessionState::RECEIVED);
        let mut completed = vec![false; self.features.len()];
        let mut bound = None;
        let mut identity = None;

        loop {
            // Exchange stream headers. The receiving side answers the
            // initiator's header and stamps a fresh stream id.
            let peer_header;
            if receiving {
                peer_header = stream.recv_header().await?;
                state.insert(SessionState::INPUT_STREAM);
                let mut header = local_header.clone();
                header.id = Some(make_id());
                header.to = peer_header.from.clone();
                stream.send_header(&header).await?;
                state.insert(SessionState::OUTPUT_STREAM | SessionState::OUTPUT);
            } else {
                stream.send_header(local_header).await?;
                state.insert(SessionState::OUTPUT_STREAM);
                peer_header = stream.recv_header().await?;
                state.insert(SessionState::INPUT_STREAM);
            }

            let round = if receiving {
                self.serve_features(&mut stream, &mut state, &mut completed, &mut bound, &mut identity)
                    .await?
            } else {
                self.select_features(&mut stream, &mut state, &mut completed, &mut bound, &mut identity)
                    .await?
            };

            match round {
                RoundOutcome::Ready => {
                    state.insert(SessionState::READY);
                    return Ok(NegotiationOutcome {
                        stream,
                        state,
                        bound,
                        identity,
                        peer_header,
                    });
                }
                RoundOutcome::Restart { upgrade } => {
                    state.remove(
                        SessionState::READY
                            | SessionState::INPUT_STREAM
                            | SessionState::OUTPUT_STREAM,
                    );
                    stream = match upgrade {
                        Some(upgrade) => stream.upgrade_transport(&upgrade).await?,
                        None => stream.reset(),
                    };
                }
            }
        }
    }

    /// Receiving side: advertise, then answer feature selections until
    /// nothing mandatory remains or a restart intervenes.
    async fn serve_features(
        &self,
        stream: &mut XmlStream,
        state: &mut SessionState,
        completed: &mut [bool],
        bound: &mut Option<Jid>,
        identity: &mut Option<String>,
    ) -> Result<RoundOutcome, Error> {
        let mut adverts = Vec::new();
        let mut listed = Vec::new();
        for (index, feature) in self.features.iter().enumerate() {
            if completed[index] {
                continue;
            }
            if let Some((elem, required)) = feature.advertise(*state) {
                adverts.push(elem);
                listed.push((index, required));
            }
        }
        // The receiving side always answers the header with a features
        // element, even an empty one.
        stream.send_features(adverts).await?;

        loop {
            if !listed.iter().any(|&(index, required)| required && !completed[index]) {
                return Ok(RoundOutcome::Ready);
            }

            let elem = stream.read_element().await?.ok_or(Error::Disconnected)?;
            let selector = selector_namespace(&elem, stream.stream_ns());
            let selected = listed
                .iter()
                .map(|&(index, _)| index)
                .find(|&index| !completed[index] && self.features[index].handles(&selector));
            let index = match selected {
                Some(index) => index,
                None => {
                    log::warn!(
                        "peer opened negotiation with an element no advertised feature handles ({})",
                        selector
                    );
                    return Err(ProtocolError::UnexpectedPayload.into());
                }
            };

            let feature = &self.features[index];
            let outcome = feature.negotiate(stream, *state, Box::new(elem)).await?;
            completed[index] = true;
            state.insert(outcome.mask);
            if let Some(jid) = outcome.bound {
                *bound = Some(jid);
            }
            if let Some(who) = outcome.identity {
                *identity = Some(who);
            }
            if feature.needs_restart() {
                return Ok(RoundOutcome::Restart {
                    upgrade: outcome.upgrade,
                });
            }
        }
    }

    /// Initiating side: parse the peer's advertisement and negotiate
    /// selections until nothing elects to run or a restart intervenes.
    async fn select_features(
        &self,
        stream: &mut XmlStream,
        state: &mut SessionState,
        completed: &mut [bool],
        bound: &mut Option<Jid>,
        identity: &mut Option<String>,
    ) -> Result<RoundOutcome, Error> {
        let features_elem = stream.read_element().await?.ok_or(Error::Disconnected)?;
        if !features_elem.is("features", ns::STREAM) {
            return Err(ProtocolError::UnexpectedPayload.into());
        }
        let advertised = StreamFeatures::try_from(features_elem)?;

        // Parse every advertisement we implement, in advertisement order.
        // An advertisement nobody implements may only be skipped while it
        // is optional: one carrying the `<required/>` marker can never be
        // satisfied from here, so negotiation fails rather than reaching
        // a readiness the peer will reject.
        let mut candidates: Vec<(usize, bool, FeatureData)> = Vec::new();
        for child in &advertised.features {
            let implemented = self.features.iter().enumerate().find(|(_, feature)| {
                let (feat_ns, feat_name) = feature.name();
                child.is(feat_name, feat_ns)
            });
            match implemented {
                Some((index, feature)) => {
                    if completed[index] {
                        continue;
                    }
                    let (required, data) = feature.parse(*state, child)?;
                    candidates.push((index, required, data));
                }
                None => {
                    if child.children().any(|marker| marker.name() == "required") {
                        log::warn!(
                            "peer requires unimplemented stream feature {{{}}}{}",
                            child.ns(),
                            child.name()
                        );
                        return Err(ProtocolError::UnsupportedRequiredFeature.into());
                    }
                    log::trace!(
                        "skipping unimplemented optional stream feature {{{}}}{}",
                        child.ns(),
                        child.name()
                    );
                }
            }
        }

        loop {
            // Mandatory features first; advertisement order breaks ties.
            let position = candidates
                .iter()
                .position(|&(_, required, _)| required)
                .or_else(|| if candidates.is_empty() { None } else { Some(0) });
            let (index, _, data) = match position {
                Some(position) => candidates.remove(position),
                None => return Ok(RoundOutcome::Ready),
            };

            let feature = &self.features[index];
            let outcome = feature.negotiate(stream, *state, data).await?;
            completed[index] = true;
            state.insert(outcome.mask);
            if let Some(jid) = outcome.bound {
                *bound = Some(jid);
            }
            if let Some(who) = outcome.identity {
                *identity = Some(who);
            }
            if feature.needs_restart() {
                return Ok(RoundOutcome::Restart {
                    upgrade: outcome.upgrade,
                });
            }
        }
    }
}

enum RoundOutcome {
    Ready,
    Restart {
        upgrade: Option<Arc<TransportUpgrader>>,
    },
}

/// The namespace used to route a negotiation opener to a feature.
///
/// For stanzas this is the namespace of the payload (resource binding
/// arrives inside an IQ), for nonzas the namespace of the element itself.
fn selector_namespace(elem: &Element, stanza_ns: &str) -> String {
    let is_stanza = elem.is("iq", stanza_ns)
        || elem.is("message", stanza_ns)
        || elem.is("presence", stanza_ns);
    if is_stanza {
        if let Some(payload) = elem.children().next() {
            return payload.ns();
        }
    }
    elem.ns()
}
