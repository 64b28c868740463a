// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Value types for the XMPP wire protocol.
//!
//! This crate contains the stanza envelopes (`iq`, `message`, `presence`),
//! the stream-level and stanza-level error documents, the negotiation
//! nonzas (SASL, resource binding), and a small number of XEP payloads
//! (delayed delivery, ping, service discovery info).
//!
//! Fixed-namespace documents are mapped with [`xso`] derives; the stanza
//! envelopes are converted by hand because their namespace
//! (`jabber:client` or `jabber:server`) is a property of the stream they
//! travel on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use jid;
pub use minidom;
pub use minidom::Element;

pub mod bind;
pub mod date;
pub mod delay;
pub mod disco;
pub mod iq;
pub mod message;
pub mod ns;
pub mod ping;
pub mod presence;
pub mod sasl;
pub mod stanza_error;
pub mod stream_error;
pub mod stream_features;
