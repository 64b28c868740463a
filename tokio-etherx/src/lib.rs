// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! An asynchronous XMPP stream engine.
//!
//! The crate establishes a bidirectional XML stream over any transport,
//! negotiates a chain of stream features (STARTTLS, SASL, resource
//! binding, or application-provided ones), and then serves the stream by
//! multiplexing inbound stanzas to registered handlers.
//!
//! The building blocks, bottom up:
//!
//! - [`xmlstream`]: stream framing over a transport;
//! - [`negotiator`]: the feature round state machine and the built-in
//!   features;
//! - [`mux`]: the stanza dispatch table;
//! - [`Session`]: a negotiated stream bound to a [`mux::ServeMux`].
//!
//! Transports, TLS, and DNS are out of scope: a session takes anything
//! implementing `AsyncRead + AsyncWrite` and TLS is consumed as an
//! injected upgrade capability.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use jid;
pub use minidom;

pub use etherx_parsers as parsers;

pub mod color;
pub mod error;
mod iq;
pub mod mux;
pub mod negotiator;
pub mod session;
mod state;
pub mod xmlstream;

pub use error::{AuthError, Error, ProtocolError};
pub use iq::PendingIq;
pub use session::{Session, SessionConfig, SessionHandle};
pub use state::SessionState;
