// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Namespace constants used throughout the crate.

/// RFC 6120: the stream framing namespace.
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// RFC 6120: stream error conditions.
pub const STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

/// RFC 6120: client-to-server stanzas.
pub const CLIENT: &str = "jabber:client";

/// RFC 6120: server-to-server stanzas.
pub const SERVER: &str = "jabber:server";

/// RFC 6120: SASL negotiation.
pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// RFC 6120: STARTTLS negotiation.
pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

/// RFC 6120: resource binding.
pub const BIND: &str = "urn:ietf:params:xml:ns:xmpp-bind";

/// RFC 6120: stanza error conditions.
pub const XMPP_STANZAS: &str = "urn:ietf:params:xml:ns:xmpp-stanzas";

/// XEP-0203: Delayed Delivery.
pub const DELAY: &str = "urn:xmpp:delay";

/// XEP-0199: XMPP Ping.
pub const PING: &str = "urn:xmpp:ping";

/// XEP-0030: Service Discovery, the `disco#info` namespace.
pub const DISCO_INFO: &str = "http://jabber.org/protocol/disco#info";
