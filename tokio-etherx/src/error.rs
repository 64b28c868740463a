// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error types for stream handling, negotiation, and serving.

use core::fmt;
use std::error::Error as StdError;
use std::io::Error as IoError;

use crate::parsers::sasl::DefinedCondition as SaslCondition;
use crate::parsers::stream_error::{DefinedCondition, StreamError};

/// Top-level error type.
#[derive(Debug)]
pub enum Error {
    /// I/O error on the underlying transport.
    Io(IoError),

    /// Error parsing a Jabber-Id.
    JidParse(jid::Error),

    /// Protocol-level error.
    Protocol(ProtocolError),

    /// Authentication error.
    Auth(AuthError),

    /// A `<stream:error/>` was received from the peer.
    Stream(StreamError),

    /// The connection closed without a stream footer.
    Disconnected,

    /// An operation was attempted in a state which does not permit it.
    InvalidState,
}

impl Error {
    /// The stream error condition to send to the peer before tearing the
    /// stream down because of this error.
    ///
    /// Errors which do not warrant a stream error (a received stream error,
    /// a dead transport) map to `None`.
    pub fn to_stream_error(&self) -> Option<StreamError> {
        match self {
            Error::Io(e) => match classify_xml_error(e) {
                Some(condition) => Some(StreamError::new(condition)),
                None => None,
            },
            Error::Protocol(e) => Some(StreamError::new(e.condition())),
            Error::Auth(_) => Some(StreamError::new(DefinedCondition::NotAuthorized)),
            Error::Stream(_) | Error::Disconnected => None,
            Error::InvalidState => {
                Some(StreamError::new(DefinedCondition::InternalServerError))
            }
        }
    }
}

/// Map an I/O error produced by the XML lexer to a stream error condition.
///
/// The lexer rejects restricted XML (comments, processing instructions,
/// DTDs) on its own; those surface as `restricted-xml`, any other lexer
/// error as `not-well-formed`. Transport errors yield `None`.
fn classify_xml_error(e: &IoError) -> Option<DefinedCondition> {
    let inner = e.get_ref()?;
    let xml = inner.downcast_ref::<rxml::Error>()?;
    match xml {
        rxml::Error::RestrictedXml(_) => Some(DefinedCondition::RestrictedXml),
        _ => Some(DefinedCondition::NotWellFormed),
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::JidParse(e) => write!(f, "jid parse error: {}", e),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::Auth(e) => write!(f, "authentication error: {}", e),
            Error::Stream(e) => write!(f, "received {}", e),
            Error::Disconnected => write!(f, "disconnected"),
            Error::InvalidState => write!(f, "invalid state"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::JidParse(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Auth(e) => Some(e),
            Error::Stream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<jid::Error> for Error {
    fn from(e: jid::Error) -> Self {
        Error::JidParse(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Error::Auth(e)
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Error::Stream(e)
    }
}

impl From<xso::error::Error> for Error {
    fn from(e: xso::error::Error) -> Self {
        Error::Protocol(ProtocolError::Parsers(e))
    }
}

impl From<xso::error::FromElementError> for Error {
    fn from(e: xso::error::FromElementError) -> Self {
        Error::Protocol(ProtocolError::Parsers(e.into()))
    }
}

/// XMPP protocol-level error.
#[derive(Debug)]
pub enum ProtocolError {
    /// A received element did not match the expected schema.
    Parsers(xso::error::Error),

    /// A stream header was seen where none is permitted: a second
    /// `<stream:stream/>` inside an open stream, or an opening element
    /// which is not the stream header.
    UnexpectedRestart,

    /// A first-level child of the stream is neither a recognized framing
    /// element nor a routable element.
    UnknownStreamElement,

    /// Character data or another unexpected token at the stream top level.
    InvalidToken,

    /// The peer's stream header carried a version other than 1.0.
    UnsupportedVersion,

    /// The peer's stream header was structurally invalid.
    InvalidStreamHeader,

    /// A feature negotiation received an element it has no use for.
    UnexpectedPayload,

    /// The peer cancelled a negotiation in progress.
    Terminated,

    /// The peer advertised a mandatory-to-negotiate feature which no
    /// locally configured feature implements.
    UnsupportedRequiredFeature,

    /// The response to a resource binding request was not a bound JID.
    InvalidBindResponse,
}

impl ProtocolError {
    /// The stream error condition describing this protocol error.
    pub fn condition(&self) -> DefinedCondition {
        match self {
            ProtocolError::Parsers(_) => DefinedCondition::BadFormat,
            ProtocolError::UnexpectedRestart => DefinedCondition::NotWellFormed,
            ProtocolError::UnknownStreamElement => DefinedCondition::UnsupportedStanzaType,
            ProtocolError::InvalidToken => DefinedCondition::InvalidXml,
            ProtocolError::UnsupportedVersion => DefinedCondition::UnsupportedVersion,
            ProtocolError::InvalidStreamHeader => DefinedCondition::InvalidNamespace,
            ProtocolError::UnsupportedRequiredFeature => DefinedCondition::UnsupportedFeature,
            ProtocolError::UnexpectedPayload
            | ProtocolError::Terminated
            | ProtocolError::InvalidBindResponse => DefinedCondition::UndefinedCondition,
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::Parsers(e) => write!(f, "unexpected element schema: {}", e),
            ProtocolError::UnexpectedRestart => write!(f, "unexpected stream restart"),
            ProtocolError::UnknownStreamElement => write!(f, "unknown stream-level element"),
            ProtocolError::InvalidToken => write!(f, "unexpected token at stream level"),
            ProtocolError::UnsupportedVersion => write!(f, "unsupported stream version"),
            ProtocolError::InvalidStreamHeader => write!(f, "invalid stream header"),
            ProtocolError::UnexpectedPayload => write!(f, "unexpected negotiation payload"),
            ProtocolError::Terminated => write!(f, "negotiation terminated by peer"),
            ProtocolError::UnsupportedRequiredFeature => {
                write!(f, "peer requires a stream feature we do not implement")
            }
            ProtocolError::InvalidBindResponse => {
                write!(f, "invalid response to resource binding")
            }
        }
    }
}

impl StdError for ProtocolError {}

impl From<xso::error::Error> for ProtocolError {
    fn from(e: xso::error::Error) -> Self {
        ProtocolError::Parsers(e)
    }
}

/// Authentication error.
#[derive(Debug)]
pub enum AuthError {
    /// No offered SASL mechanism matches the local configuration.
    NoMechanism,

    /// Local SASL mechanism error on the initiating side.
    Sasl(sasl::client::MechanismError),

    /// Local SASL mechanism error on the receiving side.
    ServerMechanism(sasl::server::MechanismError),

    /// Terminal `<failure/>` from the peer, with its condition.
    Fail(SaslCondition),

    /// The authenticated identity was rejected by the permission check.
    Authn,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::NoMechanism => write!(f, "no matching SASL mechanism available"),
            AuthError::Sasl(e) => write!(f, "local SASL mechanism error: {}", e),
            AuthError::ServerMechanism(e) => write!(f, "SASL mechanism error: {}", e),
            AuthError::Fail(c) => write!(f, "authentication failed: {}", c),
            AuthError::Authn => write!(f, "authenticated identity rejected"),
        }
    }
}

impl StdError for AuthError {}

impl From<sasl::client::MechanismError> for AuthError {
    fn from(e: sasl::client::MechanismError) -> Self {
        AuthError::Sasl(e)
    }
}

impl From<sasl::server::MechanismError> for AuthError {
    fn from(e: sasl::server::MechanismError) -> Self {
        AuthError::ServerMechanism(e)
    }
}
