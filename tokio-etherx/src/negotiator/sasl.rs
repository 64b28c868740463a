// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The SASL stream feature (RFC 6120 § 6), usable on either side.
//!
//! Mechanism implementations come from the [`sasl`] crate; this module only
//! drives the XML exchange around them.

use futures::future::BoxFuture;
use minidom::Element;
use sasl::client::Mechanism as ClientMechanism;
use sasl::common::scram::{Sha1, Sha256};
use sasl::common::{Credentials, Identity};
use sasl::server::{Mechanism as ServerMechanism, Response};

use crate::error::{AuthError, Error, ProtocolError};
use crate::parsers::ns;
use crate::parsers::sasl::{
    Auth, Challenge, DefinedCondition, Failure, Mechanisms, Nonza, Response as SaslResponse,
    Success,
};
use crate::state::SessionState;
use crate::xmlstream::XmlStream;

use super::{FeatureData, Negotiated, StreamFeature};

/// A factory for initiating-side mechanism instances.
pub type ClientMechanismFactory = Box<dyn Fn() -> Box<dyn ClientMechanism + Send> + Send + Sync>;

/// A factory for receiving-side mechanism instances.
pub type ServerMechanismFactory = Box<dyn Fn() -> Box<dyn ServerMechanism + Send> + Send + Sync>;

/// The SASL feature in the initiating role.
///
/// The configured mechanism order is the preference order: the first
/// configured mechanism which the peer offers is selected.
pub struct Sasl {
    mechanisms: Vec<ClientMechanismFactory>,
    names: Vec<String>,
}

impl Sasl {
    /// Build the feature from explicit mechanism factories.
    ///
    /// # Panics
    ///
    /// A SASL feature with no mechanisms can never succeed; constructing
    /// one is a programming error and panics.
    pub fn new(mechanisms: Vec<ClientMechanismFactory>) -> Sasl {
        assert!(
            !mechanisms.is_empty(),
            "sasl: a feature without mechanisms cannot negotiate"
        );
        let names = mechanisms.iter().map(|factory| factory().name().to_owned()).collect();
        Sasl { mechanisms, names }
    }

    /// Build the feature with the standard mechanism set for the given
    /// credentials, strongest first: SCRAM-SHA-256, SCRAM-SHA-1, PLAIN.
    pub fn for_credentials(credentials: Credentials) -> Sasl {
        let creds = credentials.clone();
        let scram256: ClientMechanismFactory = Box::new(move || {
            Box::new(sasl::client::mechanisms::Scram::<Sha256>::from_credentials(creds.clone()).unwrap())
        });
        let creds = credentials.clone();
        let scram1: ClientMechanismFactory = Box::new(move || {
            Box::new(sasl::client::mechanisms::Scram::<Sha1>::from_credentials(creds.clone()).unwrap())
        });
        let plain: ClientMechanismFactory = Box::new(move || {
            Box::new(sasl::client::mechanisms::Plain::from_credentials(credentials.clone()).unwrap())
        });
        Sasl::new(vec![scram256, scram1, plain])
    }
}

impl StreamFeature for Sasl {
    fn name(&self) -> (&'static str, &'static str) {
        (ns::SASL, "mechanisms")
    }

    fn needs_restart(&self) -> bool {
        true
    }

    fn advertise(&self, _state: SessionState) -> Option<(Element, bool)> {
        // The initiating side never advertises.
        None
    }

    fn parse(&self, _state: SessionState, elem: &Element) -> Result<(bool, FeatureData), Error> {
        let mechanisms = Mechanisms::try_from(elem.clone())?;
        Ok((true, Box::new(mechanisms.mechanisms)))
    }

    fn negotiate<'a>(
        &'a self,
        stream: &'a mut XmlStream,
        _state: SessionState,
        data: FeatureData,
    ) -> BoxFuture<'a, Result<Negotiated, Error>> {
        Box::pin(async move {
            let offered = *data
                .downcast::<Vec<String>>()
                .map_err(|_| Error::InvalidState)?;

            // Local preference order wins; the offered order only matters
            // among mechanisms we treat as equal, which the configured
            // order already encodes.
            let mut mechanism = None;
            for (factory, name) in self.mechanisms.iter().zip(&self.names) {
                if offered.iter().any(|offer| offer == name) {
                    mechanism = Some(factory());
                    break;
                }
            }
            let mut mechanism = mechanism.ok_or(AuthError::NoMechanism)?;

            let auth = Auth {
                mechanism: mechanism.name().to_owned(),
                data: mechanism.initial(),
            };
            stream.send_element(&Element::from(auth)).await?;

            loop {
                let elem = stream.read_element().await?.ok_or(Error::Disconnected)?;
                match Nonza::try_from(elem) {
                    Ok(Nonza::Challenge(challenge)) => {
                        let data = mechanism
                            .response(&challenge.data)
                            .map_err(AuthError::Sasl)?;
                        stream
                            .send_element(&Element::from(SaslResponse { data }))
                            .await?;
                    }
                    Ok(Nonza::Success(success)) => {
                        if !success.data.is_empty() {
                            mechanism.success(&success.data).map_err(AuthError::Sasl)?;
                        }
                        return Ok(Negotiated::bits(SessionState::AUTHN));
                    }
                    Ok(Nonza::Failure(failure)) => {
                        return Err(AuthError::Fail(failure.condition).into());
                    }
                    Ok(_) => return Err(ProtocolError::UnexpectedPayload.into()),
                    Err(_) => return Err(ProtocolError::UnexpectedPayload.into()),
                }
            }
        })
    }
}

/// The SASL feature in the receiving role.
pub struct SaslServer {
    mechanisms: Vec<ServerMechanismFactory>,
    names: Vec<String>,
    permit: Box<dyn Fn(&Identity) -> bool + Send + Sync>,
}

impl SaslServer {
    /// Build the feature from mechanism factories and a permission check
    /// run against the authenticated identity.
    ///
    /// # Panics
    ///
    /// Panics when `mechanisms` is empty, like [`Sasl::new`].
    pub fn new(
        mechanisms: Vec<ServerMechanismFactory>,
        permit: Box<dyn Fn(&Identity) -> bool + Send + Sync>,
    ) -> SaslServer {
        assert!(
            !mechanisms.is_empty(),
            "sasl: a feature without mechanisms cannot negotiate"
        );
        let names = mechanisms.iter().map(|factory| factory().name().to_owned()).collect();
        SaslServer {
            mechanisms,
            names,
            permit,
        }
    }

    async fn fail(
        &self,
        stream: &mut XmlStream,
        condition: DefinedCondition,
    ) -> Result<(), Error> {
        stream
            .send_element(&Element::from(Failure::from(condition)))
            .await
    }
}

impl StreamFeature for SaslServer {
    fn name(&self) -> (&'static str, &'static str) {
        (ns::SASL, "mechanisms")
    }

    fn needs_restart(&self) -> bool {
        true
    }

    fn advertise(&self, state: SessionState) -> Option<(Element, bool)> {
        if state.contains(SessionState::AUTHN) {
            return None;
        }
        let listing = Mechanisms {
            mechanisms: self.names.clone(),
        };
        Some((Element::from(listing), true))
    }

    fn parse(&self, _state: SessionState, elem: &Element) -> Result<(bool, FeatureData), Error> {
        // Not used by the stream on the receiving side; present for
        // completeness.
        let mechanisms = Mechanisms::try_from(elem.clone())?;
        Ok((true, Box::new(mechanisms.mechanisms)))
    }

    fn negotiate<'a>(
        &'a self,
        stream: &'a mut XmlStream,
        _state: SessionState,
        data: FeatureData,
    ) -> BoxFuture<'a, Result<Negotiated, Error>> {
        Box::pin(async move {
            let opener = *data.downcast::<Element>().map_err(|_| Error::InvalidState)?;
            let auth = match Nonza::try_from(opener) {
                Ok(Nonza::Auth(auth)) => auth,
                Ok(Nonza::Abort(_)) => {
                    self.fail(stream, DefinedCondition::Aborted).await?;
                    return Err(ProtocolError::Terminated.into());
                }
                Ok(Nonza::Failure(failure)) => {
                    return Err(AuthError::Fail(failure.condition).into());
                }
                Ok(_) | Err(_) => {
                    self.fail(stream, DefinedCondition::MalformedRequest).await?;
                    return Err(ProtocolError::UnexpectedPayload.into());
                }
            };

            let factory = self
                .mechanisms
                .iter()
                .zip(&self.names)
                .find(|(_, name)| **name == auth.mechanism)
                .map(|(factory, _)| factory);
            let mut mechanism = match factory {
                Some(factory) => factory(),
                None => {
                    self.fail(stream, DefinedCondition::InvalidMechanism).await?;
                    return Err(AuthError::NoMechanism.into());
                }
            };

            let mut payload = auth.data;
            loop {
                match mechanism.respond(&payload) {
                    Ok(Response::Success(identity, extra)) => {
                        if !(self.permit)(&identity) {
                            self.fail(stream, DefinedCondition::NotAuthorized).await?;
                            return Err(AuthError::Authn.into());
                        }
                        stream
                            .send_element(&Element::from(Success { data: extra }))
                            .await?;
                        let identity = match identity {
                            Identity::Username(username) => Some(username),
                            Identity::None => None,
                        };
                        return Ok(Negotiated {
                            mask: SessionState::AUTHN,
                            identity,
                            ..Negotiated::default()
                        });
                    }
                    Ok(Response::Proceed(data)) => {
                        stream
                            .send_element(&Element::from(Challenge { data }))
                            .await?;
                        let elem = stream.read_element().await?.ok_or(Error::Disconnected)?;
                        match Nonza::try_from(elem) {
                            Ok(Nonza::Response(response)) => payload = response.data,
                            Ok(Nonza::Abort(_)) => {
                                self.fail(stream, DefinedCondition::Aborted).await?;
                                return Err(ProtocolError::Terminated.into());
                            }
                            Ok(_) | Err(_) => {
                                self.fail(stream, DefinedCondition::MalformedRequest).await?;
                                return Err(ProtocolError::UnexpectedPayload.into());
                            }
                        }
                    }
                    Err(e) => {
                        self.fail(stream, DefinedCondition::NotAuthorized).await?;
                        return Err(AuthError::ServerMechanism(e).into());
                    }
                }
            }
        })
    }
}

/// The EXTERNAL mechanism (RFC 4422 appendix A): authentication is taken
/// from the transport layer, typically a TLS client certificate.
///
/// The [`sasl`] crate does not ship it; the exchange is a single optional
/// authorization identity.
pub struct External {
    authzid: Option<String>,
}

impl External {
    /// Authenticate as the identity asserted by the transport.
    pub fn new() -> External {
        External { authzid: None }
    }

    /// Authenticate with an explicit authorization identity.
    pub fn with_authzid<A: Into<String>>(authzid: A) -> External {
        External {
            authzid: Some(authzid.into()),
        }
    }
}

impl Default for External {
    fn default() -> External {
        External::new()
    }
}

impl ClientMechanism for External {
    fn name(&self) -> &str {
        "EXTERNAL"
    }

    fn from_credentials(
        credentials: Credentials,
    ) -> Result<External, sasl::client::MechanismError> {
        match credentials.identity {
            Identity::Username(username) => Ok(External {
                authzid: Some(username),
            }),
            Identity::None => Ok(External { authzid: None }),
        }
    }

    fn initial(&mut self) -> Vec<u8> {
        self.authzid.clone().unwrap_or_default().into_bytes()
    }

    fn response(&mut self, _challenge: &[u8]) -> Result<Vec<u8>, sasl::client::MechanismError> {
        Ok(Vec::new())
    }

    fn success(&mut self, _data: &[u8]) -> Result<(), sasl::client::MechanismError> {
        Ok(())
    }
}
