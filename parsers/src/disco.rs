// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XEP-0030: Service Discovery, the `disco#info` payloads.

use xso::{AsXml, FromXml};

use crate::ns;

/// A feature supported by an entity, identified by its `var`.
#[derive(FromXml, AsXml, PartialEq, Eq, Debug, Clone)]
#[xml(namespace = ns::DISCO_INFO, name = "feature")]
pub struct Feature {
    /// The protocol namespace or other identifier of the feature.
    #[xml(attribute)]
    pub var: String,
}

impl Feature {
    /// Create a new feature for the given `var`.
    pub fn new<V: Into<String>>(var: V) -> Feature {
        Feature { var: var.into() }
    }
}

/// An identity of an entity: what kind of thing it is.
#[derive(FromXml, AsXml, PartialEq, Eq, Debug, Clone)]
#[xml(namespace = ns::DISCO_INFO, name = "identity")]
pub struct Identity {
    /// The category, from the XMPP registrar (`client`, `server`,
    /// `gateway`, ...).
    #[xml(attribute)]
    pub category: String,

    /// The type within the category.
    #[xml(attribute)]
    pub type_: String,

    /// An optional human-readable name.
    #[xml(attribute(default))]
    pub name: Option<String>,
}

impl Identity {
    /// Create a new identity without a name.
    pub fn new<C: Into<String>, T: Into<String>>(category: C, type_: T) -> Identity {
        Identity {
            category: category.into(),
            type_: type_.into(),
            name: None,
        }
    }
}

/// A `disco#info` query or result.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone, Default)]
#[xml(namespace = ns::DISCO_INFO, name = "query")]
pub struct InfoQuery {
    /// The optional node being queried.
    #[xml(attribute(default))]
    pub node: Option<String>,

    /// Identities of the queried entity.
    #[xml(child(n = ..))]
    pub identities: Vec<Identity>,

    /// Features supported by the queried entity.
    #[xml(child(n = ..))]
    pub features: Vec<Feature>,
}
