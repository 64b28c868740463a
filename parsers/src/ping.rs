// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XEP-0199: XMPP Ping.

use xso::{AsXml, FromXml};

use crate::ns;

/// A ping request, to be answered with an empty IQ result or an error.
#[derive(FromXml, AsXml, PartialEq, Debug, Clone)]
#[xml(namespace = ns::PING, name = "ping")]
pub struct Ping;
