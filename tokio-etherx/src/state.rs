// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Session state bits.

use core::fmt;
use core::ops::{BitAnd, BitOr, BitOrAssign};

/// The state of a session as a combination of independent bits.
///
/// During negotiation bits are only ever set, with one exception: a stream
/// restart clears [`SessionState::INPUT_STREAM`],
/// [`SessionState::OUTPUT_STREAM`], and [`SessionState::READY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState(u16);

impl SessionState {
    /// No bits set; the state of a freshly initiated session.
    pub const EMPTY: SessionState = SessionState(0);

    /// This side accepted the connection. Absent on the side which
    /// initiated it.
    pub const RECEIVED: SessionState = SessionState(1);

    /// The transport is protected by TLS.
    pub const SECURE: SessionState = SessionState(1 << 1);

    /// The peer has been authenticated.
    pub const AUTHN: SessionState = SessionState(1 << 2);

    /// Negotiation is complete and stanzas may flow.
    pub const READY: SessionState = SessionState(1 << 3);

    /// It is this side's turn to advertise stream features.
    pub const OUTPUT: SessionState = SessionState(1 << 4);

    /// The inbound stream header has been exchanged.
    pub const INPUT_STREAM: SessionState = SessionState(1 << 5);

    /// The outbound stream header has been exchanged.
    pub const OUTPUT_STREAM: SessionState = SessionState(1 << 6);

    /// The session is server-to-server; stanzas use `jabber:server`.
    pub const S2S: SessionState = SessionState(1 << 7);

    /// Whether every bit of `other` is set in `self`.
    pub fn contains(self, other: SessionState) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: SessionState) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: SessionState) {
        self.0 &= !other.0;
    }
}

impl BitOr for SessionState {
    type Output = SessionState;

    fn bitor(self, rhs: SessionState) -> SessionState {
        SessionState(self.0 | rhs.0)
    }
}

impl BitOrAssign for SessionState {
    fn bitor_assign(&mut self, rhs: SessionState) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SessionState {
    type Output = SessionState;

    fn bitand(self, rhs: SessionState) -> SessionState {
        SessionState(self.0 & rhs.0)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let names = [
            (SessionState::RECEIVED, "Received"),
            (SessionState::SECURE, "Secure"),
            (SessionState::AUTHN, "Authn"),
            (SessionState::READY, "Ready"),
            (SessionState::OUTPUT, "Output"),
            (SessionState::INPUT_STREAM, "InputStream"),
            (SessionState::OUTPUT_STREAM, "OutputStream"),
            (SessionState::S2S, "S2S"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("Empty")?;
        }
        Ok(())
    }
}
