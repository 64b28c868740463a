// Copyright (c) 2025 etherx contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Correlation of IQ responses to outstanding requests.

use core::future::Future;
use core::ops::ControlFlow;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use jid::Jid;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::parsers::iq::{Iq, IqType};

type Key = (Option<Jid>, String);
type Map = BTreeMap<Key, oneshot::Sender<Iq>>;

/// The table matching response IQs to outstanding `get`/`set` requests by
/// `(peer, id)`.
///
/// The mutex is held only for insert, lookup, and delete.
pub(crate) struct IqCorrelator {
    map: Arc<Mutex<Map>>,
}

impl IqCorrelator {
    pub(crate) fn new() -> IqCorrelator {
        IqCorrelator {
            map: Arc::new(Mutex::new(Map::new())),
        }
    }

    /// Register an outstanding request addressed to `to` with the given id.
    ///
    /// # Panics
    ///
    /// Panics when the `(to, id)` pair is already registered; the id source
    /// must mint unique ids.
    pub(crate) fn register(&self, to: Option<Jid>, id: String) -> PendingIq {
        let key = (to, id);
        let (tx, rx) = oneshot::channel();
        let mut map = self.map.lock().unwrap();
        assert!(
            map.insert(key.clone(), tx).is_none(),
            "iq correlator: duplicate id {:?}",
            key.1
        );
        PendingIq {
            entry: Some(MapEntryHandle {
                key,
                map: Arc::downgrade(&self.map),
            }),
            inner: rx,
        }
    }

    /// Attempt to resolve an inbound IQ as the response to an outstanding
    /// request.
    ///
    /// Responses from a peer which omits its `from` are matched a second
    /// time under the bare key. Unmatched IQs come back unharmed for
    /// regular dispatch.
    pub(crate) fn resolve(&self, iq: Iq) -> ControlFlow<(), Iq> {
        match iq.payload {
            IqType::Result(_) | IqType::Error { .. } => (),
            _ => return ControlFlow::Continue(iq),
        }
        let mut map = self.map.lock().unwrap();
        let sender = map
            .remove(&(iq.from.clone(), iq.id.clone()))
            .or_else(|| map.remove(&(None, iq.id.clone())));
        drop(map);
        match sender {
            Some(sender) => {
                // A dropped PendingIq is indistinguishable from a late
                // response; both are fine to discard.
                let _: Result<_, _> = sender.send(iq);
                ControlFlow::Break(())
            }
            None => {
                log::trace!(
                    "no outstanding request for iq response from {:?} with id {:?}",
                    iq.from,
                    iq.id
                );
                ControlFlow::Continue(iq)
            }
        }
    }
}

struct MapEntryHandle {
    key: Key,
    map: Weak<Mutex<Map>>,
}

impl Drop for MapEntryHandle {
    fn drop(&mut self) {
        let Some(map) = self.map.upgrade() else {
            return;
        };
        let Ok(mut map) = map.lock() else {
            return;
        };
        map.remove(&self.key);
    }
}

/// A future resolving to the response of a `get`/`set` IQ.
///
/// An `Ok` result does not imply remote success: the response may be a
/// `type="error"` IQ. There is no built-in timeout; combine with
/// [`tokio::time::timeout`] as needed. Dropping the future unregisters the
/// correlation entry.
pub struct PendingIq {
    entry: Option<MapEntryHandle>,
    inner: oneshot::Receiver<Iq>,
}

impl Future for PendingIq {
    type Output = Result<Iq, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll(cx) {
            Poll::Ready(Ok(iq)) => {
                this.entry.take();
                Poll::Ready(Ok(iq))
            }
            Poll::Ready(Err(_)) => {
                this.entry.take();
                Poll::Ready(Err(Error::Disconnected))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
