// Copyright (c) 2025 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Correlation of IQ requests with their responses

use core::error::Error as StdError;
use core::fmt;
use core::future::Future;
use core::ops::ControlFlow;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use tokio::sync::oneshot;

use crate::{event::IqType, minidom::Element, state::FailureReason, Error};

/// An IQ request payload
#[derive(Debug, Clone)]
pub enum IqRequest {
    /// Payload for a `type="get"` request
    Get(Element),

    /// Payload for a `type="set"` request
    Set(Element),
}

impl IqRequest {
    pub(crate) fn into_parts(self) -> (IqType, Element) {
        match self {
            IqRequest::Get(payload) => (IqType::Get, payload),
            IqRequest::Set(payload) => (IqType::Set, payload),
        }
    }
}

/// Why a pending IQ request did not get a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IqFailure {
    /// The connection was closed on request.
    Closed,

    /// The connection failed.
    Failed(FailureReason),

    /// The request was cancelled locally, e.g. after an application
    /// timeout.
    Cancelled,

    /// The connection worker went away without answering.
    ///
    /// Most likely, this means that the worker has died with a panic.
    LostWorker,
}

impl fmt::Display for IqFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed before the response arrived"),
            Self::Failed(reason) => write!(f, "connection failed: {reason}"),
            Self::Cancelled => f.write_str("request cancelled"),
            Self::LostWorker => {
                f.write_str("disconnected from internal connection worker while sending IQ")
            }
        }
    }
}

impl StdError for IqFailure {}

/// Receives the outcome of one IQ request, exactly once.
///
/// Implemented for every `FnOnce(Result<Element, IqFailure>)` closure.
/// [`IqResponseToken`] is the awaitable alternative.
pub trait Continuation: Send + 'static {
    /// Deliver the response stanza or the reason none will come.
    fn invoke(self: Box<Self>, response: Result<Element, IqFailure>);
}

impl<F> Continuation for F
where
    F: FnOnce(Result<Element, IqFailure>) + Send + 'static,
{
    fn invoke(self: Box<Self>, response: Result<Element, IqFailure>) {
        (*self)(response)
    }
}

struct IqResponseSink {
    inner: oneshot::Sender<Result<Element, IqFailure>>,
}

impl Continuation for IqResponseSink {
    fn invoke(self: Box<Self>, response: Result<Element, IqFailure>) {
        let _: Result<_, _> = self.inner.send(response);
    }
}

struct PendingRequest {
    continuation: Box<dyn Continuation>,
    issued_at: Instant,
    serial: u64,
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<String, PendingRequest>,
    next_serial: u64,
    closed: bool,
}

/// Releases one registration when its token goes away.
///
/// Ids may be reused once a request is done, so the entry is only removed
/// if it still carries the serial handed out at registration.
struct IqMapEntryHandle {
    id: String,
    serial: u64,
    map: Weak<Mutex<RegistryState>>,
}

impl Drop for IqMapEntryHandle {
    fn drop(&mut self) {
        let Some(map) = self.map.upgrade() else {
            return;
        };
        let Some(mut map) = map.lock().ok() else {
            return;
        };
        if map.pending.get(&self.id).map(|entry| entry.serial) == Some(self.serial) {
            map.pending.remove(&self.id);
        }
    }
}

pin_project_lite::pin_project! {
    /// Handle for awaiting an IQ response.
    ///
    /// The `IqResponseToken` can be awaited and will generate a result once
    /// the IQ response has been received. Note that an `Ok(_)` result does
    /// **not** imply a successful execution of the remote command: it may
    /// be a `type="error"` response.
    ///
    /// Note that there are no internal timeouts for IQ responses: If a reply
    /// never arrives, the [`IqResponseToken`] future will only complete
    /// when the connection ends. Most of the time, you should combine that
    /// token with something like [`tokio::time::timeout`].
    ///
    /// Dropping (cancelling) an `IqResponseToken` removes the internal
    /// bookkeeping required for tracking the response.
    pub struct IqResponseToken {
        id: String,
        entry: Option<IqMapEntryHandle>,
        #[pin]
        inner: oneshot::Receiver<Result<Element, IqFailure>>,
    }
}

impl IqResponseToken {
    /// The id of the request this token waits for.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for IqResponseToken {
    type Output = Result<Element, IqFailure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(Ok(v)) => {
                // Drop the map entry handle to release some memory.
                this.entry.take();
                Poll::Ready(v)
            }
            Poll::Ready(Err(_)) => {
                log::warn!("IqResponseToken oneshot::Receiver returned receive error!");
                this.entry.take();
                Poll::Ready(Err(IqFailure::LostWorker))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Maps outstanding request ids to their continuations.
///
/// Every registered continuation is invoked exactly once: with the
/// response, on cancellation, or when the connection ends. Continuations
/// are always invoked after the internal lock has been released.
#[derive(Clone, Default)]
pub struct IqRegistry {
    map: Arc<Mutex<RegistryState>>,
}

impl fmt::Debug for IqRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("IqRegistry")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl IqRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Continuations never run under the lock, so a poisoned lock only
        // means a panic in this module's own bookkeeping.
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Store `continuation` for `id`.
    ///
    /// Fails with [`Error::DuplicateId`] if `id` is already pending, leaving
    /// the existing entry untouched, and with [`Error::NotConnected`] once
    /// the registry has been drained by [`cancel_all`](Self::cancel_all).
    /// On failure the continuation is dropped without being invoked.
    pub fn register(&self, id: &str, continuation: Box<dyn Continuation>) -> Result<(), Error> {
        self.insert(id, continuation).map(|_| ())
    }

    fn insert(&self, id: &str, continuation: Box<dyn Continuation>) -> Result<u64, Error> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::NotConnected);
        }
        if state.pending.contains_key(id) {
            return Err(Error::DuplicateId(id.to_owned()));
        }
        let serial = state.next_serial;
        state.next_serial += 1;
        state.pending.insert(
            id.to_owned(),
            PendingRequest {
                continuation,
                issued_at: Instant::now(),
                serial,
            },
        );
        Ok(serial)
    }

    /// Register an awaitable token for `id`.
    pub fn register_token(&self, id: &str) -> Result<IqResponseToken, Error> {
        let (tx, rx) = oneshot::channel();
        let serial = self.insert(id, Box::new(IqResponseSink { inner: tx }))?;
        Ok(IqResponseToken {
            id: id.to_owned(),
            entry: Some(IqMapEntryHandle {
                id: id.to_owned(),
                serial,
                map: Arc::downgrade(&self.map),
            }),
            inner: rx,
        })
    }

    /// Attempt to handle a stanza as the response to a pending request.
    ///
    /// Returns the stanza unharmed if no request with this id is pending.
    pub fn resolve(&self, id: &str, response: Element) -> ControlFlow<(), Element> {
        let entry = self.lock().pending.remove(id);
        match entry {
            None => {
                log::trace!("not handling IQ response with id {:?}: no pending request", id);
                ControlFlow::Continue(response)
            }
            Some(entry) => {
                entry.continuation.invoke(Ok(response));
                ControlFlow::Break(())
            }
        }
    }

    /// Fail a single pending request. Returns whether it was pending.
    pub fn cancel(&self, id: &str, failure: IqFailure) -> bool {
        let entry = self.lock().pending.remove(id);
        match entry {
            None => false,
            Some(entry) => {
                entry.continuation.invoke(Err(failure));
                true
            }
        }
    }

    /// Fail every pending request with `failure` and refuse further
    /// registrations. Returns the number of continuations invoked.
    pub fn cancel_all(&self, failure: IqFailure) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.drain().map(|(_, entry)| entry).collect()
        };
        let count = drained.len();
        for entry in drained {
            entry.continuation.invoke(Err(failure.clone()));
        }
        count
    }

    /// Whether a request with `id` is pending.
    pub fn is_pending(&self, id: &str) -> bool {
        self.lock().pending.contains_key(id)
    }

    /// When the pending request with `id` was registered.
    pub fn issued_at(&self, id: &str) -> Option<Instant> {
        self.lock().pending.get(id).map(|entry| entry.issued_at)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether no request is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Whether [`cancel_all`](Self::cancel_all) was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// Per-connection stanza id allocator.
#[derive(Debug, Default)]
pub(crate) struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub(crate) fn next_id(&self) -> String {
        let n = self.0.fetch_add(1, Ordering::Relaxed) + 1;
        format!("id-{}", n)
    }
}
