// Copyright (c) 2019 Emmanuel Gil Peyrot <linkmauve@linkmauve.fr>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::pin::Pin;
use core::task::{Context, Poll};

use futures::Stream;
use minidom::Element;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use xmpp_parsers::ns;

use crate::{
    connect::{ServerConnector, SrvRecordSource, SrvResolver, SystemDns, TcpServerConnector},
    error::Error,
    event::Event,
    jid::Jid,
    normalize::{normalize, NormalizationKind},
    state::StreamState,
};

pub mod auth;
mod config;
pub mod iq;
#[cfg(test)]
mod tests;
mod worker;

pub use config::ClientConfig;
use iq::{Continuation, IdGenerator, IqFailure, IqRegistry, IqRequest, IqResponseToken};
use worker::{Command, Publisher, Worker};

/// Depth of the queue of stanzas waiting to be written.
const COMMAND_QUEUE_DEPTH: usize = 16;

/// XMPP client connection and state
///
/// This implements the `futures` crate's [`Stream`](#impl-Stream) to receive
/// stream state changes as well as stanzas received via the stream. The
/// stream ends once the connection has reached a terminal state and has
/// been torn down.
///
/// To send stanzas, the [`send_stanza`][`Client::send_stanza`] method can be
/// used. IQ requests go through [`send_iq`][`Client::send_iq`] or
/// [`iq`][`Client::iq`], which route the response back to the caller.
pub struct Client {
    state: watch::Receiver<StreamState>,
    bound_jid: watch::Receiver<Option<Jid>>,
    commands: mpsc::Sender<Command>,
    events: UnboundedReceiverStream<Event>,
    registry: IqRegistry,
    ids: IdGenerator,
}

impl Client {
    /// Start a new XMPP client over TCP, using the system resolver.
    ///
    /// The connection is driven by a background task; this must be called
    /// from within a tokio runtime. Fails right away if the JID's domain
    /// cannot be converted to its ASCII form.
    pub fn connect(config: ClientConfig) -> Result<Self, Error> {
        Self::connect_with(config, TcpServerConnector, SystemDns)
    }

    /// Start a new client with a custom connector and SRV record source.
    pub fn connect_with<C: ServerConnector, S: SrvRecordSource>(
        config: ClientConfig,
        connector: C,
        source: S,
    ) -> Result<Self, Error> {
        normalize(NormalizationKind::IdnaToAscii, config.jid.domain().as_str())?;

        let mut resolver = SrvResolver::new(source);
        if let Some(seed) = config.srv_seed {
            resolver = resolver.with_seed(seed);
        }

        let (state_tx, state_rx) = watch::channel(StreamState::Resolving);
        let (jid_tx, jid_rx) = watch::channel(None);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let registry = IqRegistry::new();

        let worker = Worker::new(
            config,
            connector,
            resolver,
            Publisher {
                state: state_tx,
                bound_jid: jid_tx,
                events: events_tx,
            },
            commands_rx,
            registry.clone(),
        );
        tokio::spawn(worker.run());

        Ok(Client {
            state: state_rx,
            bound_jid: jid_rx,
            commands: commands_tx,
            events: UnboundedReceiverStream::new(events_rx),
            registry,
            ids: IdGenerator::default(),
        })
    }

    /// The current connection state.
    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    /// Get the client's bound JID (the one reported by the XMPP
    /// server).
    pub fn bound_jid(&self) -> Option<Jid> {
        self.bound_jid.borrow().clone()
    }

    /// Wait until the connection is ready and return the bound JID.
    ///
    /// Fails with [`Error::Failed`] if the connection failed and with
    /// [`Error::Disconnected`] if it was closed first.
    pub async fn wait_until_ready(&self) -> Result<Jid, Error> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|state| state.is_ready() || state.is_terminal())
            .await
            .map_err(|_| Error::Disconnected)?
            .clone();
        match reached {
            StreamState::Ready => self.bound_jid().ok_or(Error::NotConnected),
            StreamState::Failed(reason) => Err(Error::Failed(reason)),
            _ => Err(Error::Disconnected),
        }
    }

    /// Send a stanza.
    ///
    /// This will automatically allocate an ID if the stanza has no ID set.
    /// Returns the stanza's id once it has been queued for the stream.
    pub async fn send_stanza(&self, mut stanza: Element) -> Result<String, Error> {
        if !self.state.borrow().is_ready() {
            return Err(Error::NotConnected);
        }
        let id = match stanza.attr("id") {
            Some(id) => id.to_owned(),
            None => {
                let id = self.ids.next_id();
                stanza.set_attr("id", id.clone());
                id
            }
        };
        self.enqueue(stanza).await?;
        Ok(id)
    }

    /// Send an IQ request and hand its response to `continuation`.
    ///
    /// The continuation is registered before the request is written, and
    /// is invoked exactly once: with the `result` or `error` response, or
    /// with an [`IqFailure`] if the request is cancelled or the connection
    /// ends first. Returns the request id.
    pub async fn send_iq<F>(
        &self,
        to: Option<Jid>,
        request: IqRequest,
        continuation: F,
    ) -> Result<String, Error>
    where
        F: FnOnce(Result<Element, IqFailure>) + Send + 'static,
    {
        self.send_iq_boxed(to, request, Box::new(continuation)).await
    }

    /// Send an IQ request and return a future for its response.
    pub async fn iq(&self, to: Option<Jid>, request: IqRequest) -> Result<IqResponseToken, Error> {
        if !self.state.borrow().is_ready() {
            return Err(Error::NotConnected);
        }
        let id = self.ids.next_id();
        let token = self.registry.register_token(&id)?;
        let stanza = build_iq(&id, to, request);
        if let Err(e) = self.enqueue(stanza).await {
            self.registry.cancel(&id, IqFailure::LostWorker);
            return Err(e);
        }
        Ok(token)
    }

    async fn send_iq_boxed(
        &self,
        to: Option<Jid>,
        request: IqRequest,
        continuation: Box<dyn Continuation>,
    ) -> Result<String, Error> {
        if !self.state.borrow().is_ready() {
            return Err(Error::NotConnected);
        }
        let id = self.ids.next_id();
        self.registry.register(&id, continuation)?;
        let stanza = build_iq(&id, to, request);
        if let Err(e) = self.enqueue(stanza).await {
            self.registry.cancel(&id, IqFailure::LostWorker);
            return Err(e);
        }
        Ok(id)
    }

    /// Fail the pending IQ request `id` with [`IqFailure::Cancelled`].
    ///
    /// A response arriving later is delivered as an ordinary stanza event.
    /// Returns whether the request was still pending.
    pub fn cancel_iq(&self, id: &str) -> bool {
        self.registry.cancel(id, IqFailure::Cancelled)
    }

    /// Number of IQ requests waiting for a response.
    pub fn pending_iqs(&self) -> usize {
        self.registry.len()
    }

    /// Close the client cleanly.
    ///
    /// The stream footer is sent, pending requests fail with
    /// [`IqFailure::Closed`] and the connection enters
    /// [`StreamState::Closed`]. Negotiation in progress is abandoned.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.commands
            .send(Command::Disconnect)
            .await
            .map_err(|_| Error::Disconnected)
    }

    async fn enqueue(&self, stanza: Element) -> Result<(), Error> {
        self.commands
            .send(Command::Send(stanza))
            .await
            .map_err(|_| Error::NotConnected)
    }
}

fn build_iq(id: &str, to: Option<Jid>, request: IqRequest) -> Element {
    let (type_, payload) = request.into_parts();
    let mut iq = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", type_.as_str())
        .attr("id", id)
        .append(payload)
        .build();
    if let Some(to) = to {
        iq.set_attr("to", to.to_string());
    }
    iq
}

/// Incoming XMPP events
///
/// In an `async fn` you may want to use this with `use
/// futures::stream::StreamExt;`
impl Stream for Client {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
