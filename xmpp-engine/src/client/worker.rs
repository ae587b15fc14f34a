// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The connection engine.
//!
//! One worker task per connection drives resolution, connection attempts,
//! stream negotiation and finally the read loop. It is the only place
//! where the stream is read or written, and the only place which changes
//! the connection state.

use core::ops::ControlFlow;

use log::{debug, trace, warn};
use minidom::Element;
use tokio::sync::{mpsc, watch};

use super::config::ClientConfig;
use super::iq::{IqFailure, IqRegistry};
use crate::connect::{ServerConnector, SrvRecordSource, SrvResolver, SrvTargets};
use crate::error::{Error, ProtocolError};
use crate::event::{Event, Stanza};
use crate::jid::Jid;
use crate::negotiation::{parse_stream_error, NegotiationStep, Negotiator, StepOutcome};
use crate::normalize::{normalize, NormalizationKind};
use crate::state::StreamState;
use crate::xmlstream::{StreamItem, XmlStream};

/// Requests from the [`Client`](super::Client) handle to its worker.
#[derive(Debug)]
pub(super) enum Command {
    /// Write a stanza to the stream.
    Send(Element),
    /// Close the stream and enter `Closed`.
    Disconnect,
}

/// Sides of the channels the worker reports through.
pub(super) struct Publisher {
    pub(super) state: watch::Sender<StreamState>,
    pub(super) bound_jid: watch::Sender<Option<Jid>>,
    pub(super) events: mpsc::UnboundedSender<Event>,
}

impl Publisher {
    fn set(&self, state: StreamState) {
        debug!("Connection state: {}", state);
        self.state.send_replace(state.clone());
        self.emit(Event::StateChanged(state));
    }

    fn online(&self, bound_jid: Jid) {
        self.bound_jid.send_replace(Some(bound_jid.clone()));
        self.set(StreamState::Ready);
        self.emit(Event::Online { bound_jid });
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!("Event dropped, nobody is listening");
        }
    }
}

pub(super) struct Worker<C: ServerConnector, S: SrvRecordSource> {
    config: ClientConfig,
    connector: C,
    resolver: SrvResolver<S>,
    publisher: Publisher,
    commands: mpsc::Receiver<Command>,
    registry: IqRegistry,
    stream: Option<XmlStream<C::Transport>>,
}

impl<C: ServerConnector, S: SrvRecordSource> Worker<C, S> {
    pub(super) fn new(
        config: ClientConfig,
        connector: C,
        resolver: SrvResolver<S>,
        publisher: Publisher,
        commands: mpsc::Receiver<Command>,
        registry: IqRegistry,
    ) -> Self {
        Worker {
            config,
            connector,
            resolver,
            publisher,
            commands,
            registry,
            stream: None,
        }
    }

    pub(super) async fn run(mut self) {
        let result = self.drive().await;
        self.finish(result).await;
    }

    async fn drive(&mut self) -> Result<(), Error> {
        self.publisher.set(StreamState::Resolving);

        let bound_jid = {
            let establish = establish(
                &self.config,
                &self.connector,
                &self.resolver,
                &self.publisher,
                &mut self.stream,
            );
            tokio::pin!(establish);
            loop {
                tokio::select! {
                    result = &mut establish => break result?,
                    command = self.commands.recv() => match command {
                        Some(Command::Send(_)) => {
                            warn!("Dropping stanza sent before the stream was ready")
                        }
                        Some(Command::Disconnect) | None => {
                            debug!("Disconnect requested during negotiation");
                            return Ok(());
                        }
                    },
                }
            }
        };

        let Some(stream) = self.stream.as_mut() else {
            return Err(Error::Disconnected);
        };
        self.publisher.online(bound_jid);

        loop {
            tokio::select! {
                item = stream.recv() => match item? {
                    StreamItem::Element(elem) => {
                        if let Some(error) = parse_stream_error(&elem) {
                            return Err(error);
                        }
                        dispatch(&self.registry, &self.publisher, elem);
                    }
                    StreamItem::Footer => {
                        debug!("Server closed the stream");
                        return Err(Error::Disconnected);
                    }
                    StreamItem::Header(_) => {
                        return Err(ProtocolError::UnexpectedStreamStart.into())
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(elem)) => stream.send_element(&elem).await?,
                    Some(Command::Disconnect) | None => return Ok(()),
                },
            }
        }
    }

    /// Enter the terminal state: fail pending requests, close the stream,
    /// then announce the state.
    async fn finish(&mut self, result: Result<(), Error>) {
        let (state, failure) = match result {
            Ok(()) => (StreamState::Closed, IqFailure::Closed),
            Err(e) => {
                warn!("Connection failed: {}", e);
                let reason = e.failure_reason();
                (
                    StreamState::Failed(reason.clone()),
                    IqFailure::Failed(reason),
                )
            }
        };

        let cancelled = self.registry.cancel_all(failure);
        if cancelled > 0 {
            debug!("Cancelled {} pending requests", cancelled);
        }

        if let Some(stream) = self.stream.as_mut() {
            match stream.close().await {
                Ok(()) => debug!("Stream closed"),
                Err(e) => debug!("Stream closure failed: {}", e),
            }
        }

        self.publisher.set(state);
    }
}

impl<C: ServerConnector, S: SrvRecordSource> Drop for Worker<C, S> {
    fn drop(&mut self) {
        if !self.registry.is_closed() {
            self.registry.cancel_all(IqFailure::LostWorker);
        }
    }
}

/// Hand a received element to its pending request, or to the observer.
fn dispatch(registry: &IqRegistry, publisher: &Publisher, elem: Element) {
    let stanza = Stanza::classify(elem);
    let stanza = match stanza.id() {
        Some(id) if stanza.is_iq_response() => {
            let id = id.to_owned();
            match registry.resolve(&id, stanza.into_element()) {
                ControlFlow::Break(()) => return,
                ControlFlow::Continue(elem) => Stanza::classify(elem),
            }
        }
        _ => stanza,
    };
    publisher.emit(Event::Stanza(stanza));
}

/// Try every target in order until one accepts the connection.
async fn connect_any<C: ServerConnector>(
    connector: &C,
    targets: SrvTargets,
) -> Result<C::Transport, Error> {
    for target in targets {
        debug!("Connecting to {}", target);
        match connector.connect(&target).await {
            Ok(transport) => return Ok(transport),
            Err(e) => debug!("Connection to {} failed: {}", target, e),
        }
    }
    Err(Error::NoReachableHost)
}

/// Resolve, connect and negotiate, returning the session JID.
///
/// The stream is stored in `slot` as soon as it exists, so that it can be
/// closed whatever the outcome.
async fn establish<C: ServerConnector, S: SrvRecordSource>(
    config: &ClientConfig,
    connector: &C,
    resolver: &SrvResolver<S>,
    publisher: &Publisher,
    slot: &mut Option<XmlStream<C::Transport>>,
) -> Result<Jid, Error> {
    let domain = normalize(NormalizationKind::IdnaToAscii, config.jid.domain().as_str())?;
    let targets = config.dns.targets(resolver).await?;

    publisher.set(StreamState::Connecting);
    let transport = connect_any(connector, targets).await?;
    let stream = slot.insert(XmlStream::new(transport));

    let mut negotiator = Negotiator::new(
        &domain,
        config.resource(),
        config.tls,
        config.authenticator.clone(),
    );
    publisher.set(StreamState::StreamOpening);
    negotiator.open(stream).await?;

    loop {
        let features = negotiator.recv_features(stream).await?;
        let step = negotiator.next_step(&features, stream.is_encrypted())?;
        match step {
            NegotiationStep::StartTls => publisher.set(StreamState::NegotiatingTls),
            NegotiationStep::Authenticate(_) => publisher.set(StreamState::NegotiatingAuth),
            NegotiationStep::Bind => publisher.set(StreamState::Binding),
            NegotiationStep::Done => (),
        }
        match negotiator.run_step(&step, stream).await? {
            StepOutcome::Restart => {
                publisher.set(StreamState::StreamRestarting);
                negotiator.open(stream).await?;
                publisher.set(StreamState::StreamOpening);
            }
            StepOutcome::Ready => break,
        }
    }

    debug!(
        "Negotiation finished after {} restarts on stream {:?}",
        negotiator.restarts(),
        negotiator.stream_id()
    );
    Ok(match negotiator.bound_jid() {
        Some(jid) => Jid::from(jid.clone()),
        None => config.jid.clone(),
    })
}
