// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # Stream negotiation
//!
//! After every stream (re)start the server advertises its features. The
//! [`Negotiator`] picks one step from them (StartTLS, then SASL, then
//! resource binding), runs it, and reports whether the stream has to be
//! restarted or whether negotiation is complete.

use std::sync::Arc;

use log::{debug, trace};
use minidom::Element;
use xmpp_parsers::jid::FullJid;

/// Namespaces, extended with the stream-error namespace (RFC 6120 §4.9.2),
/// which `xmpp_parsers::ns` does not export.
mod ns {
    pub use xmpp_parsers::ns::*;
    pub const XMPP_STREAMS: &str = "urn:ietf:params:xml:ns:xmpp-streams";
}

use crate::client::auth::AuthenticatorProvider;
use crate::error::{Error, ProtocolError, TlsError};
use crate::xmlstream::{StreamItem, XmlStream, XmlTransport};

mod bind;
mod sasl;
mod starttls;

/// Local policy for StartTLS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Upgrade whenever the server offers StartTLS.
    #[default]
    Opportunistic,
    /// Fail if the server does not offer StartTLS.
    Required,
    /// Never upgrade; fail if the server requires it.
    Disabled,
}

/// The StartTLS advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTlsOffer {
    /// The server marked StartTLS as mandatory.
    pub required: bool,
}

/// What a `<stream:features/>` element advertises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFeatures {
    /// StartTLS, if offered
    pub starttls: Option<StartTlsOffer>,
    /// SASL mechanism names, in server order
    pub mechanisms: Vec<String>,
    /// Resource binding is offered
    pub bind: bool,
}

impl TryFrom<Element> for StreamFeatures {
    type Error = ProtocolError;

    fn try_from(elem: Element) -> Result<Self, ProtocolError> {
        if !elem.is("features", ns::STREAM) {
            return Err(ProtocolError::UnexpectedElement(elem.name().to_owned()));
        }
        let starttls = elem
            .get_child("starttls", ns::TLS)
            .map(|starttls| StartTlsOffer {
                required: starttls.has_child("required", ns::TLS),
            });
        let mechanisms = elem
            .get_child("mechanisms", ns::SASL)
            .map(|mechanisms| {
                mechanisms
                    .children()
                    .filter(|child| child.is("mechanism", ns::SASL))
                    .map(|child| child.text().trim().to_owned())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(StreamFeatures {
            starttls,
            mechanisms,
            bind: elem.has_child("bind", ns::BIND),
        })
    }
}

/// The next negotiation step to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationStep {
    /// Upgrade the transport with StartTLS.
    StartTls,
    /// Authenticate with one of these mechanisms.
    Authenticate(Vec<String>),
    /// Bind a resource.
    Bind,
    /// Nothing left to negotiate.
    Done,
}

/// Result of a completed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A fresh stream must be opened before reading features again.
    Restart,
    /// Negotiation is complete.
    Ready,
}

/// Extract condition and text from a `<stream:error/>`.
pub(crate) fn parse_stream_error(elem: &Element) -> Option<Error> {
    if !elem.is("error", ns::STREAM) {
        return None;
    }
    let condition = elem
        .children()
        .find(|child| child.ns() == ns::XMPP_STREAMS && child.name() != "text")
        .map(|child| child.name().to_owned())
        .unwrap_or_else(|| "undefined-condition".to_owned());
    let text = elem
        .get_child("text", ns::XMPP_STREAMS)
        .map(|text| text.text());
    Some(Error::StreamError { condition, text })
}

/// Receive the next top-level element during negotiation.
///
/// A stream error or the end of the stream ends negotiation.
pub(crate) async fn recv_element<T: XmlTransport>(
    stream: &mut XmlStream<T>,
) -> Result<Element, Error> {
    match stream.recv().await? {
        StreamItem::Element(elem) => match parse_stream_error(&elem) {
            Some(error) => Err(error),
            None => Ok(elem),
        },
        StreamItem::Header(_) => Err(ProtocolError::UnexpectedStreamStart.into()),
        StreamItem::Footer => Err(Error::Disconnected),
    }
}

/// Negotiation state of one connection.
pub struct Negotiator {
    domain: String,
    resource: Option<String>,
    policy: TlsPolicy,
    authenticator: Arc<dyn AuthenticatorProvider>,
    authenticated: bool,
    opened: bool,
    restarts: usize,
    stream_id: Option<String>,
    offered_mechanisms: Vec<String>,
    bound_jid: Option<FullJid>,
}

impl Negotiator {
    /// Negotiator for a stream to `domain`.
    pub fn new(
        domain: &str,
        resource: Option<String>,
        policy: TlsPolicy,
        authenticator: Arc<dyn AuthenticatorProvider>,
    ) -> Self {
        Negotiator {
            domain: domain.to_owned(),
            resource,
            policy,
            authenticator,
            authenticated: false,
            opened: false,
            restarts: 0,
            stream_id: None,
            offered_mechanisms: Vec::new(),
            bound_jid: None,
        }
    }

    /// Send the stream header, resetting the stream first unless this is
    /// the initial stream.
    pub async fn open<T: XmlTransport>(&mut self, stream: &mut XmlStream<T>) -> Result<(), Error> {
        if self.opened {
            self.restarts += 1;
            stream.restart(&self.domain).await?;
        } else {
            self.opened = true;
            stream.send_header(&self.domain).await?;
        }
        Ok(())
    }

    /// Wait for the server's stream header and features.
    pub async fn recv_features<T: XmlTransport>(
        &mut self,
        stream: &mut XmlStream<T>,
    ) -> Result<StreamFeatures, Error> {
        match stream.recv().await? {
            StreamItem::Header(header) => {
                debug!(
                    "Stream opened by {:?} with id {:?}",
                    header.from, header.id
                );
                self.stream_id = header.id;
            }
            StreamItem::Element(elem) => {
                return Err(match parse_stream_error(&elem) {
                    Some(error) => error,
                    None => ProtocolError::UnexpectedElement(elem.name().to_owned()).into(),
                })
            }
            StreamItem::Footer => return Err(Error::Disconnected),
        }
        let features = StreamFeatures::try_from(recv_element(stream).await?)?;
        trace!("Stream features: {:?}", features);
        Ok(features)
    }

    /// Decide the next step for `features`.
    ///
    /// Precedence is StartTLS, then SASL, then bind. Offers that were
    /// already negotiated on this connection are ignored.
    pub fn next_step(
        &mut self,
        features: &StreamFeatures,
        encrypted: bool,
    ) -> Result<NegotiationStep, Error> {
        if !encrypted {
            match (features.starttls, self.policy) {
                (Some(offer), TlsPolicy::Disabled) if offer.required => {
                    return Err(TlsError::RequiredByServer.into())
                }
                (Some(_), TlsPolicy::Disabled) => (),
                (Some(_), _) => return Ok(NegotiationStep::StartTls),
                (None, TlsPolicy::Required) => return Err(TlsError::NotOffered.into()),
                (None, _) => (),
            }
        }
        if !self.authenticated && !features.mechanisms.is_empty() {
            self.offered_mechanisms = features.mechanisms.clone();
            return Ok(NegotiationStep::Authenticate(features.mechanisms.clone()));
        }
        if features.bind && self.bound_jid.is_none() {
            return Ok(NegotiationStep::Bind);
        }
        Ok(NegotiationStep::Done)
    }

    /// Run one step on the stream.
    pub async fn run_step<T: XmlTransport>(
        &mut self,
        step: &NegotiationStep,
        stream: &mut XmlStream<T>,
    ) -> Result<StepOutcome, Error> {
        match step {
            NegotiationStep::StartTls => {
                starttls::starttls(stream, &self.domain).await?;
                Ok(StepOutcome::Restart)
            }
            NegotiationStep::Authenticate(mechanisms) => {
                sasl::authenticate(stream, self.authenticator.as_ref(), mechanisms).await?;
                self.authenticated = true;
                Ok(StepOutcome::Restart)
            }
            NegotiationStep::Bind => {
                let jid = bind::bind(stream, self.resource.clone()).await?;
                debug!("Bound to {}", jid);
                self.bound_jid = Some(jid);
                Ok(StepOutcome::Ready)
            }
            NegotiationStep::Done => Ok(StepOutcome::Ready),
        }
    }

    /// Whether SASL authentication succeeded on this connection.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The id of the current stream, as sent by the server.
    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    /// Number of stream restarts so far.
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Mechanisms the server offered at the last SASL step.
    pub fn offered_mechanisms(&self) -> &[String] {
        &self.offered_mechanisms
    }

    /// The JID assigned by resource binding.
    pub fn bound_jid(&self) -> Option<&FullJid> {
        self.bound_jid.as_ref()
    }
}
