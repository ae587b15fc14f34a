// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use minidom::Element;
use xmpp_parsers::{jid::Jid, ns};

use crate::state::StreamState;

/// The `type` attribute of an IQ stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqType {
    /// Request for information
    Get,
    /// Request to change state
    Set,
    /// Successful response
    Result,
    /// Error response
    Error,
}

impl IqType {
    /// Parse the value of an IQ `type` attribute.
    pub fn from_attr(value: &str) -> Option<Self> {
        match value {
            "get" => Some(IqType::Get),
            "set" => Some(IqType::Set),
            "result" => Some(IqType::Result),
            "error" => Some(IqType::Error),
            _ => None,
        }
    }

    /// The value used for the `type` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            IqType::Get => "get",
            IqType::Set => "set",
            IqType::Result => "result",
            IqType::Error => "error",
        }
    }

    /// Whether this IQ answers a request.
    pub fn is_response(&self) -> bool {
        matches!(self, IqType::Result | IqType::Error)
    }
}

/// Classification of a top-level stream child by element name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StanzaKind {
    /// `<iq/>` with a known type; `None` if the type is missing or unknown
    Iq(Option<IqType>),
    /// `<message/>`
    Message,
    /// `<presence/>`
    Presence,
    /// Anything else
    Other,
}

/// A stanza sent/received over the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Stanza {
    kind: StanzaKind,
    element: Element,
}

impl Stanza {
    /// Classify an element received at the top level of the stream.
    pub fn classify(element: Element) -> Self {
        let kind = if element.ns() != ns::JABBER_CLIENT {
            StanzaKind::Other
        } else {
            match element.name() {
                "iq" => StanzaKind::Iq(element.attr("type").and_then(IqType::from_attr)),
                "message" => StanzaKind::Message,
                "presence" => StanzaKind::Presence,
                _ => StanzaKind::Other,
            }
        };
        Stanza { kind, element }
    }

    /// Kind of stanza
    pub fn kind(&self) -> StanzaKind {
        self.kind
    }

    /// The `id` attribute, if any
    pub fn id(&self) -> Option<&str> {
        self.element.attr("id")
    }

    /// Whether this is an IQ `result` or `error`.
    pub fn is_iq_response(&self) -> bool {
        matches!(self.kind, StanzaKind::Iq(Some(t)) if t.is_response())
    }

    /// Borrow the underlying element
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Unwrap the underlying element
    pub fn into_element(self) -> Element {
        self.element
    }
}

impl From<Stanza> for Element {
    fn from(other: Stanza) -> Self {
        other.element
    }
}

/// High-level event on the Stream implemented by Client
#[derive(Debug)]
pub enum Event {
    /// The connection moved to a new state
    StateChanged(StreamState),
    /// Stream negotiation finished and stanzas can be exchanged
    Online {
        /// Server-set Jabber-Id for your session, or the configured one if
        /// the server offered no resource binding
        bound_jid: Jid,
    },
    /// Received stanza/nonza not consumed by a pending request
    Stanza(Stanza),
}

impl Event {
    /// `Online` event?
    pub fn is_online(&self) -> bool {
        matches!(self, Event::Online { .. })
    }

    /// Get the server-assigned JID for the `Online` event
    pub fn get_jid(&self) -> Option<&Jid> {
        match self {
            Event::Online { bound_jid, .. } => Some(bound_jid),
            _ => None,
        }
    }

    /// If this is a `Stanza` event, get its data
    pub fn as_stanza(&self) -> Option<&Stanza> {
        match self {
            Event::Stanza(stanza) => Some(stanza),
            _ => None,
        }
    }

    /// If this is a `Stanza` event, unwrap into its data
    pub fn into_stanza(self) -> Option<Stanza> {
        match self {
            Event::Stanza(stanza) => Some(stanza),
            _ => None,
        }
    }

    /// If this is a `StateChanged` event, get the new state
    pub fn as_state(&self) -> Option<&StreamState> {
        match self {
            Event::StateChanged(state) => Some(state),
            _ => None,
        }
    }
}
