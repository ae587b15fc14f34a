// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Connection lifecycle states.

use core::fmt;

/// Where a connection sits in its lifecycle.
///
/// Exactly one state is active per connection. `Closed` and `Failed` are
/// terminal: once entered, the connection never leaves them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Looking up the candidate targets for the domain.
    Resolving,
    /// Trying TCP connections to the candidate targets in order.
    Connecting,
    /// Stream header sent, waiting for the server's header and features.
    StreamOpening,
    /// StartTLS in progress.
    NegotiatingTls,
    /// SASL exchange in progress.
    NegotiatingAuth,
    /// Re-opening the stream after TLS or authentication.
    StreamRestarting,
    /// Resource binding in progress.
    Binding,
    /// Stanzas can be exchanged.
    Ready,
    /// The connection was closed on request.
    Closed,
    /// The connection failed.
    Failed(FailureReason),
}

impl StreamState {
    /// Whether the state is `Closed` or `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Failed(_))
    }

    /// Whether stanzas can be sent.
    pub fn is_ready(&self) -> bool {
        matches!(self, StreamState::Ready)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Resolving => f.write_str("resolving"),
            StreamState::Connecting => f.write_str("connecting"),
            StreamState::StreamOpening => f.write_str("opening stream"),
            StreamState::NegotiatingTls => f.write_str("negotiating TLS"),
            StreamState::NegotiatingAuth => f.write_str("authenticating"),
            StreamState::StreamRestarting => f.write_str("restarting stream"),
            StreamState::Binding => f.write_str("binding resource"),
            StreamState::Ready => f.write_str("ready"),
            StreamState::Closed => f.write_str("closed"),
            StreamState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Why a connection entered [`StreamState::Failed`].
///
/// This is also the reason handed to every pending request continuation
/// when the connection goes away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// All candidate targets refused the connection.
    NoReachableHost,
    /// The server refused StartTLS or the upgrade failed.
    TlsNegotiationFailed(String),
    /// SASL authentication failed.
    AuthenticationFailed(String),
    /// The stream was closed with a `<stream:error/>`.
    StreamError {
        /// Defined condition of the stream error.
        condition: String,
        /// Optional text of the stream error.
        text: Option<String>,
    },
    /// I/O failure or unexpected end of the stream.
    TransportError(String),
    /// The peer sent something that does not follow the protocol.
    ProtocolViolation(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NoReachableHost => f.write_str("no reachable host"),
            FailureReason::TlsNegotiationFailed(e) => write!(f, "TLS negotiation failed: {}", e),
            FailureReason::AuthenticationFailed(e) => write!(f, "authentication failed: {}", e),
            FailureReason::StreamError {
                condition,
                text: Some(text),
            } => write!(f, "stream error {}: {}", condition, text),
            FailureReason::StreamError {
                condition,
                text: None,
            } => write!(f, "stream error {}", condition),
            FailureReason::TransportError(e) => write!(f, "transport error: {}", e),
            FailureReason::ProtocolViolation(e) => write!(f, "protocol violation: {}", e),
        }
    }
}
