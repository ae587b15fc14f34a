//! Client-side [XMPP](https://xmpp.org/) connection core with asynchronous I/O using [tokio](https://tokio.rs/).
//!
//! # Getting started
//!
//! Build a [`ClientConfig`] for your account and hand it to
//! [`Client::connect`]. The client runs the connection in a background
//! task: it looks up the `_xmpp-client._tcp` SRV records of your domain,
//! tries the advertised hosts in RFC 2782 order, and negotiates StartTLS,
//! SASL and resource binding. Poll the client as a
//! [`Stream`](futures::Stream) to observe state changes and incoming
//! stanzas, and use [`Client::send_iq`] or [`Client::iq`] to send requests
//! whose responses are routed back to you.
//!
//! ```no_run
//! use futures::StreamExt;
//! use xmpp_engine::{jid::BareJid, Client, ClientConfig, Event};
//!
//! # async fn run() -> Result<(), xmpp_engine::Error> {
//! let jid: BareJid = "user@example.org".parse()?;
//! let mut client = Client::connect(ClientConfig::new(jid, "secret"))?;
//! let bound_jid = client.wait_until_ready().await?;
//! println!("online as {}", bound_jid);
//! while let Some(event) = client.next().await {
//!     if let Event::Stanza(stanza) = event {
//!         println!("{:?}", stanza.kind());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! Supported transports:
//! - [x] StartTLS TCP (IPv4/IPv6 with [happy eyeballs](https://en.wikipedia.org/wiki/Happy_Eyeballs) support)
//! - [x] Custom connectors via the [`connect::ServerConnector`] trait
//! - [x] Custom SRV record sources via the [`connect::SrvRecordSource`] trait
//!
//! Presence, roster and XEP extensions are left to the application, on
//! top of the stanza API.

#![deny(unsafe_code, missing_docs, bare_trait_objects)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod event;
pub use event::{Event, IqType, Stanza, StanzaKind};
mod state;
pub use state::{FailureReason, StreamState};
pub mod normalize;

pub mod connect;
pub mod negotiation;
pub mod xmlstream;

mod client;
pub use client::auth;
pub use client::iq;
pub use client::{Client, ClientConfig};

/// Detailed error types
pub mod error;

#[doc(inline)]
/// Generic xmpp-engine Error
pub use crate::error::Error;

// Re-exports
pub use minidom;
pub use xmpp_parsers as parsers;
pub use xmpp_parsers::jid;
