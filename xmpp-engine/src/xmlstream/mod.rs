// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! # RFC 6120 XML Streams
//!
//! **Note:** The XML stream is a low-level API which you should probably not
//! use directly.
//!
//! A transport is anything implementing [`XmlTransport`]: a duplex byte
//! channel whose inbound side is already tokenized into [`XmlEvent`]s and
//! which can be upgraded to TLS in place. [`RxmlTransport`] is the
//! implementation over tokio I/O objects.
//!
//! [`XmlStream`] sits on top of a transport. It writes stream headers,
//! elements and the footer, and rebuilds one [`minidom::Element`] per
//! top-level child of the stream root.

use core::future::Future;
use std::io;

use bytes::BytesMut;
use minidom::Element;
use rxml::writer::{Encoder, Item, SimpleNamespaces, TrackNamespace};
use rxml::{xml_ncname, Namespace};
use xmpp_parsers::ns;

use crate::error::UpgradeError;
use crate::Error;

mod builder;
mod transport;

pub use self::builder::StreamItem;
use self::builder::TreeBuilder;
pub use self::transport::RxmlTransport;

/// One tokenizer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    /// An element was opened.
    ElementStart {
        /// Local name
        name: String,
        /// Namespace URI
        ns: String,
        /// Attributes, namespaced ones as `prefix:name`
        attrs: Vec<(String, String)>,
    },
    /// The innermost open element was closed.
    ElementEnd {
        /// Local name
        name: String,
    },
    /// Character data.
    Characters(String),
}

/// Duplex transport carrying an XML stream.
///
/// `next_event` must be cancel safe: dropping its future before completion
/// must not lose any event.
pub trait XmlTransport: Send + 'static {
    /// Write and flush `data`.
    fn write_all(&mut self, data: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Next tokenizer event, or `None` at the end of the byte stream.
    fn next_event(&mut self) -> impl Future<Output = io::Result<Option<XmlEvent>>> + Send;

    /// Replace the plaintext channel with a TLS session to `domain`.
    fn upgrade_to_encrypted(
        &mut self,
        domain: &str,
    ) -> impl Future<Output = Result<(), UpgradeError>> + Send;

    /// Whether `upgrade_to_encrypted` succeeded.
    fn is_encrypted(&self) -> bool;

    /// Start tokenizing a new document, after a stream restart.
    fn reset(&mut self);

    /// Shut down the write side and release the channel.
    fn close_gracefully(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Attributes of a received `<stream:stream>` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamHeader {
    /// The `from` attribute
    pub from: Option<String>,
    /// The `to` attribute
    pub to: Option<String>,
    /// The `id` attribute
    pub id: Option<String>,
}

fn new_writer() -> Encoder<SimpleNamespaces> {
    let mut writer = Encoder::new();
    writer
        .ns_tracker_mut()
        .declare_fixed(Some(xml_ncname!("stream")), ns::STREAM.into());
    writer
        .ns_tracker_mut()
        .declare_fixed(None, ns::JABBER_CLIENT.into());
    writer
}

/// Header opening a client stream to `to`.
pub fn client_stream_header(to: &str) -> io::Result<BytesMut> {
    let stream_ns = Namespace::from(ns::STREAM);
    let items = [
        Item::XmlDeclaration(rxml::XmlVersion::V1_0),
        Item::ElementHeadStart(&stream_ns, xml_ncname!("stream")),
        Item::Attribute(Namespace::none(), xml_ncname!("to"), to),
        Item::Attribute(Namespace::none(), xml_ncname!("version"), "1.0"),
        Item::ElementHeadEnd,
    ];
    let mut writer = new_writer();
    let mut buf = BytesMut::new();
    for item in items {
        writer
            .encode_into_bytes(item, &mut buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    }
    Ok(buf)
}

/// Closing tag of the stream root.
pub const STREAM_FOOTER: &str = "</stream:stream>";

/// An XML stream over a transport.
pub struct XmlStream<T> {
    transport: T,
    builder: TreeBuilder,
    closed: bool,
}

impl<T: XmlTransport> XmlStream<T> {
    /// Wrap a connected transport.
    pub fn new(transport: T) -> Self {
        XmlStream {
            transport,
            builder: TreeBuilder::default(),
            closed: false,
        }
    }

    /// Send the stream header.
    pub async fn send_header(&mut self, to: &str) -> io::Result<()> {
        let header = client_stream_header(to)?;
        self.transport.write_all(&header).await
    }

    /// Serialize and send one top-level element.
    pub async fn send_element(&mut self, element: &Element) -> io::Result<()> {
        let data = String::from(element);
        self.transport.write_all(data.as_bytes()).await
    }

    /// Receive the next stream-level item.
    ///
    /// Cancel safe: partially received elements are kept until the next
    /// call.
    pub async fn recv(&mut self) -> Result<StreamItem, Error> {
        loop {
            match self.transport.next_event().await? {
                Some(event) => {
                    if let Some(item) = self.builder.feed(event)? {
                        return Ok(item);
                    }
                }
                None => return Err(Error::Disconnected),
            }
        }
    }

    /// Forget the current document so that a new stream header is
    /// accepted.
    pub fn reset(&mut self) {
        self.transport.reset();
        self.builder = TreeBuilder::default();
    }

    /// Start a fresh stream on the same transport.
    pub async fn restart(&mut self, to: &str) -> io::Result<()> {
        self.reset();
        self.send_header(to).await
    }

    /// Upgrade the transport to TLS. The stream must be restarted
    /// afterwards.
    pub async fn upgrade_to_encrypted(&mut self, domain: &str) -> Result<(), UpgradeError> {
        self.transport.upgrade_to_encrypted(domain).await
    }

    /// Whether the transport is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.transport.is_encrypted()
    }

    /// Send the footer and close the transport. Only the first call has an
    /// effect.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.transport.write_all(STREAM_FOOTER.as_bytes()).await {
            log::debug!("Could not send stream footer: {}", e);
        }
        self.transport.close_gracefully().await
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Access the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }
}
