// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use core::pin::Pin;
use std::io;

use futures::future::poll_fn;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};

use super::{XmlEvent, XmlTransport};
use crate::connect::starttls::{tls_connect, MaybeTlsStream};
use crate::error::UpgradeError;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// [`XmlTransport`] over a tokio I/O object, tokenized with `rxml`.
pub struct RxmlTransport<S> {
    reader: Pin<Box<rxml::AsyncReader<BufStream<MaybeTlsStream<S>>>>>,
    // Names of the open elements, for `XmlEvent::ElementEnd`.
    open: Vec<String>,
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> RxmlTransport<S> {
    /// Wrap a plaintext connection.
    pub fn new(io: S) -> Self {
        RxmlTransport {
            reader: Box::pin(rxml::AsyncReader::wrap(
                BufStream::new(MaybeTlsStream::Plain(io)),
                rxml::Parser::default(),
            )),
            open: Vec::new(),
        }
    }

    fn io_mut(&mut self) -> &mut BufStream<MaybeTlsStream<S>> {
        self.reader.as_mut().inner_pinned().get_mut()
    }

    fn convert(&mut self, event: rxml::Event) -> Option<XmlEvent> {
        match event {
            rxml::Event::XmlDeclaration(_, _) => None,
            rxml::Event::StartElement(_, (ns, name), attrs) => {
                let attrs = attrs
                    .into_iter()
                    .filter_map(|((ns, name), value)| {
                        let ns = ns.to_string();
                        if ns.is_empty() {
                            Some((name.to_string(), value.to_string()))
                        } else if ns == XML_NS {
                            Some((format!("xml:{}", name), value.to_string()))
                        } else {
                            log::trace!("Dropping attribute {{{}}}{}", ns, name);
                            None
                        }
                    })
                    .collect();
                let name = name.to_string();
                self.open.push(name.clone());
                Some(XmlEvent::ElementStart {
                    name,
                    ns: ns.to_string(),
                    attrs,
                })
            }
            rxml::Event::EndElement(_) => Some(XmlEvent::ElementEnd {
                name: self.open.pop().unwrap_or_default(),
            }),
            rxml::Event::Text(_, data) => Some(XmlEvent::Characters(data.to_string())),
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send + 'static> XmlTransport for RxmlTransport<S> {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let io = self.io_mut();
        io.write_all(data).await?;
        io.flush().await
    }

    async fn next_event(&mut self) -> io::Result<Option<XmlEvent>> {
        loop {
            let event = poll_fn(|cx| self.reader.as_mut().poll_read(cx)).await?;
            match event {
                Some(event) => {
                    if let Some(event) = self.convert(event) {
                        return Ok(Some(event));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    async fn upgrade_to_encrypted(&mut self, domain: &str) -> Result<(), UpgradeError> {
        let stream = self.io_mut().get_mut();
        let plain = match core::mem::replace(stream, MaybeTlsStream::Upgrading) {
            MaybeTlsStream::Plain(plain) => plain,
            other => {
                *stream = other;
                return Err(UpgradeError::AlreadyEncrypted);
            }
        };
        let tls = tls_connect(domain, plain).await?;
        *self.io_mut().get_mut() = MaybeTlsStream::Tls(Box::new(tls));
        self.reset();
        Ok(())
    }

    fn is_encrypted(&self) -> bool {
        matches!(self.reader.inner().get_ref(), MaybeTlsStream::Tls(_))
    }

    fn reset(&mut self) {
        *self.reader.as_mut().parser_pinned() = rxml::Parser::default();
        self.open.clear();
    }

    async fn close_gracefully(&mut self) -> io::Result<()> {
        self.io_mut().shutdown().await
    }
}
