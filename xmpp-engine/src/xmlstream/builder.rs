// Copyright (c) 2024 Jonas Schäfer <jonas@zombofant.net>
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use log::warn;
use minidom::Element;
use xmpp_parsers::ns;

use super::{StreamHeader, XmlEvent};
use crate::error::ProtocolError;

/// Something received at the top level of an XML stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// The peer's `<stream:stream>` header
    Header(StreamHeader),
    /// A complete child of the stream root
    Element(Element),
    /// The peer's `</stream:stream>`
    Footer,
}

/// Rebuilds elements from tokenizer events.
#[derive(Debug, Default)]
pub(super) struct TreeBuilder {
    in_stream: bool,
    // Open elements below the stream root, innermost last.
    stack: Vec<Element>,
}

fn is_xml_whitespace(text: &str) -> bool {
    text.bytes()
        .all(|b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
}

fn parse_header(
    ns: &str,
    name: &str,
    attrs: Vec<(String, String)>,
) -> Result<StreamHeader, ProtocolError> {
    if ns != ns::STREAM || name != "stream" {
        return Err(ProtocolError::InvalidStreamStart);
    }
    let mut header = StreamHeader::default();
    let mut version = None;
    for (key, value) in attrs {
        match key.as_str() {
            "from" => header.from = Some(value),
            "to" => header.to = Some(value),
            "id" => header.id = Some(value),
            "version" => version = Some(value),
            _ => (),
        }
    }
    match version.as_deref() {
        Some("1.0") => Ok(header),
        _ => Err(ProtocolError::InvalidStreamStart),
    }
}

impl TreeBuilder {
    /// Feed one event; returns an item once one is complete.
    pub(super) fn feed(&mut self, event: XmlEvent) -> Result<Option<StreamItem>, ProtocolError> {
        match event {
            XmlEvent::ElementStart { name, ns, attrs } => {
                if !self.in_stream {
                    let header = parse_header(&ns, &name, attrs)?;
                    self.in_stream = true;
                    return Ok(Some(StreamItem::Header(header)));
                }
                if self.stack.is_empty() && ns == ns::STREAM && name == "stream" {
                    return Err(ProtocolError::UnexpectedStreamStart);
                }
                let element = attrs
                    .into_iter()
                    .fold(Element::builder(name, ns), |builder, (key, value)| {
                        builder.attr(key, value)
                    })
                    .build();
                self.stack.push(element);
                Ok(None)
            }
            XmlEvent::Characters(text) => {
                match self.stack.last_mut() {
                    Some(parent) => parent.append_text_node(text),
                    None if !self.in_stream => return Err(ProtocolError::InvalidToken),
                    None if is_xml_whitespace(&text) => (),
                    None => warn!("Ignoring text between stanzas: {:?}", text),
                }
                Ok(None)
            }
            XmlEvent::ElementEnd { .. } => match self.stack.pop() {
                None if self.in_stream => {
                    self.in_stream = false;
                    Ok(Some(StreamItem::Footer))
                }
                None => Err(ProtocolError::InvalidToken),
                Some(element) => match self.stack.last_mut() {
                    Some(parent) => {
                        parent.append_child(element);
                        Ok(None)
                    }
                    None => Ok(Some(StreamItem::Element(element))),
                },
            },
        }
    }
}
