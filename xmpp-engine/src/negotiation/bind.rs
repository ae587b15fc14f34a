use log::trace;
use minidom::Element;
use xmpp_parsers::bind::{BindQuery, BindResponse};
use xmpp_parsers::jid::FullJid;
use xmpp_parsers::ns;

use super::recv_element;
use crate::error::{Error, ProtocolError};
use crate::xmlstream::{XmlStream, XmlTransport};

const BIND_REQ_ID: &str = "resource-bind";

fn error_condition(iq: &Element) -> String {
    iq.get_child("error", ns::JABBER_CLIENT)
        .and_then(|error| error.children().find(|child| child.name() != "text"))
        .map(|condition| condition.name().to_owned())
        .unwrap_or_else(|| "undefined-condition".to_owned())
}

/// Request a resource and wait for the server-assigned full JID.
pub(super) async fn bind<T: XmlTransport>(
    stream: &mut XmlStream<T>,
    resource: Option<String>,
) -> Result<FullJid, Error> {
    let iq = Element::builder("iq", ns::JABBER_CLIENT)
        .attr("type", "set")
        .attr("id", BIND_REQ_ID)
        .append(Element::from(BindQuery::new(resource)))
        .build();
    stream.send_element(&iq).await?;

    loop {
        let elem = recv_element(stream).await?;
        if !elem.is("iq", ns::JABBER_CLIENT) || elem.attr("id") != Some(BIND_REQ_ID) {
            trace!("Ignoring <{}/> while waiting for the bind result", elem.name());
            continue;
        }
        return match elem.attr("type") {
            Some("result") => {
                let payload = elem
                    .get_child("bind", ns::BIND)
                    .cloned()
                    .ok_or(ProtocolError::InvalidBindResponse)?;
                let response = BindResponse::try_from(payload)
                    .map_err(|_| ProtocolError::InvalidBindResponse)?;
                Ok(FullJid::from(response))
            }
            Some("error") => Err(ProtocolError::BindRejected(error_condition(&elem)).into()),
            _ => Err(ProtocolError::InvalidBindResponse.into()),
        };
    }
}
