use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use log::{debug, trace};
use minidom::Element;
use xmpp_parsers::ns;

use super::recv_element;
use crate::client::auth::{Authenticator, AuthenticatorProvider};
use crate::error::{AuthError, Error};
use crate::xmlstream::{XmlStream, XmlTransport};

// An empty payload is sent as "=" to tell it apart from no payload.
fn encode(data: Option<Vec<u8>>) -> String {
    match data {
        None => String::new(),
        Some(data) if data.is_empty() => "=".to_owned(),
        Some(data) => BASE64.encode(data),
    }
}

fn decode(elem: &Element) -> Result<Vec<u8>, Error> {
    let text = elem.text();
    let text = text.trim();
    if text.is_empty() || text == "=" {
        return Ok(Vec::new());
    }
    Ok(BASE64.decode(text)?)
}

fn failure(elem: &Element) -> AuthError {
    let condition = elem
        .children()
        .find(|child| child.ns() == ns::SASL && child.name() != "text")
        .map(|child| child.name().to_owned())
        .unwrap_or_else(|| "not-authorized".to_owned());
    let text = elem.get_child("text", ns::SASL).map(Element::text);
    AuthError::Fail { condition, text }
}

fn select(
    provider: &dyn AuthenticatorProvider,
    offered: &[String],
) -> Result<Box<dyn Authenticator>, AuthError> {
    for name in provider.preferences() {
        if !offered.iter().any(|offer| *offer == name) {
            continue;
        }
        match provider.create(&name) {
            Ok(authenticator) => return Ok(authenticator),
            Err(e) => debug!("Skipping SASL mechanism {}: {}", name, e),
        }
    }
    Err(AuthError::NoMechanism)
}

/// Run a SASL exchange with the preferred mechanism among `offered`.
///
/// The stream has to be restarted after success.
pub(super) async fn authenticate<T: XmlTransport>(
    stream: &mut XmlStream<T>,
    provider: &dyn AuthenticatorProvider,
    offered: &[String],
) -> Result<(), Error> {
    let mut authenticator = select(provider, offered)?;
    debug!("Authenticating with {}", authenticator.mechanism_name());

    let auth = Element::builder("auth", ns::SASL)
        .attr("mechanism", authenticator.mechanism_name())
        .append(encode(authenticator.initial_response()))
        .build();
    stream.send_element(&auth).await?;

    let mut finished = false;
    loop {
        let elem = recv_element(stream).await?;
        if elem.is("challenge", ns::SASL) {
            if finished {
                return Err(AuthError::Mechanism(format!(
                    "unexpected challenge after the final {} response",
                    authenticator.mechanism_name()
                ))
                .into());
            }
            let challenge = decode(&elem)?;
            let (response, done) = authenticator.step(&challenge)?;
            finished = done;
            let response = Element::builder("response", ns::SASL)
                .append(encode(response))
                .build();
            stream.send_element(&response).await?;
        } else if elem.is("success", ns::SASL) {
            let data = decode(&elem)?;
            authenticator.success(&data)?;
            return Ok(());
        } else if elem.is("failure", ns::SASL) {
            return Err(failure(&elem).into());
        } else {
            trace!("Ignoring <{}/> during SASL exchange", elem.name());
        }
    }
}
