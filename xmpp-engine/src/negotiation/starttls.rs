use log::{debug, trace};
use minidom::Element;
use xmpp_parsers::ns;

use super::recv_element;
use crate::error::{Error, TlsError};
use crate::xmlstream::{XmlStream, XmlTransport};

/// Performs `<starttls/>` on an XmlStream and upgrades its transport.
///
/// The stream has to be restarted afterwards.
pub(super) async fn starttls<T: XmlTransport>(
    stream: &mut XmlStream<T>,
    domain: &str,
) -> Result<(), Error> {
    stream
        .send_element(&Element::builder("starttls", ns::TLS).build())
        .await?;

    loop {
        let elem = recv_element(stream).await?;
        if elem.is("proceed", ns::TLS) {
            break;
        } else if elem.is("failure", ns::TLS) {
            return Err(TlsError::Refused.into());
        } else {
            trace!("Ignoring <{}/> while waiting for <proceed/>", elem.name());
        }
    }

    debug!("Upgrading stream to {} to TLS", domain);
    stream.upgrade_to_encrypted(domain).await?;
    Ok(())
}
