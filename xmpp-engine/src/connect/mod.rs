//! `ServerConnector` provides transports for XMPP clients

use core::future::Future;

use crate::xmlstream::XmlTransport;
use crate::Error;

mod dns;
pub use dns::{DnsConfig, SrvRecordSource, SystemDns};

pub mod srv;
pub use srv::{ResolutionDegraded, SrvRecord, SrvResolver, SrvTarget, SrvTargets};

pub(crate) mod starttls;

mod tcp;
pub use tcp::TcpServerConnector;

/// Trait called to connect to one candidate target, perhaps called
/// multiple times per connection attempt
pub trait ServerConnector: Send + Sync + 'static {
    /// The transport this ServerConnector produces
    type Transport: XmlTransport;

    /// Open a plaintext transport to `target`. The XML stream is opened by
    /// the caller.
    fn connect(
        &self,
        target: &SrvTarget,
    ) -> impl Future<Output = Result<Self::Transport, Error>> + Send;
}
