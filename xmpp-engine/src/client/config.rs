use std::sync::Arc;

use crate::client::auth::{AuthenticatorProvider, Credentials};
use crate::connect::DnsConfig;
use crate::jid::Jid;
use crate::negotiation::TlsPolicy;

/// Everything needed to establish one client connection.
#[derive(Clone)]
pub struct ClientConfig {
    /// The JID to authenticate as. Its resource, if any, is requested at
    /// bind time.
    pub jid: Jid,
    /// How to find the server
    pub dns: DnsConfig,
    /// StartTLS policy
    pub tls: TlsPolicy,
    /// SASL authenticators
    pub authenticator: Arc<dyn AuthenticatorProvider>,
    /// Fixed seed for the SRV weighted selection
    pub srv_seed: Option<u64>,
}

impl core::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("jid", &self.jid)
            .field("dns", &self.dns)
            .field("tls", &self.tls)
            .field("srv_seed", &self.srv_seed)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Password login to the JID's domain, located through
    /// `_xmpp-client._tcp` SRV records.
    pub fn new<J: Into<Jid>, P: Into<String>>(jid: J, password: P) -> Self {
        let jid = jid.into();
        let username = jid.node().map(|node| node.as_str()).unwrap_or("");
        let authenticator = Arc::new(Credentials::new(username, &password.into()));
        ClientConfig {
            dns: DnsConfig::srv_default_client(jid.domain().as_str()),
            jid,
            tls: TlsPolicy::default(),
            authenticator,
            srv_seed: None,
        }
    }

    /// Replace the server location strategy.
    pub fn with_dns(mut self, dns: DnsConfig) -> Self {
        self.dns = dns;
        self
    }

    /// Replace the StartTLS policy.
    pub fn with_tls_policy(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    /// Replace the SASL authenticators.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn AuthenticatorProvider>) -> Self {
        self.authenticator = authenticator;
        self
    }

    /// Use a fixed seed for the SRV weighted selection.
    pub fn with_srv_seed(mut self, seed: u64) -> Self {
        self.srv_seed = Some(seed);
        self
    }

    /// The resource to request at bind time.
    pub fn resource(&self) -> Option<String> {
        self.jid.resource().map(|resource| resource.as_str().to_owned())
    }
}
