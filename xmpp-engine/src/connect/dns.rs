use core::future::Future;
use futures::{future::select_ok, FutureExt};
use hickory_resolver::{
    config::LookupIpStrategy, name_server::TokioConnectionProvider, TokioAsyncResolver,
};
use log::debug;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;

use crate::connect::srv::{SrvRecord, SrvResolver, SrvTarget, SrvTargets};
use crate::normalize::{normalize, NormalizationKind};
use crate::Error;

/// XMPP server connection configuration
#[derive(Clone, Debug)]
pub enum DnsConfig {
    /// Use SRV record to find server host
    UseSrv {
        /// Hostname to resolve
        host: String,
        /// TXT field eg. _xmpp-client._tcp
        srv: String,
        /// When SRV resolution fails what port to use
        fallback_port: u16,
    },

    /// Manually define server host and port
    NoSrv {
        /// Server host name
        host: String,
        /// Server port
        port: u16,
    },

    /// Manually define IP: port
    Addr {
        /// IP:port
        addr: String,
    },
}

impl std::fmt::Display for DnsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UseSrv { host, .. } => write!(f, "{}", host),
            Self::NoSrv { host, port } => write!(f, "{}:{}", host, port),
            Self::Addr { addr } => write!(f, "{}", addr),
        }
    }
}

impl DnsConfig {
    /// Constructor for DnsConfig::UseSrv variant
    pub fn srv(host: &str, srv: &str, fallback_port: u16) -> Self {
        Self::UseSrv {
            host: host.to_string(),
            srv: srv.to_string(),
            fallback_port,
        }
    }

    /// Constructor for the default SRV resolution strategy for clients
    pub fn srv_default_client(host: &str) -> Self {
        Self::UseSrv {
            host: host.to_string(),
            srv: "_xmpp-client._tcp".to_string(),
            fallback_port: 5222,
        }
    }

    /// Constructor for DnsConfig::NoSrv variant
    pub fn no_srv(host: &str, port: u16) -> Self {
        Self::NoSrv {
            host: host.to_string(),
            port,
        }
    }

    /// Constructor for DnsConfig::Addr variant
    pub fn addr(addr: &str) -> Self {
        Self::Addr {
            addr: addr.to_string(),
        }
    }

    /// Produce the connection attempt order for this configuration.
    pub async fn targets<S: SrvRecordSource>(
        &self,
        resolver: &SrvResolver<S>,
    ) -> Result<SrvTargets, Error> {
        match self {
            Self::UseSrv {
                host,
                srv,
                fallback_port,
            } => resolver.resolve(host, srv, *fallback_port).await,
            Self::NoSrv { host, port } => {
                let ascii_domain = normalize(NormalizationKind::IdnaToAscii, host)?;
                Ok(SrvTargets::single(SrvTarget::fallback(&ascii_domain, *port)))
            }
            Self::Addr { addr } => {
                let addr: SocketAddr = addr.parse().map_err(|_| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("wrong network address: {}", addr),
                    ))
                })?;
                Ok(SrvTargets::single(SrvTarget::fallback(
                    &addr.ip().to_string(),
                    addr.port(),
                )))
            }
        }
    }
}

/// Source of decoded SRV records.
pub trait SrvRecordSource: Send + Sync + 'static {
    /// Query the SRV records for a fully qualified service name such as
    /// `_xmpp-client._tcp.example.org.`
    fn lookup(&self, name: &str) -> impl Future<Output = Result<Vec<SrvRecord>, Error>> + Send;
}

/// Queries the resolvers from the system configuration.
///
/// A resolver is built for every lookup and dropped afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDns;

impl SrvRecordSource for SystemDns {
    async fn lookup(&self, name: &str) -> Result<Vec<SrvRecord>, Error> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        let lookup = resolver.srv_lookup(name).await?;
        Ok(lookup
            .iter()
            .map(|srv| {
                SrvRecord::new(
                    srv.priority(),
                    srv.weight(),
                    srv.port(),
                    &srv.target().to_ascii(),
                )
            })
            .collect())
    }
}

/// Connect to `host:port`, trying all of its addresses in parallel and
/// keeping the first to succeed.
pub(crate) async fn connect_host(host: &str, port: u16) -> Result<TcpStream, Error> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(TcpStream::connect(&SocketAddr::new(ip, port)).await?);
    }

    let (config, mut options) = hickory_resolver::system_conf::read_system_conf()?;
    options.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
    let resolver = TokioAsyncResolver::new(config, options, TokioConnectionProvider::default());

    let ips: Vec<IpAddr> = resolver.lookup_ip(host).await?.into_iter().collect();
    if ips.is_empty() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses for {}", host),
        )));
    }

    // Happy Eyeballs: connect to all records in parallel, return the
    // first to succeed
    select_ok(ips.into_iter().map(|ip| {
        debug!("Attempting connection to {ip}:{port}");
        TcpStream::connect(SocketAddr::new(ip, port)).boxed()
    }))
    .await
    .map(|(result, _)| result)
    .map_err(Error::Io)
}
