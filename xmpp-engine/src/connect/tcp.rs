//! `TcpServerConnector` provides a `ServerConnector` for TCP connections

use tokio::net::TcpStream;

use crate::{
    connect::{dns::connect_host, ServerConnector, SrvTarget},
    xmlstream::RxmlTransport,
    Error,
};

/// Connect to a target over TCP. StartTLS is negotiated later, on the
/// open stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpServerConnector;

impl ServerConnector for TcpServerConnector {
    type Transport = RxmlTransport<TcpStream>;

    async fn connect(&self, target: &SrvTarget) -> Result<Self::Transport, Error> {
        let stream = connect_host(&target.host, target.port).await?;
        stream.set_nodelay(true)?;
        Ok(RxmlTransport::new(stream))
    }
}
