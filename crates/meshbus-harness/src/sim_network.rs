//! Turmoil TCP as a meshbus [`Network`].

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
};

use async_trait::async_trait;
use meshbus_core::{Listener, Network};
use turmoil::net::{TcpListener, TcpStream};

/// Simulated TCP.
///
/// Listeners always bind the unspecified address on the requested port;
/// simulated hosts only own their one address anyway.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimNetwork;

#[async_trait]
impl Network for SimNetwork {
    type Listener = SimListener;
    type Stream = TcpStream;

    async fn bind(&self, addr: SocketAddr) -> io::Result<Self::Listener> {
        let addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), addr.port());
        TcpListener::bind(addr).await.map(SimListener)
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream> {
        TcpStream::connect(addr).await
    }
}

/// Bound simulated listener.
pub struct SimListener(TcpListener);

#[async_trait]
impl Listener for SimListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        self.0.accept().await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}
