//! Production network over Tokio TCP.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use meshbus_core::{Listener, Network};
use tokio::net::{TcpListener, TcpStream};

/// Tokio TCP sockets with Nagle disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpNetwork;

#[async_trait]
impl Network for TcpNetwork {
    type Listener = TcpListenerHandle;
    type Stream = TcpStream;

    async fn bind(&self, addr: SocketAddr) -> io::Result<Self::Listener> {
        TcpListener::bind(addr).await.map(TcpListenerHandle)
    }

    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Bound Tokio listener.
#[derive(Debug)]
pub struct TcpListenerHandle(TcpListener);

#[async_trait]
impl Listener for TcpListenerHandle {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        let (stream, addr) = self.0.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, addr))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}
