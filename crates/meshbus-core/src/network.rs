//! Network abstraction for stream-oriented transports.
//!
//! Production uses Tokio TCP; tests use Turmoil's simulated TCP. Mesh
//! connections are type-erased to [`BoxStream`] once bootstrap hands them to
//! the messenger, so one messenger type serves both.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased mesh connection.
pub type BoxStream = Box<dyn ByteStream>;

/// Creates listeners and outbound connections.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    /// Connection type.
    type Stream: ByteStream;

    /// Listener type.
    type Listener: Listener<Stream = Self::Stream>;

    /// Bind a listener on `addr`.
    async fn bind(&self, addr: SocketAddr) -> io::Result<Self::Listener>;

    /// Connect to `addr`.
    async fn connect(&self, addr: SocketAddr) -> io::Result<Self::Stream>;
}

/// Accepts inbound connections.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Connection type.
    type Stream: ByteStream;

    /// Wait for the next connection.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Bound address.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}
