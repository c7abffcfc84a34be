//! TCP listener and stream setup.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::transport::Listener;
//!
//! let listener = Listener::bind("127.0.0.1", 5000, 128).await?;
//! let (stream, peer) = listener.accept().await?;
//! println!("Got connection from {peer}");
//! ```

use std::fmt;
use std::net::SocketAddr;

use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};

use crate::error::{Result, SockwireError};

/// Identity of a remote peer: its socket address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(SocketAddr);

impl PeerId {
    /// Create a peer id from a socket address.
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    /// Get the socket address.
    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Resolve `host:port` to the first matching socket address.
pub async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        SockwireError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address found for {host}:{port}"),
        ))
    })
}

/// Open a TCP connection to `host:port`.
pub async fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// TCP listener.
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `host:port` and start listening with the given backlog.
    pub async fn bind(host: &str, port: u16, backlog: u32) -> Result<Self> {
        let addr = resolve(host, port).await?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        // Allow quick restarts on the same port.
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;

        socket.bind(addr)?;
        let listener = socket.listen(backlog)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> Result<(TcpStream, PeerId)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream, PeerId::new(addr)))
    }

    /// Get the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
