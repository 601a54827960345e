//! Single-target clients
//!
//! [`DatagramClient`] sends one OSC packet per UDP datagram, optionally
//! pinned to a connected peer. [`StreamClient`] speaks the 4-byte
//! length-prefixed framing over TCP and can poll for packets the server
//! pushes back (replies, broadcasts).

use crate::error::{Error, Result};
use crate::proto::Packet;
use crate::transport::stream::{read_frame, write_frame};
use crate::transport::MAX_DATAGRAM_SIZE;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

/// UDP client bound to an ephemeral local port
pub struct DatagramClient {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl DatagramClient {
    /// Create an unconnected client
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind("0.0.0.0:0")?,
            peer: None,
        })
    }

    /// Create a client with a fixed destination
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let mut client = Self::new()?;
        let peer = resolve(addr)?;
        client.socket.connect(peer)?;
        client.peer = Some(peer);
        Ok(client)
    }

    /// The connected destination, if any
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Local address the client sends from
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Encode and send a packet to the connected destination
    pub fn send(&self, packet: &Packet) -> Result<()> {
        let peer = self.peer.ok_or_else(|| {
            Error::NotSupported("send on an unconnected client; use send_to".into())
        })?;
        self.send_to(packet, peer)
    }

    /// Encode and send a packet to an explicit destination
    pub fn send_to(&self, packet: &Packet, addr: SocketAddr) -> Result<()> {
        let bytes = packet.encode();
        let sent = self.socket.send_to(&bytes, addr)?;
        if sent != bytes.len() {
            return Err(Error::Io(std::io::ErrorKind::Other.into()));
        }
        log::trace!("sent {} byte(s) to {}", sent, addr);
        Ok(())
    }

    /// Wait up to `timeout` for an inbound packet (a server reply)
    ///
    /// Returns `Ok(None)` on timeout; malformed datagrams are errors.
    pub fn recv(&self, timeout: Duration) -> Result<Option<(Packet, SocketAddr)>> {
        self.socket.set_read_timeout(Some(timeout))?;
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((len, source)) => Ok(Some((Packet::decode(&buf[..len])?, source))),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

/// TCP client speaking length-prefixed OSC frames
pub struct StreamClient {
    stream: TcpStream,
    read_buf: Vec<u8>,
}

impl StreamClient {
    /// Connect to a streaming server
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        log::debug!("stream client connected to {}", stream.peer_addr()?);
        Ok(Self {
            stream,
            read_buf: Vec::with_capacity(4096),
        })
    }

    /// Server address this client is connected to
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Encode and send one framed packet
    pub fn send(&mut self, packet: &Packet) -> Result<()> {
        write_frame(&mut self.stream, &packet.encode())
    }

    /// Wait up to `timeout` for one framed packet from the server
    ///
    /// Returns `Ok(None)` on timeout.
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<Packet>> {
        self.stream.set_read_timeout(Some(timeout))?;
        if !read_frame(&mut self.stream, &mut self.read_buf)? {
            return Ok(None);
        }
        Ok(Some(Packet::decode(&self.read_buf)?))
    }

    /// Shut the connection down
    pub fn close(&mut self) -> Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}

/// Resolve to the first address, surfacing empty resolution as an error
pub(crate) fn resolve<A: ToSocketAddrs>(addr: A) -> Result<SocketAddr> {
    addr.to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::InvalidTarget("address resolved to nothing".into()))
}
