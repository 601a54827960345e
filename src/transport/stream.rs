//! TCP streaming server with length-prefixed framing
//!
//! # Wire framing
//!
//! Each OSC packet on a stream is framed the same way bundle elements are:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────┐
//! │ Length (4 bytes) │ OSC packet (variable)    │
//! │ Big-endian u32   │ message or bundle        │
//! └──────────────────┴──────────────────────────┘
//! ```
//!
//! Frames over 1 MiB are rejected and the offending connection closed.
//!
//! # Connection lifecycle
//!
//! ```text
//! 1. Client connects; server spawns a reader thread for it
//! 2. An optional connection-setup callback registers connection-scoped
//!    handlers into that connection's private address-space overlay
//! 3. Reader loop: read frame → decode → schedule → dispatch → reply
//! 4. On EOF, reset, or malformed frame the connection is closed and
//!    removed from the registry; other connections are unaffected
//! ```
//!
//! Connection-scoped handlers take precedence: when the overlay matches,
//! only overlay handlers fire; the shared space (including its default
//! handler) is consulted only when the overlay matches nothing.
//!
//! The server is internally synchronized, so one `Arc<StreamServer>` can
//! run [`StreamServer::serve`] on a thread while other threads call
//! [`StreamServer::broadcast`]. Broadcast snapshots the peer list under
//! the registry lock and writes frames outside it; each peer's writer is
//! serialized by its own mutex so broadcast and reply frames never
//! interleave. Graceful shutdown flags every connection, then joins every
//! reader thread before declaring the server closed; joins are bounded by
//! the readers' read timeout.

use crate::dispatch::AddressSpace;
use crate::error::{Error, Result};
use crate::proto::{Message, Packet};
use crate::schedule::Scheduler;
use parking_lot::{Mutex, RwLock};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Largest accepted frame payload
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Stream read timeout; bounds shutdown latency per connection
const READ_SLICE: Duration = Duration::from_millis(200);

/// How long the accept loop sleeps when no connection is pending
const ACCEPT_SLICE: Duration = Duration::from_millis(10);

/// Write one length-prefixed frame
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_all(&(payload.len() as u32).to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed frame into `buf`
///
/// Returns `Ok(false)` on a read timeout (caller re-checks its shutdown
/// flag and tries again). EOF, oversized frames, and other I/O failures
/// are errors.
pub fn read_frame<R: Read>(reader: &mut R, buf: &mut Vec<u8>) -> Result<bool> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            return Ok(false);
        }
        Err(e) => return Err(Error::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::OversizedFrame {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }

    buf.clear();
    buf.resize(len, 0);
    reader.read_exact(buf)?;
    Ok(true)
}

/// Per-connection bookkeeping shared with the registry
struct Connection {
    id: u64,
    peer: SocketAddr,
    /// Writer half; a mutex per connection keeps frames atomic when the
    /// reader thread and a broadcast write concurrently
    writer: Arc<Mutex<TcpStream>>,
    alive: Arc<AtomicBool>,
}

/// Callback that seeds a new connection's private address space
pub type ConnectionSetup = dyn Fn(SocketAddr, &AddressSpace) + Send + Sync;

/// TCP streaming server
///
/// States: Idle (bound) → Listening (`serve`) → Closed (`join`).
pub struct StreamServer {
    listener: TcpListener,
    space: Arc<AddressSpace>,
    shutdown: Arc<AtomicBool>,
    connections: Arc<Mutex<Vec<Connection>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    on_connect: RwLock<Option<Arc<ConnectionSetup>>>,
    next_id: AtomicU64,
}

impl StreamServer {
    /// Bind to `addr` with the given shared address space
    pub fn bind<A: ToSocketAddrs>(addr: A, space: Arc<AddressSpace>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        log::info!("stream server bound to {}", listener.local_addr()?);
        Ok(Self {
            listener,
            space,
            shutdown: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Mutex::new(Vec::new())),
            handles: Mutex::new(Vec::new()),
            on_connect: RwLock::new(None),
            next_id: AtomicU64::new(0),
        })
    }

    /// Install a callback that registers connection-scoped handlers when a
    /// client connects
    pub fn set_connection_setup(&self, setup: Arc<ConnectionSetup>) {
        *self.on_connect.write() = Some(setup);
    }

    /// Flag that stops the accept loop and all connections when set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// The shared address space handlers are registered in
    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    /// Currently connected peers
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Accept connections until the shutdown flag is set, then join all
    /// connection threads
    pub fn serve(&self) -> Result<()> {
        log::info!("stream server listening");
        while !self.shutdown.load(Ordering::Relaxed) {
            self.accept_once()?;
        }
        log::info!("stream server stopping");
        self.join()
    }

    /// Accept at most one pending connection
    ///
    /// Returns `Ok(true)` if a connection was accepted. Callers embedding
    /// the server in their own loop can alternate this with other work.
    pub fn accept_once(&self) -> Result<bool> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                self.spawn_connection(stream, peer)?;
                Ok(true)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_SLICE);
                Ok(false)
            }
            Err(e) => {
                log::error!("accept error: {}", e);
                Err(Error::Io(e))
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(READ_SLICE))?;
        let writer = Arc::new(Mutex::new(stream.try_clone()?));

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let alive = Arc::new(AtomicBool::new(true));

        // Connection-scoped overlay; seeded by the setup callback
        let conn_space = Arc::new(AddressSpace::new());
        if let Some(setup) = self.on_connect.read().clone() {
            (*setup)(peer, &conn_space);
        }

        self.connections.lock().push(Connection {
            id,
            peer,
            writer: Arc::clone(&writer),
            alive: Arc::clone(&alive),
        });
        log::info!("client connected: {} (connection {})", peer, id);

        let shared = Arc::clone(&self.space);
        let shutdown = Arc::clone(&self.shutdown);
        let connections = Arc::clone(&self.connections);

        let handle = std::thread::Builder::new()
            .name(format!("osc-conn-{}", id))
            .spawn(move || {
                let outcome = connection_loop(
                    stream, peer, &shared, &conn_space, &writer, &shutdown, &alive,
                );
                if let Err(e) = outcome {
                    if e.is_malformed() {
                        log::warn!("closing {} on malformed frame: {}", peer, e);
                    } else {
                        log::debug!("connection {} ended: {}", peer, e);
                    }
                }
                connections.lock().retain(|c| c.id != id);
                log::info!("client disconnected: {}", peer);
            })
            .map_err(|e| Error::Spawn(e.to_string()))?;
        self.handles.lock().push(handle);
        Ok(())
    }

    /// Send one message to every connected peer
    ///
    /// Returns the number of peers written to; peers whose write fails are
    /// flagged dead and pruned by their own reader thread.
    pub fn broadcast(&self, msg: &Message) -> usize {
        let frame = msg.encode();
        let peers: Vec<(SocketAddr, Arc<Mutex<TcpStream>>, Arc<AtomicBool>)> = self
            .connections
            .lock()
            .iter()
            .map(|c| (c.peer, Arc::clone(&c.writer), Arc::clone(&c.alive)))
            .collect();

        let mut sent = 0;
        for (peer, writer, alive) in peers {
            match write_frame(&mut *writer.lock(), &frame) {
                Ok(()) => sent += 1,
                Err(e) => {
                    log::debug!("broadcast to {} failed: {}", peer, e);
                    alive.store(false, Ordering::Relaxed);
                }
            }
        }
        log::debug!("broadcast {} to {} peer(s)", msg.addr(), sent);
        sent
    }

    /// Stop accepting, signal every connection, and join all reader
    /// threads
    pub fn join(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        for conn in self.connections.lock().iter() {
            conn.alive.store(false, Ordering::Relaxed);
        }
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        if !handles.is_empty() {
            log::info!("joining {} connection thread(s)", handles.len());
        }
        for handle in handles {
            if handle.join().is_err() {
                log::error!("connection thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        let _ = self.join();
    }
}

/// Per-connection read loop: frame → decode → schedule → dispatch → reply
#[allow(clippy::too_many_arguments)]
fn connection_loop(
    mut stream: TcpStream,
    peer: SocketAddr,
    shared: &Arc<AddressSpace>,
    conn_space: &Arc<AddressSpace>,
    writer: &Arc<Mutex<TcpStream>>,
    shutdown: &Arc<AtomicBool>,
    alive: &Arc<AtomicBool>,
) -> Result<()> {
    let mut buf = Vec::with_capacity(4096);
    let scheduler = Scheduler::new(Arc::clone(shutdown));

    while !shutdown.load(Ordering::Relaxed) && alive.load(Ordering::Relaxed) {
        match read_frame(&mut stream, &mut buf) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof
                    || e.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return Ok(());
            }
            Err(e) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return Err(e);
            }
        }

        let packet = match Packet::decode(&buf) {
            Ok(p) => p,
            Err(e) => {
                // One bad packet does not cost the connection; a torn
                // frame boundary would already have failed in read_frame
                log::warn!("dropping malformed packet from {}: {}", peer, e);
                continue;
            }
        };

        let result = scheduler.deliver(&packet, &mut |msg| {
            // Connection-scoped handlers take precedence over shared ones
            let (replies, matched) = conn_space.dispatch_entries(msg, peer);
            let replies = if matched {
                replies
            } else {
                shared.dispatch(msg, peer)
            };
            for reply in replies {
                write_frame(&mut *writer.lock(), &reply.encode())?;
            }
            Ok(())
        });
        if let Err(e) = result {
            log::warn!("delivery from {} failed: {}", peer, e);
        }
    }

    let _ = stream.shutdown(std::net::Shutdown::Both);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_round_trip() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"/print\0\0,\0\0\0").unwrap();
        assert_eq!(&wire[..4], &12u32.to_be_bytes());

        let mut reader = std::io::Cursor::new(wire);
        let mut buf = Vec::new();
        assert!(read_frame(&mut reader, &mut buf).unwrap());
        assert_eq!(buf, b"/print\0\0,\0\0\0");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&(MAX_FRAME_SIZE as u32 + 1).to_be_bytes());
        let mut reader = std::io::Cursor::new(wire);
        let mut buf = Vec::new();
        assert!(matches!(
            read_frame(&mut reader, &mut buf),
            Err(Error::OversizedFrame { .. })
        ));
    }

    #[test]
    fn test_truncated_frame_is_io_error() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&16u32.to_be_bytes());
        wire.extend_from_slice(b"short");
        let mut reader = std::io::Cursor::new(wire);
        let mut buf = Vec::new();
        assert!(matches!(
            read_frame(&mut reader, &mut buf),
            Err(Error::Io(_))
        ));
    }
}
