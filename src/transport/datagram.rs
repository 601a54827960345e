//! UDP datagram server
//!
//! States: Idle (bound, not yet serving) → Listening → Closed. One packet
//! is received per wake, decoded, and driven through the scheduler and
//! dispatcher on whatever execution context the configured strategy
//! provides; replies returned by handlers go back to the packet's source.
//!
//! The socket carries a bounded read timeout so the serve loop re-checks
//! the shutdown flag between packets; the only other places the loop can
//! block are a held bundle (blocking strategy only, by design) and the
//! bounded strategy join during shutdown.
//!
//! Host applications that want to drive the engine themselves (a game
//! engine polling once per frame) can skip [`DatagramServer::serve`] and
//! call [`DatagramServer::handle_once`] with their own timeout; an
//! optional idle hook fires whenever a poll times out with nothing to do.

use crate::dispatch::AddressSpace;
use crate::error::{Error, Result};
use crate::proto::{self, Packet};
use crate::schedule::Scheduler;
use crate::transport::strategy::ConcurrencyStrategy;
use crate::transport::MAX_DATAGRAM_SIZE;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Socket read timeout; bounds how long shutdown waits on a quiet socket
const RECV_SLICE: Duration = Duration::from_millis(200);

/// Hook invoked when a poll times out with no packet pending
pub type IdleHook = Box<dyn FnMut() + Send>;

/// UDP server: decode → schedule → dispatch → reply, per datagram
pub struct DatagramServer {
    socket: Arc<UdpSocket>,
    space: Arc<AddressSpace>,
    strategy: Box<dyn ConcurrencyStrategy>,
    shutdown: Arc<AtomicBool>,
    return_port: Option<u16>,
    on_idle: Option<IdleHook>,
}

impl DatagramServer {
    /// Bind to `addr` and prepare to serve with the given strategy
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        space: Arc<AddressSpace>,
        strategy: Box<dyn ConcurrencyStrategy>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_SLICE))?;
        log::info!(
            "datagram server bound to {} ({} strategy)",
            socket.local_addr()?,
            strategy.name()
        );
        Ok(Self {
            socket: Arc::new(socket),
            space,
            strategy,
            shutdown: Arc::new(AtomicBool::new(false)),
            return_port: None,
            on_idle: None,
        })
    }

    /// Send replies to this port on the source host instead of the
    /// source's ephemeral port
    pub fn set_return_port(&mut self, port: Option<u16>) {
        self.return_port = port;
    }

    /// Install the idle hook invoked when a poll times out
    pub fn set_idle_hook(&mut self, hook: IdleHook) {
        self.on_idle = Some(hook);
    }

    /// Flag that stops the serve loop when set to true; share it with a
    /// signal handler
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// The shared address space handlers are registered in
    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    /// Serve until the shutdown flag is set, then join in-flight work
    pub fn serve(&mut self) -> Result<()> {
        log::info!("datagram server listening");
        while !self.shutdown.load(Ordering::Relaxed) {
            self.handle_once(Some(RECV_SLICE))?;
        }
        log::info!("datagram server stopping");
        self.join(Duration::from_secs(5))
    }

    /// Receive and handle at most one packet
    ///
    /// Returns `Ok(true)` if a packet was handed to the strategy,
    /// `Ok(false)` if the wait timed out (after running the idle hook).
    /// A `timeout` of `None` keeps the default slice.
    pub fn handle_once(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if let Some(t) = timeout {
            // A zero timeout means "poll"; the socket API wants nonblocking
            if t.is_zero() {
                self.socket.set_nonblocking(true)?;
            } else {
                self.socket.set_nonblocking(false)?;
                self.socket.set_read_timeout(Some(t))?;
            }
        }

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        match self.socket.recv_from(&mut buf) {
            Ok((len, source)) => {
                self.submit(buf[..len].to_vec(), source)?;
                Ok(true)
            }
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                if let Some(hook) = self.on_idle.as_mut() {
                    hook();
                }
                Ok(false)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Hand one raw packet to the strategy
    fn submit(&mut self, data: Vec<u8>, source: SocketAddr) -> Result<()> {
        let space = Arc::clone(&self.space);
        let shutdown = Arc::clone(&self.shutdown);
        let socket = Arc::clone(&self.socket);
        let reply_addr = match self.return_port {
            Some(port) => SocketAddr::new(source.ip(), port),
            None => source,
        };

        self.strategy.execute(Box::new(move || {
            handle_packet(&space, shutdown, &socket, &data, source, reply_addr);
        }))
    }

    /// Stop accepting and wait for in-flight work
    pub fn join(&mut self, deadline: Duration) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        self.strategy.shutdown(deadline)
    }
}

/// Decode one datagram and drive it through scheduler and dispatcher
///
/// Runs on the strategy's execution context. Malformed packets and reply
/// send failures are logged and contained here; nothing propagates back
/// into the accept loop.
fn handle_packet(
    space: &Arc<AddressSpace>,
    shutdown: Arc<AtomicBool>,
    socket: &UdpSocket,
    data: &[u8],
    source: SocketAddr,
    reply_addr: SocketAddr,
) {
    let packet = match Packet::decode(data) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("dropping malformed packet from {}: {}", source, e);
            log::trace!("offending bytes:\n{}", proto::hex_dump(data));
            return;
        }
    };

    let scheduler = Scheduler::new(shutdown);
    let result = scheduler.deliver(&packet, &mut |msg| {
        for reply in space.dispatch(msg, source) {
            if let Err(e) = socket.send_to(&reply.encode(), reply_addr) {
                log::warn!("failed to send reply to {}: {}", reply_addr, e);
            }
        }
        Ok(())
    });
    if let Err(e) = result {
        log::warn!("delivery from {} failed: {}", source, e);
    }
}
