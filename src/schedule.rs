//! Time-tagged bundle scheduling
//!
//! Walks a decoded packet depth-first, in encoded order. Messages go to the
//! sink immediately. A nested bundle whose time tag is immediate or already
//! past is entered immediately; a future tag *holds* by sleeping the
//! current execution context until the tag is due.
//!
//! Which context that blocks is deliberately not decided here: under the
//! blocking server strategy the hold stalls the whole accept loop
//! (intentional backpressure), under the threaded strategy only that
//! packet's worker, under the forked strategy only the child process, and
//! on a streaming server only that connection's thread.
//!
//! Holds sleep in bounded slices and re-check the shutdown flag each slice,
//! so shutdown never waits out a distant time tag. A cancelled hold
//! abandons the rest of that bundle.

use crate::error::Result;
use crate::proto::{Message, Packet, TimeTag};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Longest single sleep while holding a bundle; the shutdown flag is
/// re-checked at this interval.
const HOLD_SLICE: Duration = Duration::from_millis(20);

/// Drives decoded packets into a dispatch sink, honoring time tags
pub struct Scheduler {
    shutdown: Arc<AtomicBool>,
}

impl Scheduler {
    /// Create a scheduler that aborts holds when `shutdown` becomes true
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self { shutdown }
    }

    /// Deliver a packet through `sink`, holding future-tagged bundles
    ///
    /// The sink is called once per message, in depth-first encoded order.
    /// Sink errors propagate to the caller (they are transport-level, not
    /// handler-level, failures).
    pub fn deliver<F>(&self, packet: &Packet, sink: &mut F) -> Result<()>
    where
        F: FnMut(&Message) -> Result<()>,
    {
        match packet {
            Packet::Message(msg) => sink(msg),
            Packet::Bundle(bundle) => {
                if !self.wait_until_due(bundle.time_tag) {
                    log::debug!(
                        "shutdown while holding bundle (tag {:#x}), dropping {} element(s)",
                        bundle.time_tag.raw(),
                        bundle.elements.len()
                    );
                    return Ok(());
                }
                for element in &bundle.elements {
                    self.deliver(element, sink)?;
                }
                Ok(())
            }
        }
    }

    /// Block until the tag is due. Returns false if shutdown was requested
    /// before the tag elapsed.
    fn wait_until_due(&self, tag: TimeTag) -> bool {
        if let Some(remaining) = tag.until_due() {
            log::debug!("holding bundle for {:?}", remaining);
        }
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return false;
            }
            match tag.until_due() {
                None => return true,
                Some(remaining) => std::thread::sleep(remaining.min(HOLD_SLICE)),
            }
        }
    }
}
