//! Handler registry and multi-match dispatch
//!
//! An [`AddressSpace`] maps registered address patterns to handler
//! callbacks. Dispatch tests the incoming address against *every* entry
//! (OSC requires multi-match fan-out, not first-match-wins); entries whose
//! own pattern matches the address fire, and so do entries whose literal
//! address is matched when the incoming address itself carries wildcard
//! syntax (senders may address `/pri*` to hit `/print` and `/printed` at
//! once). When nothing matches, a registered default handler runs instead.
//!
//! Handler failures never escape dispatch: they are logged and converted
//! into a reply under the configured error prefix, so a misbehaving handler
//! cannot take down a server loop.
//!
//! The registry is internally synchronized. Dispatch snapshots the matching
//! handlers under a read lock and invokes them after releasing it, so
//! handlers may re-enter the space (register, unregister, enumerate)
//! without deadlocking.

use crate::error::{Error, Result};
use crate::proto::Message;
use crate::dispatch::pattern::{has_wildcards, Pattern};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;

/// Handler callback: receives the message and its source, may return a
/// reply for the caller to deliver.
pub type HandlerFn = dyn Fn(&Message, SocketAddr) -> Result<Option<Message>> + Send + Sync;

struct Entry {
    pattern: Pattern,
    handler: Arc<HandlerFn>,
}

/// Registry of address patterns to handlers
#[derive(Default)]
pub struct AddressSpace {
    entries: RwLock<Vec<Entry>>,
    default: RwLock<Option<Arc<HandlerFn>>>,
    error_prefix: RwLock<String>,
    info_prefix: RwLock<String>,
}

impl AddressSpace {
    /// Create an empty address space with no reply prefixes configured
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an address pattern
    ///
    /// Registering the same pattern string again replaces the previous
    /// handler. The pattern must start with `/` and compile.
    pub fn register<F>(&self, pattern: &str, handler: F) -> Result<()>
    where
        F: Fn(&Message, SocketAddr) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        if !pattern.starts_with('/') {
            return Err(Error::InvalidAddress(pattern.to_string()));
        }
        let compiled = Pattern::compile(pattern)?;
        let handler: Arc<HandlerFn> = Arc::new(handler);
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|e| e.pattern.source() == pattern) {
            existing.handler = handler;
        } else {
            entries.push(Entry {
                pattern: compiled,
                handler,
            });
        }
        Ok(())
    }

    /// Remove the handler registered for exactly this pattern string
    pub fn unregister(&self, pattern: &str) -> Result<()> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.pattern.source() != pattern);
        if entries.len() == before {
            return Err(Error::NoSuchHandler(pattern.to_string()));
        }
        Ok(())
    }

    /// Install the handler invoked when no pattern matches
    pub fn set_default<F>(&self, handler: F)
    where
        F: Fn(&Message, SocketAddr) -> Result<Option<Message>> + Send + Sync + 'static,
    {
        *self.default.write() = Some(Arc::new(handler));
    }

    /// Address replies to handler failures are sent under
    ///
    /// Empty (the initial state) disables error replies; failures are only
    /// logged.
    pub fn set_error_prefix(&self, prefix: &str) {
        *self.error_prefix.write() = prefix.to_string();
    }

    /// Address informational replies are sent under
    pub fn set_info_prefix(&self, prefix: &str) {
        *self.info_prefix.write() = prefix.to_string();
    }

    /// Current error-reply prefix
    pub fn error_prefix(&self) -> String {
        self.error_prefix.read().clone()
    }

    /// Current info-reply prefix
    pub fn info_prefix(&self) -> String {
        self.info_prefix.read().clone()
    }

    /// Registered pattern strings, in registration order
    pub fn addresses(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| e.pattern.source().to_string())
            .collect()
    }

    /// Number of registered entries (excluding the default handler)
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no entries are registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Dispatch a message to every matching handler
    ///
    /// Falls back to the default handler when nothing matches. Returns the
    /// replies the caller should deliver (handler replies plus any error
    /// replies synthesized from handler failures).
    pub fn dispatch(&self, msg: &Message, source: SocketAddr) -> Vec<Message> {
        let (mut replies, matched) = self.dispatch_entries(msg, source);
        if !matched {
            let default = self.default.read().clone();
            if let Some(handler) = default {
                log::debug!("no match for {}, running default handler", msg.addr());
                self.invoke(&handler, "default", msg, source, &mut replies);
            } else {
                log::debug!("no match for {} and no default handler", msg.addr());
            }
        }
        replies
    }

    /// Dispatch against registered entries only, reporting whether any
    /// matched. Used by servers layering a connection-scoped space over a
    /// shared one.
    pub(crate) fn dispatch_entries(
        &self,
        msg: &Message,
        source: SocketAddr,
    ) -> (Vec<Message>, bool) {
        // The incoming address may itself be a pattern (OSC senders route
        // through wildcards); compile it once for the reverse direction.
        let incoming = if has_wildcards(msg.addr()) {
            Pattern::compile(msg.addr()).ok()
        } else {
            None
        };

        let matches: Vec<(String, Arc<HandlerFn>)> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|e| {
                    e.pattern.matches(msg.addr())
                        || incoming
                            .as_ref()
                            .is_some_and(|p| p.matches(e.pattern.source()))
                })
                .map(|e| (e.pattern.source().to_string(), Arc::clone(&e.handler)))
                .collect()
        };

        let matched = !matches.is_empty();
        let mut replies = Vec::new();
        for (pattern, handler) in matches {
            self.invoke(&handler, &pattern, msg, source, &mut replies);
        }
        (replies, matched)
    }

    /// Run one handler, absorbing failure into an error reply
    fn invoke(
        &self,
        handler: &Arc<HandlerFn>,
        pattern: &str,
        msg: &Message,
        source: SocketAddr,
        replies: &mut Vec<Message>,
    ) {
        match (**handler)(msg, source) {
            Ok(Some(reply)) => replies.push(reply),
            Ok(None) => {}
            Err(e) => {
                log::warn!("handler {} failed on {}: {}", pattern, msg.addr(), e);
                if let Some(reply) = self.error_reply(msg.addr(), &e) {
                    replies.push(reply);
                }
            }
        }
    }

    /// Build an error reply under the error prefix, if one is configured
    pub(crate) fn error_reply(&self, addr: &str, err: &Error) -> Option<Message> {
        let prefix = self.error_prefix.read();
        if prefix.is_empty() {
            return None;
        }
        match Message::with_args(&prefix, [format!("{}: {}", addr, err)]) {
            Ok(reply) => Some(reply),
            Err(_) => {
                log::error!("error prefix {:?} is not a valid address", *prefix);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn src() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn counting_handler(hits: Arc<AtomicUsize>) -> impl Fn(&Message, SocketAddr) -> Result<Option<Message>> {
        move |_msg, _src| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[test]
    fn test_exact_address_hits_one_handler() {
        let space = AddressSpace::new();
        let print_hits = Arc::new(AtomicUsize::new(0));
        let printed_hits = Arc::new(AtomicUsize::new(0));
        space
            .register("/print", counting_handler(Arc::clone(&print_hits)))
            .unwrap();
        space
            .register("/printed", counting_handler(Arc::clone(&printed_hits)))
            .unwrap();

        space.dispatch(&Message::new("/print").unwrap(), src());
        assert_eq!(print_hits.load(Ordering::SeqCst), 1);
        assert_eq!(printed_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wildcard_address_fans_out() {
        let space = AddressSpace::new();
        let print_hits = Arc::new(AtomicUsize::new(0));
        let printed_hits = Arc::new(AtomicUsize::new(0));
        space
            .register("/print", counting_handler(Arc::clone(&print_hits)))
            .unwrap();
        space
            .register("/printed", counting_handler(Arc::clone(&printed_hits)))
            .unwrap();

        space.dispatch(&Message::new("/print*").unwrap(), src());
        assert_eq!(print_hits.load(Ordering::SeqCst), 1);
        assert_eq!(printed_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registered_pattern_matches_concrete_address() {
        let space = AddressSpace::new();
        let hits = Arc::new(AtomicUsize::new(0));
        space
            .register("/user/*", counting_handler(Arc::clone(&hits)))
            .unwrap();

        space.dispatch(&Message::new("/user/1").unwrap(), src());
        space.dispatch(&Message::new("/user/42").unwrap(), src());
        space.dispatch(&Message::new("/user").unwrap(), src());
        space.dispatch(&Message::new("/user/1/2").unwrap(), src());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_default_handler_runs_only_on_no_match() {
        let space = AddressSpace::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let default_hits = Arc::new(AtomicUsize::new(0));
        space
            .register("/known", counting_handler(Arc::clone(&hits)))
            .unwrap();
        space.set_default(counting_handler(Arc::clone(&default_hits)));

        space.dispatch(&Message::new("/known").unwrap(), src());
        assert_eq!(default_hits.load(Ordering::SeqCst), 0);

        space.dispatch(&Message::new("/unknown").unwrap(), src());
        assert_eq!(default_hits.load(Ordering::SeqCst), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_reply_is_collected() {
        let space = AddressSpace::new();
        space
            .register("/print", |msg: &Message, _src| {
                let mut reply = Message::new("/printed")?;
                reply.push(format!("got {}", msg.addr()));
                Ok(Some(reply))
            })
            .unwrap();

        let replies = space.dispatch(&Message::new("/print").unwrap(), src());
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].addr(), "/printed");
    }

    #[test]
    fn test_handler_error_becomes_error_reply() {
        let space = AddressSpace::new();
        space.set_error_prefix("/error");
        space
            .register("/boom", |msg: &Message, _src| {
                Err(Error::Handler {
                    addr: msg.addr().to_string(),
                    reason: "deliberate".to_string(),
                })
            })
            .unwrap();

        let replies = space.dispatch(&Message::new("/boom").unwrap(), src());
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].addr(), "/error");
    }

    #[test]
    fn test_handler_error_without_prefix_is_swallowed() {
        let space = AddressSpace::new();
        space
            .register("/boom", |_msg: &Message, _src| {
                Err(Error::Handler {
                    addr: "/boom".to_string(),
                    reason: "deliberate".to_string(),
                })
            })
            .unwrap();

        assert!(space.dispatch(&Message::new("/boom").unwrap(), src()).is_empty());
    }

    #[test]
    fn test_unregister() {
        let space = AddressSpace::new();
        let hits = Arc::new(AtomicUsize::new(0));
        space
            .register("/gone", counting_handler(Arc::clone(&hits)))
            .unwrap();
        space.unregister("/gone").unwrap();
        space.dispatch(&Message::new("/gone").unwrap(), src());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(matches!(
            space.unregister("/gone"),
            Err(Error::NoSuchHandler(_))
        ));
    }

    #[test]
    fn test_reregister_replaces() {
        let space = AddressSpace::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        space
            .register("/x", counting_handler(Arc::clone(&first)))
            .unwrap();
        space
            .register("/x", counting_handler(Arc::clone(&second)))
            .unwrap();
        space.dispatch(&Message::new("/x").unwrap(), src());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(space.len(), 1);
    }

    #[test]
    fn test_handler_may_reenter_the_space() {
        let space = Arc::new(AddressSpace::new());
        let weak = Arc::downgrade(&space);
        space
            .register("/list", move |_msg: &Message, _src| {
                let space = weak.upgrade().expect("space alive during dispatch");
                let mut reply = Message::new("/listed")?;
                reply.push(space.addresses().join(" "));
                Ok(Some(reply))
            })
            .unwrap();

        let replies = space.dispatch(&Message::new("/list").unwrap(), src());
        assert_eq!(replies[0].args()[0].as_str(), Some("/list"));
    }
}
