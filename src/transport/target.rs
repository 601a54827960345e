//! Multi-target client: per-target prefix and filter fan-out
//!
//! A [`MultiClient`] keeps a table of targets. Sending a message consults
//! every row: the target's address prefix is prepended, then the ordered
//! accept(`+`)/reject(`-`) filter rules decide whether the re-addressed
//! message is forwarded there. Bundles are filtered recursively, message
//! by message, and pruned when nothing inside survives.
//!
//! # Target specification strings
//!
//! ```text
//! host[:port][/prefix] [+/pattern] [-/pattern] ...
//! ```
//!
//! - `192.168.1.7`: everything, verbatim, to the default port
//! - `mixer:9000/desk`: everything, re-addressed under `/desk`
//! - `viz:9000 +/user/* -/user/9`: only `/user/*` except `/user/9`
//!
//! Filter verdicts: an empty rule list accepts everything; otherwise the
//! initial verdict is the opposite of the first rule's polarity and each
//! matching rule overwrites it, so the last matching rule wins.

use crate::dispatch::Pattern;
use crate::error::{Error, Result};
use crate::proto::{Bundle, Message, Packet};
use crate::transport::client::resolve;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};

/// One accept/reject filter rule
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Glob pattern the (prefixed) address is tested against
    pub pattern: String,
    /// `true` for `+` rules, `false` for `-` rules
    pub accept: bool,
}

/// One row of a multi-target table
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Destination socket address
    pub addr: SocketAddr,
    /// Prefix prepended to outgoing addresses (empty for none)
    pub prefix: String,
    /// Ordered filter rules
    pub filters: Vec<Filter>,
}

impl Target {
    /// Parse a target specification string
    pub fn parse(spec: &str, default_port: u16) -> Result<Target> {
        let spec = spec.trim();
        let mut parts = spec.split_whitespace();
        let head = parts
            .next()
            .ok_or_else(|| Error::InvalidTarget(format!("empty target spec {:?}", spec)))?;

        // Split "host[:port]" off the leading "/prefix", if any
        let (hostport, prefix) = match head.find('/') {
            Some(idx) => (&head[..idx], &head[idx..]),
            None => (head, ""),
        };
        let addr = if hostport.contains(':') {
            resolve(hostport)
                .map_err(|_| Error::InvalidTarget(format!("unresolvable host {:?}", hostport)))?
        } else {
            resolve((hostport, default_port))
                .map_err(|_| Error::InvalidTarget(format!("unresolvable host {:?}", hostport)))?
        };

        let mut filters = Vec::new();
        for rule in parts {
            let (accept, pattern) = if let Some(p) = rule.strip_prefix('+') {
                (true, p)
            } else if let Some(p) = rule.strip_prefix('-') {
                (false, p)
            } else {
                return Err(Error::InvalidTarget(format!(
                    "filter rule {:?} must start with '+' or '-'",
                    rule
                )));
            };
            if !pattern.starts_with('/') {
                return Err(Error::InvalidTarget(format!(
                    "filter pattern {:?} must start with '/'",
                    pattern
                )));
            }
            // Validate now so send never trips over a bad pattern
            Pattern::compile(pattern)?;
            filters.push(Filter {
                pattern: pattern.to_string(),
                accept,
            });
        }

        Ok(Target {
            addr,
            prefix: prefix.to_string(),
            filters,
        })
    }

    /// Format back into a specification string
    pub fn url_str(&self) -> String {
        let mut out = format!("{}{}", self.addr, self.prefix);
        for rule in &self.filters {
            out.push(' ');
            out.push(if rule.accept { '+' } else { '-' });
            out.push_str(&rule.pattern);
        }
        out
    }

    /// Apply the filter rules to an already-prefixed address
    fn accepts(&self, addr: &str) -> bool {
        let Some(first) = self.filters.first() else {
            return true;
        };
        let mut verdict = !first.accept;
        for rule in &self.filters {
            // Rules were validated at parse/insert time
            let hit = Pattern::compile(&rule.pattern)
                .map(|p| p.matches(addr))
                .unwrap_or(false);
            if hit {
                verdict = rule.accept;
            }
        }
        verdict
    }

    /// Re-address a message under this target's prefix and run the
    /// filters; `None` when the target declines it
    fn filter_message(&self, msg: &Message) -> Option<Message> {
        let addr = if self.prefix.is_empty() {
            msg.addr().to_string()
        } else {
            format!("{}{}", self.prefix, msg.addr())
        };
        if !self.accepts(&addr) {
            return None;
        }
        Some(Message::from_parts(addr, msg.args().to_vec()))
    }

    /// Filter a packet recursively; empty bundles are pruned
    fn filter_packet(&self, packet: &Packet) -> Option<Packet> {
        match packet {
            Packet::Message(msg) => self.filter_message(msg).map(Packet::Message),
            Packet::Bundle(bundle) => {
                let elements: Vec<Packet> = bundle
                    .elements
                    .iter()
                    .filter_map(|el| self.filter_packet(el))
                    .collect();
                if elements.is_empty() {
                    return None;
                }
                let mut filtered = Bundle::new(bundle.time_tag);
                filtered.elements = elements;
                Some(Packet::Bundle(filtered))
            }
        }
    }
}

/// UDP client fanning each packet out to a table of filtered targets
pub struct MultiClient {
    socket: UdpSocket,
    targets: RwLock<HashMap<SocketAddr, Target>>,
}

impl MultiClient {
    /// Create a multi-target client with an empty table
    pub fn new() -> Result<Self> {
        Ok(Self {
            socket: UdpSocket::bind("0.0.0.0:0")?,
            targets: RwLock::new(HashMap::new()),
        })
    }

    /// Insert or update a target row
    pub fn set_target(&self, target: Target) {
        log::debug!("target set: {}", target.url_str());
        self.targets.write().insert(target.addr, target);
    }

    /// Remove a target row
    pub fn del_target(&self, addr: &SocketAddr) -> Result<()> {
        match self.targets.write().remove(addr) {
            Some(_) => {
                log::debug!("target removed: {}", addr);
                Ok(())
            }
            None => Err(Error::NotSubscribed(*addr)),
        }
    }

    /// True when a row exists for this address
    pub fn has_target(&self, addr: &SocketAddr) -> bool {
        self.targets.read().contains_key(addr)
    }

    /// Replace/merge rows from an iterator of targets
    pub fn update_targets<I: IntoIterator<Item = Target>>(&self, targets: I) {
        let mut table = self.targets.write();
        for target in targets {
            table.insert(target.addr, target);
        }
    }

    /// Number of configured targets
    pub fn target_count(&self) -> usize {
        self.targets.read().len()
    }

    /// Specification strings for every configured target, sorted for
    /// stable output
    pub fn target_strings(&self) -> Vec<String> {
        let mut out: Vec<String> = self.targets.read().values().map(Target::url_str).collect();
        out.sort();
        out
    }

    /// Fan a packet out to every target whose filters pass
    ///
    /// Returns the number of targets the packet was sent to. Zero is a
    /// normal outcome (everything filtered out, or an empty table).
    pub fn send(&self, packet: &Packet) -> Result<usize> {
        // Snapshot under the read lock; sends happen outside it
        let targets: Vec<Target> = self.targets.read().values().cloned().collect();
        let mut sent = 0;
        for target in targets {
            let Some(filtered) = target.filter_packet(packet) else {
                log::trace!("target {} filtered out {:?}", target.addr, packet);
                continue;
            };
            self.socket.send_to(&filtered.encode(), target.addr)?;
            sent += 1;
        }
        Ok(sent)
    }

    /// Convenience: fan a message out
    pub fn send_message(&self, msg: &Message) -> Result<usize> {
        self.send(&Packet::Message(msg.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(spec: &str) -> Target {
        Target::parse(spec, 2222).unwrap()
    }

    #[test]
    fn test_parse_host_only() {
        let t = target("127.0.0.1");
        assert_eq!(t.addr, "127.0.0.1:2222".parse().unwrap());
        assert!(t.prefix.is_empty());
        assert!(t.filters.is_empty());
    }

    #[test]
    fn test_parse_host_port_prefix() {
        let t = target("127.0.0.1:9000/desk");
        assert_eq!(t.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(t.prefix, "/desk");
    }

    #[test]
    fn test_parse_filters() {
        let t = target("127.0.0.1:9000 +/user/* -/user/9");
        assert_eq!(t.filters.len(), 2);
        assert!(t.filters[0].accept);
        assert_eq!(t.filters[0].pattern, "/user/*");
        assert!(!t.filters[1].accept);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Target::parse("", 2222),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            Target::parse("127.0.0.1 user/*", 2222),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            Target::parse("127.0.0.1 +user", 2222),
            Err(Error::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_url_str_round_trip() {
        let spec = "127.0.0.1:9000/desk +/user/* -/user/9";
        assert_eq!(target(spec).url_str(), spec);
    }

    #[test]
    fn test_empty_filters_accept_everything() {
        let t = target("127.0.0.1:9000");
        assert!(t.accepts("/anything/at/all"));
    }

    #[test]
    fn test_last_matching_rule_wins() {
        let t = target("127.0.0.1:9000 +/user/* -/user/9");
        assert!(t.accepts("/user/1"));
        assert!(!t.accepts("/user/9"));
        assert!(!t.accepts("/other"));

        let t = target("127.0.0.1:9000 -/debug/*");
        assert!(t.accepts("/user/1"));
        assert!(!t.accepts("/debug/x"));
    }

    #[test]
    fn test_prefix_applies_before_filters() {
        let t = target("127.0.0.1:9000/desk +/desk/user/*");
        let msg = Message::new("/user/1").unwrap();
        let filtered = t.filter_message(&msg).expect("accepted after prefixing");
        assert_eq!(filtered.addr(), "/desk/user/1");

        let msg = Message::new("/fader").unwrap();
        assert!(t.filter_message(&msg).is_none());
    }

    #[test]
    fn test_bundle_filtering_prunes_empties() {
        let t = target("127.0.0.1:9000 +/user/1");
        let mut bundle = Bundle::immediate();
        bundle.push(Message::new("/user/1").unwrap());
        bundle.push(Message::new("/user/2").unwrap());

        match t.filter_packet(&bundle.clone().into()).unwrap() {
            Packet::Bundle(b) => {
                assert_eq!(b.elements.len(), 1);
            }
            other => panic!("expected bundle, got {:?}", other),
        }

        let t_none = target("127.0.0.1:9000 +/nope");
        assert!(t_none.filter_packet(&bundle.into()).is_none());
    }

    #[test]
    fn test_table_mutation() {
        let client = MultiClient::new().unwrap();
        let t = target("127.0.0.1:9000");
        let addr = t.addr;
        client.set_target(t);
        assert!(client.has_target(&addr));
        assert_eq!(client.target_count(), 1);
        client.del_target(&addr).unwrap();
        assert!(matches!(
            client.del_target(&addr),
            Err(Error::NotSubscribed(_))
        ));
    }
}
