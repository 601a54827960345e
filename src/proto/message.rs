//! In-memory message, bundle, and packet model
//!
//! Messages and bundles are immutable value trees once built: construct
//! fresh per send instead of mutating a builder across sends.

use crate::error::{Error, Result};
use crate::proto::atom::Atom;
use crate::proto::codec;
use crate::proto::time_tag::TimeTag;

/// A single OSC message: address plus typed arguments
///
/// The type tag string is derived from the arguments, so tag/argument
/// agreement holds by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    addr: String,
    args: Vec<Atom>,
}

impl Message {
    /// Create an empty message for the given address
    ///
    /// The address must begin with `/`.
    pub fn new(addr: &str) -> Result<Self> {
        if !addr.starts_with('/') {
            return Err(Error::InvalidAddress(addr.to_string()));
        }
        Ok(Self {
            addr: addr.to_string(),
            args: Vec::new(),
        })
    }

    /// Create a message with arguments in one call
    pub fn with_args<I>(addr: &str, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Atom>,
    {
        let mut msg = Self::new(addr)?;
        msg.args.extend(args.into_iter().map(Into::into));
        Ok(msg)
    }

    /// Append one argument
    pub fn push(&mut self, arg: impl Into<Atom>) {
        self.args.push(arg.into());
    }

    /// Message address (or address pattern)
    #[inline]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Arguments in order
    #[inline]
    pub fn args(&self) -> &[Atom] {
        &self.args
    }

    /// Type tag string, including the leading `,`
    pub fn type_tags(&self) -> String {
        let mut tags = String::with_capacity(self.args.len() + 1);
        tags.push(',');
        for arg in &self.args {
            tags.push(arg.type_tag());
        }
        tags
    }

    /// Encode to OSC wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        codec::encode_message(self, &mut buf);
        buf
    }

    pub(crate) fn from_parts(addr: String, args: Vec<Atom>) -> Self {
        Self { addr, args }
    }
}

/// A timestamped container of messages and nested bundles
#[derive(Debug, Clone, PartialEq)]
pub struct Bundle {
    /// Nominal dispatch time; [`TimeTag::IMMEDIATE`] means no delay
    pub time_tag: TimeTag,
    /// Contained elements, dispatched in encoded order
    pub elements: Vec<Packet>,
}

impl Bundle {
    /// Create an empty bundle with the given time tag
    pub fn new(time_tag: TimeTag) -> Self {
        Self {
            time_tag,
            elements: Vec::new(),
        }
    }

    /// Create an empty bundle that dispatches immediately
    pub fn immediate() -> Self {
        Self::new(TimeTag::IMMEDIATE)
    }

    /// Append one element
    pub fn push(&mut self, element: impl Into<Packet>) {
        self.elements.push(element.into());
    }

    /// Encode to OSC wire bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        codec::encode_bundle(self, &mut buf);
        buf
    }
}

/// Either a message or a bundle: the unit carried by transports
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    /// Encode to OSC wire bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Packet::Message(m) => m.encode(),
            Packet::Bundle(b) => b.encode(),
        }
    }

    /// Decode from OSC wire bytes
    pub fn decode(bytes: &[u8]) -> Result<Packet> {
        codec::decode(bytes)
    }
}

impl From<Message> for Packet {
    fn from(m: Message) -> Self {
        Packet::Message(m)
    }
}

impl From<Bundle> for Packet {
    fn from(b: Bundle) -> Self {
        Packet::Bundle(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_must_start_with_slash() {
        assert!(Message::new("/print").is_ok());
        assert!(matches!(
            Message::new("print"),
            Err(Error::InvalidAddress(_))
        ));
        assert!(matches!(Message::new(""), Err(Error::InvalidAddress(_))));
    }

    #[test]
    fn test_type_tags_follow_args() {
        let mut msg = Message::new("/print").unwrap();
        assert_eq!(msg.type_tags(), ",");
        msg.push(44);
        msg.push(4.5f32);
        msg.push("dover");
        msg.push(vec![1u8, 2, 3]);
        assert_eq!(msg.type_tags(), ",ifsb");
        assert_eq!(msg.args().len(), 4);
    }

    #[test]
    fn test_bundle_nesting() {
        let inner = Bundle::immediate();
        let mut outer = Bundle::immediate();
        outer.push(Message::new("/a").unwrap());
        outer.push(inner);
        assert_eq!(outer.elements.len(), 2);
        assert!(matches!(outer.elements[1], Packet::Bundle(_)));
    }
}
