//! OSC wire protocol: data model and binary codec
//!
//! # Wire Format
//!
//! OSC 1.0 binary layout. Every value occupies a multiple of 4 bytes:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────────────────┐
//! │ int32 / float32    │ 4 bytes, big-endian / IEEE-754           │
//! │ string             │ bytes + NUL, zero-padded to 4            │
//! │ blob               │ 4-byte BE length + bytes, padded to 4    │
//! └────────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! A message is an address string, a `,`-prefixed type tag string, then the
//! arguments in order:
//!
//! ```text
//! ┌──────────────┬───────────────┬──────────────────┐
//! │ "/address"   │ ",ifsb"       │ args...          │
//! │ (padded)     │ (padded)      │ (each padded)    │
//! └──────────────┴───────────────┴──────────────────┘
//! ```
//!
//! A bundle is the literal tag `#bundle\0`, an 8-byte time tag, then each
//! element prefixed by a 4-byte big-endian byte count. The length prefix
//! makes the encoding self-delimiting, so bundles nest to arbitrary depth
//! without a terminator.
//!
//! Decoding is strict: truncated buffers, length prefixes that point past
//! the end, and unrecognized type tags all fail with a malformed-packet
//! error rather than producing a partial result.

pub mod atom;
pub mod codec;
pub mod message;
pub mod time_tag;

pub use atom::Atom;
pub use codec::{decode, hex_dump};
pub use message::{Bundle, Message, Packet};
pub use time_tag::TimeTag;
