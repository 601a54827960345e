//! Binary encode/decode for OSC packets
//!
//! Encoding appends into a caller-supplied buffer so composite structures
//! (bundles of bundles) build without intermediate allocations. Decoding
//! walks a borrowed slice with a cursor and fails fast with a specific
//! malformed-packet error; it never panics on hostile input.

use crate::error::{Error, Result};
use crate::proto::atom::Atom;
use crate::proto::message::{Bundle, Message, Packet};
use crate::proto::time_tag::TimeTag;

/// Literal tag opening every encoded bundle
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Round up to the next multiple of 4
#[inline]
pub(crate) const fn pad4(n: usize) -> usize {
    (n + 3) & !3
}

// ============================================================================
// Encoding
// ============================================================================

/// Append a string: bytes, at least one NUL, zero-padded to 4
fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    let padded = pad4(s.len() + 1);
    buf.resize(buf.len() + (padded - s.len()), 0);
}

/// Append a blob: 4-byte big-endian length, bytes, zero-padded to 4
///
/// Padding is not counted in the length prefix.
fn write_blob(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
    buf.resize(buf.len() + (pad4(bytes.len()) - bytes.len()), 0);
}

fn write_atom(buf: &mut Vec<u8>, atom: &Atom) {
    match atom {
        Atom::Int(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Atom::Float(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Atom::Str(s) => write_string(buf, s),
        Atom::Blob(b) => write_blob(buf, b),
    }
}

/// Append a message: padded address, `,`-prefixed padded tag string, args
pub(crate) fn encode_message(msg: &Message, buf: &mut Vec<u8>) {
    write_string(buf, msg.addr());
    write_string(buf, &msg.type_tags());
    for arg in msg.args() {
        write_atom(buf, arg);
    }
}

/// Append a bundle: `#bundle\0`, 8-byte time tag, length-prefixed elements
pub(crate) fn encode_bundle(bundle: &Bundle, buf: &mut Vec<u8>) {
    buf.extend_from_slice(BUNDLE_TAG);
    buf.extend_from_slice(&bundle.time_tag.raw().to_be_bytes());
    for element in &bundle.elements {
        // Reserve the length prefix, encode in place, then backfill it
        let len_pos = buf.len();
        buf.extend_from_slice(&[0u8; 4]);
        match element {
            Packet::Message(m) => encode_message(m, buf),
            Packet::Bundle(b) => encode_bundle(b, buf),
        }
        let element_len = (buf.len() - len_pos - 4) as u32;
        buf[len_pos..len_pos + 4].copy_from_slice(&element_len.to_be_bytes());
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Cursor over a borrowed packet buffer
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take exactly `n` bytes or fail with a truncation error
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::Truncated {
                needed: n - self.remaining(),
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read a NUL-terminated, 4-padded string and consume its padding
    fn read_string(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::Malformed("string missing NUL terminator".into()))?;
        let consumed = pad4(nul + 1);
        if consumed > rest.len() {
            return Err(Error::Truncated {
                needed: consumed - rest.len(),
                remaining: rest.len(),
            });
        }
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| Error::Malformed("string is not valid UTF-8".into()))?
            .to_string();
        self.pos += consumed;
        Ok(s)
    }

    /// Read a length-prefixed, 4-padded blob and consume its padding
    fn read_blob(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as usize;
        if pad4(len) > self.remaining() {
            return Err(Error::BadLengthPrefix {
                declared: len,
                remaining: self.remaining(),
            });
        }
        let bytes = self.take(len)?.to_vec();
        self.take(pad4(len) - len)?;
        Ok(bytes)
    }
}

/// Decode one OSC packet (message or bundle) from wire bytes
pub fn decode(bytes: &[u8]) -> Result<Packet> {
    let mut reader = Reader::new(bytes);
    let packet = decode_packet(&mut reader)?;
    Ok(packet)
}

fn decode_packet(reader: &mut Reader) -> Result<Packet> {
    match reader.buf.get(reader.pos) {
        Some(b'#') => Ok(Packet::Bundle(decode_bundle(reader)?)),
        Some(b'/') => Ok(Packet::Message(decode_message(reader)?)),
        Some(&b) => Err(Error::InvalidAddress(format!(
            "packet starts with 0x{:02X}, expected '/' or '#bundle'",
            b
        ))),
        None => Err(Error::Truncated {
            needed: 4,
            remaining: 0,
        }),
    }
}

fn decode_message(reader: &mut Reader) -> Result<Message> {
    let addr = reader.read_string()?;
    if !addr.starts_with('/') {
        return Err(Error::InvalidAddress(addr));
    }
    // A bare address with no tag string is tolerated (zero arguments);
    // pre-1.0 senders omit the `,` string entirely.
    if reader.remaining() == 0 {
        return Ok(Message::from_parts(addr, Vec::new()));
    }
    let tags = reader.read_string()?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(Error::Malformed(format!(
            "type tag string {:?} does not start with ','",
            tags
        )));
    };
    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let atom = match tag {
            'i' => Atom::Int(reader.read_i32()?),
            'f' => Atom::Float(reader.read_f32()?),
            's' => Atom::Str(reader.read_string()?),
            'b' => Atom::Blob(reader.read_blob()?),
            other => return Err(Error::UnknownTypeTag(other)),
        };
        args.push(atom);
    }
    Ok(Message::from_parts(addr, args))
}

fn decode_bundle(reader: &mut Reader) -> Result<Bundle> {
    let tag = reader.take(BUNDLE_TAG.len())?;
    if tag != BUNDLE_TAG {
        return Err(Error::Malformed("bad #bundle tag".into()));
    }
    let time_tag = TimeTag::from_raw(reader.read_u64()?);
    let mut bundle = Bundle::new(time_tag);
    while reader.remaining() > 0 {
        let element_len = reader.read_u32()? as usize;
        if element_len > reader.remaining() || element_len % 4 != 0 {
            return Err(Error::BadLengthPrefix {
                declared: element_len,
                remaining: reader.remaining(),
            });
        }
        let mut element_reader = Reader::new(reader.take(element_len)?);
        bundle.elements.push(decode_packet(&mut element_reader)?);
    }
    Ok(bundle)
}

// ============================================================================
// Trace helper
// ============================================================================

/// Render packet bytes as a hex dump for trace logging
///
/// 16 bytes per row with an ASCII gutter:
///
/// ```text
/// 0000  2f 70 72 69 6e 74 00 00 2c 69 00 00 00 00 00 2c  /print..,i.....,
/// ```
pub fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4);
    for (row, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("{:04x}  ", row * 16));
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => out.push_str(&format!("{:02x} ", b)),
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        for b in chunk {
            out.push(if b.is_ascii_graphic() { *b as char } else { '.' });
        }
        out.push('\n');
    }
    out
}
