//! Wire constants and the small binary encodings used on the frame payload.
//!
//! See `spec.md` §6 for the frame table. The `utf` and `options_record`
//! encodings are not pinned by an available reference implementation (see
//! `SPEC_FULL.md` §6), so the choices here are recorded as the canonical
//! encoding for this server rather than reverse-engineered from anywhere.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

/// ASCII magic bytes that open every connection.
pub const MAGIC: [u8; 4] = *b"hrpc";

/// Oldest wire version this server still accepts.
pub const MIN_VERSION: u8 = 3;

/// Newest wire version this server speaks.
pub const CURRENT_VERSION: u8 = 4;

/// Reserved length-prefix value denoting a keepalive with no payload.
pub const PING_SENTINEL: u32 = u32::MAX;

/// Tagged compression algorithm identifier used in the request options record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression.
    None,
    /// DEFLATE-based gzip, via `flate2`.
    Gzip,
    /// A tag value recognized by the wire format but not implemented here.
    Unsupported(u8),
}

impl Compression {
    /// Decode the wire tag.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0 => Compression::None,
            1 => Compression::Gzip,
            other => Compression::Unsupported(other),
        }
    }

    /// Encode back to the wire tag.
    pub fn to_tag(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Unsupported(tag) => tag,
        }
    }

    /// Human-readable name written into the `version >= 4` response frame.
    pub fn name(self) -> &'static str {
        match self {
            Compression::None => "NONE",
            Compression::Gzip => "GZ",
            Compression::Unsupported(_) => "UNKNOWN",
        }
    }
}

/// Per-call options carried in the request payload when `version >= 4`.
#[derive(Debug, Clone)]
pub struct OptionsRecord {
    /// Compression the server should use when it writes the reply body.
    pub tx_compression: Compression,
    /// Compression the client used for the request body the server just read.
    pub rx_compression: Compression,
    /// Whether the client asked for a profiling record on the reply.
    pub profile_requested: bool,
    /// Optional opaque tag echoed back to application code via `CallContext`.
    pub tag: Option<String>,
}

/// Read a length-prefixed UTF-8 string (`u16` big-endian byte length).
pub fn read_utf(r: &mut impl Read) -> io::Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Write a length-prefixed UTF-8 string (`u16` big-endian byte length).
pub fn write_utf(w: &mut impl Write, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    assert!(bytes.len() <= u16::MAX as usize, "utf string too long");
    w.write_u16::<BigEndian>(bytes.len() as u16)?;
    w.write_all(bytes)
}

impl OptionsRecord {
    /// Decode from a `version >= 4` request payload, per `SPEC_FULL.md` §6.
    ///
    /// The two compression tags on the wire are named from the client's
    /// point of view (`tx` = what the client sent with, `rx` = what it wants
    /// back); they're swapped here to the server's point of view.
    pub fn decode(r: &mut impl Read) -> io::Result<Self> {
        let client_tx = Compression::from_tag(r.read_u8()?);
        let client_rx = Compression::from_tag(r.read_u8()?);
        let profile_requested = r.read_u8()? != 0;
        let tag_present = r.read_u8()? != 0;
        let tag = if tag_present {
            Some(read_utf(r)?)
        } else {
            None
        };

        Ok(Self {
            rx_compression: client_tx,
            tx_compression: client_rx,
            profile_requested,
            tag,
        })
    }

    /// Encode to a request payload (used by tests acting as a client).
    pub fn encode(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u8(self.rx_compression.to_tag())?;
        w.write_u8(self.tx_compression.to_tag())?;
        w.write_u8(self.profile_requested as u8)?;
        match &self.tag {
            Some(tag) => {
                w.write_u8(1)?;
                write_utf(w, tag)?;
            }
            None => w.write_u8(0)?,
        }
        Ok(())
    }
}

/// Profiling data attached to a reply when both `profile_requested` and
/// `version >= 4` hold.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfilingRecord {
    /// Wall-clock microseconds spent in the Handler's dispatch call.
    pub wall_micros: u64,
    /// Microseconds the call spent sitting on the Call Queue before a Handler
    /// picked it up.
    pub queue_micros: u64,
}

impl ProfilingRecord {
    /// Decode (used by test clients that want to assert on profiling data).
    pub fn decode(r: &mut impl Read) -> io::Result<Self> {
        Ok(Self {
            wall_micros: r.read_u64::<BigEndian>()?,
            queue_micros: r.read_u64::<BigEndian>()?,
        })
    }

    /// Encode onto a reply frame.
    pub fn encode(&self, w: &mut impl Write) -> io::Result<()> {
        w.write_u64::<BigEndian>(self.wall_micros)?;
        w.write_u64::<BigEndian>(self.queue_micros)
    }
}

/// Read the `u32` big-endian length prefix used on every frame after the
/// first (`spec.md` §6).
pub fn read_length_prefix(r: &mut impl Read) -> io::Result<u32> {
    r.read_u32::<BigEndian>()
}

/// Write a `u32` big-endian length prefix.
pub fn write_length_prefix(w: &mut impl Write, len: u32) -> io::Result<()> {
    w.write_u32::<BigEndian>(len)
}

/// Read the call id (`i32` big-endian).
pub fn read_call_id(r: &mut impl Read) -> io::Result<i32> {
    r.read_i32::<BigEndian>()
}

/// Write the call id (`i32` big-endian).
pub fn write_call_id(w: &mut impl Write, id: i32) -> io::Result<()> {
    w.write_i32::<BigEndian>(id)
}
