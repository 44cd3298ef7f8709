//! Shared support for the integration tests: a trivial echo [`Dispatcher`],
//! a raw `std::net::TcpStream` client speaking the wire protocol directly
//! (so the tests exercise framing independently of the crate's own codec),
//! and a helper to stand a [`Server`] up on an ephemeral port.

#![allow(dead_code)]

use std::any::Any;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;

use hrpc::wire::{self, Compression, OptionsRecord, ProfilingRecord};
use hrpc::{ApplicationError, CallContext, Dispatcher, Server, ServerConfig};

/// Echoes the request bytes back unchanged, with a few magic payloads used
/// to exercise non-happy paths:
///
/// - `boom` fails with an application error.
/// - `sleep:<ms>` sleeps before echoing, for ordering tests.
/// - `charge-too-much` always fails the per-call response-size ceiling.
pub struct EchoDispatcher;

impl Dispatcher for EchoDispatcher {
    fn decode_request(&self, r: &mut dyn Read) -> io::Result<Box<dyn Any + Send>> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        Ok(Box::new(buf))
    }

    fn handle(
        &self,
        ctx: &CallContext<'_>,
        request: Box<dyn Any + Send>,
    ) -> Result<Box<dyn Any + Send>, ApplicationError> {
        let bytes = *request.downcast::<Vec<u8>>().expect("EchoDispatcher always decodes Vec<u8>");

        if bytes == b"boom" {
            return Err(ApplicationError::new("test.Boom", "requested failure"));
        }
        if bytes == b"charge-too-much" {
            ctx.charge_response_bytes(1_000_000)?;
        }
        if let Some(rest) = bytes.strip_prefix(b"sleep:") {
            let ms: u64 = std::str::from_utf8(rest)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            std::thread::sleep(Duration::from_millis(ms));
        }
        if bytes == b"ping" {
            return Ok(Box::new(b"pong".to_vec()));
        }
        Ok(Box::new(bytes))
    }

    fn encode_response(&self, response: &(dyn Any + Send), w: &mut dyn Write) -> io::Result<()> {
        let bytes = response
            .downcast_ref::<Vec<u8>>()
            .expect("EchoDispatcher always responds with Vec<u8>");
        w.write_all(bytes)
    }
}

/// Start a server bound to an ephemeral port and return it already running,
/// plus the address it bound to. Callers must call `server.stop(); server.join();`.
pub fn start_server(config: ServerConfig) -> (Arc<Server>, SocketAddr) {
    let _ = env_logger::try_init();

    let server = Arc::new(
        Server::builder(Arc::new(EchoDispatcher))
            .config(config)
            .build()
            .expect("server should bind"),
    );
    server.start();
    let addr = server.local_addr();
    (server, addr)
}

/// A parsed reply frame.
pub struct Reply {
    pub call_id: i32,
    pub error: bool,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub body: Vec<u8>,
    pub profiling: Option<ProfilingRecord>,
}

/// A raw client speaking the `hrpc` wire protocol over a plain `TcpStream`,
/// independent of the crate's own encode/decode paths.
pub struct Client {
    stream: TcpStream,
    version: u8,
}

fn write_frame(stream: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    wire::write_length_prefix(stream, payload.len() as u32)?;
    stream.write_all(payload)
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

fn gunzip(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
    out
}

impl Client {
    /// Connect, send the version byte, and send `identity` as the
    /// handshake's opaque identity frame.
    pub fn connect(addr: SocketAddr, version: u8, identity: &[u8]) -> io::Result<Self> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.write_all(&wire::MAGIC)?;
        stream.write_all(&[version])?;
        write_frame(&mut stream, identity)?;
        Ok(Self { stream, version })
    }

    pub fn connect_v4(addr: SocketAddr) -> io::Result<Self> {
        Self::connect(addr, wire::CURRENT_VERSION, b"test-client")
    }

    /// Send a raw byte sequence after the magic/version, without going
    /// through framing at all (for malformed-input tests).
    pub fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)
    }

    /// Send a keepalive (`PING_SENTINEL` length prefix, no payload).
    pub fn send_ping(&mut self) -> io::Result<()> {
        wire::write_length_prefix(&mut self.stream, wire::PING_SENTINEL)
    }

    /// Send a call. `request_compression` controls how `request` is
    /// compressed on the wire; `response_compression` is what the server is
    /// asked to use for the reply.
    pub fn send_call(
        &mut self,
        call_id: i32,
        request_compression: Compression,
        response_compression: Compression,
        profile: bool,
        tag: Option<&str>,
        request: &[u8],
    ) -> io::Result<()> {
        let mut payload = Vec::new();
        wire::write_call_id(&mut payload, call_id)?;

        if self.version >= 4 {
            let options = OptionsRecord {
                rx_compression: request_compression,
                tx_compression: response_compression,
                profile_requested: profile,
                tag: tag.map(str::to_string),
            };
            options.encode(&mut payload)?;
        }

        let body = match request_compression {
            Compression::None => request.to_vec(),
            Compression::Gzip => gzip(request),
            Compression::Unsupported(_) => request.to_vec(),
        };
        payload.write_all(&body)?;
        write_frame(&mut self.stream, &payload)
    }

    /// Convenience for the common case: version 4, no compression, no
    /// profiling, no tag.
    pub fn send_simple_call(&mut self, call_id: i32, request: &[u8]) -> io::Result<()> {
        self.send_call(
            call_id,
            Compression::None,
            Compression::None,
            false,
            None,
            request,
        )
    }

    /// Read and parse one reply frame. `profile_requested` must match what
    /// was sent on the corresponding call, since the profiling trailer isn't
    /// self-delimiting without that context.
    pub fn read_reply(&mut self, profile_requested: bool) -> io::Result<Reply> {
        let len = wire::read_length_prefix(&mut self.stream)?;
        let mut buf = vec![0u8; len as usize];
        self.stream.read_exact(&mut buf)?;
        let mut cursor = &buf[..];

        let call_id = wire::read_call_id(&mut cursor)?;
        let mut flag = [0u8; 1];
        cursor.read_exact(&mut flag)?;
        let error = flag[0] != 0;

        let compression_name = if self.version >= 4 {
            Some(wire::read_utf(&mut cursor)?)
        } else {
            None
        };

        if error {
            let class = wire::read_utf(&mut cursor)?;
            let message = wire::read_utf(&mut cursor)?;
            return Ok(Reply {
                call_id,
                error: true,
                error_class: Some(class),
                error_message: Some(message),
                body: Vec::new(),
                profiling: None,
            });
        }

        let rest: Vec<u8> = cursor.to_vec();
        let plaintext = match compression_name.as_deref() {
            Some("GZ") => gunzip(&rest),
            _ => rest,
        };

        let (object_bytes, profiling) = if self.version >= 4 {
            if profile_requested {
                let split = plaintext.len() - 17;
                let mut record_bytes = &plaintext[split + 1..];
                let record = ProfilingRecord::decode(&mut record_bytes)?;
                (plaintext[..split].to_vec(), Some(record))
            } else {
                let split = plaintext.len() - 1;
                (plaintext[..split].to_vec(), None)
            }
        } else {
            (plaintext, None)
        };

        Ok(Reply {
            call_id,
            error: false,
            error_class: None,
            error_message: None,
            body: object_bytes,
            profiling,
        })
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    /// Read directly off the underlying socket, bypassing frame parsing.
    pub fn read_raw(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}
