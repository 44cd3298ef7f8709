//! The application-facing seam (`spec.md` §1 names the dispatcher as an
//! out-of-scope collaborator; `spec.md` §9 Design Notes ask for a
//! trait/interface pair here rather than reflection-based deserialization).

use std::any::Any;
use std::io::{self, Read, Write};

use crate::call::CallContext;
use crate::error::ApplicationError;

/// Implemented by the application to decode requests, run business logic,
/// and encode responses. One `Dispatcher` instance is shared (via `Arc`)
/// across every Handler thread, so it must be `Send + Sync`.
pub trait Dispatcher: Send + Sync + 'static {
    /// Decode a request object from the (already decompressed) payload
    /// stream. Called on the Reader/Deserialization-Pool thread that framed
    /// the call, per `spec.md` §4.2 step (d).
    fn decode_request(&self, r: &mut dyn Read) -> io::Result<Box<dyn Any + Send>>;

    /// Run business logic for one call. Called on a Handler thread
    /// (`spec.md` §4.3). Returning `Err` produces a structured error
    /// response frame; the connection stays open either way.
    fn handle(
        &self,
        ctx: &CallContext<'_>,
        request: Box<dyn Any + Send>,
    ) -> Result<Box<dyn Any + Send>, ApplicationError>;

    /// Encode a response object (pre-compression) onto the wire. Called on
    /// the same Handler thread immediately after `handle` returns `Ok`.
    fn encode_response(&self, response: &(dyn Any + Send), w: &mut dyn Write) -> io::Result<()>;
}
