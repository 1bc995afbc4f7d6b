//! Response framing over chunked output streams.
//!
//! Interpreter output arrives in arbitrary chunks. A framer accumulates the
//! chunks of one call and reports when the call's response is complete.
//!
//! - `sentinel` - script engine: output ends at a token-qualified marker
//! - `lines` - code helper: one JSON record per line, with resynchronization

mod lines;
mod sentinel;

pub use lines::LineFramer;
pub use sentinel::SentinelFramer;

/// Recognizes the end of one response inside a chunked byte stream.
pub trait Framer {
    /// The decoded response.
    type Output;

    /// Append a newly received chunk.
    ///
    /// Returns the response once its boundary has been seen. A framer is
    /// used for exactly one call; behavior after it has produced a response
    /// is unspecified.
    fn feed(&mut self, chunk: &[u8]) -> Option<Self::Output>;
}
