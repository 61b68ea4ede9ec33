//! Stream framing and JSON-RPC envelope handling.

pub mod envelope;
pub mod frame_reader;

pub use envelope::{Envelope, ErrorObject, IdPolicy, RequestId, ResponseOutcome};
pub use frame_reader::FrameReader;
