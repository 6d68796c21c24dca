//! Packet source abstraction: reads timestamped link-layer frames from a
//! live interface or a saved capture file. One [`Source`] is opened per
//! worker; all workers read the same underlying path or device and rely on
//! the engine's shard dispatcher to discard packets they don't own.

mod error;
mod source;

pub use error::Error;
pub use source::{LinkType, ReadOutcome, Record, Source, READ_TIMEOUT};
