use std::io;

use thiserror::Error;

/// Failures that can occur while opening or reading from a packet source.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open capture source {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: pcap::Error,
    },
    #[error("capture read failed: {0}")]
    Read(#[source] pcap::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
