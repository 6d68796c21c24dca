use std::path::Path;
use std::time::Duration;

use pcap::{Activated, Capture, Linktype};

use crate::error::Error;

/// Link-layer framing of the records a [`Source`] produces.
///
/// Only the two link types spec'd for the parser are distinguished; anything
/// else is surfaced as `Other` and rejected by the parser with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    NullLoopback,
    Ethernet,
    Other(i32),
}

impl From<Linktype> for LinkType {
    fn from(lt: Linktype) -> Self {
        match lt {
            Linktype::NULL | Linktype::LOOP => LinkType::NullLoopback,
            Linktype::ETHERNET => LinkType::Ethernet,
            other => LinkType::Other(other.0),
        }
    }
}

/// One captured frame as delivered by the source: a monotonic-domain
/// timestamp in milliseconds, the captured length, the on-the-wire length,
/// and the captured bytes themselves.
pub struct Record {
    pub time_ms: u64,
    pub caplen: u32,
    pub len: u32,
    pub data: Vec<u8>,
}

const TICK_RESOLUTION: u64 = 1000;
const LIVE_SNAPLEN: i32 = 65535;
const LIVE_READ_TIMEOUT_MS: i32 = 250;

/// A lazily-read sequence of link-layer frames, either from a live interface
/// or from a saved capture file. Each worker opens its own `Source` against
/// the same underlying path or device so that every worker observes the
/// full packet stream and performs its own shard filtering.
/// Outcome of a single read attempt against a [`Source`].
pub enum ReadOutcome {
    Packet(Record),
    /// No packet arrived within the read timeout (live interfaces only);
    /// the worker should check for a shutdown request and try again.
    Timeout,
    /// The source is exhausted (offline file EOF, or a live interface that
    /// was torn down).
    Eof,
}

pub struct Source {
    cap: Capture<dyn Activated>,
    link_type: LinkType,
    is_file: bool,
}

impl Source {
    /// Open `target` as a live interface if it does not name an existing
    /// file, matching the CLI contract in spec.md §6: promiscuous,
    /// 65535-byte snaplen, 250ms read timeout, microsecond timestamps.
    pub fn open(target: &str) -> Result<Self, Error> {
        if Path::new(target).is_file() {
            Self::open_file(target)
        } else {
            Self::open_device(target)
        }
    }

    pub fn open_file(path: &str) -> Result<Self, Error> {
        let cap = Capture::from_file(path).map_err(|source| Error::Open {
            path: path.to_string(),
            source,
        })?;
        let link_type = LinkType::from(cap.get_datalink());
        Ok(Self {
            cap: cap.into(),
            link_type,
            is_file: true,
        })
    }

    pub fn open_device(name: &str) -> Result<Self, Error> {
        let cap = Capture::from_device(name)
            .map_err(|source| Error::Open {
                path: name.to_string(),
                source,
            })?
            .promisc(true)
            .snaplen(LIVE_SNAPLEN)
            .timeout(LIVE_READ_TIMEOUT_MS)
            .precision(pcap::Precision::Micro)
            .open()
            .map_err(|source| Error::Open {
                path: name.to_string(),
                source,
            })?;
        let link_type = LinkType::from(cap.get_datalink());
        Ok(Self {
            cap: cap.into(),
            link_type,
            is_file: false,
        })
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    /// Read the next record.
    pub fn next_record(&mut self) -> Result<ReadOutcome, Error> {
        match self.cap.next_packet() {
            Ok(packet) => {
                let ts = packet.header.ts;
                let time_ms =
                    (ts.tv_sec as u64) * TICK_RESOLUTION + (ts.tv_usec as u64) / (1_000_000 / TICK_RESOLUTION);
                Ok(ReadOutcome::Packet(Record {
                    time_ms,
                    caplen: packet.header.caplen,
                    len: packet.header.len,
                    data: packet.data.to_vec(),
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(ReadOutcome::Timeout),
            Err(pcap::Error::NoMorePackets) => Ok(ReadOutcome::Eof),
            Err(e) => {
                if self.is_file {
                    Ok(ReadOutcome::Eof)
                } else {
                    Err(Error::Read(e))
                }
            }
        }
    }
}

pub const READ_TIMEOUT: Duration = Duration::from_millis(LIVE_READ_TIMEOUT_MS as u64);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn link_type_from_linktype() {
        assert_eq!(LinkType::from(Linktype::ETHERNET), LinkType::Ethernet);
        assert_eq!(LinkType::from(Linktype::NULL), LinkType::NullLoopback);
        assert_eq!(LinkType::from(Linktype::LOOP), LinkType::NullLoopback);
    }

    fn write_empty_pcap_file(linktype: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&0xa1b2c3d4u32.to_le_bytes()).unwrap();
        file.write_all(&2u16.to_le_bytes()).unwrap();
        file.write_all(&4u16.to_le_bytes()).unwrap();
        file.write_all(&0i32.to_le_bytes()).unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        file.write_all(&65535u32.to_le_bytes()).unwrap();
        file.write_all(&linktype.to_le_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn open_file_reads_link_type_and_reaches_eof() {
        let file = write_empty_pcap_file(1); // DLT_EN10MB
        let mut source = Source::open_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(source.link_type(), LinkType::Ethernet);
        assert!(matches!(source.next_record().unwrap(), ReadOutcome::Eof));
    }

    #[test]
    fn open_rejects_missing_path_as_device() {
        let err = Source::open("/no/such/device/or/file").unwrap_err();
        assert!(matches!(err, Error::Open { .. }));
    }
}
