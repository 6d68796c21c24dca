use std::io;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;

use serde_json::Value;

/// JSON event sink over a Unix stream socket. Connects lazily and
/// reconnects lazily: a failed send just marks the sink disconnected and
/// the next event attempts a fresh connect, matching spec.md §6's
/// best-effort delivery contract (no queuing, no blocking the worker on a
/// down collector).
pub struct Sink {
    path: String,
    stream: Option<UnixStream>,
    had_error: bool,
}

impl Sink {
    pub fn new(path: impl Into<String>) -> Self {
        let mut sink = Sink {
            path: path.into(),
            stream: None,
            had_error: false,
        };
        sink.try_connect();
        sink
    }

    fn try_connect(&mut self) -> bool {
        match UnixStream::connect(&self.path) {
            Ok(stream) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    log::warn!("could not set {} non-blocking: {}", self.path, e);
                }
                if self.had_error {
                    log::info!("Reconnected to {}", self.path);
                }
                self.had_error = false;
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                log::warn!("failed to connect to {}: {}", self.path, e);
                self.had_error = true;
                false
            }
        }
    }

    /// Serializes `event` and sends it. Any failure, including one that
    /// happens on a connect attempt made inline here, leaves the sink
    /// disconnected for the next call to retry.
    pub fn send(&mut self, event: &Value) {
        if self.stream.is_none() && !self.try_connect() {
            return;
        }

        let mut buf = match serde_json::to_vec(event) {
            Ok(mut buf) => {
                buf.push(b'\n');
                buf
            }
            Err(e) => {
                log::warn!("failed to serialize flow event: {}", e);
                return;
            }
        };

        let result = match &self.stream {
            Some(stream) => send_nosignal(stream, &buf),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        };
        buf.clear();

        if let Err(e) = result {
            if e.raw_os_error() == Some(libc::EPIPE) {
                log::warn!("lost connection to {}", self.path);
            }
            self.had_error = true;
            self.stream = None;
        }
    }
}

/// Sends over a raw fd with `MSG_NOSIGNAL` so a broken sink connection
/// surfaces as `EPIPE` instead of raising `SIGPIPE` on the worker thread.
fn send_nosignal(stream: &UnixStream, buf: &[u8]) -> io::Result<()> {
    let fd = stream.as_raw_fd();
    let ret = unsafe {
        libc::send(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        )
    };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::net::UnixListener;

    #[test]
    fn send_without_listener_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-listener.sock");
        let mut sink = Sink::new(path.to_str().unwrap());
        sink.send(&json!({"flow_event": "new"}));
    }

    #[test]
    fn send_delivers_to_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flowsentry.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let mut sink = Sink::new(path.to_str().unwrap());
        sink.send(&json!({"flow_event": "new", "flow_id": 1}));

        let (stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 256];
        use std::io::Read;
        let mut stream = stream;
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0);
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("\"flow_event\":\"new\""));
    }
}
