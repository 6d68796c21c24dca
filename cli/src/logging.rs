use log::{Level, LevelFilter, Log, Metadata, Record};
use syslog::{BasicLogger, Facility, Formatter3164};

/// Syslog program identifier. Kept as this exact literal: it is the one
/// external-interface detail the wire contract pins down, not a stylistic
/// choice.
pub const SYSLOG_IDENTIFIER: &str = "nDPId";

struct DualLogger {
    syslog: BasicLogger,
    mirror_stderr: bool,
}

impl Log for DualLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.syslog.log(record);
        if self.mirror_stderr {
            eprintln!("{} {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        self.syslog.flush();
    }
}

/// Initializes syslog-backed logging under [`SYSLOG_IDENTIFIER`], mirroring
/// to stderr when `mirror_stderr` is set (the CLI's `-l` flag). Failures
/// here are reported by the caller directly to stderr, since the logger
/// isn't up yet to do it itself.
pub fn init(mirror_stderr: bool) -> Result<(), Box<dyn std::error::Error>> {
    let formatter = Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: SYSLOG_IDENTIFIER.to_string(),
        pid: std::process::id() as i32,
    };
    let logger = syslog::unix(formatter)?;

    log::set_boxed_logger(Box::new(DualLogger {
        syslog: BasicLogger::new(logger),
        mirror_stderr,
    }))?;
    log::set_max_level(LevelFilter::Info);
    Ok(())
}
