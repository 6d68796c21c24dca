use clap::Parser;

pub const DEFAULT_COLLECTOR_PATH: &str = "/tmp/flowsentryd.sock";

/// Raw flag parsing. Help/usage is handled by [`Config::parse_or_exit`]
/// rather than clap's own `--help`, since every failure mode here (bad
/// flag, missing operand, explicit `-h`) exits 1 with the same usage text.
#[derive(Parser)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct RawArgs {
    /// Capture interface name or path to an offline capture file.
    #[arg(short = 'i')]
    interface: Option<String>,

    /// Unix stream socket path flow events are written to.
    #[arg(short = 'c')]
    collector: Option<String>,

    /// Mirror log output to stderr in addition to syslog.
    #[arg(short = 'l')]
    log_stderr: bool,

    #[arg(short = 'h')]
    help: bool,
}

pub struct Config {
    pub interface: String,
    pub collector: String,
    pub log_stderr: bool,
}

const USAGE: &str = "\
usage: flowsentryd -i <interface|pcap-file> [-c <collector-socket>] [-l] [-h]

  -i <target>      capture interface name or offline capture file path (required)
  -c <path>         Unix stream socket to write flow events to (default: /tmp/flowsentryd.sock)
  -l                also log to stderr
  -h                print this usage and exit
";

impl Config {
    /// Parses `std::env::args()`, printing usage and exiting with status 1
    /// on any parse failure, on `-h`, or when `-i` is missing.
    pub fn parse_or_exit() -> Config {
        let raw = match RawArgs::try_parse() {
            Ok(raw) => raw,
            Err(_) => {
                eprint!("{}", USAGE);
                std::process::exit(1);
            }
        };

        if raw.help {
            eprint!("{}", USAGE);
            std::process::exit(1);
        }

        let interface = match raw.interface {
            Some(interface) => interface,
            None => {
                eprint!("{}", USAGE);
                std::process::exit(1);
            }
        };

        Config {
            interface,
            collector: raw.collector.unwrap_or_else(|| DEFAULT_COLLECTOR_PATH.to_string()),
            log_stderr: raw.log_stderr,
        }
    }
}
