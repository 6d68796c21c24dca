//! The DPI engine boundary (SPEC_FULL.md §2.1). spec.md treats deep packet
//! inspection as an external, black-box collaborator; this module defines
//! that boundary as a trait and ships a heuristic reference implementation
//! so the engine is runnable without a vendored DPI library. A production
//! backend is a second `DpiEngine` impl; nothing in `worker`/`flow_table`
//! changes to use one.

/// A protocol or category identifier. `0` is the UNKNOWN sentinel, matching
/// the convention real DPI libraries use for "not yet classified".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolId(pub u16);

impl ProtocolId {
    pub const UNKNOWN: ProtocolId = ProtocolId(0);

    pub fn is_unknown(self) -> bool {
        self == Self::UNKNOWN
    }
}

/// `(master_protocol, app_protocol, category)` as spec.md §3 requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProtocolTriple {
    pub master_protocol: ProtocolId,
    pub app_protocol: ProtocolId,
    pub category: ProtocolId,
}

impl ProtocolTriple {
    pub const UNKNOWN: ProtocolTriple = ProtocolTriple {
        master_protocol: ProtocolId::UNKNOWN,
        app_protocol: ProtocolId::UNKNOWN,
        category: ProtocolId::UNKNOWN,
    };

    /// `detection_completed = 1` requires at least one non-UNKNOWN field
    /// (spec.md §3 invariant).
    pub fn has_any_known(&self) -> bool {
        !self.master_protocol.is_unknown() || !self.app_protocol.is_unknown()
    }
}

/// Per-flow opaque state the DPI engine owns. spec.md §3 describes this as
/// "one flow state and two endpoint id states"; the endpoint halves are
/// folded in as `endpoint_src`/`endpoint_dst` so the driver can still swap
/// them on a direction-reversed lookup (spec.md §4.4 step 7) without the
/// engine trait needing to expose three separate constructors.
#[derive(Default)]
pub struct DpiFlowState {
    num_processed_pkts: u8,
    detected: Option<ProtocolTriple>,
    endpoint_src: EndpointState,
    endpoint_dst: EndpointState,
    hint_l4_protocol: u8,
    hint_port: u16,
}

#[derive(Default, Clone, Copy)]
struct EndpointState {
    bytes_seen: u64,
}

impl DpiFlowState {
    /// `num_processed_pkts` gates the driver in spec.md §4.4 step 6: it
    /// saturates at `0xFF` rather than wrapping, so "exhausted" is a stable
    /// terminal state once reached.
    pub fn processed_packets(&self) -> u8 {
        self.num_processed_pkts
    }

    fn bump_processed(&mut self) {
        self.num_processed_pkts = self.num_processed_pkts.saturating_add(1);
    }

    /// Swap which opaque endpoint sub-record represents "src" vs "dst".
    /// Called by the flow table on a direction-reversed lookup hit so the
    /// DPI engine keeps seeing the same logical endpoint as "src" even
    /// though this packet's wire src/dst are swapped relative to the flow's
    /// canonical direction (spec.md §9's fix for the source's inconsistent
    /// `direction_changed` handling: applied uniformly, not only on miss).
    pub fn swap_endpoints(&mut self) {
        std::mem::swap(&mut self.endpoint_src, &mut self.endpoint_dst);
    }
}

/// Result of one `process_packet` call.
pub struct DpiResult {
    pub protocol: ProtocolTriple,
    /// Mirrors `ndpi_is_protocol_detected`: true once the engine considers
    /// classification complete for this packet, independent of whether the
    /// resulting triple has any non-UNKNOWN field (that check is layered on
    /// top by the caller, per spec.md §4.4 step 8).
    pub is_detection: bool,
}

/// The DPI engine interface spec.md §1 treats as an external collaborator:
/// *initialize*, *process-packet-for-flow*, *give-up-and-guess*, and
/// *protocol-name-lookup*.
pub trait DpiEngine: Send + Sync {
    /// Allocate a fresh per-flow opaque state. `l4_protocol`/`dst_port` are
    /// passed through as classification hints (a real engine wouldn't need
    /// them, since it inspects payload bytes; the heuristic reference
    /// engine uses them as a fallback signal for `give_up`).
    fn init(&self, l4_protocol: u8, dst_port: u16) -> DpiFlowState;

    /// Feed one packet's L3 buffer to the engine for this flow.
    fn process_packet(
        &self,
        state: &mut DpiFlowState,
        l3: &[u8],
        time_ms: u64,
        src_is_initiator: bool,
    ) -> DpiResult;

    /// The give-up milestone (spec.md §4.4 step 6, `num_processed_pkts ==
    /// 0xFE` with no detection yet): one last, lower-confidence attempt.
    fn give_up(&self, state: &mut DpiFlowState) -> Option<ProtocolTriple>;

    fn protocol_name(&self, id: ProtocolId) -> &'static str;
}

/// Reference `DpiEngine`: recognizes a handful of common application
/// protocols from a cleartext signature or a well-known destination port,
/// without depending on a vendored DPI library. Swapping in a production
/// backend is a drop-in replacement (see SPEC_FULL.md §2.1).
#[derive(Default)]
pub struct HeuristicDpiEngine;

const PROTO_UNKNOWN: u16 = 0;
const PROTO_HTTP: u16 = 1;
const PROTO_TLS: u16 = 2;
const PROTO_DNS: u16 = 3;
const PROTO_SSH: u16 = 4;
const PROTO_FTP: u16 = 5;
const PROTO_SMTP: u16 = 6;

const CATEGORY_WEB: u16 = 1;
const CATEGORY_NETWORK: u16 = 2;
const CATEGORY_MAIL: u16 = 3;

impl HeuristicDpiEngine {
    fn sniff_content(l3: &[u8]) -> Option<ProtocolTriple> {
        if contains(l3, b"HTTP/1.")
            || starts_with_any(l3, &[b"GET ", b"POST ", b"HEAD ", b"PUT ", b"DELETE "])
        {
            return Some(ProtocolTriple {
                master_protocol: ProtocolId(PROTO_HTTP),
                app_protocol: ProtocolId(PROTO_HTTP),
                category: ProtocolId(CATEGORY_WEB),
            });
        }
        if contains_tls_client_hello(l3) {
            return Some(ProtocolTriple {
                master_protocol: ProtocolId(PROTO_TLS),
                app_protocol: ProtocolId::UNKNOWN,
                category: ProtocolId(CATEGORY_WEB),
            });
        }
        if starts_with_any(l3, &[b"SSH-"]) {
            return Some(ProtocolTriple {
                master_protocol: ProtocolId(PROTO_SSH),
                app_protocol: ProtocolId(PROTO_SSH),
                category: ProtocolId(CATEGORY_NETWORK),
            });
        }
        if starts_with_any(l3, &[b"220 ", b"USER ", b"PASS "]) {
            return Some(ProtocolTriple {
                master_protocol: ProtocolId(PROTO_FTP),
                app_protocol: ProtocolId(PROTO_FTP),
                category: ProtocolId(CATEGORY_NETWORK),
            });
        }
        if starts_with_any(l3, &[b"HELO ", b"EHLO ", b"MAIL FROM"]) {
            return Some(ProtocolTriple {
                master_protocol: ProtocolId(PROTO_SMTP),
                app_protocol: ProtocolId(PROTO_SMTP),
                category: ProtocolId(CATEGORY_MAIL),
            });
        }
        None
    }

    fn guess_from_port(l4_protocol: u8, port: u16) -> Option<ProtocolTriple> {
        const UDP: u8 = 17;
        let (master, category) = match (l4_protocol, port) {
            (_, 80) | (_, 8080) => (PROTO_HTTP, CATEGORY_WEB),
            (_, 443) => (PROTO_TLS, CATEGORY_WEB),
            (UDP, 53) => (PROTO_DNS, CATEGORY_NETWORK),
            (_, 22) => (PROTO_SSH, CATEGORY_NETWORK),
            (_, 21) => (PROTO_FTP, CATEGORY_NETWORK),
            (_, 25) => (PROTO_SMTP, CATEGORY_MAIL),
            _ => return None,
        };
        Some(ProtocolTriple {
            master_protocol: ProtocolId(master),
            app_protocol: ProtocolId::UNKNOWN,
            category: ProtocolId(category),
        })
    }
}

impl DpiEngine for HeuristicDpiEngine {
    fn init(&self, l4_protocol: u8, dst_port: u16) -> DpiFlowState {
        DpiFlowState {
            hint_l4_protocol: l4_protocol,
            hint_port: dst_port,
            ..Default::default()
        }
    }

    fn process_packet(
        &self,
        state: &mut DpiFlowState,
        l3: &[u8],
        _time_ms: u64,
        src_is_initiator: bool,
    ) -> DpiResult {
        state.bump_processed();
        if src_is_initiator {
            state.endpoint_src.bytes_seen += l3.len() as u64;
        } else {
            state.endpoint_dst.bytes_seen += l3.len() as u64;
        }

        if state.detected.is_none() {
            state.detected = Self::sniff_content(l3);
        }

        match state.detected {
            Some(triple) => DpiResult {
                protocol: triple,
                is_detection: true,
            },
            None => DpiResult {
                protocol: ProtocolTriple::UNKNOWN,
                is_detection: false,
            },
        }
    }

    fn give_up(&self, state: &mut DpiFlowState) -> Option<ProtocolTriple> {
        Self::guess_from_port(state.hint_l4_protocol, state.hint_port)
    }

    fn protocol_name(&self, id: ProtocolId) -> &'static str {
        match id.0 {
            PROTO_UNKNOWN => "Unknown",
            PROTO_HTTP => "HTTP",
            PROTO_TLS => "TLS",
            PROTO_DNS => "DNS",
            PROTO_SSH => "SSH",
            PROTO_FTP => "FTP",
            PROTO_SMTP => "SMTP",
            _ => "Unknown",
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len().max(1)).any(|w| w == needle)
}

fn starts_with_any(haystack: &[u8], needles: &[&[u8]]) -> bool {
    needles.iter().any(|n| haystack.starts_with(n))
}

/// Very loose TLS ClientHello sniff: handshake record type (0x16), version
/// major byte 0x03, handshake message type ClientHello (0x01) a few bytes
/// in. Good enough to drive the lifecycle in a mock engine; a real DPI
/// engine would parse the full record layer.
fn contains_tls_client_hello(l3: &[u8]) -> bool {
    l3.windows(6)
        .any(|w| w[0] == 0x16 && w[1] == 0x03 && w[5] == 0x01)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_http_request_line() {
        let engine = HeuristicDpiEngine;
        let mut state = engine.init(6, 80);
        let result = engine.process_packet(&mut state, b"GET / HTTP/1.1\r\n", 0, true);
        assert!(result.is_detection);
        assert_eq!(result.protocol.master_protocol, ProtocolId(PROTO_HTTP));
    }

    #[test]
    fn give_up_falls_back_to_port_hint() {
        let engine = HeuristicDpiEngine;
        let mut state = engine.init(17, 53);
        let guess = engine.give_up(&mut state);
        assert_eq!(guess.unwrap().master_protocol, ProtocolId(PROTO_DNS));
    }

    #[test]
    fn processed_packet_counter_saturates() {
        let engine = HeuristicDpiEngine;
        let mut state = engine.init(6, 443);
        for _ in 0..300 {
            engine.process_packet(&mut state, b"\x00", 0, true);
        }
        assert_eq!(state.processed_packets(), 0xFF);
    }
}
