use std::net::IpAddr;

use crate::dpi::{DpiFlowState, ProtocolTriple};

/// `L3_IP` / `L3_IP6` in spec.md §3, kept as an explicit field rather than
/// inferred from the address enum so the comparator and the serializer can
/// both reject mixed-family lookups unconditionally (spec.md §9's fix for
/// the source's `ip_tuples_equal` cross-family aliasing bug).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum L3Type {
    Ipv4,
    Ipv6,
}

/// TCP flag subset the parser extracts (spec.md §4.1): enough to derive
/// midstream/FIN-ACK/ACK bookkeeping, nothing about sequence numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpFlags {
    pub syn: bool,
    pub fin: bool,
    pub ack: bool,
}

/// One flow record: the unit of state owned exclusively by the worker that
/// created it. See spec.md §3 for the field-by-field contract and
/// invariants.
pub struct FlowRecord {
    pub flow_id: u64,

    pub l3_type: L3Type,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub l4_protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    pub hashval: u64,

    pub first_seen: u64,
    pub last_seen: u64,

    pub packets_processed: u64,
    pub total_l4_data_len: u64,
    pub min_l4_data_len: u32,
    pub max_l4_data_len: u32,

    pub is_midstream_flow: bool,
    pub flow_fin_ack_seen: bool,
    pub flow_ack_seen: bool,
    pub detection_completed: bool,

    pub dpi_state: DpiFlowState,
    pub detected_l7_protocol: ProtocolTriple,
    pub guessed_protocol: Option<ProtocolTriple>,
}

impl FlowRecord {
    /// `flow_avg_l4_data_len` in the wire format: total over packets
    /// processed, or zero when no packet has been processed yet.
    pub fn avg_l4_data_len(&self) -> u64 {
        if self.packets_processed == 0 {
            0
        } else {
            self.total_l4_data_len / self.packets_processed
        }
    }

    /// A flow qualifies for idle eviction once the TCP close handshake has
    /// been observed in both directions, or once it has gone quiet for
    /// longer than `max_idle_time_ms` relative to the worker's clock.
    pub fn is_idle(&self, worker_last_time: u64, max_idle_time_ms: u64) -> bool {
        (self.flow_fin_ack_seen && self.flow_ack_seen)
            || self.last_seen + max_idle_time_ms < worker_last_time
    }
}
