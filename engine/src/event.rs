use serde_json::{json, Value};

use crate::dpi::DpiEngine;
use crate::flow::{FlowRecord, L3Type};
use crate::parser::{IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP};

/// The six event kinds spec.md §6 names, in wire-string order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEventKind {
    New,
    End,
    Idle,
    Guessed,
    Detected,
    NotDetected,
}

impl FlowEventKind {
    fn wire_name(self) -> &'static str {
        match self {
            FlowEventKind::New => "new",
            FlowEventKind::End => "end",
            FlowEventKind::Idle => "idle",
            FlowEventKind::Guessed => "guessed",
            FlowEventKind::Detected => "detected",
            FlowEventKind::NotDetected => "not-detected",
        }
    }
}

fn l3_proto_name(l3_type: L3Type) -> &'static str {
    match l3_type {
        L3Type::Ipv4 => "ip4",
        L3Type::Ipv6 => "ip6",
    }
}

fn l4_proto_value(protocol: u8) -> Value {
    match protocol {
        IPPROTO_TCP => Value::String("tcp".to_string()),
        IPPROTO_UDP => Value::String("udp".to_string()),
        IPPROTO_ICMP => Value::String("icmp".to_string()),
        IPPROTO_ICMPV6 => Value::String("icmp6".to_string()),
        other => Value::String(other.to_string()),
    }
}

/// Builds the flat JSON object the sink writes for one flow event
/// (spec.md §6). `src_ip`/`dest_ip` use `IpAddr`'s own `Display`, which
/// already compresses zero runs in IPv6 addresses the way spec.md's
/// `:0: -> ::` substitution does in the original text protocol. Ports are
/// omitted entirely when zero (non-TCP/UDP traffic, or protocols that never
/// carry one).
pub fn build_event(kind: FlowEventKind, flow: &FlowRecord, dpi: &dyn DpiEngine, packets_captured: u64) -> Value {
    let mut obj = json!({
        "flow_event": kind.wire_name(),
        "flow_id": flow.flow_id,
        "flow_l4_data_len": flow.total_l4_data_len,
        "flow_min_l4_data_len": if flow.packets_processed == 0 { 0 } else { flow.min_l4_data_len },
        "flow_max_l4_data_len": flow.max_l4_data_len,
        "flow_avg_l4_data_len": flow.avg_l4_data_len(),
        "packet_id": packets_captured,
        "midstream": flow.is_midstream_flow,
        "l3_proto": l3_proto_name(flow.l3_type),
        "src_ip": flow.src_addr.to_string(),
        "dest_ip": flow.dst_addr.to_string(),
        "l4_proto": l4_proto_value(flow.l4_protocol),
    });

    let map = obj.as_object_mut().unwrap();
    if flow.src_port != 0 {
        map.insert("src_port".to_string(), json!(flow.src_port));
    }
    if flow.dst_port != 0 {
        map.insert("dst_port".to_string(), json!(flow.dst_port));
    }

    match kind {
        FlowEventKind::Detected => {
            let triple = flow.detected_l7_protocol;
            map.insert(
                "detected_l7_protocol".to_string(),
                json!(dpi.protocol_name(triple.app_protocol)),
            );
            map.insert(
                "detected_l7_master_protocol".to_string(),
                json!(dpi.protocol_name(triple.master_protocol)),
            );
        }
        FlowEventKind::Guessed => {
            if let Some(triple) = flow.guessed_protocol {
                map.insert(
                    "guessed_l7_protocol".to_string(),
                    json!(dpi.protocol_name(triple.master_protocol)),
                );
            }
        }
        _ => {}
    }

    obj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dpi::{DpiFlowState, HeuristicDpiEngine};
    use crate::flow::TcpFlags;
    use std::net::IpAddr;

    fn sample_flow() -> FlowRecord {
        FlowRecord {
            flow_id: 7,
            l3_type: L3Type::Ipv4,
            src_addr: "10.0.0.1".parse::<IpAddr>().unwrap(),
            dst_addr: "10.0.0.2".parse::<IpAddr>().unwrap(),
            l4_protocol: IPPROTO_UDP,
            src_port: 1000,
            dst_port: 53,
            hashval: 0,
            first_seen: 0,
            last_seen: 0,
            packets_processed: 1,
            total_l4_data_len: 40,
            min_l4_data_len: 40,
            max_l4_data_len: 40,
            is_midstream_flow: false,
            flow_fin_ack_seen: false,
            flow_ack_seen: false,
            detection_completed: false,
            dpi_state: DpiFlowState::default(),
            detected_l7_protocol: Default::default(),
            guessed_protocol: None,
        }
    }

    #[test]
    fn new_event_matches_concrete_scenario_fields() {
        let flow = sample_flow();
        let dpi = HeuristicDpiEngine;
        let event = build_event(FlowEventKind::New, &flow, &dpi, 3);
        assert_eq!(event["flow_event"], "new");
        assert_eq!(event["flow_l4_data_len"], 40);
        assert_eq!(event["flow_avg_l4_data_len"], 40);
        assert_eq!(event["packet_id"], 3);
        assert_eq!(event["src_port"], 1000);
        assert_eq!(event["dst_port"], 53);
        assert_eq!(event["l4_proto"], "udp");
        assert_eq!(event["l3_proto"], "ip4");
    }

    #[test]
    fn zero_ports_are_omitted() {
        let mut flow = sample_flow();
        flow.l4_protocol = IPPROTO_ICMP;
        flow.src_port = 0;
        flow.dst_port = 0;
        let dpi = HeuristicDpiEngine;
        let event = build_event(FlowEventKind::End, &flow, &dpi, 1);
        assert!(event.get("src_port").is_none());
        assert!(event.get("dst_port").is_none());
        assert_eq!(event["l4_proto"], "icmp");
    }

    #[test]
    fn ipv6_address_prints_compressed() {
        let mut flow = sample_flow();
        flow.l3_type = L3Type::Ipv6;
        flow.src_addr = "2001:db8:0:0:0:0:0:1".parse().unwrap();
        let dpi = HeuristicDpiEngine;
        let event = build_event(FlowEventKind::New, &flow, &dpi, 1);
        assert_eq!(event["src_ip"], "2001:db8::1");
        assert_eq!(event["l3_proto"], "ip6");
    }

    #[test]
    fn unused_tcp_flags_field_compiles() {
        let _ = TcpFlags::default();
    }
}
