use crate::dpi::DpiEngine;
use crate::event::{build_event, FlowEventKind};
use crate::flow_table::FlowTable;
use crate::sink::Sink;

/// Minimum gap between idle scans, driven off the worker's packet-timestamp
/// clock rather than a wall-clock timer (spec.md §4.5).
pub const IDLE_SCAN_PERIOD_MS: u64 = 10_000;

/// Upper bound on flows evicted per scan, to keep one scan from stalling
/// packet processing on a worker with many stale flows.
pub const MAX_IDLE_FLOWS_PER_THREAD: usize = 64;

/// Stages idle-qualifying flows, then drains the staging list LIFO,
/// removing each flow and emitting its `idle` event (spec.md §4.5). The
/// caller is responsible for deciding *when* to call this (comparing the
/// worker's `last_time` against `last_idle_scan_time` plus
/// [`IDLE_SCAN_PERIOD_MS`]) and for updating that cursor afterward.
pub fn run_idle_scan(
    table: &mut FlowTable,
    now_ms: u64,
    max_idle_time_ms: u64,
    dpi: &dyn DpiEngine,
    sink: &mut Sink,
    packets_captured: u64,
) -> usize {
    let mut staged = table.idle_candidates(now_ms, max_idle_time_ms, MAX_IDLE_FLOWS_PER_THREAD);
    let mut idled = 0;
    while let Some(key) = staged.pop() {
        if let Some(record) = table.remove(&key) {
            let event = build_event(FlowEventKind::Idle, &record, dpi, packets_captured);
            sink.send(&event);
            idled += 1;
        }
    }
    idled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SharedContext;
    use crate::dpi::HeuristicDpiEngine;
    use crate::flow::L3Type;
    use crate::flow_key::{compute_hashval, FlowKey};
    use std::net::IpAddr;

    fn key(src: &str, dst: &str, sp: u16, dp: u16) -> FlowKey {
        let src_addr: IpAddr = src.parse().unwrap();
        let dst_addr: IpAddr = dst.parse().unwrap();
        FlowKey {
            hashval: compute_hashval(17, src_addr, dst_addr, sp, dp),
            l4_protocol: 17,
            l3_type: L3Type::Ipv4,
            src_addr,
            dst_addr,
            src_port: sp,
            dst_port: dp,
        }
    }

    #[test]
    fn idle_scan_evicts_stale_flow_and_emits_event() {
        let mut table = FlowTable::new(8);
        let dpi = HeuristicDpiEngine;
        let ctx = SharedContext::new();
        table.lookup_or_insert(key("10.0.0.1", "10.0.0.2", 1000, 53), 0, &dpi, &ctx);
        assert_eq!(table.active_flows(), 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idle.sock");
        let mut sink = Sink::new(path.to_str().unwrap());

        let idled = run_idle_scan(&mut table, 1_000_000, 30_000, &dpi, &mut sink, 1);
        assert_eq!(idled, 1);
        assert_eq!(table.active_flows(), 0);
    }

    #[test]
    fn idle_scan_leaves_fresh_flows_alone() {
        let mut table = FlowTable::new(8);
        let dpi = HeuristicDpiEngine;
        let ctx = SharedContext::new();
        table.lookup_or_insert(key("10.0.0.1", "10.0.0.2", 1000, 53), 1_000, &dpi, &ctx);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("idle2.sock");
        let mut sink = Sink::new(path.to_str().unwrap());

        let idled = run_idle_scan(&mut table, 1_500, 30_000, &dpi, &mut sink, 1);
        assert_eq!(idled, 0);
        assert_eq!(table.active_flows(), 1);
    }
}
