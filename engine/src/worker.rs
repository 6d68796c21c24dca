use flowsentry_capture::{LinkType, ReadOutcome, Source};

use crate::context::SharedContext;
use crate::dpi::DpiEngine;
use crate::event::{build_event, FlowEventKind};
use crate::flow_table::{FlowTable, LookupOutcome};
use crate::flow_key::{compute_hashval, FlowKey};
use crate::idle::{run_idle_scan, IDLE_SCAN_PERIOD_MS};
use crate::parser::{self, ParseError};
use crate::shard::shard_index;
use crate::sink::Sink;

/// How long a flow may sit without traffic before the idle scanner
/// considers it stale (spec.md §4.5). Not exposed on the CLI; the source
/// system hardcodes an equivalent constant rather than making it
/// configurable.
pub const MAX_IDLE_TIME_MS: u64 = 300_000;

/// Cumulative, per-worker counters surfaced in the shutdown summary
/// (SPEC_FULL.md §2.6).
#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerStats {
    pub packets_captured: u64,
    pub packets_processed: u64,
    pub detected_flow_protocols: u64,
    pub capacity_drops: u64,
    pub decode_drops: u64,
    pub total_active_flows: u64,
    pub total_idle_flows: u64,
    pub total_l4_data_len: u64,
}

pub struct WorkerConfig {
    pub worker_index: usize,
    pub num_workers: usize,
    pub max_active_flows: usize,
}

/// One capture-to-sink pipeline: owns its [`Source`], [`FlowTable`] and
/// [`Sink`] outright; only [`SharedContext`] is shared with sibling
/// workers (spec.md §5).
pub struct Worker<'a> {
    config: WorkerConfig,
    source: Source,
    table: FlowTable,
    sink: Sink,
    dpi: &'a dyn DpiEngine,
    ctx: &'a SharedContext,
    stats: WorkerStats,
    last_time: u64,
    last_idle_scan_time: u64,
    error_or_eof: bool,
}

impl<'a> Worker<'a> {
    pub fn new(
        config: WorkerConfig,
        source: Source,
        sink_path: &str,
        dpi: &'a dyn DpiEngine,
        ctx: &'a SharedContext,
    ) -> Self {
        let table = FlowTable::new(config.max_active_flows);
        Worker {
            config,
            source,
            table,
            sink: Sink::new(sink_path),
            dpi,
            ctx,
            stats: WorkerStats::default(),
            last_time: 0,
            last_idle_scan_time: 0,
            error_or_eof: false,
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Drives the packet loop until shutdown is requested or the source is
    /// exhausted. Each live-read timeout just re-checks the shutdown flag
    /// and loops; it never counts as `error_or_eof` (spec.md §4.7).
    pub fn run(&mut self) {
        loop {
            if self.ctx.is_shutting_down() {
                break;
            }

            match self.source.next_record() {
                Ok(ReadOutcome::Packet(record)) => {
                    self.stats.packets_captured += 1;
                    self.last_time = record.time_ms;
                    self.handle_frame(&record.data);
                    self.maybe_run_idle_scan();
                }
                Ok(ReadOutcome::Timeout) => continue,
                Ok(ReadOutcome::Eof) => {
                    self.error_or_eof = true;
                    break;
                }
                Err(e) => {
                    log::warn!("capture read failed: {}", e);
                    self.error_or_eof = true;
                    break;
                }
            }
        }
    }

    fn link_type(&self) -> LinkType {
        self.source.link_type()
    }

    fn handle_frame(&mut self, data: &[u8]) {
        let link_type = self.link_type();
        let parsed = match parser::parse(data, link_type) {
            Ok(parsed) => parsed,
            Err(ParseError::Arp) => return,
            Err(e) => {
                log::warn!(
                    "dropping undecodable packet (captured={}, worker={}): {}",
                    self.stats.packets_captured,
                    self.config.worker_index,
                    e
                );
                self.stats.decode_drops += 1;
                return;
            }
        };

        let idx = shard_index(
            parsed.src_addr,
            parsed.dst_addr,
            parsed.l4_protocol,
            parsed.src_port,
            parsed.dst_port,
            self.config.num_workers,
        );
        if idx != self.config.worker_index {
            return;
        }

        let hashval = compute_hashval(
            parsed.l4_protocol,
            parsed.src_addr,
            parsed.dst_addr,
            parsed.src_port,
            parsed.dst_port,
        );
        let key = FlowKey {
            hashval,
            l4_protocol: parsed.l4_protocol,
            l3_type: parsed.l3_type,
            src_addr: parsed.src_addr,
            dst_addr: parsed.dst_addr,
            src_port: parsed.src_port,
            dst_port: parsed.dst_port,
        };

        self.stats.packets_processed += 1;

        let outcome = self.table.lookup_or_insert(key, self.last_time, self.dpi, self.ctx);
        let (record, is_new, direction_changed) = match outcome {
            LookupOutcome::Found {
                record,
                is_new,
                direction_changed,
            } => (record, is_new, direction_changed),
            LookupOutcome::CapacityExceeded => {
                self.stats.capacity_drops += 1;
                return;
            }
        };

        if is_new {
            if let Some(flags) = parsed.tcp_flags {
                record.is_midstream_flow = !flags.syn;
            } else {
                record.is_midstream_flow = true;
            }
        }

        record.last_seen = self.last_time;
        record.packets_processed += 1;

        if is_new {
            let event = build_event(FlowEventKind::New, record, self.dpi, self.stats.packets_captured);
            self.sink.send(&event);
        }

        if let Some(flags) = parsed.tcp_flags {
            let already_closed = record.flow_fin_ack_seen;
            record.flow_ack_seen = flags.ack;
            if flags.fin && flags.ack && !already_closed {
                record.flow_fin_ack_seen = true;
                let event = build_event(FlowEventKind::End, record, self.dpi, self.stats.packets_captured);
                self.sink.send(&event);
                self.stats.total_active_flows = self.table.active_flows() as u64;
                return;
            }
        }

        record.total_l4_data_len += parsed.l4_len as u64;
        record.min_l4_data_len = record.min_l4_data_len.min(parsed.l4_len);
        record.max_l4_data_len = record.max_l4_data_len.max(parsed.l4_len);
        self.stats.total_l4_data_len += parsed.l4_len as u64;

        if !record.detection_completed {
            let src_is_initiator = !direction_changed;
            let result = self
                .dpi
                .process_packet(&mut record.dpi_state, parsed.l3_buffer, self.last_time, src_is_initiator);

            if result.is_detection {
                record.detection_completed = true;
                record.detected_l7_protocol = result.protocol;
                self.stats.detected_flow_protocols += 1;
                let event = build_event(FlowEventKind::Detected, record, self.dpi, self.stats.packets_captured);
                self.sink.send(&event);
            } else if record.dpi_state.processed_packets() >= 0xFE {
                record.detection_completed = true;
                match self.dpi.give_up(&mut record.dpi_state) {
                    Some(triple) => {
                        record.guessed_protocol = Some(triple);
                        let event = build_event(FlowEventKind::Guessed, record, self.dpi, self.stats.packets_captured);
                        self.sink.send(&event);
                    }
                    None => {
                        let event = build_event(FlowEventKind::NotDetected, record, self.dpi, self.stats.packets_captured);
                        self.sink.send(&event);
                    }
                }
            }
        }

        self.stats.total_active_flows = self.table.active_flows() as u64;
    }

    fn maybe_run_idle_scan(&mut self) {
        if self.last_time < self.last_idle_scan_time + IDLE_SCAN_PERIOD_MS {
            return;
        }
        let idled = run_idle_scan(
            &mut self.table,
            self.last_time,
            MAX_IDLE_TIME_MS,
            self.dpi,
            &mut self.sink,
            self.stats.packets_captured,
        );
        self.stats.total_idle_flows += idled as u64;
        self.last_idle_scan_time = self.last_time;
    }

    pub fn error_or_eof(&self) -> bool {
        self.error_or_eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dpi::HeuristicDpiEngine;
    use std::io::Write;

    fn udp_v4_packet(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut eth = vec![0u8; 14];
        eth[12] = 0x08;
        eth[13] = 0x00;
        let udp_len = 8 + payload.len();
        let total_len = 20 + udp_len;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_len as u16).to_be_bytes());
        ip[9] = 17;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        let mut udp = vec![0u8; 8];
        udp[0..2].copy_from_slice(&src_port.to_be_bytes());
        udp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        let mut out = eth;
        out.extend_from_slice(&ip);
        out.extend_from_slice(&udp);
        out.extend_from_slice(payload);
        out
    }

    fn write_pcap_file(frames: &[Vec<u8>]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // pcap global header: magic, version, zone, sigfigs, snaplen, linktype=ETHERNET(1)
        file.write_all(&0xa1b2c3d4u32.to_le_bytes()).unwrap();
        file.write_all(&2u16.to_le_bytes()).unwrap();
        file.write_all(&4u16.to_le_bytes()).unwrap();
        file.write_all(&0i32.to_le_bytes()).unwrap();
        file.write_all(&0u32.to_le_bytes()).unwrap();
        file.write_all(&65535u32.to_le_bytes()).unwrap();
        file.write_all(&1u32.to_le_bytes()).unwrap();
        for frame in frames {
            file.write_all(&0u32.to_le_bytes()).unwrap();
            file.write_all(&0u32.to_le_bytes()).unwrap();
            file.write_all(&(frame.len() as u32).to_le_bytes()).unwrap();
            file.write_all(&(frame.len() as u32).to_le_bytes()).unwrap();
            file.write_all(frame).unwrap();
        }
        file
    }

    #[test]
    fn single_worker_processes_offline_capture_to_eof() {
        let frame = udp_v4_packet(1000, 53, &vec![0xAB; 40]);
        let file = write_pcap_file(&[frame]);
        let source = Source::open_file(file.path().to_str().unwrap()).unwrap();

        let dpi = HeuristicDpiEngine;
        let ctx = SharedContext::new();
        let dir = tempfile::tempdir().unwrap();
        let sink_path = dir.path().join("flowsentry.sock");

        let config = WorkerConfig {
            worker_index: 0,
            num_workers: 1,
            max_active_flows: 64,
        };
        let mut worker = Worker::new(config, source, sink_path.to_str().unwrap(), &dpi, &ctx);
        worker.run();

        assert!(worker.error_or_eof());
        assert_eq!(worker.stats().packets_captured, 1);
        assert_eq!(worker.stats().packets_processed, 1);
        assert_eq!(worker.stats().decode_drops, 0);
    }
}
