use std::collections::BTreeMap;

use crate::context::SharedContext;
use crate::dpi::{DpiEngine, ProtocolTriple};
use crate::flow::FlowRecord;
use crate::flow_key::FlowKey;

/// Result of a lookup-or-insert call. Carries a mutable borrow into the
/// table, so it cannot outlive the next mutating call.
pub enum LookupOutcome<'a> {
    Found {
        record: &'a mut FlowRecord,
        is_new: bool,
        /// True when the match came from the reversed-tuple retry
        /// (spec.md §4.3): this packet travels opposite the flow's
        /// canonical direction.
        direction_changed: bool,
    },
    /// `max_active_flows` reached and no existing flow matched; the caller
    /// drops the packet and bumps its capacity-drop counter.
    CapacityExceeded,
}

/// Per-worker flow storage: `max_active_flows` hash buckets, each an
/// ordered tree keyed by [`FlowKey`] (spec.md §3/§9 — the idiomatic
/// replacement for a manual binary tree per bucket).
pub struct FlowTable {
    buckets: Vec<BTreeMap<FlowKey, FlowRecord>>,
    max_active_flows: usize,
    active_flows: usize,
}

impl FlowTable {
    pub fn new(max_active_flows: usize) -> Self {
        assert!(max_active_flows > 0);
        FlowTable {
            buckets: (0..max_active_flows).map(|_| BTreeMap::new()).collect(),
            max_active_flows,
            active_flows: 0,
        }
    }

    pub fn active_flows(&self) -> usize {
        self.active_flows
    }

    fn bucket_index(&self, hashval: u64) -> usize {
        (hashval as usize) % self.buckets.len()
    }

    /// Looks up `key` by exact match first, then by its direction-reversed
    /// form in the same bucket (the two always hash identically, see
    /// [`crate::flow_key::compute_hashval`]); falls through to insertion if
    /// neither is present. Never evicts to make room (spec.md §4.3: no
    /// eviction policy, only outright rejection once full).
    pub fn lookup_or_insert(
        &mut self,
        key: FlowKey,
        now_ms: u64,
        dpi: &dyn DpiEngine,
        ctx: &SharedContext,
    ) -> LookupOutcome<'_> {
        let idx = self.bucket_index(key.hashval);
        let bucket = &mut self.buckets[idx];

        if bucket.contains_key(&key) {
            let record = bucket.get_mut(&key).unwrap();
            return LookupOutcome::Found {
                record,
                is_new: false,
                direction_changed: false,
            };
        }

        let reversed = key.reversed();
        if bucket.contains_key(&reversed) {
            let record = bucket.get_mut(&reversed).unwrap();
            record.dpi_state.swap_endpoints();
            return LookupOutcome::Found {
                record,
                is_new: false,
                direction_changed: true,
            };
        }

        if self.active_flows >= self.max_active_flows {
            return LookupOutcome::CapacityExceeded;
        }

        let flow_id = ctx.alloc_flow_id();
        let record = FlowRecord {
            flow_id,
            l3_type: key.l3_type,
            src_addr: key.src_addr,
            dst_addr: key.dst_addr,
            l4_protocol: key.l4_protocol,
            src_port: key.src_port,
            dst_port: key.dst_port,
            hashval: key.hashval,
            first_seen: now_ms,
            last_seen: now_ms,
            packets_processed: 0,
            total_l4_data_len: 0,
            min_l4_data_len: u32::MAX,
            max_l4_data_len: 0,
            is_midstream_flow: false,
            flow_fin_ack_seen: false,
            flow_ack_seen: false,
            detection_completed: false,
            dpi_state: dpi.init(key.l4_protocol, key.dst_port),
            detected_l7_protocol: ProtocolTriple::UNKNOWN,
            guessed_protocol: None,
        };
        bucket.insert(key, record);
        self.active_flows += 1;

        let record = bucket.get_mut(&key).unwrap();
        LookupOutcome::Found {
            record,
            is_new: true,
            direction_changed: false,
        }
    }

    /// Collects up to `limit` idle-qualifying flow keys (spec.md §4.5,
    /// `MAX_IDLE_FLOWS_PER_THREAD`). Does not remove anything; the caller
    /// drains the returned keys via [`FlowTable::remove`].
    pub fn idle_candidates(&self, now_ms: u64, max_idle_time_ms: u64, limit: usize) -> Vec<FlowKey> {
        let mut out = Vec::with_capacity(limit);
        'outer: for bucket in &self.buckets {
            for (key, record) in bucket {
                if record.is_idle(now_ms, max_idle_time_ms) {
                    out.push(*key);
                    if out.len() >= limit {
                        break 'outer;
                    }
                }
            }
        }
        out
    }

    pub fn remove(&mut self, key: &FlowKey) -> Option<FlowRecord> {
        let idx = self.bucket_index(key.hashval);
        let removed = self.buckets[idx].remove(key);
        if removed.is_some() {
            self.active_flows -= 1;
        }
        removed
    }
}
