//! Flow classification engine: packet decode, shard dispatch, flow-table
//! lifecycle, DPI driving, idle eviction and JSON event emission. Built
//! around [`flowsentry_capture::Source`], which supplies the raw frames.

pub mod context;
pub mod dpi;
pub mod event;
pub mod flow;
pub mod flow_key;
pub mod flow_table;
pub mod idle;
pub mod parser;
pub mod shard;
pub mod sink;
pub mod worker;

pub use context::SharedContext;
pub use dpi::{DpiEngine, HeuristicDpiEngine};
pub use event::{build_event, FlowEventKind};
pub use flow::{FlowRecord, L3Type, TcpFlags};
pub use flow_key::{compute_hashval, FlowKey};
pub use flow_table::{FlowTable, LookupOutcome};
pub use shard::shard_index;
pub use sink::Sink;
pub use worker::{Worker, WorkerConfig, WorkerStats, MAX_IDLE_TIME_MS};
