mod cli;
mod logging;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{SigSet, Signal};

use flowsentry_capture::Source;
use flowsentry_engine::{HeuristicDpiEngine, SharedContext, Worker, WorkerConfig, WorkerStats};

/// Tree-bucket count per worker (spec.md §3): fixed, not a tunable flag.
const MAX_ACTIVE_FLOWS: usize = 2048;

fn main() {
    let config = cli::Config::parse_or_exit();

    if let Err(e) = logging::init(config.log_stderr) {
        eprintln!("flowsentryd: failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    println!(
        "flowsentryd {} starting on {}",
        env!("CARGO_PKG_VERSION"),
        config.interface
    );

    let num_workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    log::info!(
        "flowsentryd starting: interface={}, collector={}, workers={}",
        config.interface,
        config.collector,
        num_workers
    );

    let mut termination_mask = SigSet::empty();
    termination_mask.add(Signal::SIGINT);
    termination_mask.add(Signal::SIGTERM);
    if let Err(e) = termination_mask.thread_block() {
        eprintln!("flowsentryd: failed to block termination signals: {}", e);
        std::process::exit(1);
    }

    let ctx = Arc::new(SharedContext::new());
    let dpi: Arc<HeuristicDpiEngine> = Arc::new(HeuristicDpiEngine);

    let signal_ctx = Arc::clone(&ctx);
    let signal_thread = thread::spawn(move || loop {
        match termination_mask.wait() {
            Ok(signal) => {
                log::info!("received {:?}, shutting down", signal);
                signal_ctx.request_shutdown();
                break;
            }
            Err(e) => {
                log::error!("sigwait failed: {}", e);
                break;
            }
        }
    });

    let mut handles = Vec::with_capacity(num_workers);
    for worker_index in 0..num_workers {
        let ctx = Arc::clone(&ctx);
        let dpi = Arc::clone(&dpi);
        let interface = config.interface.clone();
        let collector = config.collector.clone();

        handles.push(thread::spawn(move || -> WorkerStats {
            let source = match Source::open(&interface) {
                Ok(source) => source,
                Err(e) => {
                    log::error!("worker {} failed to open {}: {}", worker_index, interface, e);
                    ctx.request_shutdown();
                    return WorkerStats::default();
                }
            };

            let worker_config = WorkerConfig {
                worker_index,
                num_workers,
                max_active_flows: MAX_ACTIVE_FLOWS,
            };
            let mut worker = Worker::new(worker_config, source, &collector, dpi.as_ref(), ctx.as_ref());
            worker.run();
            worker.stats()
        }));
    }

    loop {
        thread::sleep(Duration::from_secs(1));
        if ctx.is_shutting_down() {
            break;
        }
        if handles.iter().all(|h| h.is_finished()) {
            ctx.request_shutdown();
            break;
        }
    }

    let mut totals = WorkerStats::default();
    for handle in handles {
        if let Ok(stats) = handle.join() {
            totals.packets_captured += stats.packets_captured;
            totals.packets_processed += stats.packets_processed;
            totals.detected_flow_protocols += stats.detected_flow_protocols;
            totals.capacity_drops += stats.capacity_drops;
            totals.decode_drops += stats.decode_drops;
            totals.total_active_flows += stats.total_active_flows;
            totals.total_idle_flows += stats.total_idle_flows;
            totals.total_l4_data_len += stats.total_l4_data_len;
        }
    }

    log::info!(
        "flowsentryd shutdown summary: captured={}, processed={}, detected={}, \
         capacity_drops={}, decode_drops={}, active_flows={}, idle_flows={}, l4_data_len={}",
        totals.packets_captured,
        totals.packets_processed,
        totals.detected_flow_protocols,
        totals.capacity_drops,
        totals.decode_drops,
        totals.total_active_flows,
        totals.total_idle_flows,
        totals.total_l4_data_len
    );

    // The signal-waiter thread only ever unblocks by receiving a signal or
    // hitting a sigwait error; if shutdown was triggered by source
    // exhaustion instead, it's left detached rather than joined.
    drop(signal_thread);
}
