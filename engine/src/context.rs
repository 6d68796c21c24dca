use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// The only state shared across worker threads: a process-global flow-id
/// counter and a shutdown flag. Everything else (flow tables, serializer
/// buffers, sink sockets) is thread-confined to its owning worker.
#[derive(Default)]
pub struct SharedContext {
    next_flow_id: AtomicU64,
    shutdown: AtomicBool,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_flow_id(&self) -> u64 {
        self.next_flow_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
