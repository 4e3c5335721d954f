use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, warn};

use crate::core::variant_builder::{StatusCode, VariantBuilder, VariantBuilderParams};
use crate::core::variant_store::VariantStore;
use crate::core::window::Window;

const DEQUEUE_WAIT: Duration = Duration::from_millis(100);

/// Per-window completion report sent back to the pipeline runner.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub genome_index: usize,
    pub runtime: Duration,
    pub status: StatusCode,
    pub num_variants: usize,
}

/**
 * One worker thread of the pipeline. Owns its own variant builder (graph,
 * collector, aligners, reference reader) and shares only the variant
 * store. Suspends only on the input queue; window processing itself is
 * CPU bound and synchronous.
 */
pub struct AsyncWorker {
    in_queue: Receiver<Window>,
    out_queue: Sender<WorkerResult>,
    store: Arc<VariantStore>,
    params: Arc<VariantBuilderParams>,
    stop_token: Arc<AtomicBool>,
}

impl AsyncWorker {
    pub fn new(
        in_queue: Receiver<Window>,
        out_queue: Sender<WorkerResult>,
        store: Arc<VariantStore>,
        params: Arc<VariantBuilderParams>,
        stop_token: Arc<AtomicBool>,
    ) -> Self {
        Self {
            in_queue,
            out_queue,
            store,
            params,
            stop_token,
        }
    }

    pub fn process(self) {
        let mut builder = match VariantBuilder::new(Arc::clone(&self.params)) {
            Ok(builder) => Some(builder),
            Err(err) => {
                error!("Could not initialize worker variant builder: {err:#}");
                None
            }
        };

        let mut num_done = 0usize;
        loop {
            if self.stop_token.load(Ordering::Relaxed) {
                break;
            }

            let window = match self.in_queue.recv_timeout(DEQUEUE_WAIT) {
                Ok(window) => window,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let started_at = Instant::now();
            let (status, num_variants) = match builder.as_mut() {
                Some(builder) => Self::process_one(builder, &window, &self.store),
                None => (StatusCode::Unknown, 0),
            };

            let result = WorkerResult {
                genome_index: window.genome_index(),
                runtime: started_at.elapsed(),
                status,
                num_variants,
            };

            if self.out_queue.send(result).is_err() {
                break;
            }
            num_done += 1;
        }

        debug!("Quitting AsyncWorker thread after processing {num_done} windows");
    }

    /// Soft failures come back as status codes; anything that escapes as
    /// an error or a panic marks the window UNKNOWN and the pipeline
    /// continues.
    fn process_one(builder: &mut VariantBuilder, window: &Window, store: &VariantStore) -> (StatusCode, usize) {
        let outcome = catch_unwind(AssertUnwindSafe(|| builder.process_window(window)));

        match outcome {
            Ok(Ok(variants)) => {
                let num_variants = variants.len();
                store.add_variants(variants);
                (builder.current_status(), num_variants)
            }
            Ok(Err(err)) => {
                warn!("Window {} failed: {err:#}", window.to_samtools_region());
                (StatusCode::Unknown, 0)
            }
            Err(_) => {
                error!("Window {} panicked during processing", window.to_samtools_region());
                (StatusCode::Unknown, 0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn worker_exits_on_stop_token() {
        let (_in_tx, in_rx) = bounded::<Window>(4);
        let (out_tx, _out_rx) = bounded::<WorkerResult>(4);
        let stop_token = Arc::new(AtomicBool::new(true));

        let worker = AsyncWorker::new(
            in_rx,
            out_tx,
            Arc::new(VariantStore::new()),
            Arc::new(VariantBuilderParams::default()),
            Arc::clone(&stop_token),
        );

        // stop requested before any window: process returns immediately
        worker.process();
    }

    #[test]
    fn worker_exits_when_input_disconnects() {
        let (in_tx, in_rx) = bounded::<Window>(4);
        let (out_tx, _out_rx) = bounded::<WorkerResult>(4);
        drop(in_tx);

        let worker = AsyncWorker::new(
            in_rx,
            out_tx,
            Arc::new(VariantStore::new()),
            Arc::new(VariantBuilderParams::default()),
            Arc::new(AtomicBool::new(false)),
        );
        worker.process();
    }
}
