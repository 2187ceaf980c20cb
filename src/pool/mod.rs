// A worker pool that answers the pipeline's record stream with stability
// results. Records are read off the inbound channel and queued for a fixed
// set of blocking workers; every passing result goes to a single forwarder
// that owns the outbound channel. The forwarder sends the closing sentinel
// only once every worker has drained the queue, so the pipeline's receiver
// never sees a result after end of stream.
use std::{
    sync::{mpsc, Arc},
    thread,
};

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc as async_mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument};
use typed_builder::TypedBuilder;

use crate::pipeline::{
    config::{ConnectRetry, DEFAULT_PULL_ADDR, DEFAULT_PUSH_ADDR},
    hex::HexDisplayExt,
    net::{
        classify, Error, Frame, Inbound, RecordFrame, ResultFrame, Transport, ZmqTransport,
        END_OF_STREAM,
    },
};

pub mod stability;

pub use stability::{stability, STABILITY_ITERATIONS, STABILITY_THRESHOLD};

/// Number of blocking workers to run: all CPUs but one, or half of them.
/// Never less than one.
pub fn default_workers(half_cpu: bool) -> usize {
    let cpus = thread::available_parallelism().map_or(1, |n| n.get());
    if half_cpu {
        (cpus / 2).max(1)
    } else {
        cpus.saturating_sub(1).max(1)
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PoolConfig {
    #[builder(default = default_workers(false))]
    pub workers: usize,
    #[builder(default = STABILITY_ITERATIONS)]
    pub iterations: u32,
    #[builder(default = STABILITY_THRESHOLD)]
    pub threshold: f64,
    /// Bound for incoming record frames. The pipeline pushes here.
    #[builder(default = DEFAULT_PUSH_ADDR.to_string(), setter(into))]
    pub inbound: String,
    /// Where result frames are pushed. The pipeline binds here.
    #[builder(default = DEFAULT_PULL_ADDR.to_string(), setter(into))]
    pub outbound: String,
    #[builder(default)]
    pub connect: ConnectRetry,
}

impl PoolConfig {
    pub fn transport(&self) -> ZmqTransport {
        ZmqTransport::new(&self.outbound, &self.inbound, self.connect.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub received: usize,
    pub processed: usize,
    pub sent: usize,
}

/// Serves one record stream: receives until the pipeline's sentinel, scores
/// every record and pushes the passing results, then closes the result
/// stream with its own sentinel.
pub async fn serve<T: Transport + ?Sized>(
    config: &PoolConfig,
    transport: &T,
) -> Result<PoolStats, Error> {
    let workers = config.workers.max(1);
    let span = info_span!("pool", workers);
    async move {
        let mut source = transport.bind_inbound().await?;
        let (task_tx, task_rx) = mpsc::channel::<RecordFrame>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, result_rx) = async_mpsc::unbounded_channel();

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let tasks = task_rx.clone();
                let results = result_tx.clone();
                let (iterations, threshold) = (config.iterations, config.threshold);
                tokio::task::spawn_blocking(move || {
                    work(worker, &tasks, &results, iterations, threshold)
                })
            })
            .collect();
        drop(result_tx);

        let intake = async move {
            let mut received = 0;
            loop {
                let buf = match source.recv().await {
                    Ok(buf) => buf,
                    Err(e) if e.is_retryable() => continue,
                    Err(e) => return Err(e),
                };
                match classify::<RecordFrame>(&buf) {
                    Inbound::Data(frame) => {
                        trace!(id = frame.id, "queued record");
                        if task_tx.send(frame).is_err() {
                            // all workers are gone; nothing left to score
                            warn!("task queue closed early");
                            break;
                        }
                        received += 1;
                    }
                    Inbound::EndOfStream => break,
                    Inbound::Malformed(len) => {
                        debug!(len, frame = %buf.hex(), "dropping malformed frame");
                    }
                }
            }
            drop(task_tx);
            info!(received, "record stream finished");
            Ok(received)
        };

        let (received, sent) = tokio::try_join!(intake, forward(transport, result_rx))?;

        let mut processed = 0;
        for joined in join_all(handles).await {
            match joined {
                Ok(count) => processed += count,
                Err(e) => warn!(error = %e, "stability worker panicked"),
            }
        }

        let stats = PoolStats {
            received,
            processed,
            sent,
        };
        info!(?stats, "pool finished");
        Ok(stats)
    }
    .instrument(span)
    .await
}

fn work(
    worker: usize,
    tasks: &Mutex<mpsc::Receiver<RecordFrame>>,
    results: &async_mpsc::UnboundedSender<ResultFrame>,
    iterations: u32,
    threshold: f64,
) -> usize {
    let mut processed = 0;
    let mut accepted = 0;

    loop {
        // the lock is released before the record is scored
        let task = tasks.lock().recv();
        let Ok(RecordFrame { id, load, uptime }) = task else {
            break;
        };

        let score = stability(id, load, uptime, iterations);
        processed += 1;
        if score >= threshold {
            let frame = ResultFrame {
                id,
                stability: score as f32,
            };
            if results.send(frame).is_err() {
                break;
            }
            accepted += 1;
        }
    }

    debug!(worker, processed, accepted, "stability worker done");
    processed
}

/// Pushes results as they come in. Ends with the sentinel once every worker
/// has dropped its result sender.
async fn forward<T: Transport + ?Sized>(
    transport: &T,
    mut results: async_mpsc::UnboundedReceiver<ResultFrame>,
) -> Result<usize, Error> {
    let mut sink = transport.open_outbound().await?;
    let mut sent = 0;

    while let Some(result) = results.recv().await {
        sink.send(result.encode()).await?;
        sent += 1;
    }

    sink.send(END_OF_STREAM.to_vec()).await?;
    sink.close().await?;
    Ok(sent)
}
