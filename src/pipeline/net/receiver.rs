use std::time::Duration;

use tracing::{debug, error, info, info_span, trace, Instrument};

use super::{
    error::Error,
    transport::{FrameSource, Transport},
    wire::{classify, Inbound, ResultFrame},
};
use crate::pipeline::{hex::HexDisplayExt, store::RecordStore, WorkerOutcome};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Tally {
    applied: usize,
    unknown: usize,
    malformed: usize,
}

/// Inbound receiver worker. Applies stability results to the store until the
/// pool's end-of-stream sentinel arrives.
///
/// The number of results is never known up front; only the sentinel ends
/// the loop. With a `timeout`, waiting longer than that for any one frame
/// aborts the worker.
pub async fn run<T: Transport + ?Sized>(
    store: &RecordStore,
    transport: &T,
    timeout: Option<Duration>,
) -> WorkerOutcome {
    let span = info_span!("receiver");
    async move {
        match receive_all(store, transport, timeout).await {
            Ok(tally) => {
                info!(
                    applied = tally.applied,
                    unknown = tally.unknown,
                    malformed = tally.malformed,
                    "result stream finished"
                );
                WorkerOutcome::Completed {
                    processed: tally.applied,
                }
            }
            Err(e) => {
                error!(error = %e, "receiver aborted");
                WorkerOutcome::failed(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn receive_all<T: Transport + ?Sized>(
    store: &RecordStore,
    transport: &T,
    timeout: Option<Duration>,
) -> Result<Tally, Error> {
    let mut source = transport.bind_inbound().await?;
    let mut tally = Tally::default();

    loop {
        let buf = match next_frame(source.as_mut(), timeout).await {
            Ok(buf) => buf,
            Err(e) if e.is_retryable() => {
                debug!(error = %e, "spurious read, waiting again");
                continue;
            }
            Err(e) => return Err(e),
        };

        match classify::<ResultFrame>(&buf) {
            Inbound::Data(ResultFrame { id, stability }) => {
                trace!(id, stability, "result");
                if store.apply_stability(id, stability) {
                    tally.applied += 1;
                } else {
                    tally.unknown += 1;
                }
            }
            Inbound::EndOfStream => {
                trace!("end of stream");
                return Ok(tally);
            }
            Inbound::Malformed(len) => {
                debug!(len, frame = %buf.hex(), "dropping malformed frame");
                tally.malformed += 1;
            }
        }
    }
}

async fn next_frame(
    source: &mut dyn FrameSource,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, Error> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, source.recv())
            .await
            .map_err(|_| Error::TimedOut(limit))?,
        None => source.recv().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{
        model::InputRecord,
        net::{
            memory::link,
            wire::{Frame, END_OF_STREAM},
        },
    };

    fn store(ids: &[i32]) -> RecordStore {
        let records: Vec<_> = ids
            .iter()
            .map(|&id| InputRecord {
                id,
                location: "Kaunas".into(),
                uptime: 10,
                load: 0.5,
            })
            .collect();
        RecordStore::from_records(&records)
    }

    fn result(id: i32, stability: f32) -> Vec<u8> {
        ResultFrame { id, stability }.encode()
    }

    #[tokio::test]
    async fn applies_results_until_sentinel() {
        let store = store(&[1, 2, 3]);
        let (ours, pool) = link();
        let mut sink = pool.open_outbound().await.unwrap();
        sink.send(result(2, 61.5)).await.unwrap();
        sink.send(result(1, 99.0)).await.unwrap();
        sink.send(END_OF_STREAM.to_vec()).await.unwrap();
        // anything after the sentinel is never read
        sink.send(result(3, 70.0)).await.unwrap();

        let outcome = run(&store, &ours, None).await;

        assert_eq!(outcome, WorkerOutcome::Completed { processed: 2 });
        assert_eq!(store.get(2).unwrap().stability, 61.5);
        assert!(store.get(1).unwrap().passed_external);
        assert!(!store.get(3).unwrap().passed_external);
    }

    #[tokio::test]
    async fn unknown_ids_leave_store_unchanged() {
        let store = store(&[1]);
        let before = store.snapshot();
        let (ours, pool) = link();
        let mut sink = pool.open_outbound().await.unwrap();
        sink.send(result(404, 88.0)).await.unwrap();
        sink.send(END_OF_STREAM.to_vec()).await.unwrap();

        let outcome = run(&store, &ours, None).await;

        assert_eq!(outcome, WorkerOutcome::Completed { processed: 0 });
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let store = store(&[7]);
        let (ours, pool) = link();
        let mut sink = pool.open_outbound().await.unwrap();
        sink.send(vec![0xff, 0xff]).await.unwrap();
        sink.send(vec![0u8; 12]).await.unwrap();
        sink.send(Vec::new()).await.unwrap();
        sink.send(result(7, 55.0)).await.unwrap();
        sink.send(END_OF_STREAM.to_vec()).await.unwrap();

        let outcome = run(&store, &ours, None).await;

        assert_eq!(outcome, WorkerOutcome::Completed { processed: 1 });
        assert_eq!(store.get(7).unwrap().stability, 55.0);
    }

    #[tokio::test]
    async fn immediate_sentinel_ends_promptly() {
        let store = store(&[1, 2]);
        let (ours, pool) = link();
        let mut sink = pool.open_outbound().await.unwrap();
        sink.send(END_OF_STREAM.to_vec()).await.unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            run(&store, &ours, None),
        )
        .await
        .expect("receiver hung on an empty stream");

        assert_eq!(outcome, WorkerOutcome::Completed { processed: 0 });
        assert!(store.snapshot().iter().all(|row| !row.passed_external));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let store = store(&[1]);
        let (ours, pool) = link();
        let _sink = pool.open_outbound().await.unwrap();

        let outcome = run(&store, &ours, Some(Duration::from_millis(20))).await;

        assert_eq!(
            outcome,
            WorkerOutcome::failed(Error::TimedOut(Duration::from_millis(20)))
        );
    }

    #[tokio::test]
    async fn peer_closing_without_sentinel_fails() {
        let store = store(&[1]);
        let (ours, pool) = link();
        let mut sink = pool.open_outbound().await.unwrap();
        sink.send(result(1, 51.0)).await.unwrap();
        sink.close().await.unwrap();

        let outcome = run(&store, &ours, None).await;

        assert!(matches!(outcome, WorkerOutcome::Failed { .. }));
        // results that did arrive stay applied
        assert!(store.get(1).unwrap().passed_external);
    }
}
