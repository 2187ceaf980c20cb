use tracing::{error, info, info_span, trace, Instrument};

use super::{
    error::Error,
    transport::Transport,
    wire::{Frame, RecordFrame, END_OF_STREAM},
};
use crate::pipeline::{hex::HexDisplayExt, model::InputRecord, WorkerOutcome};

/// Outbound sender worker. Streams one record frame per input record, in
/// input order, then the end-of-stream sentinel.
///
/// Frames already handed to the transport are not retracted if a later send
/// fails.
pub async fn run<T: Transport + ?Sized>(records: &[InputRecord], transport: &T) -> WorkerOutcome {
    let span = info_span!("sender", records = records.len());
    async move {
        match send_all(records, transport).await {
            Ok(sent) => {
                info!(sent, "record stream finished");
                WorkerOutcome::Completed { processed: sent }
            }
            Err(e) => {
                error!(error = %e, "sender aborted");
                WorkerOutcome::failed(e)
            }
        }
    }
    .instrument(span)
    .await
}

async fn send_all<T: Transport + ?Sized>(
    records: &[InputRecord],
    transport: &T,
) -> Result<usize, Error> {
    let mut sink = transport.open_outbound().await?;

    for record in records {
        let frame = RecordFrame::from(record).encode();
        trace!(id = record.id, frame = %frame.hex(), "sending record");
        sink.send(frame).await?;
    }

    sink.send(END_OF_STREAM.to_vec()).await?;
    trace!("sent end of stream");
    sink.close().await?;
    Ok(records.len())
}
