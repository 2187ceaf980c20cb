use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    error::Error,
    transport::{FrameSink, FrameSource, Transport},
};

/// In-process transport over unbounded channels. Message boundaries are
/// kept, like the ZeroMQ transport, so the same framing rules apply.
pub struct MemoryTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

/// Two transports wired back to back: whatever one side sends arrives on
/// the other side's inbound channel.
pub fn link() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport::new(a_tx, a_rx),
        MemoryTransport::new(b_tx, b_rx),
    )
}

impl MemoryTransport {
    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            outbound: Mutex::new(Some(tx)),
            inbound: Mutex::new(Some(rx)),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open_outbound(&self) -> Result<Box<dyn FrameSink>, Error> {
        let tx = self.outbound.lock().take().ok_or(Error::AlreadyOpen("outbound"))?;
        Ok(Box::new(MemorySink { tx: Some(tx) }))
    }

    async fn bind_inbound(&self) -> Result<Box<dyn FrameSource>, Error> {
        let rx = self.inbound.lock().take().ok_or(Error::AlreadyOpen("inbound"))?;
        Ok(Box::new(MemorySource { rx }))
    }
}

struct MemorySink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error> {
        let tx = self.tx.as_ref().ok_or(Error::ChannelClosed)?;
        tx.send(frame).map_err(|_| Error::ChannelClosed)
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.tx.take();
        Ok(())
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Vec<u8>, Error> {
        self.rx.recv().await.ok_or(Error::ChannelClosed)
    }
}
