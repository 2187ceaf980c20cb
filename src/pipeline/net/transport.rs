use async_trait::async_trait;

use super::error::Error;

/// Outbound half of a message channel. Each call carries exactly one frame;
/// the transport preserves message boundaries.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error>;

    /// Flushes and closes the channel. Frames already sent stay sent.
    async fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// Inbound half of a message channel.
#[async_trait]
pub trait FrameSource: Send {
    async fn recv(&mut self) -> Result<Vec<u8>, Error>;
}

/// Opens the two channels a participant needs: one it pushes frames out on
/// and one it listens on. Each half can be opened once.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open_outbound(&self) -> Result<Box<dyn FrameSink>, Error>;

    async fn bind_inbound(&self) -> Result<Box<dyn FrameSource>, Error>;
}
