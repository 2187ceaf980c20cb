use async_trait::async_trait;
use tracing::{debug, warn};
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use super::{
    error::Error,
    transport::{FrameSink, FrameSource, Transport},
};
use crate::pipeline::config::ConnectRetry;

/// ZeroMQ PUSH/PULL transport. The outbound side connects a PUSH socket to
/// `outbound`, retrying until the peer is listening; the inbound side binds
/// a PULL socket on `inbound`.
#[derive(Debug, Clone)]
pub struct ZmqTransport {
    outbound: String,
    inbound: String,
    retry: ConnectRetry,
}

impl ZmqTransport {
    pub fn new(
        outbound: impl Into<String>,
        inbound: impl Into<String>,
        retry: ConnectRetry,
    ) -> Self {
        Self {
            outbound: outbound.into(),
            inbound: inbound.into(),
            retry,
        }
    }
}

#[async_trait]
impl Transport for ZmqTransport {
    async fn open_outbound(&self) -> Result<Box<dyn FrameSink>, Error> {
        let mut socket = PushSocket::new();
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match socket.connect(&self.outbound).await {
                Ok(()) => {
                    debug!(addr = %self.outbound, attempt, "push socket connected");
                    return Ok(Box::new(ZmqSink {
                        socket: Some(socket),
                    }));
                }
                Err(e) if attempt < attempts => {
                    debug!(addr = %self.outbound, attempt, error = %e, "connect failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(last) => {
                    return Err(Error::ConnectExhausted {
                        addr: self.outbound.clone(),
                        attempts,
                        last,
                    })
                }
            }
        }
    }

    async fn bind_inbound(&self) -> Result<Box<dyn FrameSource>, Error> {
        let mut socket = PullSocket::new();
        let endpoint = socket.bind(&self.inbound).await?;
        debug!(%endpoint, "pull socket bound");
        Ok(Box::new(ZmqSource { socket }))
    }
}

struct ZmqSink {
    socket: Option<PushSocket>,
}

#[async_trait]
impl FrameSink for ZmqSink {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), Error> {
        let socket = self.socket.as_mut().ok_or(Error::ChannelClosed)?;
        socket.send(ZmqMessage::from(frame)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        if let Some(socket) = self.socket.take() {
            for error in socket.close().await {
                warn!(%error, "error while closing push socket");
            }
        }
        Ok(())
    }
}

struct ZmqSource {
    socket: PullSocket,
}

#[async_trait]
impl FrameSource for ZmqSource {
    async fn recv(&mut self) -> Result<Vec<u8>, Error> {
        let frames = self.socket.recv().await?.into_vec();
        if frames.is_empty() {
            return Err(Error::EmptyRead);
        }
        // A multipart message is delivered atomically; it is judged by its
        // total length like any other frame.
        Ok(frames.concat())
    }
}
