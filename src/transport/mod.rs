// MIT License - Copyright (c) 2026 Peter Wright
// Byte stream transports

pub mod tcp;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, warn};

use crate::codec::framing::{FrameCodec, FramingMode};
use crate::error::{ParadoxError, Result};
use crate::event::ConnectionState;
use crate::manager::FrameSink;

/// Any full-duplex byte stream the panel can be reached over.
pub trait PanelStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PanelStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type Writer = FramedWrite<WriteHalf<Box<dyn PanelStream>>, FrameCodec>;

/// A framed byte stream with its reader task.
///
/// The reader pushes every complete frame into the message manager's queue.
/// When the queue is full the push waits, and no further bytes are read.
pub struct Connection {
    writer: Mutex<Writer>,
    mode: FramingMode,
    lost: watch::Receiver<Option<String>>,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn open(
        stream: Box<dyn PanelStream>,
        mode: FramingMode,
        sink: FrameSink,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FramedRead::new(read_half, FrameCodec::new(mode.clone()).with_state(state));
        let writer = FramedWrite::new(write_half, FrameCodec::new(mode.clone()));
        let (lost_tx, lost) = watch::channel(None);
        let reader = tokio::spawn(async move {
            let reason = read_frames(reader, sink).await;
            let _ = lost_tx.send(Some(reason));
        });
        Self {
            writer: Mutex::new(writer),
            mode,
            lost,
            reader,
        }
    }

    pub async fn send(&self, frame: Bytes) -> Result<()> {
        if self.is_lost() {
            return Err(ParadoxError::Disconnected);
        }
        let mut writer = self.writer.lock().await;
        writer.send(frame).await.map_err(|e| {
            error!("Failed to write frame: {}", e);
            e
        })
    }

    /// Switch between fixed 37-byte and length-prefixed framing.
    pub fn set_variable_framing(&self, variable: bool) {
        self.mode.set_variable(variable);
    }

    pub fn is_lost(&self) -> bool {
        self.lost.borrow().is_some()
    }

    /// Resolves with the reason once the reader stops.
    pub async fn closed(&self) -> String {
        let mut lost = self.lost.clone();
        loop {
            if let Some(reason) = lost.borrow().clone() {
                return reason;
            }
            if lost.changed().await.is_err() {
                return "reader stopped".to_string();
            }
        }
    }

    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            debug!("Closing transport: {}", e);
        }
        self.reader.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames<R>(mut reader: FramedRead<R, FrameCodec>, sink: FrameSink) -> String
where
    R: AsyncRead + Unpin,
{
    while let Some(item) = reader.next().await {
        match item {
            Ok(frame) => {
                if sink.push(frame).await.is_err() {
                    return "message manager stopped".to_string();
                }
            }
            Err(e) => {
                warn!("Reader: {}", e);
                return e.to_string();
            }
        }
    }
    debug!("Reader: connection closed");
    "connection closed by peer".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::MessageManager;
    use crate::variants::MessageKind;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let manager = MessageManager::new(4);
        let (near, mut far) = tokio::io::duplex(256);
        let (_state_tx, state) = watch::channel(ConnectionState::Connecting);
        let conn = Connection::open(Box::new(near), FramingMode::new(true), manager.sink(), state);

        let pending = manager.expect(|m| m.kind == MessageKind::ErrorMessage).await;
        far.write_all(&[0x70, 0x04, 0x10, 0x84]).await.unwrap();
        let msg = pending.wait(Duration::from_secs(1), "error").await.unwrap();
        assert_eq!(msg.raw.as_ref(), &[0x70, 0x04, 0x10, 0x84]);

        conn.send(Bytes::from_static(&[0x70, 0x04, 0x05, 0x79])).await.unwrap();
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x70, 0x04, 0x05, 0x79]);

        drop(far);
        assert_eq!(conn.closed().await, "connection closed by peer");
        assert!(matches!(
            conn.send(Bytes::from_static(&[0x00])).await,
            Err(ParadoxError::Disconnected)
        ));
    }
}
