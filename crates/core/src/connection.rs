//! The collaborator that delivers raw frames in arrival order.

use std::future::Future;

use prost::bytes::Bytes;
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    sync::{mpsc, watch},
};

use crate::{
    codec::{FrameDecoder, encode_envelope},
    error::DecodeError,
    types::Record,
};

/// Health of the connection as the transport reports it. The engine passes
/// it on without acting on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingStatus {
    #[default]
    Unknown,
    Serving,
    NotServing,
}

pub trait Connection: Send + 'static {
    /// Next frame body in arrival order, or `None` once the connection is
    /// closed. A stalled sender simply never resolves.
    ///
    /// Must be cancel safe: the ingestion loop drops this future whenever
    /// another event wins the race.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Bytes, DecodeError>>> + Send;

    fn status(&self) -> watch::Receiver<ServingStatus>;
}

/// In-process connection fed by a [`ChannelPeer`].
pub struct ChannelConnection {
    frames: mpsc::Receiver<Bytes>,
    status: watch::Receiver<ServingStatus>,
}

/// Sending half of [`channel`].
pub struct ChannelPeer {
    frames: mpsc::Sender<Bytes>,
    status: watch::Sender<ServingStatus>,
}

pub fn channel(capacity: usize) -> (ChannelPeer, ChannelConnection) {
    let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
    let (status_tx, status_rx) = watch::channel(ServingStatus::Serving);
    (
        ChannelPeer {
            frames: frames_tx,
            status: status_tx,
        },
        ChannelConnection {
            frames: frames_rx,
            status: status_rx,
        },
    )
}

impl ChannelPeer {
    /// Sends one frame body. Fails only when the connection side is gone.
    pub async fn send(&self, frame: impl Into<Bytes>) -> Result<(), Bytes> {
        self.frames.send(frame.into()).await.map_err(|e| e.0)
    }

    pub async fn send_records(&self, records: &[Record]) -> Result<(), Bytes> {
        self.send(encode_envelope(records)).await
    }

    pub fn set_status(&self, status: ServingStatus) {
        self.status.send_replace(status);
    }

    /// Ends the stream after already queued frames.
    pub fn close(self) {
        self.status.send_replace(ServingStatus::NotServing);
    }
}

impl Connection for ChannelConnection {
    async fn next_frame(&mut self) -> Option<Result<Bytes, DecodeError>> {
        self.frames.recv().await.map(Ok)
    }

    fn status(&self) -> watch::Receiver<ServingStatus> {
        self.status.clone()
    }
}

/// Connection over a byte stream carrying varint length-prefixed frames.
pub struct ReaderConnection<R> {
    reader: R,
    decoder: FrameDecoder,
    read_chunk: usize,
    status: watch::Sender<ServingStatus>,
    eof: bool,
}

impl<R> ReaderConnection<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, max_frame_len: usize, read_chunk: usize) -> Self {
        let (status, _) = watch::channel(ServingStatus::Serving);
        Self {
            reader,
            decoder: FrameDecoder::new(max_frame_len),
            read_chunk: read_chunk.max(1),
            status,
            eof: false,
        }
    }

    fn close(&mut self) {
        self.eof = true;
        self.status.send_replace(ServingStatus::NotServing);
    }
}

impl<R> Connection for ReaderConnection<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn next_frame(&mut self) -> Option<Result<Bytes, DecodeError>> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Some(frame);
            }
            if self.eof {
                return None;
            }

            let buf = self.decoder.buffer_mut();
            buf.reserve(self.read_chunk);
            match self.reader.read_buf(buf).await {
                Ok(0) => {
                    tracing::info!("stream connection reached end of input");
                    self.close();
                    if let Some(err) = self.decoder.finish() {
                        return Some(Err(err));
                    }
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "stream connection read failed");
                    self.close();
                    return None;
                }
            }
        }
    }

    fn status(&self) -> watch::Receiver<ServingStatus> {
        self.status.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::encode_frame,
        types::{Span, SpanId},
    };
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn channel_preserves_order_and_closes() {
        let (peer, mut conn) = channel(4);
        peer.send(vec![1u8]).await.unwrap();
        peer.send(vec![2u8]).await.unwrap();
        let status = conn.status();
        peer.close();

        assert_eq!(&conn.next_frame().await.unwrap().unwrap()[..], &[1]);
        assert_eq!(&conn.next_frame().await.unwrap().unwrap()[..], &[2]);
        assert!(conn.next_frame().await.is_none());
        assert_eq!(*status.borrow(), ServingStatus::NotServing);
    }

    #[tokio::test]
    async fn reader_splits_frames_and_reports_truncated_tail() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let mut conn = ReaderConnection::new(rx, 1024, 3);
        let status = conn.status();

        let frame = encode_frame(&[Record::Span(Span::new(SpanId(42)))]);
        tx.write_all(&frame).await.unwrap();
        tx.write_all(&frame[..frame.len() - 1]).await.unwrap();
        drop(tx);

        let first = conn.next_frame().await.unwrap().unwrap();
        assert_eq!(first.len(), frame.len() - 1);
        assert!(matches!(
            conn.next_frame().await,
            Some(Err(DecodeError::TruncatedMessage { .. }))
        ));
        assert!(conn.next_frame().await.is_none());
        assert_eq!(*status.borrow(), ServingStatus::NotServing);
    }
}
