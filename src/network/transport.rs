use std::io;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use crate::{AppError, AppResult};

/// Byte-oriented read half of a session transport.
///
/// Message-framed transports surface their messages as a plain byte stream
/// here; the frame boundary carries no meaning above the LTD layer.
#[async_trait]
pub trait TransportReader: Send {
    /// Reads at most `buf.len()` bytes. `Ok(0)` means the peer closed the
    /// stream in an orderly fashion.
    async fn read(&mut self, buf: &mut [u8]) -> AppResult<usize>;
}

/// Byte-oriented write half of a session transport.
#[async_trait]
pub trait TransportWriter: Send {
    async fn write_all(&mut self, data: &[u8]) -> AppResult<()>;
    async fn shutdown(&mut self) -> AppResult<()>;
}

/// Read adapter for any async byte stream (TCP, KCP).
pub struct StreamReader<R> {
    inner: R,
}

impl<R> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReader for StreamReader<R> {
    async fn read(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        Ok(self.inner.read(buf).await?)
    }
}

/// Write adapter for any async byte stream (TCP, KCP).
pub struct StreamWriter<W> {
    inner: W,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportWriter for StreamWriter<W> {
    async fn write_all(&mut self, data: &[u8]) -> AppResult<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Splits an accepted WebSocket stream into session transport halves.
pub fn split_ws<S>(ws: WebSocketStream<S>) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (sink, stream) = ws.split();
    (
        WsReader {
            stream,
            pending: BytesMut::new(),
        },
        WsWriter { sink },
    )
}

/// Read half over a WebSocket: incoming messages are flattened into a byte
/// stream, control frames are skipped.
pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    pending: BytesMut,
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> TransportReader for WsReader<S> {
    async fn read(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        while self.pending.is_empty() {
            match self.stream.next().await {
                None | Some(Ok(WsMessage::Close(_))) => return Ok(0),
                Some(Ok(WsMessage::Binary(data))) => self.pending.extend_from_slice(&data),
                Some(Ok(WsMessage::Text(text))) => self.pending.extend_from_slice(text.as_bytes()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(AppError::Io(io::Error::new(io::ErrorKind::Other, e)));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

/// Write half over a WebSocket: every frame goes out as one binary message.
pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> TransportWriter for WsWriter<S> {
    async fn write_all(&mut self, data: &[u8]) -> AppResult<()> {
        self.sink
            .send(WsMessage::Binary(data.to_vec()))
            .await
            .map_err(|e| AppError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }

    async fn shutdown(&mut self) -> AppResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| AppError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_halves_round_trip() {
        let (client, server) = tokio::io::duplex(64);
        let (server_read, _server_write) = tokio::io::split(server);
        let (_client_read, client_write) = tokio::io::split(client);

        let mut writer = StreamWriter::new(client_write);
        let mut reader = StreamReader::new(server_read);

        writer.write_all(b"frame bytes").await.unwrap();
        let mut buf = [0u8; 32];
        let n = reader.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"frame bytes");
    }

    #[tokio::test]
    async fn stream_reader_reports_eof() {
        let (client, server) = tokio::io::duplex(64);
        drop(client);
        let (server_read, _) = tokio::io::split(server);
        let mut reader = StreamReader::new(server_read);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 0);
    }
}
