//! Message channel adapters
//!
//! Wraps either a pair of byte streams (header-delimited framing) or an
//! upgraded WebSocket behind one duplex framed-message abstraction. `close`
//! is idempotent: the underlying transport is released exactly once no matter
//! which exit path triggers it.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::error::{Result, ServerError};
use crate::rpc::codec::HeaderCodec;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The socket handed to a session after the HTTP upgrade handshake. The
/// acceptor consumes the request head while sniffing for the upgrade, so the
/// stream replays those bytes for the handshake parser.
pub type UpgradedSocket = WebSocketStream<PrefixedStream<TcpStream>>;

/// One duplex framed-message connection.
pub struct MessageChannel {
    kind: ChannelKind,
    closed: bool,
}

enum ChannelKind {
    Header {
        reader: FramedRead<BoxedReader, HeaderCodec>,
        writer: FramedWrite<BoxedWriter, HeaderCodec>,
    },
    Socket(UpgradedSocket),
}

impl MessageChannel {
    /// Channel over the process's standard streams.
    pub fn stdio() -> Self {
        Self::from_streams(Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout()))
    }

    /// Channel over an arbitrary readable/writable byte-stream pair, framed
    /// with `Content-Length` headers.
    pub fn from_streams(reader: BoxedReader, writer: BoxedWriter) -> Self {
        Self {
            kind: ChannelKind::Header {
                reader: FramedRead::new(reader, HeaderCodec::new()),
                writer: FramedWrite::new(writer, HeaderCodec::new()),
            },
            closed: false,
        }
    }

    /// Channel over an upgraded WebSocket; one frame per message.
    pub fn websocket(socket: UpgradedSocket) -> Self {
        Self {
            kind: ChannelKind::Socket(socket),
            closed: false,
        }
    }

    /// Send one complete frame.
    pub async fn send(&mut self, frame: Bytes) -> Result<()> {
        if self.closed {
            return Err(ServerError::Transport {
                message: "channel is closed".into(),
            });
        }
        match &mut self.kind {
            ChannelKind::Header { writer, .. } => writer.send(frame).await,
            ChannelKind::Socket(ws) => {
                let text = String::from_utf8(frame.to_vec()).map_err(|_| {
                    ServerError::Transport {
                        message: "outbound frame is not valid UTF-8".into(),
                    }
                })?;
                ws.send(WsMessage::Text(text)).await.map_err(ws_error)
            }
        }
    }

    /// Receive the next complete frame; `None` once the peer disconnects.
    pub async fn recv(&mut self) -> Result<Option<Bytes>> {
        if self.closed {
            return Ok(None);
        }
        match &mut self.kind {
            ChannelKind::Header { reader, .. } => reader.next().await.transpose(),
            ChannelKind::Socket(ws) => loop {
                match ws.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        return Ok(Some(Bytes::from(text.into_bytes())))
                    }
                    Some(Ok(WsMessage::Binary(data))) => return Ok(Some(Bytes::from(data))),
                    Some(Ok(WsMessage::Ping(data))) => {
                        ws.send(WsMessage::Pong(data)).await.map_err(ws_error)?;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Err(ws_error(err)),
                }
            },
        }
    }

    /// Release the underlying transport. Safe to call from any exit path,
    /// any number of times.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match &mut self.kind {
            ChannelKind::Header { writer, .. } => {
                if let Err(err) = writer.close().await {
                    tracing::debug!("channel close: {err}");
                }
            }
            ChannelKind::Socket(ws) => {
                if let Err(err) = ws.close(None).await {
                    match err {
                        WsError::ConnectionClosed | WsError::AlreadyClosed => {}
                        err => tracing::debug!("websocket close: {err}"),
                    }
                }
            }
        }
        Ok(())
    }
}

fn ws_error(err: WsError) -> ServerError {
    ServerError::Transport {
        message: format!("websocket error: {err}"),
    }
}

/// Byte stream that replays a buffered prefix before reading from the inner
/// stream. Writes go straight through.
pub struct PrefixedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(inner: S, prefix: Bytes) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
