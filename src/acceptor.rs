//! Connection acceptor
//!
//! Two modes, never concurrently active in one process: stdio serves the
//! process's standard streams as the sole connection and returns when that
//! session exits; network mode binds a loopback HTTP listener, upgrades
//! WebSocket requests into sessions and answers everything else with
//! `426 Upgrade Required`. Each accepted session gets a freshly constructed
//! extension registry.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;

use crate::analysis::AnalysisSession;
use crate::rpc::channel::{MessageChannel, PrefixedStream};
use crate::rpc::session::RpcSession;

const MAX_REQUEST_HEAD: usize = 8 * 1024;
const UPGRADE_REQUIRED: &[u8] = b"HTTP/1.1 426 Upgrade Required\r\n\
    Upgrade: websocket\r\n\
    Connection: close\r\n\
    Content-Length: 0\r\n\r\n";

/// How the host accepts its one inbound connection.
#[derive(Debug, Clone)]
pub enum ServeMode {
    Stdio,
    Network { addr: SocketAddr },
}

pub async fn serve(mode: ServeMode, analysis: Arc<dyn AnalysisSession>) -> anyhow::Result<()> {
    match mode {
        ServeMode::Stdio => {
            run_session(MessageChannel::stdio(), analysis).await?;
            Ok(())
        }
        ServeMode::Network { addr } => {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!("listening on ws://{addr}");
            serve_listener(listener, analysis).await
        }
    }
}

/// Accept loop for network mode. Sessions run on their own tasks; the loop
/// never blocks on a session's lifetime and keeps accepting after rejected
/// requests.
pub async fn serve_listener(
    listener: TcpListener,
    analysis: Arc<dyn AnalysisSession>,
) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::info!("accepted connection from {peer}");
                let analysis = Arc::clone(&analysis);
                tokio::spawn(async move {
                    if let Err(err) = handle_http_connection(stream, analysis).await {
                        tracing::error!("connection from {peer} failed: {err}");
                    }
                });
            }
            Err(err) => {
                tracing::error!("failed to accept connection: {err}");
            }
        }
    }
}

async fn handle_http_connection(
    mut stream: TcpStream,
    analysis: Arc<dyn AnalysisSession>,
) -> anyhow::Result<()> {
    let head = read_request_head(&mut stream).await?;
    if !is_upgrade_request(&head) {
        stream.write_all(UPGRADE_REQUIRED).await?;
        stream.shutdown().await?;
        return Ok(());
    }

    // The head was consumed while sniffing; replay it for the handshake.
    let replay = PrefixedStream::new(stream, head);
    let socket = accept_async(replay).await?;
    tracing::info!("websocket connected");
    run_session(MessageChannel::websocket(socket), analysis).await?;
    tracing::info!("websocket disconnected");
    Ok(())
}

/// Bind one session to a channel and run it to completion. Every session
/// starts with the default extension set loaded.
pub async fn run_session(
    channel: MessageChannel,
    analysis: Arc<dyn AnalysisSession>,
) -> crate::error::Result<()> {
    let mut session = RpcSession::new(channel, analysis);
    session.load_default_extensions().await?;
    session.run().await
}

async fn read_request_head(stream: &mut TcpStream) -> anyhow::Result<Bytes> {
    let mut head = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before request head");
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|window| window == b"\r\n\r\n") {
            return Ok(Bytes::from(head));
        }
        if head.len() > MAX_REQUEST_HEAD {
            anyhow::bail!("request head exceeds {MAX_REQUEST_HEAD} bytes");
        }
    }
}

fn is_upgrade_request(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    for line in text.split("\r\n").skip(1) {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("upgrade")
                && value.trim().eq_ignore_ascii_case("websocket")
            {
                return true;
            }
        }
    }
    false
}
