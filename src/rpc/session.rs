//! RPC session
//!
//! Turns a [`MessageChannel`](crate::rpc::channel::MessageChannel) into a
//! correlated request/response/notification protocol. Inbound frames are
//! processed one at a time; a failure inside any single request is translated
//! into a protocol error reply and never tears the loop down. Only the `exit`
//! notification terminates the session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::analysis::AnalysisSession;
use crate::error::{Result, ServerError};
use crate::extension::{
    extract_archive, CommandEvent, ExtensionContext, ExtensionDescriptor, ExtensionRegistry,
};
use crate::rpc::channel::MessageChannel;
use crate::rpc::message::{Incoming, Message, ResponseError};
use crate::uri::DocumentUri;

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_SHUTDOWN: &str = "shutdown";
pub const METHOD_EXIT: &str = "exit";
/// The generic command entry point; its events feed the command bus.
pub const METHOD_EXECUTE_COMMAND: &str = "workspace/executeCommand";
pub const METHOD_LOAD_EXTENSION: &str = "python/loadExtension";
const METHOD_LOG_MESSAGE: &str = "window/logMessage";

/// `window/logMessage` severity values.
#[derive(Debug, Clone, Copy)]
pub enum LogLevel {
    Error = 1,
    Warning = 2,
    Info = 3,
    Log = 4,
}

type CallReply = std::result::Result<Value, ResponseError>;

enum Outbound {
    Notification(Message),
    Request {
        message: Message,
        id: u64,
        reply: oneshot::Sender<CallReply>,
    },
}

/// Clonable handle for sending traffic through a running session.
#[derive(Clone)]
pub struct SessionClient {
    tx: mpsc::UnboundedSender<Outbound>,
    next_id: Arc<AtomicU64>,
}

impl SessionClient {
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        let message = Message::notification(method, Some(params));
        self.tx
            .send(Outbound::Notification(message))
            .map_err(|_| session_closed())
    }

    /// Informational message to the peer; dropped silently if the session is
    /// already gone.
    pub fn log_message(&self, level: LogLevel, text: &str) {
        let _ = self.notify(
            METHOD_LOG_MESSAGE,
            json!({ "type": level as u8, "message": text }),
        );
    }

    /// Outbound call with a monotonically assigned correlation id. The reply
    /// is delivered exactly once.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = Message::request(Value::from(id), method, Some(params));
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Outbound::Request {
                message,
                id,
                reply: reply_tx,
            })
            .map_err(|_| session_closed())?;
        match reply_rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(ServerError::Command {
                message: format!(
                    "request {method} failed with code {}: {}",
                    error.code, error.message
                ),
            }),
            Err(_) => Err(session_closed()),
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

fn session_closed() -> ServerError {
    ServerError::Transport {
        message: "session closed".into(),
    }
}

#[derive(Debug, Deserialize)]
struct InitializeParams {
    #[serde(rename = "rootUri", default)]
    root_uri: Option<DocumentUri>,
}

#[derive(Debug, Deserialize)]
struct ExecuteCommandParams {
    command: String,
    #[serde(default)]
    arguments: Vec<Value>,
}

/// One RPC session: owns one channel and one extension registry, runs until
/// the exit notification.
pub struct RpcSession {
    channel: MessageChannel,
    registry: ExtensionRegistry,
    analysis: Arc<dyn AnalysisSession>,
    client: SessionClient,
    outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    pending: HashMap<u64, oneshot::Sender<CallReply>>,
    workspace_root: Option<PathBuf>,
    cancel: CancellationToken,
    session_id: String,
}

impl RpcSession {
    pub fn new(channel: MessageChannel, analysis: Arc<dyn AnalysisSession>) -> Self {
        let (tx, outbound_rx) = mpsc::unbounded_channel();
        let client = SessionClient {
            tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let session_id = format!(
            "ses_{}",
            uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
        );
        Self {
            channel,
            registry: ExtensionRegistry::new(),
            analysis,
            client,
            outbound_rx,
            pending: HashMap::new(),
            workspace_root: None,
            cancel: CancellationToken::new(),
            session_id,
        }
    }

    /// Handle for sending traffic through this session from elsewhere.
    pub fn client(&self) -> SessionClient {
        self.client.clone()
    }

    pub fn workspace_root(&self) -> Option<&PathBuf> {
        self.workspace_root.as_ref()
    }

    fn extension_context(&self) -> ExtensionContext {
        ExtensionContext {
            analysis: Arc::clone(&self.analysis),
            client: self.client.clone(),
            workspace_root: self.workspace_root.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Create and register an extension from a load descriptor. Creation and
    /// initialization failures surface to the caller; the session continues
    /// without the extension.
    pub async fn load_extension(&mut self, descriptor: &ExtensionDescriptor) -> Result<()> {
        let ctx = self.extension_context();
        self.registry.load(descriptor, &ctx).await
    }

    /// Register an already-constructed extension.
    pub async fn register_extension(&mut self, extension: Box<dyn crate::extension::Extension>) -> Result<()> {
        let ctx = self.extension_context();
        self.registry.register(extension, &ctx).await
    }

    /// Load the extensions every session starts with: archive ingestion.
    pub async fn load_default_extensions(&mut self) -> Result<()> {
        let mut properties = serde_json::Map::new();
        properties.insert("typeid".into(), Value::String("Int".into()));
        let descriptor = ExtensionDescriptor {
            name: extract_archive::NAME.to_string(),
            properties,
        };
        self.load_extension(&descriptor).await
    }

    /// Run the receive loop until exit or a transport failure, then tear the
    /// session down: cancel in-flight work, dispose extensions, release the
    /// channel.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("session {} started", self.session_id);
        let outcome = self.serve_loop().await;
        self.cancel.cancel();
        self.registry.dispose();
        self.channel.close().await?;
        tracing::info!("session {} ended", self.session_id);
        outcome
    }

    async fn serve_loop(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                frame = self.channel.recv() => {
                    match frame? {
                        Some(bytes) => {
                            if self.handle_frame(&bytes).await? {
                                return Ok(());
                            }
                        }
                        None => {
                            tracing::info!("session {}: peer disconnected", self.session_id);
                            return Ok(());
                        }
                    }
                }
                outbound = self.outbound_rx.recv() => {
                    if let Some(outbound) = outbound {
                        self.handle_outbound(outbound).await?;
                    }
                }
            }
        }
    }

    /// Returns true once the exit notification has been received.
    async fn handle_frame(&mut self, frame: &[u8]) -> Result<bool> {
        let message: Message =
            serde_json::from_slice(frame).map_err(|e| ServerError::Transport {
                message: format!("malformed frame: {e}"),
            })?;
        match message.classify()? {
            Incoming::Request { id, method, params } => {
                let reply = match self.dispatch(&method, params).await {
                    Ok(result) => Message::response(id, result),
                    Err(err) => {
                        tracing::warn!("request {method} failed: {err}");
                        Message::error_response(id, ResponseError::from_server_error(&err))
                    }
                };
                self.send(&reply).await?;
            }
            Incoming::Notification { method, params } => {
                if method == METHOD_EXIT {
                    return Ok(true);
                }
                if let Err(err) = self.dispatch(&method, params).await {
                    tracing::warn!("notification {method} failed: {err}");
                }
            }
            Incoming::Response { id, result, error } => self.handle_response(id, result, error),
        }
        Ok(false)
    }

    async fn handle_outbound(&mut self, outbound: Outbound) -> Result<()> {
        match outbound {
            Outbound::Notification(message) => self.send(&message).await,
            Outbound::Request { message, id, reply } => {
                self.pending.insert(id, reply);
                self.send(&message).await
            }
        }
    }

    fn handle_response(&mut self, id: Value, result: Option<Value>, error: Option<ResponseError>) {
        let Some(id) = id.as_u64() else {
            tracing::warn!("dropping response with non-numeric id {id}");
            return;
        };
        match self.pending.remove(&id) {
            Some(reply) => {
                let outcome = match error {
                    Some(error) => Err(error),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                let _ = reply.send(outcome);
            }
            // Second delivery for an id is an error: logged and dropped.
            None => tracing::warn!("dropping response for unknown or already-answered id {id}"),
        }
    }

    async fn dispatch(&mut self, method: &str, params: Option<Value>) -> Result<Option<Value>> {
        match method {
            METHOD_INITIALIZE => {
                let params: InitializeParams = parse_params(params)?;
                self.workspace_root = params.root_uri.and_then(|uri| uri.to_file_path());
                tracing::info!(
                    "session {} initialized, workspace root {:?}",
                    self.session_id,
                    self.workspace_root
                );
                Ok(Some(json!({ "capabilities": {} })))
            }
            METHOD_SHUTDOWN => Ok(None),
            METHOD_EXECUTE_COMMAND => {
                let params: ExecuteCommandParams = parse_params(params)?;
                let event = CommandEvent {
                    command: params.command,
                    arguments: params.arguments,
                };
                let ctx = self.extension_context();
                let result = self.registry.dispatch(&event, &ctx).await?;
                Ok(result.map(Value::Object))
            }
            METHOD_LOAD_EXTENSION => {
                let descriptor: ExtensionDescriptor = parse_params(params)?;
                self.load_extension(&descriptor).await?;
                Ok(None)
            }
            other => Err(ServerError::MethodNotFound {
                method: other.to_string(),
            }),
        }
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(message)?);
        self.channel.send(bytes).await
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let params = params.unwrap_or(Value::Null);
    serde_json::from_value(params).map_err(|e| ServerError::InvalidParams {
        message: e.to_string(),
    })
}
