//! pylsd — transport host for a Python language-analysis backend.
//!
//! The host speaks JSON-RPC over either its standard streams or a single
//! WebSocket endpoint, and routes `workspace/executeCommand` invocations
//! through a per-session extension registry. The analysis backend itself sits
//! behind [`analysis::AnalysisSession`].

pub mod acceptor;
pub mod analysis;
pub mod error;
pub mod extension;
pub mod rpc;
pub mod uri;

pub use acceptor::{serve, ServeMode};
pub use error::{Result, ServerError};
pub use uri::DocumentUri;
