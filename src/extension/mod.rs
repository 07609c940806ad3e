//! Extension registry and command bus
//!
//! Extensions are loaded from declarative descriptors, initialized with a
//! handle to the session's shared services, and kept registered until the
//! owning session disposes. Command events fan out synchronously to every
//! registered extension in registration order; an extension decides for
//! itself which command names it understands.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::analysis::AnalysisSession;
use crate::error::{Result, ServerError};
use crate::rpc::session::SessionClient;

pub mod extract_archive;
pub mod member_lookup;

pub use extract_archive::ExtractArchiveExtension;
pub use member_lookup::MemberLookupExtension;

/// One "run this named command" request, fanned out to extensions.
#[derive(Debug, Clone)]
pub struct CommandEvent {
    pub command: String,
    pub arguments: Vec<Value>,
}

/// Shared services handed to an extension at initialization and on every
/// command event.
#[derive(Clone)]
pub struct ExtensionContext {
    pub analysis: Arc<dyn AnalysisSession>,
    pub client: SessionClient,
    pub workspace_root: Option<PathBuf>,
    pub cancel: CancellationToken,
}

/// Declarative extension load descriptor: identity plus named configuration
/// options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[async_trait]
pub trait Extension: Send {
    fn name(&self) -> &str;

    /// One-time initialization with the shared services.
    async fn initialize(&mut self, _ctx: &ExtensionContext) -> Result<()> {
        Ok(())
    }

    /// Handle one command event. `Ok(None)` means the command was not for
    /// this extension.
    async fn on_command(
        &mut self,
        event: &CommandEvent,
        ctx: &ExtensionContext,
    ) -> Result<Option<Map<String, Value>>>;

    /// Release resources. Called exactly once, on registry disposal or when
    /// initialization fails partway.
    fn dispose(&mut self) {}
}

/// Instantiate a named extension from its descriptor. Unknown names and
/// invalid required options fail immediately.
pub fn create_extension(descriptor: &ExtensionDescriptor) -> Result<Box<dyn Extension>> {
    match descriptor.name.as_str() {
        extract_archive::NAME => Ok(Box::new(ExtractArchiveExtension::new(
            &descriptor.properties,
        )?)),
        member_lookup::NAME => Ok(Box::new(MemberLookupExtension::new(
            &descriptor.properties,
        )?)),
        other => Err(ServerError::ExtensionLoad {
            message: format!("unknown extension {other:?}"),
        }),
    }
}

/// Registry of live extensions for one session.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<Box<dyn Extension>>,
    disposed: bool,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Create, initialize and register an extension from a descriptor.
    pub async fn load(
        &mut self,
        descriptor: &ExtensionDescriptor,
        ctx: &ExtensionContext,
    ) -> Result<()> {
        let extension = create_extension(descriptor)?;
        self.register(extension, ctx).await
    }

    /// Initialize and register an already-constructed extension. If
    /// initialization fails, the extension is disposed before the error is
    /// returned, so its subscription is released exactly once either way.
    pub async fn register(
        &mut self,
        mut extension: Box<dyn Extension>,
        ctx: &ExtensionContext,
    ) -> Result<()> {
        if let Err(err) = extension.initialize(ctx).await {
            extension.dispose();
            return Err(err);
        }
        tracing::debug!("registered extension {}", extension.name());
        self.extensions.push(extension);
        Ok(())
    }

    /// Fan one command event out to every registered extension, in
    /// registration order. The result is the first non-null map any handler
    /// returned, or null if no extension handled the command. A handler
    /// failure aborts this invocation and surfaces to the caller.
    pub async fn dispatch(
        &mut self,
        event: &CommandEvent,
        ctx: &ExtensionContext,
    ) -> Result<Option<Map<String, Value>>> {
        let mut result = None;
        for extension in &mut self.extensions {
            let handled = extension.on_command(event, ctx).await?;
            if result.is_none() {
                result = handled;
            }
        }
        Ok(result)
    }

    /// Dispose every extension exactly once. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for mut extension in self.extensions.drain(..) {
            tracing::debug!("disposing extension {}", extension.name());
            extension.dispose();
        }
    }
}

impl Drop for ExtensionRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
pub(crate) fn test_context(
    analysis: Arc<dyn AnalysisSession>,
    workspace_root: Option<PathBuf>,
) -> ExtensionContext {
    ExtensionContext {
        analysis,
        client: SessionClient::detached(),
        workspace_root,
        cancel: CancellationToken::new(),
    }
}
