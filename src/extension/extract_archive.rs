//! Workspace archive ingestion
//!
//! Registers the `workspace/extractArchive` command: downloads a zip archive
//! from a URL (basic-auth credentials taken from the URL's user-info) and
//! extracts it into the workspace root, with path-traversal protection and
//! optional stripping of one leading path segment. Stripping is useful for
//! archives that wrap everything in a top-level directory, such as GitHub's
//! codeload tarballs.

use std::fs;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{Result, ServerError};
use crate::extension::{CommandEvent, Extension, ExtensionContext};
use crate::rpc::session::LogLevel;

pub const NAME: &str = "workspaceExtractArchive";
pub const COMMAND: &str = "workspace/extractArchive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IngestState {
    Idle,
    Downloading,
    Extracting,
    Done,
    Failed,
}

pub struct ExtractArchiveExtension {
    state: IngestState,
    http: reqwest::Client,
}

impl ExtractArchiveExtension {
    pub fn new(_properties: &Map<String, Value>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ServerError::ExtensionLoad {
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            state: IngestState::Idle,
            http,
        })
    }

    async fn run(&mut self, event: &CommandEvent, ctx: &ExtensionContext) -> Result<()> {
        let root = ctx
            .workspace_root
            .as_deref()
            .ok_or(ServerError::MissingWorkspaceRoot)?;
        let (archive_url, strip_leading_component) = parse_arguments(&event.arguments)?;
        let root = normalize_extract_root(root);

        let note = format!(
            "Downloading and extracting archive {archive_url} to {}",
            root.display()
        );
        tracing::info!("{note}");
        ctx.client.log_message(LogLevel::Info, &note);

        self.state = IngestState::Downloading;
        let body = self.download(&archive_url, &ctx.cancel).await?;

        let note = format!("Downloaded archive {archive_url}");
        tracing::info!("{note}");
        ctx.client.log_message(LogLevel::Info, &note);

        self.state = IngestState::Extracting;
        ingest_archive_bytes(&body, strip_leading_component, &root, &ctx.cancel)?;

        let note = format!("Extracted archive {archive_url} to {}", root.display());
        tracing::info!("{note}");
        ctx.client.log_message(LogLevel::Info, &note);
        Ok(())
    }

    async fn download(&self, archive_url: &Url, cancel: &CancellationToken) -> Result<Vec<u8>> {
        // The user-info is assumed to carry a bare username; the basic-auth
        // token is always `username:` with no password component. Credentials
        // travel only in the Authorization header, never in the request line.
        let username = archive_url.username().to_string();
        let mut request_url = archive_url.clone();
        let _ = request_url.set_username("");
        let _ = request_url.set_password(None);
        let mut request = self
            .http
            .get(request_url)
            .header(ACCEPT, "application/zip");
        if !username.is_empty() {
            request = request.basic_auth(&username, None::<&str>);
        }

        let response = tokio::select! {
            response = request.send() => response.map_err(download_error)?,
            _ = cancel.cancelled() => return Err(cancelled()),
        };
        let response = response.error_for_status().map_err(download_error)?;
        let body = tokio::select! {
            body = response.bytes() => body.map_err(download_error)?,
            _ = cancel.cancelled() => return Err(cancelled()),
        };
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Extension for ExtractArchiveExtension {
    fn name(&self) -> &str {
        NAME
    }

    async fn on_command(
        &mut self,
        event: &CommandEvent,
        ctx: &ExtensionContext,
    ) -> Result<Option<Map<String, Value>>> {
        if event.command != COMMAND {
            return Ok(None);
        }
        match self.run(event, ctx).await {
            Ok(()) => {
                self.state = IngestState::Done;
                Ok(Some(Map::new()))
            }
            Err(err) => {
                self.state = IngestState::Failed;
                Err(err)
            }
        }
    }
}

/// Arguments are positional, exactly two: [archive URL, strip flag].
fn parse_arguments(arguments: &[Value]) -> Result<(Url, bool)> {
    if arguments.len() != 2 {
        return Err(invalid(format!(
            "invalid arguments (expected exactly 2, got {})",
            arguments.len()
        )));
    }
    let Some(raw_url) = arguments[0].as_str() else {
        return Err(invalid("invalid 1st argument (expected string)"));
    };
    let Some(strip) = arguments[1].as_bool() else {
        return Err(invalid("invalid 2nd argument (expected boolean)"));
    };
    let url = Url::parse(raw_url)
        .map_err(|e| invalid(format!("invalid archive url {raw_url:?}: {e}")))?;
    Ok((url, strip))
}

/// Extract an in-memory zip archive into the normalized destination root.
///
/// With stripping enabled, every non-directory entry loses its first path
/// component; single-component entries are dropped. Entries whose resolved
/// path escapes the root are skipped silently so that one bad entry cannot
/// abort the rest.
fn ingest_archive_bytes(
    body: &[u8],
    strip_leading_component: bool,
    root: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(body)).map_err(archive_error)?;
    if strip_leading_component {
        for index in 0..archive.len() {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            let mut entry = archive.by_index(index).map_err(archive_error)?;
            if entry.is_dir() {
                continue;
            }
            let stored = entry.name().to_string();
            let components: Vec<&str> = stored
                .split(['/', '\\'])
                .filter(|part| !part.is_empty())
                .collect();
            if components.len() <= 1 {
                continue;
            }
            let relative: PathBuf = components[1..].iter().collect();
            let destination = lexical_normalize(&root.join(relative));
            if !destination.starts_with(root) {
                continue;
            }
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&destination)?;
            std::io::copy(&mut entry, &mut file)?;
        }
    } else {
        // `extract` resolves entry names through `enclosed_name`, which
        // rejects absolute paths and `..` segments.
        archive.extract(root).map_err(archive_error)?;
    }
    Ok(())
}

/// Absolute, lexically normalized destination root.
fn normalize_extract_root(root: &Path) -> PathBuf {
    let absolute = if root.is_absolute() {
        root.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(root))
            .unwrap_or_else(|_| root.to_path_buf())
    };
    lexical_normalize(&absolute)
}

/// Resolve `.` and `..` components without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized
}

fn invalid(message: impl Into<String>) -> ServerError {
    ServerError::InvalidParams {
        message: message.into(),
    }
}

fn download_error(err: reqwest::Error) -> ServerError {
    ServerError::Download {
        message: err.to_string(),
    }
}

fn archive_error(err: zip::result::ZipError) -> ServerError {
    ServerError::Archive {
        message: err.to_string(),
    }
}

fn cancelled() -> ServerError {
    ServerError::Command {
        message: "archive ingestion cancelled".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StaticAnalysis;
    use crate::extension::test_context;
    use std::io::Write;
    use std::sync::Arc;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_strip_extracts_under_root() {
        let root = tempfile::tempdir().unwrap();
        let root_path = normalize_extract_root(root.path());
        let body = build_zip(&[
            ("repo-abc123/readme.md", b"hello"),
            ("repo-abc123/src/app.py", b"print('hi')"),
        ]);

        ingest_archive_bytes(&body, true, &root_path, &CancellationToken::new()).unwrap();

        assert_eq!(fs::read(root_path.join("readme.md")).unwrap(), b"hello");
        assert_eq!(
            fs::read(root_path.join("src/app.py")).unwrap(),
            b"print('hi')"
        );
    }

    #[test]
    fn test_strip_skips_traversal_entries_but_keeps_the_rest() {
        let parent = tempfile::tempdir().unwrap();
        let root = parent.path().join("work").join("root");
        fs::create_dir_all(&root).unwrap();
        let root_path = normalize_extract_root(&root);
        let body = build_zip(&[
            ("../../evil", b"owned"),
            ("pkg/../../evil2", b"owned"),
            ("pkg/safe.txt", b"fine"),
        ]);

        // The command still completes successfully for the safe entries.
        ingest_archive_bytes(&body, true, &root_path, &CancellationToken::new()).unwrap();

        assert_eq!(fs::read(root_path.join("safe.txt")).unwrap(), b"fine");
        assert!(!parent.path().join("evil").exists());
        assert!(!parent.path().join("work").join("evil2").exists());
        assert!(!root_path.join("evil").exists());
        assert!(!root_path.join("evil2").exists());
    }

    #[test]
    fn test_strip_drops_single_component_entries() {
        let root = tempfile::tempdir().unwrap();
        let root_path = normalize_extract_root(root.path());
        let body = build_zip(&[("readme.txt", b"top level"), ("pkg/kept.txt", b"kept")]);

        ingest_archive_bytes(&body, true, &root_path, &CancellationToken::new()).unwrap();

        assert!(!root_path.join("readme.txt").exists());
        assert!(root_path.join("kept.txt").exists());
    }

    #[test]
    fn test_full_extraction_without_strip_keeps_layout() {
        let root = tempfile::tempdir().unwrap();
        let root_path = normalize_extract_root(root.path());
        let body = build_zip(&[("pkg/a.txt", b"a"), ("pkg/sub/b.txt", b"b")]);

        ingest_archive_bytes(&body, false, &root_path, &CancellationToken::new()).unwrap();

        assert_eq!(fs::read(root_path.join("pkg/a.txt")).unwrap(), b"a");
        assert_eq!(fs::read(root_path.join("pkg/sub/b.txt")).unwrap(), b"b");
    }

    #[test]
    fn test_corrupt_archive_is_a_command_failure() {
        let root = tempfile::tempdir().unwrap();
        let root_path = normalize_extract_root(root.path());
        let result = ingest_archive_bytes(
            b"definitely not a zip",
            false,
            &root_path,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(ServerError::Archive { .. })));
    }

    #[test]
    fn test_cancellation_stops_extraction() {
        let root = tempfile::tempdir().unwrap();
        let root_path = normalize_extract_root(root.path());
        let body = build_zip(&[("pkg/a.txt", b"a")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = ingest_archive_bytes(&body, true, &root_path, &cancel);
        assert!(matches!(result, Err(ServerError::Command { .. })));
    }

    #[test]
    fn test_parse_arguments_shapes() {
        assert!(parse_arguments(&[]).is_err());
        assert!(parse_arguments(&[serde_json::json!("http://h/a.zip")]).is_err());
        assert!(parse_arguments(&[serde_json::json!(1), serde_json::json!(true)]).is_err());
        assert!(
            parse_arguments(&[serde_json::json!("http://h/a.zip"), serde_json::json!("yes")])
                .is_err()
        );
        let (url, strip) =
            parse_arguments(&[serde_json::json!("http://h/a.zip"), serde_json::json!(true)])
                .unwrap();
        assert_eq!(url.as_str(), "http://h/a.zip");
        assert!(strip);
    }

    #[test]
    fn test_username_is_taken_from_url_user_info() {
        let url = Url::parse("http://sourcegraph@codehost:7080/repo.zip").unwrap();
        assert_eq!(url.username(), "sourcegraph");
        assert_eq!(url.password(), None);
    }

    /// Serve one HTTP response carrying `body` as a zip download; returns the
    /// request head the client sent.
    async fn serve_zip_once(
        body: Vec<u8>,
    ) -> (std::net::SocketAddr, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                stream.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
            stream.shutdown().await.unwrap();
            String::from_utf8_lossy(&head).to_string()
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_download_and_extract_end_to_end() {
        let body = build_zip(&[("pkg/hello.txt", b"hi")]);
        let (addr, served) = serve_zip_once(body).await;

        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(
            Arc::new(StaticAnalysis::new()),
            Some(root.path().to_path_buf()),
        );
        let mut ext = ExtractArchiveExtension::new(&Map::new()).unwrap();
        let event = CommandEvent {
            command: COMMAND.into(),
            arguments: vec![
                serde_json::json!(format!("http://sourcegraph@{addr}/a.zip")),
                serde_json::json!(true),
            ],
        };

        let result = ext.on_command(&event, &ctx).await.unwrap();
        assert!(result.is_some());
        assert_eq!(fs::read(root.path().join("hello.txt")).unwrap(), b"hi");

        // base64("sourcegraph:") — username only, trailing colon, no password.
        let head = served.await.unwrap();
        assert!(head.to_lowercase().contains("authorization: basic"));
        assert!(head.contains("c291cmNlZ3JhcGg6"));
    }

    #[tokio::test]
    async fn test_missing_workspace_root_is_fatal_for_the_command() {
        let mut ext = ExtractArchiveExtension::new(&Map::new()).unwrap();
        let ctx = test_context(Arc::new(StaticAnalysis::new()), None);
        let event = CommandEvent {
            command: COMMAND.into(),
            arguments: vec![serde_json::json!("http://h/a.zip"), serde_json::json!(false)],
        };
        let err = ext.on_command(&event, &ctx).await.unwrap_err();
        assert!(matches!(err, ServerError::MissingWorkspaceRoot));
    }

    #[tokio::test]
    async fn test_other_commands_are_ignored() {
        let mut ext = ExtractArchiveExtension::new(&Map::new()).unwrap();
        let ctx = test_context(Arc::new(StaticAnalysis::new()), None);
        let event = CommandEvent {
            command: "some/otherCommand".into(),
            arguments: vec![],
        };
        assert!(ext.on_command(&event, &ctx).await.unwrap().is_none());
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(
            lexical_normalize(Path::new("/work/root/../escape")),
            PathBuf::from("/work/escape")
        );
        assert_eq!(
            lexical_normalize(Path::new("/work/./root/a")),
            PathBuf::from("/work/root/a")
        );
        assert_eq!(lexical_normalize(Path::new("/../../x")), PathBuf::from("/x"));
    }
}
