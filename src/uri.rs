//! Document locators and their wire encoding
//!
//! Locators travel as string tokens with every colon after the scheme
//! separator percent-encoded as `%3A` and backslashes normalized to forward
//! slashes. Decoding reverses the substitution before parsing, so
//! `decode(encode(u)) == u` for every locator this server produces.

use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

use crate::error::{Result, ServerError};

/// A scheme+path resource locator with the custom colon-escaping wire form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentUri(Url);

impl DocumentUri {
    /// Decode a wire token: `%3A` is restored to `:` before parsing.
    pub fn parse(token: &str) -> Result<Self> {
        let raw = token.replace("%3A", ":");
        Url::parse(&raw)
            .map(Self)
            .map_err(|e| ServerError::InvalidParams {
                message: format!("invalid uri {token:?}: {e}"),
            })
    }

    pub fn from_url(url: Url) -> Self {
        Self(url)
    }

    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    /// Local filesystem path for `file://` locators.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        self.0.to_file_path().ok()
    }

    /// Encode to the wire form. The scheme separator keeps its literal colon;
    /// every other colon becomes `%3A` and `\` becomes `/`.
    pub fn to_wire(&self) -> Result<String> {
        let scheme = self.0.scheme();
        let full = self.0.to_string();
        let rest = full
            .strip_prefix(&format!("{scheme}://"))
            .ok_or_else(|| ServerError::Transport {
                message: format!("unsupported non-authority uri {full:?}"),
            })?
            .replace(':', "%3A")
            .replace('\\', "/");
        Ok(format!("{scheme}://{rest}"))
    }
}

impl fmt::Display for DocumentUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for DocumentUri {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = self.to_wire().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&wire)
    }
}

impl<'de> Deserialize<'de> for DocumentUri {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct UriVisitor;

        impl Visitor<'_> for UriVisitor {
            type Value = DocumentUri;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a uri string token")
            }

            fn visit_str<E: de::Error>(self, token: &str) -> std::result::Result<DocumentUri, E> {
                DocumentUri::parse(token).map_err(E::custom)
            }
        }

        // Any non-string token is a programming error, not a recoverable
        // condition; `Option<DocumentUri>` handles the null case.
        deserializer.deserialize_str(UriVisitor)
    }
}
