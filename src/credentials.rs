//! API credential resolution for the binary.
//!
//! The library never looks for credentials itself: it takes an already
//! resolved key through [`crate::CheckConfig::api_key`]. The binary builds a
//! [`CredentialChain`] of [`CredentialSource`] strategies and hands the
//! first key found to the config:
//!
//! 1. `--api-key` on the command line
//! 2. a secrets TOML file with an `[openai]` table holding `api_key`
//! 3. the `OPENAI_API_KEY` environment variable
//! 4. an interactive prompt, only when stdin is a terminal
//!
//! Only the name of the source that produced the key is ever logged.

use serde::Deserialize;
use std::fmt;
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable read by [`EnvVar::openai`].
pub const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Cannot read secrets file '{path}': {source}")]
    SecretsUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Secrets file '{path}' is not valid TOML: {detail}")]
    SecretsMalformed { path: PathBuf, detail: String },

    #[error("Failed to read API key from the terminal: {0}")]
    Prompt(#[source] std::io::Error),
}

/// One place a credential may come from.
pub trait CredentialSource: Send + Sync {
    /// Short label for logs ("command line", "secrets file", …).
    fn name(&self) -> &str;

    /// `Ok(None)` when this source has nothing to offer; the chain moves on.
    fn resolve(&self) -> Result<Option<String>, CredentialError>;
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// A key passed explicitly (e.g. `--api-key`).
pub struct ExplicitKey(pub Option<String>);

impl CredentialSource for ExplicitKey {
    fn name(&self) -> &str {
        "command line"
    }

    fn resolve(&self) -> Result<Option<String>, CredentialError> {
        Ok(non_blank(self.0.clone()))
    }
}

/// `[openai] api_key = "…"` in a TOML secrets file. A missing file is not an error.
pub struct SecretsFile {
    path: PathBuf,
}

#[derive(Deserialize)]
struct SecretsContents {
    openai: Option<OpenAiSection>,
}

#[derive(Deserialize)]
struct OpenAiSection {
    api_key: Option<String>,
}

impl SecretsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialSource for SecretsFile {
    fn name(&self) -> &str {
        "secrets file"
    }

    fn resolve(&self) -> Result<Option<String>, CredentialError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No secrets file at {}", self.path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(CredentialError::SecretsUnreadable {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let contents: SecretsContents =
            toml::from_str(&text).map_err(|e| CredentialError::SecretsMalformed {
                path: self.path.clone(),
                detail: e.message().to_string(),
            })?;

        Ok(non_blank(contents.openai.and_then(|s| s.api_key)))
    }
}

/// An environment variable.
pub struct EnvVar {
    var: String,
}

impl EnvVar {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn openai() -> Self {
        Self::new(OPENAI_API_KEY_VAR)
    }
}

impl CredentialSource for EnvVar {
    fn name(&self) -> &str {
        &self.var
    }

    fn resolve(&self) -> Result<Option<String>, CredentialError> {
        Ok(non_blank(std::env::var(&self.var).ok()))
    }
}

/// Ask on the terminal. Yields nothing when stdin is not a TTY.
pub struct Interactive;

impl CredentialSource for Interactive {
    fn name(&self) -> &str {
        "interactive prompt"
    }

    fn resolve(&self) -> Result<Option<String>, CredentialError> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Ok(None);
        }

        let mut stderr = std::io::stderr();
        write!(stderr, "OpenAI API key: ").map_err(CredentialError::Prompt)?;
        stderr.flush().map_err(CredentialError::Prompt)?;

        let mut line = String::new();
        stdin
            .lock()
            .read_line(&mut line)
            .map_err(CredentialError::Prompt)?;
        Ok(non_blank(Some(line)))
    }
}

/// A key plus where it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub source: String,
    pub secret: String,
}

impl fmt::Debug for ResolvedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedCredential")
            .field("source", &self.source)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Ordered list of sources; the first one that yields a key wins.
#[derive(Default)]
pub struct CredentialChain {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl CredentialSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// command line → secrets file → `OPENAI_API_KEY` → prompt (if `interactive`).
    pub fn standard(
        explicit: Option<String>,
        secrets_path: impl Into<PathBuf>,
        interactive: bool,
    ) -> Self {
        let chain = Self::new()
            .with(ExplicitKey(explicit))
            .with(SecretsFile::new(secrets_path))
            .with(EnvVar::openai());
        if interactive {
            chain.with(Interactive)
        } else {
            chain
        }
    }

    pub fn resolve(&self) -> Result<Option<ResolvedCredential>, CredentialError> {
        for source in &self.sources {
            if let Some(secret) = source.resolve()? {
                info!("API key resolved from {}", source.name());
                return Ok(Some(ResolvedCredential {
                    source: source.name().to_string(),
                    secret,
                }));
            }
            debug!("No API key from {}", source.name());
        }
        Ok(None)
    }
}
