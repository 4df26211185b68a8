// OS access boundary: probing direct readability, activating stored
// capability tokens, and asking the user for new grants.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use super::tokens::CapabilityToken;
use crate::security::SEAL_KEY_BYTES;

const TOKEN_MAGIC: [u8; 4] = *b"TCT1";
const TOKEN_HEADER_BYTES: usize = 16;
const TOKEN_DIGEST_BYTES: usize = 32;
const DEFAULT_TOKEN_MAX_AGE_DAYS: i64 = 30;

/// Result of checking whether a path is readable without any token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Readable,
    Unreadable,
    Missing,
}

/// A token that was accepted by the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Directory (or file) the token grants access to.
    pub scope: PathBuf,
    /// The token still works but should be replaced with a fresh one.
    pub stale: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("capability token is malformed")]
    Malformed,
    #[error("capability token was not issued by this host")]
    Forged,
}

/// Asks the user whether to grant access to a directory.
pub trait GrantPrompt: Send + Sync {
    fn confirm(&self, dir: &Path) -> bool;
}

impl<F> GrantPrompt for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn confirm(&self, dir: &Path) -> bool {
        self(dir)
    }
}

/// The platform's file access model.
pub trait AccessPolicy: Send + Sync {
    /// Check direct access to `path` with no token involved.
    fn probe(&self, path: &Path) -> Probe;

    /// Start using a stored token for this session.
    fn activate(&self, token: &CapabilityToken) -> Result<Activation, TokenError>;

    /// Run the user-facing grant flow for `dir`. `None` means the user refused.
    fn request_grant(&self, dir: &Path) -> Option<CapabilityToken>;

    /// Issue a replacement for a stale token whose scope is already active.
    fn refresh(&self, scope: &Path) -> Option<CapabilityToken>;
}

/// Seals scope paths into tokens only this host can validate.
#[derive(Clone)]
pub struct TokenSealer {
    key: [u8; SEAL_KEY_BYTES],
    max_age: Duration,
}

impl std::fmt::Debug for TokenSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSealer").field("max_age", &self.max_age).finish_non_exhaustive()
    }
}

impl TokenSealer {
    pub fn new(key: [u8; SEAL_KEY_BYTES]) -> Self {
        Self { key, max_age: Duration::days(DEFAULT_TOKEN_MAX_AGE_DAYS) }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn seal(&self, scope: &Path) -> CapabilityToken {
        self.seal_at(scope, Utc::now())
    }

    pub fn seal_at(&self, scope: &Path, issued_at: DateTime<Utc>) -> CapabilityToken {
        let scope = scope.to_string_lossy();
        let scope_bytes = scope.as_bytes();
        let mut body = Vec::with_capacity(TOKEN_HEADER_BYTES + scope_bytes.len() + TOKEN_DIGEST_BYTES);
        body.extend_from_slice(&TOKEN_MAGIC);
        body.extend_from_slice(&issued_at.timestamp().to_le_bytes());
        body.extend_from_slice(&(scope_bytes.len() as u32).to_le_bytes());
        body.extend_from_slice(scope_bytes);
        let digest = self.digest(&body);
        body.extend_from_slice(&digest);
        CapabilityToken::from_bytes(body)
    }

    pub fn unseal(&self, token: &CapabilityToken) -> Result<Activation, TokenError> {
        let bytes = token.as_bytes();
        if bytes.len() < TOKEN_HEADER_BYTES + TOKEN_DIGEST_BYTES || bytes[..4] != TOKEN_MAGIC {
            return Err(TokenError::Malformed);
        }

        let issued_secs =
            i64::from_le_bytes(bytes[4..12].try_into().map_err(|_| TokenError::Malformed)?);
        let scope_len =
            u32::from_le_bytes(bytes[12..16].try_into().map_err(|_| TokenError::Malformed)?)
                as usize;
        let body_len = TOKEN_HEADER_BYTES + scope_len;
        if bytes.len() != body_len + TOKEN_DIGEST_BYTES {
            return Err(TokenError::Malformed);
        }

        let (body, digest) = bytes.split_at(body_len);
        if self.digest(body).as_slice() != digest {
            return Err(TokenError::Forged);
        }

        let scope = std::str::from_utf8(&body[TOKEN_HEADER_BYTES..])
            .map_err(|_| TokenError::Malformed)?;
        let issued_at = Utc.timestamp_opt(issued_secs, 0).single().ok_or(TokenError::Malformed)?;
        let stale = Utc::now().signed_duration_since(issued_at) > self.max_age;

        Ok(Activation { scope: PathBuf::from(scope), stale })
    }

    fn digest(&self, body: &[u8]) -> [u8; TOKEN_DIGEST_BYTES] {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(body);
        hasher.update(self.key);
        hasher.finalize().into()
    }
}

/// Check readability by opening the file.
pub fn probe_direct(path: &Path) -> Probe {
    match fs::File::open(path) {
        Ok(_) => Probe::Readable,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Probe::Missing,
        Err(error) => {
            debug!(path = %path.display(), error = %error, "direct open failed");
            Probe::Unreadable
        }
    }
}

/// Unsandboxed hosts: plain filesystem permissions decide readability and
/// tokens only remember which directories the user picked.
pub struct DirectAccess {
    sealer: TokenSealer,
    prompt: Box<dyn GrantPrompt>,
}

impl DirectAccess {
    pub fn new(sealer: TokenSealer, prompt: impl GrantPrompt + 'static) -> Self {
        Self { sealer, prompt: Box::new(prompt) }
    }
}

impl AccessPolicy for DirectAccess {
    fn probe(&self, path: &Path) -> Probe {
        probe_direct(path)
    }

    fn activate(&self, token: &CapabilityToken) -> Result<Activation, TokenError> {
        self.sealer.unseal(token)
    }

    fn request_grant(&self, dir: &Path) -> Option<CapabilityToken> {
        self.prompt.confirm(dir).then(|| self.sealer.seal(dir))
    }

    fn refresh(&self, scope: &Path) -> Option<CapabilityToken> {
        Some(self.sealer.seal(scope))
    }
}

/// Sandboxed hosts: a path is readable only inside a scope activated this
/// session, either through a fresh grant or a stored token.
pub struct ScopedSandbox {
    sealer: TokenSealer,
    prompt: Box<dyn GrantPrompt>,
    active: RwLock<BTreeSet<PathBuf>>,
}

impl ScopedSandbox {
    pub fn new(sealer: TokenSealer, prompt: impl GrantPrompt + 'static) -> Self {
        Self { sealer, prompt: Box::new(prompt), active: RwLock::new(BTreeSet::new()) }
    }

    pub fn active_scopes(&self) -> Vec<PathBuf> {
        self.active.read().map(|scopes| scopes.iter().cloned().collect()).unwrap_or_default()
    }

    fn in_scope(&self, path: &Path) -> bool {
        self.active
            .read()
            .map(|scopes| scopes.iter().any(|scope| path.starts_with(scope)))
            .unwrap_or(false)
    }

    fn open_scope(&self, scope: &Path) {
        if let Ok(mut scopes) = self.active.write() {
            scopes.insert(scope.to_path_buf());
        }
    }
}

impl AccessPolicy for ScopedSandbox {
    fn probe(&self, path: &Path) -> Probe {
        match fs::symlink_metadata(path) {
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Probe::Missing,
            _ if !self.in_scope(path) => Probe::Unreadable,
            _ => probe_direct(path),
        }
    }

    fn activate(&self, token: &CapabilityToken) -> Result<Activation, TokenError> {
        let activation = self.sealer.unseal(token)?;
        self.open_scope(&activation.scope);
        Ok(activation)
    }

    fn request_grant(&self, dir: &Path) -> Option<CapabilityToken> {
        if !self.prompt.confirm(dir) {
            return None;
        }
        self.open_scope(dir);
        Some(self.sealer.seal(dir))
    }

    fn refresh(&self, scope: &Path) -> Option<CapabilityToken> {
        self.in_scope(scope).then(|| self.sealer.seal(scope))
    }
}
