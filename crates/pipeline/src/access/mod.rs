// Permission-scoped file resolution.
//
// A stored path is never proof of access on its own: every session re-probes
// it and, when direct access fails, re-activates the document's stored token.

pub mod policy;
pub mod tokens;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_common::error::{PipelineError, Result};
use tessera_common::types::FileRef;
use tracing::{debug, info, warn};

use crate::store::managed::{AssetKind, ManagedStore};
use policy::{AccessPolicy, Probe};
use tokens::{CapabilityToken, TokenTable};

/// A location that is readable right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub path: PathBuf,
    /// Reached through a stored or freshly granted token.
    pub via_token: bool,
}

/// Outcome of [`PermissionResolver::resolve`]. Needing permission is an
/// ordinary state, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Ready(Location),
    NeedsPermission,
    NotFound,
}

impl Resolution {
    pub fn into_result(self, path: &Path) -> Result<Location> {
        match self {
            Self::Ready(location) => Ok(location),
            Self::NeedsPermission => Err(PipelineError::NeedsPermission { path: path.to_path_buf() }),
            Self::NotFound => Err(PipelineError::NotFound { path: path.to_path_buf() }),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

#[derive(Clone)]
pub struct PermissionResolver {
    policy: Arc<dyn AccessPolicy>,
}

impl PermissionResolver {
    pub fn new(policy: Arc<dyn AccessPolicy>) -> Self {
        Self { policy }
    }

    /// Find a readable location for `path`.
    ///
    /// Direct access wins. Otherwise each token stored for the path or one of
    /// its ancestors is activated in turn; a stale token is replaced in
    /// `tokens` before returning.
    pub fn resolve(&self, path: &Path, tokens: &mut TokenTable) -> Resolution {
        match self.policy.probe(path) {
            Probe::Readable => {
                return Resolution::Ready(Location { path: path.to_path_buf(), via_token: false })
            }
            Probe::Missing => return Resolution::NotFound,
            Probe::Unreadable => {}
        }

        let candidates: Vec<(String, CapabilityToken)> = tokens
            .candidates_for(path)
            .into_iter()
            .map(|(key, stored)| (key, stored.token.clone()))
            .collect();
        if candidates.is_empty() {
            debug!(path = %path.display(), "no stored token; permission needed");
            return Resolution::NeedsPermission;
        }

        for (key, token) in candidates {
            let activation = match self.policy.activate(&token) {
                Ok(activation) => activation,
                Err(error) => {
                    warn!(key = %key, error = %error, "stored token rejected");
                    continue;
                }
            };

            if activation.stale {
                self.renew(&key, &activation.scope, tokens);
            }

            match self.policy.probe(path) {
                Probe::Readable => {
                    debug!(path = %path.display(), key = %key, "resolved through stored token");
                    return Resolution::Ready(Location { path: path.to_path_buf(), via_token: true });
                }
                Probe::Missing => return Resolution::NotFound,
                Probe::Unreadable => continue,
            }
        }

        Resolution::NeedsPermission
    }

    /// Resolve a record's file reference. Managed files need no token.
    pub fn resolve_ref(
        &self,
        file: &FileRef,
        kind: AssetKind,
        store: &ManagedStore,
        tokens: &mut TokenTable,
    ) -> Result<Location> {
        match file {
            FileRef::Managed { id } => match store.locate(kind, id)? {
                Some(path) => Ok(Location { path, via_token: false }),
                None => Err(PipelineError::NotFound { path: store.dir(kind).join(id.as_str()) }),
            },
            FileRef::External { path, .. } => self.resolve(path, tokens).into_result(path),
        }
    }

    /// Record `token` for `path` in this document's table.
    pub fn store_token(
        &self,
        token: CapabilityToken,
        path: &Path,
        tokens: &mut TokenTable,
    ) -> Result<String> {
        let key = tokens.insert(path, token)?;
        debug!(key = %key, "stored capability token");
        Ok(key)
    }

    /// Ask the user for access to the directory containing `path` and store
    /// the resulting token keyed by `path`.
    pub fn request_access(&self, path: &Path, tokens: &mut TokenTable) -> Result<Location> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(path);

        let Some(token) = self.policy.request_grant(dir) else {
            info!(dir = %dir.display(), "access grant refused");
            return Err(PipelineError::Denied { path: path.to_path_buf() });
        };

        if let Err(error) = self.policy.activate(&token) {
            warn!(error = %error, "freshly granted token could not be activated");
            return Err(PipelineError::Denied { path: path.to_path_buf() });
        }
        self.store_token(token, path, tokens)?;
        info!(dir = %dir.display(), "access granted");

        match self.policy.probe(path) {
            Probe::Readable => Ok(Location { path: path.to_path_buf(), via_token: true }),
            Probe::Missing => Err(PipelineError::NotFound { path: path.to_path_buf() }),
            Probe::Unreadable => Err(PipelineError::Denied { path: path.to_path_buf() }),
        }
    }

    /// Drop any token stored for exactly `path`.
    pub fn forget(&self, path: &Path, tokens: &mut TokenTable) -> bool {
        tokens.remove(path).is_some()
    }

    fn renew(&self, key: &str, scope: &Path, tokens: &mut TokenTable) {
        let Some(fresh) = self.policy.refresh(scope) else {
            warn!(key = %key, "stale token could not be refreshed");
            return;
        };
        match tokens.insert(Path::new(key), fresh) {
            Ok(_) => info!(key = %key, "refreshed stale capability token"),
            Err(error) => warn!(key = %key, error = %error, "failed to store refreshed token"),
        }
    }
}
