// Document package layout.
//
// <package>/
//   document.json               slots and collection items
//   assets/originals/           managed originals
//   assets/edited/              rendered artifacts + sidecars
//   .tessera/tokens.json        per-document capability tokens (0600)
//   .tessera/pipeline.toml      optional config override

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_common::error::{PipelineError, Result};
use tessera_common::types::AssetDocument;
use tracing::{debug, warn};

use super::atomic::AtomicWriter;
use super::managed::ManagedStore;
use crate::access::tokens::TokenTable;
use crate::config::PipelineConfig;
use crate::security::ensure_owner_only_dir;

const DOCUMENT_FILE: &str = "document.json";
const ASSETS_DIR: &str = "assets";
const META_DIR: &str = ".tessera";
const TOKENS_FILE: &str = "tokens.json";

#[derive(Debug, Clone)]
pub struct DocumentPackage {
    root: PathBuf,
    store: ManagedStore,
}

impl DocumentPackage {
    /// Open a package directory, creating its layout if missing.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let meta = root.join(META_DIR);
        fs::create_dir_all(&meta).map_err(|error| {
            PipelineError::io(format!("failed to create `{}`", meta.display()), error)
        })?;
        if let Err(error) = ensure_owner_only_dir(&meta) {
            warn!(?error, path = %meta.display(), "failed to restrict package metadata dir");
        }
        let store = ManagedStore::open(root.join(ASSETS_DIR))?;
        Ok(Self { root, store })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self) -> &ManagedStore {
        &self.store
    }

    pub fn document_path(&self) -> PathBuf {
        self.root.join(DOCUMENT_FILE)
    }

    pub fn tokens_path(&self) -> PathBuf {
        self.root.join(META_DIR).join(TOKENS_FILE)
    }

    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::load(&self.root)
    }

    /// Load the document; a package without one starts empty.
    pub fn load_document(&self) -> Result<AssetDocument> {
        Ok(read_json(&self.document_path())?.unwrap_or_default())
    }

    pub fn save_document(&self, document: &AssetDocument) -> Result<()> {
        write_json(AtomicWriter::new(), document, &self.document_path())
    }

    pub fn load_tokens(&self) -> Result<TokenTable> {
        Ok(read_json(&self.tokens_path())?.unwrap_or_default())
    }

    /// Persist the token table owner-only and mark it clean.
    pub fn save_tokens(&self, tokens: &mut TokenTable) -> Result<()> {
        write_json(AtomicWriter::private(), tokens, &self.tokens_path())?;
        tokens.mark_clean();
        debug!(entries = tokens.len(), "saved token table");
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(PipelineError::io(format!("failed to read `{}`", path.display()), error))
        }
    };
    serde_json::from_slice(&bytes).map(Some).map_err(|error| {
        PipelineError::io(
            format!("`{}` is malformed", path.display()),
            std::io::Error::new(std::io::ErrorKind::InvalidData, error),
        )
    })
}

fn write_json<T: Serialize>(writer: AtomicWriter, value: &T, path: &Path) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|error| PipelineError::encode(format!("failed to encode `{}`: {error}", path.display())))?;
    writer.write(&bytes, path)
}
