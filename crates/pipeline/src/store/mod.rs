pub mod atomic;
pub mod hash;
pub mod managed;
pub mod package;
pub mod sidecar;

pub use atomic::{commit_all, AtomicWriter, StagedWrite};
pub use managed::{AssetKind, ManagedEntry, ManagedStore};
pub use package::DocumentPackage;
pub use sidecar::SidecarStore;
