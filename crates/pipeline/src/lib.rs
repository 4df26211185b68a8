// tessera-pipeline: non-destructive image asset pipeline.

pub mod access;
pub mod compositor;
pub mod config;
pub mod lifecycle;
pub mod pipeline;
pub mod schedule;
pub mod security;
pub mod store;

pub use pipeline::{AssetPipeline, EditOutcome, EditRequest, ImportRequest, OriginalPolicy};
