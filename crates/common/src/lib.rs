// tessera-common: shared types and utilities for the Tessera workspace

pub mod aspect;
pub mod error;
pub mod path;
pub mod types;
