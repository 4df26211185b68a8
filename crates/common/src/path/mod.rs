// Identifier and path-key normalization.

pub mod normalize;

pub use normalize::{normalize_asset_id, token_key, IdentifierError};
