//! Embedding crate
//!
//! Token tables, clipped learned positions, and the combined lookup that feeds
//! recurrent encoders and decoders with `(batch, features, time)` inputs.

pub mod lookup;
pub mod positional;
pub mod token;

pub use lookup::EmbeddingLookup;
pub use positional::{clipped_position, clipped_positions, PositionEmbedding};
pub use token::{TokenEmbedding, TokenEmbeddingConfig};
