//! Building blocks for recurrent encoder-decoder models.
//!
//! The [`graph::Graph`] arena owns named parameters and per-build memory
//! accounting. Layers resolve their parameters from it by name, so a model is
//! fully described by its parameter roster and can be rebuilt for every batch.

pub mod activations;
pub mod affine;
pub mod archive;
pub mod checks;
pub mod graph;
pub mod gru;
pub mod init;

pub use affine::{Affine, AffineConfig};
pub use graph::{Graph, ParameterSpec};
pub use gru::{Gru, GruNames, GruWeights};
pub use init::ParamInit;
