//! Attention encoder-decoder models.
//!
//! An [`EncoderDecoder`] owns a [`layers::Graph`] plus one [`Encoder`] and one
//! [`Decoder`]. Training builds the whole target sequence in one unrolled
//! decoder step; search drives [`EncoderDecoder::start_state`],
//! [`EncoderDecoder::select_embeddings`] and [`EncoderDecoder::step`] one
//! position at a time.

pub mod batch;
pub mod config;
pub mod decoder;
pub mod encdec;
pub mod encoder;
pub mod error;
pub mod loss;
pub mod states;

pub use batch::{CorpusBatch, SentenceTuple, SubBatch};
pub use config::ModelConfig;
pub use decoder::{AttentionDecoder, Decoder, PlainDecoder, TargetBatch};
pub use encdec::{config_side_path, EncoderDecoder, Nematus};
pub use encoder::{BidirectionalEncoder, Encoder, RecurrentEncoder};
pub use error::{ModelError, Result};
pub use loss::{CrossEntropyLoss, LossMetrics, LossOutput};
pub use states::{DecoderState, EncoderState};
