pub mod checkpoint;
pub mod config;
pub mod data;
mod files;
pub mod metrics;
pub mod optimizer;
pub mod prober;
pub mod stats;
pub mod trainer;

pub use config::{DecoderKind, EncoderKind, TrainingConfig, TrainingError};
pub use data::{read_corpus, BatchGenerator};
pub use metrics::{StepSnapshot, TrainingMetrics};
pub use optimizer::TrainerOptimizer;
pub use prober::{collect_stats, spawn_collect_stats, CapacityProbe, ProbeHandle, ProbeSettings};
pub use stats::{BatchStats, CapacityEntry};
pub use trainer::Trainer;
