use candle_core::Device;
use model::{ModelConfig, ModelError};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub model: ModelSection,
    pub data: DataConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl TrainingConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: TrainingConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrainingError> {
        Self::from_path(path)
    }

    /// Collects every configuration problem before failing.
    pub fn validate(&self) -> Result<(), TrainingError> {
        let mut errors = Vec::new();

        if let Err(err) = self.model.config.validate() {
            errors.push(err.to_string());
        }

        if self.data.train_sets.is_empty() {
            errors.push("data.train_sets must not be empty".to_string());
        } else if self.data.train_sets.len() != self.model.config.dim_vocabs.len() {
            errors.push(format!(
                "data.train_sets lists {} files but model.dim_vocabs has {} entries",
                self.data.train_sets.len(),
                self.model.config.dim_vocabs.len()
            ));
        }

        if self.data.mini_batch == 0 {
            errors.push("data.mini_batch must be greater than 0".to_string());
        }

        if self.data.max_length == 0 {
            errors.push("data.max_length must be greater than 0".to_string());
        }

        if self.batching.probe_step == 0 {
            errors.push("batching.probe_step must be greater than 0".to_string());
        }

        if self.batching.probe_max_length < self.batching.probe_step {
            errors.push("batching.probe_max_length must be >= batching.probe_step".to_string());
        }

        if self.batching.probe_max_batch < self.batching.probe_step {
            errors.push("batching.probe_max_batch must be >= batching.probe_step".to_string());
        }

        if let Some(0) = self.batching.workspace_mb {
            errors.push("batching.workspace_mb must be greater than 0".to_string());
        }

        if self.batching.dynamic && self.batching.workspace_mb.is_none() {
            errors.push("batching.dynamic requires batching.workspace_mb".to_string());
        }

        if self.optimizer.learning_rate <= 0.0 {
            errors.push("optimizer.learning_rate must be greater than 0".to_string());
        }

        if self.optimizer.weight_decay < 0.0 {
            errors.push("optimizer.weight_decay must be >= 0".to_string());
        }

        if !(0.0 < self.optimizer.beta1 && self.optimizer.beta1 < 1.0) {
            errors.push("optimizer.beta1 must be in (0, 1)".to_string());
        }

        if !(0.0 < self.optimizer.beta2 && self.optimizer.beta2 < 1.0) {
            errors.push("optimizer.beta2 must be in (0, 1)".to_string());
        }

        if self.optimizer.epsilon <= 0.0 {
            errors.push("optimizer.epsilon must be greater than 0".to_string());
        }

        if self.runtime.epochs == 0 {
            errors.push("runtime.epochs must be greater than 0".to_string());
        }

        if self.runtime.log_every_n_steps == 0 {
            errors.push("runtime.log_every_n_steps must be greater than 0".to_string());
        }

        if let Some(checkpoint) = &self.runtime.checkpoint {
            if checkpoint.directory.as_os_str().is_empty() {
                errors.push("runtime.checkpoint.directory must not be empty".to_string());
            }
            if checkpoint.every_n_steps == 0 {
                errors.push("runtime.checkpoint.every_n_steps must be greater than 0".to_string());
            }
            if let Some(0) = checkpoint.max_keep {
                errors.push("runtime.checkpoint.max_keep must be greater than 0".to_string());
            }
        }

        if !errors.is_empty() {
            return Err(TrainingError::validation(errors));
        }

        Ok(())
    }

    fn apply_base_path(&mut self, base: &Path) {
        self.data.apply_base_path(base);
        self.batching.apply_base_path(base);
        self.runtime.apply_base_path(base);
    }
}

/// Model hyperparameters plus the encoder/decoder pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    #[serde(default)]
    pub encoder: EncoderKind,
    #[serde(default)]
    pub decoder: DecoderKind,
    #[serde(flatten)]
    pub config: ModelConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    #[default]
    Bidirectional,
    Recurrent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    #[default]
    Attention,
    Plain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// One token-id file per stream, sources first and target last.
    pub train_sets: Vec<PathBuf>,
    #[serde(default = "default_mini_batch")]
    pub mini_batch: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
}

impl DataConfig {
    fn apply_base_path(&mut self, base: &Path) {
        for path in &mut self.train_sets {
            absolutize_in_place(path, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default = "default_probe_step")]
    pub probe_step: usize,
    #[serde(default = "default_max_length")]
    pub probe_max_length: usize,
    #[serde(default = "default_probe_max_batch")]
    pub probe_max_batch: usize,
    #[serde(default)]
    pub workspace_mb: Option<usize>,
    #[serde(default)]
    pub probe_in_background: bool,
    /// Capacity table cache; probed once and reused when present.
    #[serde(default)]
    pub stats_cache: Option<PathBuf>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            dynamic: false,
            probe_step: default_probe_step(),
            probe_max_length: default_max_length(),
            probe_max_batch: default_probe_max_batch(),
            workspace_mb: None,
            probe_in_background: false,
            stats_cache: None,
        }
    }
}

impl BatchingConfig {
    fn apply_base_path(&mut self, base: &Path) {
        if let Some(path) = self.stats_cache.as_mut() {
            absolutize_in_place(path, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub algorithm: OptimizerType,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_adam_eps")]
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            algorithm: OptimizerType::default(),
            learning_rate: default_learning_rate(),
            weight_decay: 0.0,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_adam_eps(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerType {
    #[default]
    AdamW,
    Sgd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub device: DeviceKind,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_log_every_n_steps")]
    pub log_every_n_steps: usize,
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
    /// Final model archive, written with its configuration side file.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            device: DeviceKind::default(),
            epochs: default_epochs(),
            log_every_n_steps: default_log_every_n_steps(),
            checkpoint: None,
            output: None,
        }
    }
}

impl RuntimeConfig {
    fn apply_base_path(&mut self, base: &Path) {
        if let Some(output) = self.output.as_mut() {
            absolutize_in_place(output, base);
        }
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            absolutize_in_place(&mut checkpoint.directory, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub directory: PathBuf,
    #[serde(default = "default_checkpoint_every")]
    pub every_n_steps: usize,
    #[serde(default)]
    pub max_keep: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    #[default]
    Cpu,
    Cuda,
    /// CUDA device 0 when available, CPU otherwise.
    Auto,
}

impl DeviceKind {
    pub fn resolve(self) -> Result<Device, TrainingError> {
        match self {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Cuda => Device::new_cuda(0).map_err(|err| {
                TrainingError::initialization(format!("failed to open CUDA device 0: {err}"))
            }),
            DeviceKind::Auto => Device::cuda_if_available(0).map_err(|err| {
                TrainingError::initialization(format!("failed to select a device: {err}"))
            }),
        }
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn default_mini_batch() -> usize {
    64
}

fn default_max_length() -> usize {
    50
}

fn default_shuffle() -> bool {
    true
}

fn default_probe_step() -> usize {
    10
}

fn default_probe_max_batch() -> usize {
    1024
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_adam_eps() -> f64 {
    1e-8
}

fn default_seed() -> u64 {
    42
}

fn default_epochs() -> usize {
    1
}

fn default_log_every_n_steps() -> usize {
    100
}

fn default_checkpoint_every() -> usize {
    1000
}

#[derive(Debug)]
pub enum TrainingError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Initialization(String),
    Runtime(String),
    /// A real training batch did not fit the workspace.
    Capacity(String),
}

impl TrainingError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for TrainingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingError::Io(err) => write!(f, "i/o error: {}", err),
            TrainingError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            TrainingError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            TrainingError::Initialization(msg) => {
                write!(f, "trainer initialization failed: {}", msg)
            }
            TrainingError::Runtime(msg) => write!(f, "training failed: {}", msg),
            TrainingError::Capacity(msg) => write!(f, "out of workspace: {}", msg),
        }
    }
}

impl std::error::Error for TrainingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainingError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TrainingError {
    fn from(value: std::io::Error) -> Self {
        TrainingError::Io(value)
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(value: toml::de::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(value: serde_json::Error) -> Self {
        TrainingError::ConfigFormat(value.to_string())
    }
}

impl From<ModelError> for TrainingError {
    fn from(value: ModelError) -> Self {
        match value {
            ModelError::Config(msg) => TrainingError::Initialization(msg),
            ModelError::Capacity(msg) => TrainingError::Capacity(msg),
            other => TrainingError::Runtime(other.to_string()),
        }
    }
}
