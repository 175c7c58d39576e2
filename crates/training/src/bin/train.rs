use std::{
    path::PathBuf,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use clap::Parser;
use model::{AttentionDecoder, BidirectionalEncoder, Decoder, Encoder, PlainDecoder, RecurrentEncoder};
use serde_json::{Map, Number, Value};
use training::{DecoderKind, EncoderKind, Trainer, TrainingConfig, TrainingError};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("training failed: {}", err);
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Attention encoder-decoder training CLI", long_about = None)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to training config file"
    )]
    config: PathBuf,

    #[arg(
        long = "override",
        value_name = "KEY=VALUE",
        help = "Override configuration value using dot-separated paths"
    )]
    overrides: Vec<OverrideArg>,

    #[arg(long, help = "Resume from the latest checkpoint if available")]
    resume: bool,
}

#[derive(Debug, Clone)]
struct OverrideArg {
    path: String,
    value: String,
}

impl FromStr for OverrideArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| "override must be in the form key=value".to_string())?;
        if path.trim().is_empty() {
            return Err("override key must not be empty".into());
        }
        Ok(Self {
            path: path.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

fn run() -> Result<(), TrainingError> {
    let args = Args::parse();

    let mut config = TrainingConfig::load(&args.config)?;
    if !args.overrides.is_empty() {
        config = apply_overrides(config, &args.overrides)?;
    }

    config.validate()?;

    match (config.model.encoder, config.model.decoder) {
        (EncoderKind::Bidirectional, DecoderKind::Attention) => {
            train::<BidirectionalEncoder, AttentionDecoder>(config, args.resume)
        }
        (EncoderKind::Bidirectional, DecoderKind::Plain) => {
            train::<BidirectionalEncoder, PlainDecoder>(config, args.resume)
        }
        (EncoderKind::Recurrent, DecoderKind::Attention) => {
            train::<RecurrentEncoder, AttentionDecoder>(config, args.resume)
        }
        (EncoderKind::Recurrent, DecoderKind::Plain) => {
            train::<RecurrentEncoder, PlainDecoder>(config, args.resume)
        }
    }
}

fn train<E, D>(config: TrainingConfig, resume: bool) -> Result<(), TrainingError>
where
    E: Encoder + 'static,
    D: Decoder + 'static,
{
    let mut trainer = Trainer::<E, D>::new(config)?;

    if resume {
        if let Some(descriptor) = trainer.resume_from_latest()? {
            log::info!(
                "resumed from checkpoint {} (step {})",
                descriptor.directory.display(),
                descriptor.manifest.step
            );
        }
    }

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown_flag.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .map_err(|err| TrainingError::runtime(format!("failed to install signal handler: {err}")))?;

    trainer.train_with_shutdown(|| shutdown_flag.load(Ordering::Relaxed))
}

fn apply_overrides(
    config: TrainingConfig,
    overrides: &[OverrideArg],
) -> Result<TrainingConfig, TrainingError> {
    let mut value = serde_json::to_value(config).map_err(|err| {
        TrainingError::runtime(format!("failed to serialize config for overrides: {err}"))
    })?;

    for override_arg in overrides {
        let new_value = parse_override_value(&override_arg.value);
        set_value_at_path(&mut value, &override_arg.path, new_value)?;
    }

    serde_json::from_value(value).map_err(|err| {
        TrainingError::runtime(format!(
            "failed to deserialize config after overrides: {err}"
        ))
    })
}

fn parse_override_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if trimmed.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(int_val) = trimmed.parse::<i64>() {
        return Value::Number(Number::from(int_val));
    }
    if let Ok(float_val) = trimmed.parse::<f64>() {
        if let Some(number) = Number::from_f64(float_val) {
            return Value::Number(number);
        }
    }
    if trimmed.starts_with('[') || trimmed.starts_with('{') {
        if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
            return json_val;
        }
    }
    Value::String(trimmed.to_string())
}

/// Sets `model.dim_rnn`, `data.train_sets[1]` style paths, creating
/// intermediate objects and arrays as needed.
fn set_value_at_path(target: &mut Value, path: &str, new_value: Value) -> Result<(), TrainingError> {
    let segments = parse_path(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Err(TrainingError::runtime("override path must not be empty"));
    };

    let mut current = target;
    for segment in parents {
        current = descend(current, segment)?;
    }
    *descend(current, last)? = new_value;
    Ok(())
}

#[derive(Debug)]
struct PathSegment {
    key: String,
    index: Option<usize>,
}

fn parse_path(path: &str) -> Result<Vec<PathSegment>, TrainingError> {
    path.split('.')
        .map(|segment| {
            if let Some((base, idx_part)) = segment.split_once('[') {
                let idx_str = idx_part.trim_end_matches(']');
                let index = idx_str.parse::<usize>().map_err(|err| {
                    TrainingError::runtime(format!(
                        "invalid index in override path '{}': {}",
                        segment, err
                    ))
                })?;
                Ok(PathSegment {
                    key: base.to_string(),
                    index: Some(index),
                })
            } else {
                Ok(PathSegment {
                    key: segment.to_string(),
                    index: None,
                })
            }
        })
        .collect()
}

fn descend<'a>(current: &'a mut Value, segment: &PathSegment) -> Result<&'a mut Value, TrainingError> {
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    let map = current.as_object_mut().ok_or_else(|| {
        TrainingError::runtime(format!(
            "override path segment '{}' points into a non-object value",
            segment.key
        ))
    })?;
    let entry = map.entry(segment.key.clone()).or_insert(Value::Null);

    let Some(index) = segment.index else {
        return Ok(entry);
    };
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    let array = entry.as_array_mut().ok_or_else(|| {
        TrainingError::runtime(format!(
            "override path segment '{}' expects array value",
            segment.key
        ))
    })?;
    if array.len() <= index {
        array.resize(index + 1, Value::Null);
    }
    Ok(&mut array[index])
}
