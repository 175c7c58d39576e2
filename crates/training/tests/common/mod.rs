use std::{fmt::Write as _, fs, path::Path};

use training::TrainingConfig;

/// Writes a 12-line parallel corpus of ids below 20 plus a config next to it.
pub fn write_fixture(dir: &Path, extra: &str) -> anyhow::Result<TrainingConfig> {
    let mut source = String::new();
    let mut target = String::new();
    for line in 0..12u32 {
        let len = 1 + (line % 6) as usize;
        let ids: Vec<String> = (0..len).map(|i| (1 + (line + i as u32) % 19).to_string()).collect();
        writeln!(source, "{}", ids.join(" "))?;
        let ids: Vec<String> = (0..len).rev().map(|i| (1 + (2 * line + i as u32) % 19).to_string()).collect();
        writeln!(target, "{}", ids.join(" "))?;
    }
    fs::write(dir.join("train.src"), source)?;
    fs::write(dir.join("train.trg"), target)?;

    let config = format!(
        r#"
[model]
dim_vocabs = [20, 20]
dim_emb = 4
dim_rnn = 4
max_length = 12
seed = 3

[data]
train_sets = ["train.src", "train.trg"]
mini_batch = 4

[runtime]
epochs = 2
log_every_n_steps = 1

{extra}
"#
    );
    let path = dir.join("train.toml");
    fs::write(&path, config)?;
    Ok(TrainingConfig::load(&path)?)
}
