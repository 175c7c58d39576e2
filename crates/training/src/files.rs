//! JSON and checksum helpers shared by checkpoints and the capacity cache.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::Path,
};

use hex::encode as hex_encode;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use crate::TrainingError;

fn io_error(action: &str, path: &Path, err: impl std::fmt::Display) -> TrainingError {
    TrainingError::runtime(format!("failed to {action} {}: {err}", path.display()))
}

/// Writes `value` as pretty JSON, creating missing parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), TrainingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| io_error("create", parent, err))?;
    }
    let file = File::create(path).map_err(|err| io_error("create", path, err))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|err| io_error("serialize", path, err))?;
    writer
        .write_all(b"\n")
        .and_then(|_| writer.flush())
        .map_err(|err| io_error("write", path, err))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, TrainingError> {
    let file = File::open(path).map_err(|err| io_error("open", path, err))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| io_error("parse", path, err))
}

/// Hex SHA-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, TrainingError> {
    let mut file = File::open(path).map_err(|err| io_error("open", path, err))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|err| io_error("read", path, err))?;
    Ok(hex_encode(hasher.finalize()))
}

/// Hex SHA-256 of in-memory bytes.
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex_encode(Sha256::digest(bytes))
}
