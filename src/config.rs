use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::alphabet::Alphabet;
use crate::constants::{DEFAULT_BUFFER_CAPACITY, DEFAULT_QUEUE_CAPACITY};
use crate::hashing::HashKind;
use crate::kmer::KeyTransform;

/// Which map variant backs the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Single value per key, first insert wins.
    HashMap,
    /// Every occurrence stored.
    HashMultimap,
    /// Inserts merge through a binary reduction.
    Reduction,
    /// Occurrence counting.
    Counting,
}

#[derive(Debug, Deserialize)]
pub struct ConfigFile {
    pub index: IndexConfig,
}

/// Index construction options, one field per knob the library exposes.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    pub k: usize,
    #[serde(default = "default_alphabet")]
    pub alphabet: Alphabet,
    pub storage: StorageKind,
    #[serde(default)]
    pub key_transform: KeyTransform,
    #[serde(default)]
    pub dist_hash: HashKind,
    #[serde(default)]
    pub local_hash: HashKind,
    /// Backpressure point of the outbound send queue, in elements.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Size of each per-destination outbound buffer, in bytes.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

fn default_alphabet() -> Alphabet {
    Alphabet::Dna2
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

pub fn parse_config(path: &Path) -> Result<ConfigFile> {
    let contents = fs::read_to_string(path)
        .context(format!("Failed to read config file: {}", path.display()))?;

    let config: ConfigFile = toml::from_str(&contents).context("Failed to parse TOML config")?;

    validate_config(&config.index)?;
    Ok(config)
}

/// Reject option combinations the library cannot construct.
pub fn validate_config(config: &IndexConfig) -> Result<()> {
    if config.k == 0 {
        return Err(anyhow!("Config error: k must be positive"));
    }
    let max_k = config.alphabet.max_k();
    if config.k > max_k {
        return Err(anyhow!(
            "Config error: k = {} does not fit a packed word for {:?} (max {})",
            config.k,
            config.alphabet,
            max_k
        ));
    }
    if config.queue_capacity == 0 {
        return Err(anyhow!("Config error: queue_capacity must be positive"));
    }
    if config.buffer_capacity == 0 {
        return Err(anyhow!("Config error: buffer_capacity must be positive"));
    }
    Ok(())
}
