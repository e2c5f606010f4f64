use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::permuter::{PermuterKind, DEFAULT_SEED};

const DEFAULT_MAX_CRASH_STATES: usize = 1000;

/// Format of the run configuration file.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// crash state generation strategy
    pub permuter: PermuterKind,
    /// RNG seed, default 42
    pub seed: Option<u64>,
    /// stop after this many unique states, default 1000
    pub max_crash_states: Option<usize>,
    /// if set, requests of the crash epoch are torn into pieces of this size
    pub sector_size: Option<u32>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let f = File::open(path)
            .with_context(|| format!("could not open config file {}", path.display()))?;
        let config: Config = serde_yaml::from_reader(f).context("could not parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sector_size == Some(0) {
            bail!("sector_size must be greater than zero");
        }
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    pub fn max_crash_states(&self) -> usize {
        self.max_crash_states.unwrap_or(DEFAULT_MAX_CRASH_STATES)
    }
}
