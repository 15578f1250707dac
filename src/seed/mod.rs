//! Static seed shells for first-time population.
//!
//! A shell is the authored part of a state (id, name, description, baseline
//! stats). Shells are only used when the remote store holds no documents.

use crate::state::{Demographics, StateRecord};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Built-in shells for the 28 Indian states
const BUILTIN_SEED: &str = include_str!("../../data/seed_states.json");

/// Seed configuration
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SeedConfig {
    /// JSON file replacing the built-in seed list
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Supplies the seed shells used by bootstrap
#[derive(Clone, Debug)]
pub struct SeedProvider {
    shells: Vec<StateRecord>,
}

impl SeedProvider {
    /// Load the configured seed file, or the built-in list when none is set.
    pub fn load(config: &SeedConfig) -> Result<Self> {
        match &config.path {
            Some(path) => Self::from_file(path),
            None => Self::builtin(),
        }
    }

    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_SEED).context("Built-in seed data is invalid")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file {}", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("Invalid seed file {}", path.display()))
    }

    /// Parse a JSON array of shells and validate their ids.
    pub fn from_json(json: &str) -> Result<Self> {
        let shells: Vec<StateRecord> =
            serde_json::from_str(json).context("Failed to parse seed JSON")?;

        let mut seen = HashSet::new();
        for shell in &shells {
            validate_id(&shell.id)?;
            if !seen.insert(shell.id.as_str()) {
                bail!("Duplicate seed id '{}'", shell.id);
            }
        }

        Ok(Self::from_shells(shells))
    }

    /// Wrap shells as-is, resetting any dynamic fields they carry.
    pub fn from_shells(shells: Vec<StateRecord>) -> Self {
        let shells = shells
            .into_iter()
            .map(|mut shell| {
                shell.demographics = Demographics::default();
                shell.political_climate = String::new();
                shell.last_refreshed_at = 0;
                shell
            })
            .collect();

        Self { shells }
    }

    /// Fresh copies of every shell
    pub fn shells(&self) -> Vec<StateRecord> {
        self.shells.clone()
    }

    pub fn len(&self) -> usize {
        self.shells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }
}

/// Validate that a state id is URL-safe: non-empty, `[a-z0-9-]` only.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("State id must not be empty");
    }

    for c in id.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            bail!("Invalid character '{}' in state id '{}' (must be [a-z0-9-])", c, id);
        }
    }

    Ok(())
}
