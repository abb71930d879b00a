//! Simulator configuration, loaded from TOML via `serde`, following a
//! validate-then-load pattern: read the file, parse it, apply defaults for
//! anything absent, and surface any failure as an `anyhow::Error` with
//! file-path context. Nothing here touches the simulation's internal
//! logic, which never sees a `Result`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_seed() -> u64 {
    42
}

fn default_tick_dt_ms() -> u64 {
    1000
}

fn default_agent_count() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// Top-level simulator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Seed for the engine's single `StdRng`. All randomness in the
    /// simulation — agent wander angles, path-loss noise, scan-interval
    /// jitter — is drawn from the RNG this seeds; nothing ever calls
    /// `rand::thread_rng()`, so a given seed reproduces a run exactly.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Default simulation tick size in milliseconds, used by the driver
    /// binary when no explicit `--dt` is given.
    #[serde(default = "default_tick_dt_ms")]
    pub tick_dt_ms: u64,

    /// Default number of agents to spawn if a scene doesn't specify one.
    #[serde(default = "default_agent_count")]
    pub default_agent_count: usize,

    #[serde(default)]
    pub features: FeatureToggles,
}

/// Feature toggles gating optional subsystems.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureToggles {
    /// Whether links apply wall/material RSSI attenuation. Disabling
    /// this is useful for tests that want a pure free-space model.
    #[serde(default = "default_true")]
    pub wall_attenuation: bool,

    /// Whether agents route through `StuckRecovery` when blocked, or just
    /// stay blocked (useful for isolating locomotion bugs in tests).
    #[serde(default = "default_true")]
    pub stuck_recovery: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        FeatureToggles {
            wall_attenuation: default_true(),
            stuck_recovery: default_true(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            seed: default_seed(),
            tick_dt_ms: default_tick_dt_ms(),
            default_agent_count: default_agent_count(),
            features: FeatureToggles::default(),
        }
    }
}

impl SimulatorConfig {
    /// Load configuration from a TOML file, applying defaults for any
    /// absent field. Missing file or malformed TOML surfaces as an
    /// `anyhow::Error` carrying the path for context.
    pub fn load(path: impl AsRef<Path>) -> Result<SimulatorConfig> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}
