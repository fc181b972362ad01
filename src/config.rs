//! Engine configuration
//!
//! Defaults live in `game::constants`; every value can be overridden through
//! `AI_*` environment variables (a `.env` file is honoured by the binary).

use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

use crate::game::constants::{ambient, engine, map};

/// Global configuration singleton
static CONFIG: OnceLock<AiConfig> = OnceLock::new();

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} must be at most {max}")]
    TooLarge { name: &'static str, max: i64 },
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Elapsed time handed to every think step
    pub tick_interval_ms: u64,
    /// Horizontal leash around the spawn anchor, 0 = unlimited
    pub despawn_radius: i32,
    /// Vertical leash around the spawn anchor, 0 = unlimited
    pub despawn_range: i32,
    pub view_range_x: i32,
    pub view_range_y: i32,
    /// Run think steps on the rayon pool
    pub parallel_enabled: bool,
    /// Base seed for per-creature random generators
    pub rng_seed: u64,
    pub max_hook_depth: usize,
    pub ambient_timeout_ms: u64,
    pub ambient_queue_capacity: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: engine::TICK_INTERVAL_MS,
            despawn_radius: 50,
            despawn_range: 2,
            view_range_x: map::VIEW_RANGE_X,
            view_range_y: map::VIEW_RANGE_Y,
            parallel_enabled: cfg!(feature = "parallel"),
            rng_seed: engine::RNG_SEED,
            max_hook_depth: engine::MAX_HOOK_DEPTH,
            ambient_timeout_ms: ambient::REQUEST_TIMEOUT_MS,
            ambient_queue_capacity: ambient::QUEUE_CAPACITY,
        }
    }
}

/// Parse `name` from the environment, keeping `current` when unset or invalid
fn env_or<T: FromStr>(name: &str, current: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("Invalid {} '{}', using default", name, raw);
                current
            }
        },
        Err(_) => current,
    }
}

/// Decimal or `0x`-prefixed hex seed
fn parse_seed(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn env_seed(name: &str, current: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => parse_seed(&raw).unwrap_or_else(|| {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            current
        }),
        Err(_) => current,
    }
}

impl AiConfig {
    /// Load config from environment or use defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let config = Self {
            tick_interval_ms: env_or("AI_TICK_INTERVAL_MS", defaults.tick_interval_ms),
            despawn_radius: env_or("AI_DESPAWN_RADIUS", defaults.despawn_radius),
            despawn_range: env_or("AI_DESPAWN_RANGE", defaults.despawn_range),
            view_range_x: env_or("AI_VIEW_RANGE_X", defaults.view_range_x),
            view_range_y: env_or("AI_VIEW_RANGE_Y", defaults.view_range_y),
            parallel_enabled: env_or("AI_PARALLEL_ENABLED", defaults.parallel_enabled),
            rng_seed: env_seed("AI_RNG_SEED", defaults.rng_seed),
            max_hook_depth: env_or("AI_MAX_HOOK_DEPTH", defaults.max_hook_depth),
            ambient_timeout_ms: env_or("AI_AMBIENT_TIMEOUT_MS", defaults.ambient_timeout_ms),
            ambient_queue_capacity: env_or("AI_AMBIENT_QUEUE_CAPACITY", defaults.ambient_queue_capacity),
        };

        tracing::info!(
            tick_ms = config.tick_interval_ms,
            despawn_radius = config.despawn_radius,
            despawn_range = config.despawn_range,
            parallel = config.parallel_enabled,
            seed = config.rng_seed,
            "AI configuration loaded"
        );

        config
    }

    /// Environment config when it validates, defaults otherwise
    pub fn load_or_default() -> Self {
        let config = Self::from_env();
        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                tracing::warn!("Invalid AI configuration ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Zero("AI_TICK_INTERVAL_MS"));
        }
        if self.view_range_x <= 0 {
            return Err(ConfigError::Zero("AI_VIEW_RANGE_X"));
        }
        if self.view_range_y <= 0 {
            return Err(ConfigError::Zero("AI_VIEW_RANGE_Y"));
        }
        if self.max_hook_depth == 0 {
            return Err(ConfigError::Zero("AI_MAX_HOOK_DEPTH"));
        }
        if self.ambient_queue_capacity == 0 {
            return Err(ConfigError::Zero("AI_AMBIENT_QUEUE_CAPACITY"));
        }
        if self.tick_interval_ms > 60_000 {
            return Err(ConfigError::TooLarge {
                name: "AI_TICK_INTERVAL_MS",
                max: 60_000,
            });
        }
        Ok(())
    }

    /// Get the global configuration (loads from env on first call)
    pub fn global() -> &'static Self {
        CONFIG.get_or_init(Self::load_or_default)
    }
}
