//! Store, runtime and interpreter configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Environment overrides are applied on top of whatever was
//! loaded.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::slot::{DEFAULT_MAX_SLOT, DEFAULT_RESERVED_SLOTS, Slot};
use crate::store::BackendKind;

pub const ENV_STORE_BACKEND: &str = "PROCRT_STORE_BACKEND";
pub const ENV_MAX_CONCURRENT: &str = "PROCRT_MAX_CONCURRENT";
pub const ENV_SINGLE_THREAD: &str = "PROCRT_SINGLE_THREAD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub reserved_slots: u16,
    pub max_slot: Slot,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            reserved_slots: DEFAULT_RESERVED_SLOTS,
            max_slot: DEFAULT_MAX_SLOT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Admission bound on simultaneously running executions.
    pub max_concurrent: usize,
    /// Attempts `stop_all` makes before giving up.
    pub stop_all_retry_limit: usize,
    /// Finished executions kept for inspection.
    pub history_len: usize,
    /// Use a current-thread scheduler instead of the multi-thread one.
    pub single_thread: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 16,
            stop_all_retry_limit: 1000,
            history_len: 64,
            single_thread: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterpConfig {
    pub block_timeout_ms: u64,
    pub block_period_ms: u64,
    pub max_recursion_depth: usize,
    /// Node that `rmt` reads its operand from.
    pub local_node: u16,
}

impl Default for InterpConfig {
    fn default() -> Self {
        Self {
            block_timeout_ms: 5_000_000,
            block_period_ms: 250,
            max_recursion_depth: 1000,
            local_node: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcConfig {
    pub store: StoreConfig,
    pub runtime: RuntimeConfig,
    pub interp: InterpConfig,
}

impl ProcConfig {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        let config: ProcConfig = toml::from_str(src).context("Failed to parse procrt configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config '{}': {}", path.display(), e))?;
        Self::from_toml_str(&src).with_context(|| format!("in config file '{}'", path.display()))
    }

    /// Apply `PROCRT_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup, then re-validate.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_STORE_BACKEND) {
            self.store.backend = BackendKind::parse(&raw)
                .ok_or_else(|| anyhow!("{} must be 'static' or 'dynamic', got '{}'", ENV_STORE_BACKEND, raw))?;
        }
        if let Some(raw) = lookup(ENV_MAX_CONCURRENT) {
            self.runtime.max_concurrent = raw
                .trim()
                .parse()
                .map_err(|e| anyhow!("{} is not a valid count ('{}'): {}", ENV_MAX_CONCURRENT, raw, e))?;
        }
        if let Some(raw) = lookup(ENV_SINGLE_THREAD) {
            self.runtime.single_thread = env_toggle_enabled(&raw);
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_concurrent == 0 {
            bail!("runtime.max_concurrent must be at least 1");
        }
        if self.store.reserved_slots > self.store.max_slot as u16 + 1 {
            bail!(
                "store.reserved_slots ({}) exceeds the slot space 0..={}",
                self.store.reserved_slots,
                self.store.max_slot
            );
        }
        if self.interp.block_period_ms == 0 {
            bail!("interp.block_period_ms must be positive");
        }
        Ok(())
    }
}

/// Reads an on/off environment value. Empty, `0`, `false` and `off` are off.
pub fn env_toggle_enabled(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return false;
    }
    !(trimmed.eq_ignore_ascii_case("0") || trimmed.eq_ignore_ascii_case("false") || trimmed.eq_ignore_ascii_case("off"))
}
