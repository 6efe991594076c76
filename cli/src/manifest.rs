use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use procrt_core::{Procedure, ProcStore, Slot};
use serde::Deserialize;

/// A TOML document listing procedures to load into a fresh store.
///
/// ```toml
/// [params]
/// limit = 3
///
/// [[procedures]]
/// slot = 10
/// instructions = [{ op = "set", param = "x", value = "1" }]
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Initial parameter values on the local node.
    #[serde(default)]
    pub params: BTreeMap<String, i64>,
    #[serde(default)]
    pub procedures: Vec<ManifestProc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestProc {
    pub slot: Slot,
    pub instructions: Procedure,
}

impl Manifest {
    pub fn parse(src: &str) -> Result<Self> {
        toml::from_str(src).context("Failed to parse procedure manifest")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let src = crate::read_file_content(&path.to_string_lossy())?;
        Self::parse(&src).with_context(|| format!("in manifest '{}'", path.display()))
    }

    /// Store every procedure. A slot listed twice is an error.
    pub fn install(&self, store: &ProcStore) -> Result<usize> {
        for entry in &self.procedures {
            store
                .set(entry.instructions.clone(), entry.slot, false)
                .with_context(|| format!("cannot load procedure for slot {}", entry.slot))?;
        }
        Ok(self.procedures.len())
    }
}
