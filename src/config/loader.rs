// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{PlanFile, RawPlanFile};
use crate::errors::Result;

/// Load a plan file and return the raw `RawPlanFile`.
///
/// This only performs TOML deserialization; it does **not** check
/// dependencies, cycles or durations. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPlanFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let plan: RawPlanFile = toml::from_str(&contents)?;
    Ok(plan)
}

/// Load a plan file and validate it into tasks plus orchestrator options.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PlanFile> {
    let raw = load_from_path(&path)?;
    PlanFile::try_from(raw)
}

/// `Gatedag.toml` in the current working directory.
pub fn default_plan_path() -> PathBuf {
    PathBuf::from("Gatedag.toml")
}
