// src/config/mod.rs

//! Plan file loading and validation for gatedag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Parse duration strings (`duration.rs`).
//! - Load a plan file from disk (`loader.rs`).
//! - Turn the raw model into tasks and orchestrator options, checking
//!   dependencies and cycles on the way (`validate.rs`).

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{default_plan_path, load_and_validate, load_from_path};
pub use model::{FallbackConfig, OrchestratorSection, PlanFile, RawPlanFile, TaskConfig};
