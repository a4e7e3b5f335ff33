// src/config/mod.rs

//! Configuration loading and validation for flowdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Hold the declarative task template catalog (`catalog.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate basic invariants like limits and catalog DAG correctness
//!   (`validate.rs`).

pub mod catalog;
pub mod loader;
pub mod model;
pub mod validate;

pub use catalog::{TemplateCatalog, TemplateSpec};
pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{
    CapabilityConfig, ConfigFile, CoordinatorSection, EstimateSection, ExecutorSection,
    RawConfigFile, TemplateConfig,
};
pub use validate::validate_catalog;
