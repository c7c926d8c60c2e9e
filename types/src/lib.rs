//! Core domain types for Kiln.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the bootstrapper.

mod image;
mod recipe;
mod requirement;
mod runtime;
mod step;
mod template;
mod version;

pub use image::{IMAGE_RECORD_FORMAT, ImageRecord, InstalledPackage, StepRecord};
pub use recipe::{
    DEFAULT_CONFIG_TEMPLATE, DEFAULT_ENTRYPOINT, DEFAULT_INSTALLER, DEFAULT_MANIFEST,
    DEFAULT_RUNTIME_ID, DEFAULT_RUNTIME_TAG, DEFAULT_SOURCE, DEFAULT_WORKDIR, DependencySpec,
    Entrypoint, ImagePath, Recipe, RecipeError, RelPath, SourceSpec, SystemSpec,
    validate_image_name,
};
pub use requirement::{Clause, Manifest, Op, Requirement, RequirementError, normalize_name};
pub use runtime::{RuntimeRef, RuntimeRefError};
pub use step::Step;
pub use template::{EnvEntry, EnvFile, EnvFileError};
pub use version::{Version, VersionError};
