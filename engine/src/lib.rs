//! Build and activation engine for Kiln.
//!
//! The [`Bootstrapper`] runs the eight-step pipeline against a [`Backend`]
//! and commits the result to an [`ImageStore`]; [`launch`] starts a committed
//! image's entrypoint.

mod activation;
mod backend;
mod bootstrap;
mod command;
mod error;
mod local;
mod resolver;
mod store;

pub use activation::{IMAGE_BIN_DIRS, LaunchPlan, launch, run};
pub use backend::{Backend, BackendFut, RuntimeStore};
pub use bootstrap::{
    Bootstrapper, BuildEvent, BuildOptions, PlannedStep, context_digest, image_name, plan,
};
pub use command::CommandBackend;
pub use error::{BuildError, BuildFailure, LaunchError, StoreError};
pub use local::{LISTS_DIR, LocalBackend, SITE_PACKAGES_DIR};
pub use resolver::{Candidate, PACKAGE_METADATA_FILE, PackageIndex};
pub use store::{IMAGE_RECORD_FILE, Image, ImageStore, ROOTFS_DIR, Staging};

use kiln_config::{BackendKind, ResolvedConfig};
use kiln_tools::{CommandRunner, detect_shell};

/// The backend selected by the tool configuration.
#[must_use]
pub fn backend_for(config: &ResolvedConfig) -> Box<dyn Backend> {
    let runtimes = RuntimeStore::new(&config.runtimes_dir);
    match config.backend {
        BackendKind::Local => Box::new(LocalBackend::new(&config.source_dir, runtimes)),
        BackendKind::Command => {
            let shell = detect_shell(config.shell.as_ref());
            Box::new(CommandBackend::new(
                config.templates.clone(),
                CommandRunner::new(shell),
                runtimes,
            ))
        }
    }
}

/// The image store selected by the tool configuration.
#[must_use]
pub fn store_for(config: &ResolvedConfig) -> ImageStore {
    ImageStore::new(config.images_dir())
}
