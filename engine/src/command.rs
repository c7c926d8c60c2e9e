//! Backend that shells out to the real package tools.

use std::path::Path;

use kiln_config::CommandTemplates;
use kiln_tools::{CommandRunner, Placeholder, render_template};
use kiln_types::{ImagePath, InstalledPackage, RelPath, RuntimeRef};

use crate::backend::{Backend, BackendFut, RuntimeStore};
use crate::error::BuildError;

#[derive(Debug, Clone)]
pub struct CommandBackend {
    templates: CommandTemplates,
    runner: CommandRunner,
    runtimes: RuntimeStore,
}

impl CommandBackend {
    #[must_use]
    pub fn new(templates: CommandTemplates, runner: CommandRunner, runtimes: RuntimeStore) -> Self {
        Self {
            templates,
            runner,
            runtimes,
        }
    }

    async fn run(
        &self,
        template: &str,
        rootfs: &Path,
        vars: &[(&str, Placeholder<'_>)],
    ) -> Result<(), BuildError> {
        let root = rootfs.to_string_lossy();
        let mut all = vec![("root", Placeholder::Word(root.as_ref()))];
        all.extend_from_slice(vars);
        let line = render_template(template, &all)?;

        let output = self.runner.run(&line, rootfs).await?;
        if output.success() {
            Ok(())
        } else {
            Err(BuildError::CommandFailed {
                command: line,
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }
}

impl Backend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    fn resolve_runtime<'a>(
        &'a self,
        runtime: &'a RuntimeRef,
        rootfs: &'a Path,
    ) -> BackendFut<'a, ()> {
        Box::pin(async move { self.runtimes.install(runtime, rootfs) })
    }

    fn refresh_index<'a>(&'a self, rootfs: &'a Path) -> BackendFut<'a, ()> {
        Box::pin(self.run(&self.templates.refresh_index, rootfs, &[]))
    }

    fn install_system<'a>(
        &'a self,
        rootfs: &'a Path,
        packages: &'a [String],
    ) -> BackendFut<'a, Vec<InstalledPackage>> {
        Box::pin(async move {
            if packages.is_empty() {
                return Ok(Vec::new());
            }
            self.run(
                &self.templates.install_packages,
                rootfs,
                &[("packages", Placeholder::Words(packages))],
            )
            .await?;
            // Versions are chosen by the external tool and not reported back.
            Ok(packages
                .iter()
                .map(|name| InstalledPackage::new(name.clone(), "unknown"))
                .collect())
        })
    }

    fn clean_index<'a>(&'a self, rootfs: &'a Path) -> BackendFut<'a, ()> {
        Box::pin(self.run(&self.templates.clean_index, rootfs, &[]))
    }

    fn upgrade_installer<'a>(
        &'a self,
        rootfs: &'a Path,
        installer: &'a str,
    ) -> BackendFut<'a, Option<InstalledPackage>> {
        Box::pin(async move {
            self.run(
                &self.templates.upgrade_installer,
                rootfs,
                &[("installer", Placeholder::Word(installer))],
            )
            .await?;
            Ok(None)
        })
    }

    fn install_dependencies<'a>(
        &'a self,
        rootfs: &'a Path,
        workdir: &'a ImagePath,
        manifest: &'a RelPath,
    ) -> BackendFut<'a, Vec<InstalledPackage>> {
        Box::pin(async move {
            self.run(
                &self.templates.install_dependencies,
                rootfs,
                &[
                    ("workdir", Placeholder::Word(workdir.as_str())),
                    ("manifest", Placeholder::Word(manifest.as_str())),
                ],
            )
            .await?;
            Ok(Vec::new())
        })
    }
}
