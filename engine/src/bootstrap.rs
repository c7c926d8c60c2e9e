//! The eight-step build pipeline.
//!
//! A [`BuildState`] is created once per build and moved through one function
//! per [`Step`]. Each step consumes the state and hands it back on success; on
//! failure the state (and with it the staging directory) is dropped, so a
//! failed build never leaves an image or staging residue behind.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use kiln_config::{RECIPE_FILE_NAME, load_recipe};
use kiln_types::{
    IMAGE_RECORD_FORMAT, ImageRecord, InstalledPackage, Recipe, RelPath, Step, StepRecord,
    validate_image_name,
};
use kiln_utils::{ContextDigest, Excludes, copy_file, copy_tree};
use tokio::sync::mpsc;

use crate::backend::Backend;
use crate::error::{BuildError, BuildFailure, StoreError};
use crate::store::{Image, ImageStore, Staging};

/// Progress notifications, in pipeline order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Started {
        image: String,
        context: PathBuf,
        backend: &'static str,
    },
    StepStarted {
        step: Step,
    },
    StepFinished {
        step: Step,
        detail: String,
    },
    StepFailed {
        step: Step,
        error: String,
    },
    Committed {
        image: String,
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Overrides the recipe name and the context directory name.
    pub name: Option<String>,
}

/// One line of `kiln plan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: Step,
    pub summary: String,
}

/// What the pipeline would do for `recipe`, without doing any of it.
#[must_use]
pub fn plan(recipe: &Recipe) -> Vec<PlannedStep> {
    let workdir = recipe.workdir();
    let deps = recipe.dependencies();
    let source = recipe.source();
    let packages = if recipe.system().packages.is_empty() {
        "(none)".to_string()
    } else {
        recipe.system().packages.join(", ")
    };
    let mut copied = vec![deps.manifest.as_str()];
    copied.extend(deps.docs.iter().map(RelPath::as_str));

    Step::ALL
        .into_iter()
        .map(|step| {
            let summary = match step {
                Step::SelectBase => format!("base runtime {}", recipe.runtime()),
                Step::Workdir => format!("create {workdir}"),
                Step::InstallSystem => {
                    format!("refresh index, install {packages}, clean index")
                }
                Step::CopyManifest => format!("copy {} -> {workdir}/", copied.join(", ")),
                Step::InstallDependencies => format!(
                    "upgrade {}, install {} (no cache)",
                    deps.installer, deps.manifest
                ),
                Step::CopySource => {
                    let mut line = format!("copy {}/ -> {workdir}/{}/", source.path, source.dest);
                    if !source.exclude.is_empty() {
                        let _ = write!(line, " (exclude {})", source.exclude.join(", "));
                    }
                    line
                }
                Step::CopyConfigTemplate => format!(
                    "copy {} -> {workdir}/{}",
                    recipe.config_template(),
                    recipe.config_template().file_name()
                ),
                Step::DeclareEntrypoint => format!("entrypoint: {}", recipe.entrypoint()),
            };
            PlannedStep { step, summary }
        })
        .collect()
}

/// Resolve the image name: explicit option, then recipe, then context directory.
pub fn image_name(
    context: &Path,
    recipe: &Recipe,
    options: &BuildOptions,
) -> Result<String, BuildError> {
    let name = match (options.name.as_deref(), recipe.name()) {
        (Some(name), _) | (None, Some(name)) => name.to_string(),
        (None, None) => {
            let absolute = fs::canonicalize(context).map_err(|e| {
                BuildError::io(format!("failed to resolve {}", context.display()), e)
            })?;
            absolute
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string()
        }
    };
    validate_image_name(&name).map_err(|_| StoreError::InvalidName(name.clone()))?;
    Ok(name)
}

/// Digest of the recipe and every input it declares.
pub fn context_digest(context: &Path, recipe: &Recipe) -> Result<String, BuildError> {
    let source_excludes = source_excludes(recipe)?;
    let no_excludes = Excludes::none();
    let mut digest = ContextDigest::new();
    let add = |digest: &mut ContextDigest, label: &str, excludes: &Excludes| {
        digest
            .add_path(label, &context.join(label), excludes)
            .map_err(|e| BuildError::io(format!("failed to hash {label}"), e))
    };
    add(&mut digest, RECIPE_FILE_NAME, &no_excludes)?;
    for input in recipe.inputs() {
        let excludes = if *input == recipe.source().path {
            &source_excludes
        } else {
            &no_excludes
        };
        add(&mut digest, input.as_str(), excludes)?;
    }
    Ok(digest.finish())
}

fn source_excludes(recipe: &Recipe) -> Result<Excludes, BuildError> {
    Excludes::new(&recipe.source().exclude).map_err(|e| {
        BuildError::Resolution(format!("invalid source exclude pattern: {e}"))
    })
}

/// Everything one build owns. Moved from step to step; dropping it discards
/// the staging directory.
#[derive(Debug)]
struct BuildState {
    context: PathBuf,
    recipe: Recipe,
    staging: Staging,
    digest: String,
    journal: Vec<StepRecord>,
    system_packages: Vec<InstalledPackage>,
    installer: Option<InstalledPackage>,
    dependencies: Vec<InstalledPackage>,
    files: Vec<String>,
}

impl BuildState {
    fn rootfs(&self) -> PathBuf {
        self.staging.rootfs()
    }

    fn workdir(&self) -> PathBuf {
        self.rootfs().join(self.recipe.workdir().relative())
    }

    fn completed(&self, step: Step) -> bool {
        self.journal.iter().any(|r| r.step == step)
    }

    fn require(&self, step: Step, requires: Step) -> Result<(), BuildError> {
        if self.completed(requires) {
            Ok(())
        } else {
            Err(BuildError::StepOrder { step, requires })
        }
    }

    /// Copy a context input to `<workdir>/<dest>`, recording the files.
    fn copy_input(
        &mut self,
        input: &RelPath,
        dest: &str,
        excludes: &Excludes,
    ) -> Result<(), BuildError> {
        let src = self.context.join(input.as_str());
        let meta = fs::metadata(&src).map_err(|_| BuildError::MissingInput {
            path: PathBuf::from(input.as_str()),
        })?;
        let target = self.workdir().join(dest);
        let image_prefix = Path::new(self.recipe.workdir().relative()).join(dest);
        let copy_err = |e| BuildError::io(format!("failed to copy {input}"), e);

        if meta.is_dir() {
            let copied = copy_tree(&src, &target, excludes).map_err(copy_err)?;
            self.files.extend(
                copied
                    .iter()
                    .map(|rel| image_path_string(&image_prefix.join(rel))),
            );
        } else {
            copy_file(&src, &target).map_err(copy_err)?;
            self.files.push(image_path_string(&image_prefix));
        }
        Ok(())
    }
}

fn image_path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

type StepResult = Result<(BuildState, String), BuildError>;

/// Drives builds against one backend and one image store.
pub struct Bootstrapper<'a> {
    backend: &'a dyn Backend,
    store: &'a ImageStore,
    events: Option<mpsc::UnboundedSender<BuildEvent>>,
}

impl<'a> Bootstrapper<'a> {
    #[must_use]
    pub fn new(backend: &'a dyn Backend, store: &'a ImageStore) -> Self {
        Self {
            backend,
            store,
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: mpsc::UnboundedSender<BuildEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: BuildEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Build the image described by `<context>/Kilnfile.toml`.
    ///
    /// Dropping the returned future cancels the build and discards the
    /// staging directory.
    pub async fn build(
        &self,
        context: &Path,
        options: &BuildOptions,
    ) -> Result<Image, BuildFailure> {
        let recipe = load_recipe(context).map_err(|e| BuildFailure::before_steps(e.into()))?;
        self.build_recipe(context, recipe, options).await
    }

    pub async fn build_recipe(
        &self,
        context: &Path,
        recipe: Recipe,
        options: &BuildOptions,
    ) -> Result<Image, BuildFailure> {
        let name = image_name(context, &recipe, options).map_err(BuildFailure::before_steps)?;
        let digest = context_digest(context, &recipe).map_err(BuildFailure::before_steps)?;
        let staging = self
            .store
            .stage(&name)
            .map_err(|e| BuildFailure::before_steps(e.into()))?;

        tracing::info!(
            image = %name,
            context = %context.display(),
            backend = self.backend.name(),
            digest = %digest,
            "Build started"
        );
        self.emit(BuildEvent::Started {
            image: name.clone(),
            context: context.to_path_buf(),
            backend: self.backend.name(),
        });

        let mut state = BuildState {
            context: context.to_path_buf(),
            recipe,
            staging,
            digest,
            journal: Vec::new(),
            system_packages: Vec::new(),
            installer: None,
            dependencies: Vec::new(),
            files: Vec::new(),
        };
        let mut completed = Vec::with_capacity(Step::ALL.len());

        for step in Step::ALL {
            self.emit(BuildEvent::StepStarted { step });
            tracing::info!(step = step.number(), name = %step, "Step started");
            match self.run_step(step, state).await {
                Ok((next, detail)) => {
                    state = next;
                    state.journal.push(StepRecord {
                        step,
                        detail: detail.clone(),
                    });
                    completed.push(step);
                    tracing::info!(step = step.number(), name = %step, %detail, "Step finished");
                    self.emit(BuildEvent::StepFinished { step, detail });
                }
                Err(error) => {
                    tracing::error!(
                        step = step.number(),
                        name = %step,
                        kind = error.kind(),
                        "Step failed: {error}"
                    );
                    self.emit(BuildEvent::StepFailed {
                        step,
                        error: error.to_string(),
                    });
                    return Err(BuildFailure {
                        step: Some(step),
                        completed,
                        error,
                    });
                }
            }
        }

        self.commit(state).map_err(|error| BuildFailure {
            step: None,
            completed,
            error,
        })
    }

    async fn run_step(&self, step: Step, state: BuildState) -> StepResult {
        if let Some(previous) = step.predecessor() {
            state.require(step, previous)?;
        }
        match step {
            Step::SelectBase => self.select_base(state).await,
            Step::Workdir => Self::workdir(state),
            Step::InstallSystem => self.install_system(state).await,
            Step::CopyManifest => Self::copy_manifest(state),
            Step::InstallDependencies => self.install_dependencies(state).await,
            Step::CopySource => Self::copy_source(state),
            Step::CopyConfigTemplate => Self::copy_config_template(state),
            Step::DeclareEntrypoint => Self::declare_entrypoint(state),
        }
    }

    async fn select_base(&self, state: BuildState) -> StepResult {
        let runtime = state.recipe.runtime();
        self.backend
            .resolve_runtime(runtime, &state.rootfs())
            .await?;
        let detail = runtime.to_string();
        Ok((state, detail))
    }

    fn workdir(state: BuildState) -> StepResult {
        let dir = state.workdir();
        fs::create_dir_all(&dir)
            .map_err(|e| BuildError::io(format!("failed to create {}", dir.display()), e))?;
        let detail = state.recipe.workdir().to_string();
        Ok((state, detail))
    }

    async fn install_system(&self, mut state: BuildState) -> StepResult {
        let rootfs = state.rootfs();
        let packages = &state.recipe.system().packages;
        self.backend.refresh_index(&rootfs).await?;
        let installed = self.backend.install_system(&rootfs, packages).await?;
        self.backend.clean_index(&rootfs).await?;

        let detail = if installed.is_empty() {
            "no packages".to_string()
        } else {
            installed
                .iter()
                .map(|p| format!("{} {}", p.name, p.version))
                .collect::<Vec<_>>()
                .join(", ")
        };
        state.system_packages = installed;
        Ok((state, detail))
    }

    fn copy_manifest(mut state: BuildState) -> StepResult {
        let deps = state.recipe.dependencies().clone();
        let mut copied = Vec::with_capacity(deps.docs.len() + 1);
        for input in std::iter::once(&deps.manifest).chain(deps.docs.iter()) {
            state.copy_input(input, input.file_name(), &Excludes::none())?;
            copied.push(input.as_str());
        }
        let detail = copied.join(", ");
        Ok((state, detail))
    }

    async fn install_dependencies(&self, mut state: BuildState) -> StepResult {
        state.require(Step::InstallDependencies, Step::CopyManifest)?;
        let rootfs = state.rootfs();
        let deps = state.recipe.dependencies().clone();
        // The manifest was copied under its file name into the workdir root.
        let manifest = RelPath::new("manifest", deps.manifest.file_name())
            .map_err(|e| BuildError::Resolution(e.to_string()))?;

        let installer = self
            .backend
            .upgrade_installer(&rootfs, &deps.installer)
            .await?;
        let installed = self
            .backend
            .install_dependencies(&rootfs, state.recipe.workdir(), &manifest)
            .await?;

        let mut detail = match &installer {
            Some(p) => format!("{} {}", p.name, p.version),
            None => deps.installer.clone(),
        };
        let _ = write!(detail, "; {} package(s)", installed.len());
        state.installer = installer;
        state.dependencies = installed;
        Ok((state, detail))
    }

    fn copy_source(mut state: BuildState) -> StepResult {
        let source = state.recipe.source().clone();
        let excludes = source_excludes(&state.recipe)?;
        let before = state.files.len();
        state.copy_input(&source.path, source.dest.as_str(), &excludes)?;
        let detail = format!(
            "{} -> {}/{} ({} files)",
            source.path,
            state.recipe.workdir(),
            source.dest,
            state.files.len() - before
        );
        Ok((state, detail))
    }

    fn copy_config_template(mut state: BuildState) -> StepResult {
        let template = state.recipe.config_template().clone();
        state.copy_input(&template, template.file_name(), &Excludes::none())?;
        let detail = template.to_string();
        Ok((state, detail))
    }

    fn declare_entrypoint(state: BuildState) -> StepResult {
        let detail = state.recipe.entrypoint().to_string();
        Ok((state, detail))
    }

    fn commit(&self, state: BuildState) -> Result<Image, BuildError> {
        let actual = context_digest(&state.context, &state.recipe)?;
        if actual != state.digest {
            return Err(BuildError::ContextChanged {
                expected: state.digest,
                actual,
            });
        }

        let BuildState {
            recipe,
            staging,
            digest,
            journal,
            system_packages,
            installer,
            dependencies,
            mut files,
            ..
        } = state;
        files.sort();

        let record = ImageRecord {
            format: IMAGE_RECORD_FORMAT,
            name: staging.name().to_string(),
            runtime: recipe.runtime().clone(),
            workdir: recipe.workdir().clone(),
            entrypoint: recipe.entrypoint().clone(),
            commands: recipe.commands().clone(),
            system_packages,
            installer,
            dependencies,
            files,
            journal,
            context_digest: digest,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            kiln_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let image = self.store.commit(staging, &record)?;
        self.emit(BuildEvent::Committed {
            image: image.name().to_string(),
            path: image.dir.clone(),
        });
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use kiln_types::{ImagePath, InstalledPackage, Recipe, RelPath, RuntimeRef, Step};
    use tokio::sync::mpsc;

    use super::{
        BuildEvent, BuildOptions, BuildState, Bootstrapper, context_digest, image_name, plan,
    };
    use crate::backend::{Backend, BackendFut, RuntimeStore};
    use crate::error::BuildError;
    use crate::local::{LocalBackend, SITE_PACKAGES_DIR};
    use crate::store::ImageStore;

    struct Fixture {
        _root: tempfile::TempDir,
        context: std::path::PathBuf,
        backend: LocalBackend,
        store: ImageStore,
    }

    fn write(path: &Path, body: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn fixture(manifest: &str) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();
        write(&base.join("runtimes/python/3.11-slim/usr/local/bin/python"), "#!/bin/sh\n");
        write(
            &base.join("source/system/index.toml"),
            "[[package]]\nname = \"build-essential\"\nversion = \"12.9\"\n",
        );
        fs::create_dir_all(base.join("source/packages/pip/24.0")).unwrap();
        write(&base.join("source/packages/x/1.0/x/__init__.py"), "");

        let context = base.join("bot-service");
        write(&context.join("requirements.txt"), manifest);
        write(&context.join("README.md"), "# bot\n");
        write(&context.join("bot/main.py"), "print('hi')\n");
        write(&context.join("bot/__pycache__/main.cpython-311.pyc"), "x");
        write(&context.join(".env.example"), "TOKEN=example\n");
        write(
            &context.join("Kilnfile.toml"),
            "name = \"bot\"\n[source]\nexclude = [\"__pycache__\"]\n",
        );

        Fixture {
            backend: LocalBackend::new(
                base.join("source"),
                RuntimeStore::new(base.join("runtimes")),
            ),
            store: ImageStore::new(base.join("store/images")),
            context,
            _root: root,
        }
    }

    #[tokio::test]
    async fn builds_image_with_ordered_journal() {
        let fx = fixture("X==1.0\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let image = Bootstrapper::new(&fx.backend, &fx.store)
            .with_events(tx)
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap();

        let journal: Vec<Step> = image.record.journal.iter().map(|r| r.step).collect();
        assert_eq!(journal, Step::ALL);
        assert_eq!(image.record.dependencies[0].name, "x");
        assert_eq!(image.record.dependencies[0].version, "1.0");
        assert!(image.record.files.contains(&"app/bot/main.py".to_string()));
        assert!(!image.record.files.iter().any(|f| f.contains("__pycache__")));
        assert!(image.rootfs().join("app/.env.example").is_file());
        assert!(image.rootfs().join("app/requirements.txt").is_file());
        assert!(image.rootfs().join(SITE_PACKAGES_DIR).join("x/x/__init__.py").is_file());
        assert!(!image.rootfs().join("var/lib/kiln/lists").exists());
        assert!(fx.store.staging_dirs().is_empty());

        let mut finished = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let BuildEvent::StepFinished { step, .. } = event {
                finished.push(step);
            }
        }
        assert_eq!(finished, Step::ALL);
    }

    #[tokio::test]
    async fn unresolvable_dependency_aborts_before_source_copy() {
        let fx = fixture("Y==999.0\n");
        let failure = Bootstrapper::new(&fx.backend, &fx.store)
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap_err();

        assert_eq!(failure.step, Some(Step::InstallDependencies));
        assert!(matches!(failure.error, BuildError::Resolution(_)));
        assert!(!failure.completed.contains(&Step::CopySource));
        assert!(!failure.completed.contains(&Step::CopyConfigTemplate));
        assert!(fx.store.list().unwrap().is_empty());
        assert!(fx.store.staging_dirs().is_empty());
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_image() {
        let fx = fixture("X==1.0\n");
        let bootstrapper = Bootstrapper::new(&fx.backend, &fx.store);
        let first = bootstrapper
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap();

        fs::remove_file(fx.context.join(".env.example")).unwrap();
        let failure = bootstrapper
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.step, Some(Step::CopyConfigTemplate));
        assert!(matches!(failure.error, BuildError::MissingInput { .. }));

        let kept = fx.store.open("bot").unwrap();
        assert_eq!(kept.record, first.record);
    }

    /// Local backend that edits a context file while dependencies install.
    struct EditingBackend<'a> {
        inner: &'a LocalBackend,
        edit: std::path::PathBuf,
    }

    impl Backend for EditingBackend<'_> {
        fn name(&self) -> &'static str {
            "editing"
        }

        fn resolve_runtime<'a>(
            &'a self,
            runtime: &'a RuntimeRef,
            rootfs: &'a Path,
        ) -> BackendFut<'a, ()> {
            self.inner.resolve_runtime(runtime, rootfs)
        }

        fn refresh_index<'a>(&'a self, rootfs: &'a Path) -> BackendFut<'a, ()> {
            self.inner.refresh_index(rootfs)
        }

        fn install_system<'a>(
            &'a self,
            rootfs: &'a Path,
            packages: &'a [String],
        ) -> BackendFut<'a, Vec<InstalledPackage>> {
            self.inner.install_system(rootfs, packages)
        }

        fn clean_index<'a>(&'a self, rootfs: &'a Path) -> BackendFut<'a, ()> {
            self.inner.clean_index(rootfs)
        }

        fn upgrade_installer<'a>(
            &'a self,
            rootfs: &'a Path,
            installer: &'a str,
        ) -> BackendFut<'a, Option<InstalledPackage>> {
            self.inner.upgrade_installer(rootfs, installer)
        }

        fn install_dependencies<'a>(
            &'a self,
            rootfs: &'a Path,
            workdir: &'a ImagePath,
            manifest: &'a RelPath,
        ) -> BackendFut<'a, Vec<InstalledPackage>> {
            fs::write(&self.edit, "print('edited')\n").unwrap();
            self.inner.install_dependencies(rootfs, workdir, manifest)
        }
    }

    #[tokio::test]
    async fn context_edited_mid_build_commits_nothing() {
        let fx = fixture("X==1.0\n");
        let backend = EditingBackend {
            inner: &fx.backend,
            edit: fx.context.join("bot/main.py"),
        };
        let failure = Bootstrapper::new(&backend, &fx.store)
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap_err();

        assert!(
            matches!(failure.error, BuildError::ContextChanged { .. }),
            "{}",
            failure.error
        );
        assert_eq!(failure.step, None);
        assert_eq!(failure.completed, Step::ALL);
        assert!(fx.store.list().unwrap().is_empty());
        assert!(fx.store.staging_dirs().is_empty());
    }

    #[tokio::test]
    async fn rebuilds_are_equivalent() {
        let fx = fixture("X==1.0\n");
        let bootstrapper = Bootstrapper::new(&fx.backend, &fx.store);
        let first = bootstrapper
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap();
        let second = bootstrapper
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap();
        assert!(first.record.equivalent(&second.record));
    }

    #[tokio::test]
    async fn missing_manifest_is_missing_input() {
        let fx = fixture("");
        fs::remove_file(fx.context.join("requirements.txt")).unwrap();
        let failure = Bootstrapper::new(&fx.backend, &fx.store)
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.step, Some(Step::CopyManifest));
        assert_eq!(
            failure.completed,
            [Step::SelectBase, Step::Workdir, Step::InstallSystem]
        );
    }

    #[tokio::test]
    async fn unknown_runtime_fails_first_step() {
        let fx = fixture("");
        fs::write(
            fx.context.join("Kilnfile.toml"),
            "[runtime]\nid = \"python\"\ntag = \"2.7\"\n",
        )
        .unwrap();
        let failure = Bootstrapper::new(&fx.backend, &fx.store)
            .build(&fx.context, &BuildOptions::default())
            .await
            .unwrap_err();
        assert_eq!(failure.step, Some(Step::SelectBase));
        assert!(failure.completed.is_empty());
    }

    #[tokio::test]
    async fn install_without_manifest_is_step_order_error() {
        let fx = fixture("X==1.0\n");
        let recipe = Recipe::default();
        let state = BuildState {
            context: fx.context.clone(),
            digest: context_digest(&fx.context, &recipe).unwrap(),
            recipe,
            staging: fx.store.stage("bot").unwrap(),
            journal: Vec::new(),
            system_packages: Vec::new(),
            installer: None,
            dependencies: Vec::new(),
            files: Vec::new(),
        };
        let err = Bootstrapper::new(&fx.backend, &fx.store)
            .run_step(Step::InstallDependencies, state)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::StepOrder {
                step: Step::InstallDependencies,
                requires: Step::CopyManifest
            }
        ));
        assert!(fx.store.staging_dirs().is_empty());
    }

    #[test]
    fn name_and_digest() {
        let fx = fixture("X==1.0\n");
        let recipe = Recipe::default();
        assert_eq!(
            image_name(&fx.context, &recipe, &BuildOptions::default()).unwrap(),
            "bot-service"
        );
        let named = BuildOptions {
            name: Some("svc".into()),
        };
        assert_eq!(image_name(&fx.context, &recipe, &named).unwrap(), "svc");

        let before = context_digest(&fx.context, &recipe).unwrap();
        fs::write(fx.context.join("bot/main.py"), "print('changed')\n").unwrap();
        assert_ne!(before, context_digest(&fx.context, &recipe).unwrap());
    }

    #[test]
    fn plan_lists_every_step() {
        let steps = plan(&Recipe::default());
        assert_eq!(steps.len(), 8);
        assert_eq!(steps[0].summary, "base runtime python:3.11-slim");
        assert_eq!(steps[7].summary, "entrypoint: python -m bot.main");
    }
}
