//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use kiln_config::{BackendKind, Overrides};

/// Exit codes shared by every subcommand. `kiln run` exits with the
/// entrypoint's own code instead.
pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const FAILED: i32 = 1;
    /// `128 + SIGINT`.
    pub const INTERRUPTED: i32 = 130;
}

/// Build self-contained service images from a build context and run them.
#[derive(Debug, Parser)]
#[command(name = "kiln", version)]
pub struct Cli {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the eight bootstrap steps and commit an image
    Build(BuildArgs),

    /// Print the steps a build would run, without running them
    Plan(PlanArgs),

    /// Launch an image's entrypoint in the foreground
    Run(RunArgs),

    /// Print an image record as JSON
    Inspect(ImageArg),

    /// List committed images
    List,

    /// Delete a committed image
    Remove(ImageArg),

    /// Validate the service environment and lint its template
    CheckEnv(CheckEnvArgs),
}

/// Options that apply to every command touching the image store.
#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Store root (images live in `<store>/images`)
    #[arg(long, global = true, value_name = "DIR")]
    pub store: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Build context containing `Kilnfile.toml`
    #[arg(default_value = ".")]
    pub context: PathBuf,

    /// Image name (default: recipe name, then context directory name)
    #[arg(long)]
    pub name: Option<String>,

    /// Package source for the local backend
    #[arg(long, value_name = "DIR")]
    pub source: Option<PathBuf>,

    /// Runtime store holding base rootfs trees
    #[arg(long, value_name = "DIR")]
    pub runtimes: Option<PathBuf>,

    /// Package backend
    #[arg(long, value_parser = parse_backend)]
    pub backend: Option<BackendKind>,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[arg(default_value = ".")]
    pub context: PathBuf,

    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    pub image: String,

    /// Launch a named alternate from `[commands]` instead of the entrypoint
    #[arg(long, value_name = "NAME")]
    pub command: Option<String>,
}

#[derive(Debug, Args)]
pub struct ImageArg {
    pub image: String,
}

#[derive(Debug, Args)]
pub struct CheckEnvArgs {
    /// Directory holding `.env` / `.env.local`
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Configuration template to lint (default: `<dir>/.env.example`)
    #[arg(long, value_name = "FILE")]
    pub template: Option<PathBuf>,
}

fn parse_backend(raw: &str) -> Result<BackendKind, String> {
    raw.parse().map_err(|e: kiln_config::ConfigError| e.to_string())
}

impl Cli {
    /// Overrides for the tool configuration taken from the command line.
    #[must_use]
    pub fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            store: self.store.store.clone(),
            ..Overrides::default()
        };
        if let Command::Build(args) = &self.command {
            overrides.source.clone_from(&args.source);
            overrides.runtimes.clone_from(&args.runtimes);
            overrides.backend = args.backend;
        }
        overrides
    }
}
