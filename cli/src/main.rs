//! Kiln CLI - binary entry point.
//!
//! ```text
//! main() -> Cli::parse() -> load config -> init_tracing() -> dispatch()
//!                                                              |
//!            build | plan | run | inspect | list | remove | check-env
//! ```
//!
//! Library errors surface as `error: ...` on stderr with exit code 1. A build
//! interrupted by Ctrl-C exits 130; `kiln run` exits with the entrypoint's code.

mod cli;
mod logging;
mod render;

use std::fs;
use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use kiln_config::{KilnConfig, ResolvedConfig, ServiceSettings, lint_template, load_recipe};
use kiln_engine::{Bootstrapper, BuildOptions, backend_for, image_name, launch, store_for};
use kiln_types::{DEFAULT_CONFIG_TEMPLATE, EnvFile};

use crate::cli::{BuildArgs, CheckEnvArgs, Cli, Command, ImageArg, PlanArgs, RunArgs, exit_codes};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = load_config(&cli);
    logging::init_tracing(
        config
            .as_ref()
            .ok()
            .and_then(|c| c.log_filter.as_deref()),
    );

    let code = match dispatch(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("error: {err:#}");
            exit_codes::FAILED
        }
    };
    ExitCode::from((code & 0xff) as u8)
}

fn load_config(cli: &Cli) -> Result<ResolvedConfig> {
    let config = KilnConfig::load()?.unwrap_or_default();
    Ok(config.resolve(&cli.overrides())?)
}

async fn dispatch(cli: Cli, config: Result<ResolvedConfig>) -> Result<i32> {
    match cli.command {
        Command::Build(args) => build(args, &config?).await,
        Command::Plan(args) => plan(args),
        Command::Run(args) => run(args, &config?).await,
        Command::Inspect(args) => inspect(args, &config?),
        Command::List => list(&config?),
        Command::Remove(args) => remove(args, &config?),
        Command::CheckEnv(args) => check_env(args),
    }
}

async fn build(args: BuildArgs, config: &ResolvedConfig) -> Result<i32> {
    let backend = backend_for(config);
    let store = store_for(config);
    let options = BuildOptions { name: args.name };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Some(line) = render::event(&event) {
                println!("{line}");
            }
        }
    });

    // Dropping the build future on Ctrl-C discards the staging directory.
    let outcome = {
        let bootstrapper = Bootstrapper::new(backend.as_ref(), &store).with_events(tx);
        tokio::select! {
            result = bootstrapper.build(&args.context, &options) => Some(result),
            _ = tokio::signal::ctrl_c() => None,
        }
    };
    let _ = printer.await;

    match outcome {
        Some(Ok(_)) => Ok(exit_codes::OK),
        Some(Err(failure)) => {
            eprintln!("{}", render::failure(&failure));
            Ok(exit_codes::FAILED)
        }
        None => {
            tracing::warn!(context = %args.context.display(), "Build cancelled");
            eprintln!("build cancelled\nno image was produced");
            Ok(exit_codes::INTERRUPTED)
        }
    }
}

fn plan(args: PlanArgs) -> Result<i32> {
    let recipe = load_recipe(&args.context)?;
    let options = BuildOptions { name: args.name };
    let name = image_name(&args.context, &recipe, &options)?;
    print!("{}", render::plan(&name, &kiln_engine::plan(&recipe)));
    Ok(exit_codes::OK)
}

async fn run(args: RunArgs, config: &ResolvedConfig) -> Result<i32> {
    let image = store_for(config).open(&args.image)?;
    let code = launch(&image, args.command.as_deref()).await?;
    Ok(code)
}

fn inspect(args: ImageArg, config: &ResolvedConfig) -> Result<i32> {
    let image = store_for(config).open(&args.image)?;
    let json = serde_json::to_string_pretty(&image.record)
        .context("failed to serialize image record")?;
    println!("{json}");
    Ok(exit_codes::OK)
}

fn list(config: &ResolvedConfig) -> Result<i32> {
    let images = store_for(config).list()?;
    print!("{}", render::image_list(&images));
    Ok(exit_codes::OK)
}

fn remove(args: ImageArg, config: &ResolvedConfig) -> Result<i32> {
    store_for(config).remove(&args.image)?;
    println!("removed {}", args.image);
    Ok(exit_codes::OK)
}

fn check_env(args: CheckEnvArgs) -> Result<i32> {
    let template_path = args
        .template
        .unwrap_or_else(|| args.dir.join(DEFAULT_CONFIG_TEMPLATE));
    match fs::read_to_string(&template_path) {
        Ok(text) => {
            let template = EnvFile::parse(&text)
                .with_context(|| format!("failed to parse {}", template_path.display()))?;
            for warning in lint_template(&template) {
                eprintln!("warning: {warning}");
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            eprintln!("warning: no template at {}", template_path.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", template_path.display()));
        }
    }

    match ServiceSettings::load(&args.dir) {
        Ok(settings) => {
            tracing::debug!(?settings, "Service settings valid");
            println!("service settings OK");
            Ok(exit_codes::OK)
        }
        Err(err) => {
            eprintln!("{err}");
            Ok(exit_codes::FAILED)
        }
    }
}
