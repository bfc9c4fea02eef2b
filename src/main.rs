//! # sketchbuild CLI Entry Point
//!
//! This is the main executable for the `sb` command-line tool.
//! It parses CLI arguments using clap and routes commands to the library.
//!
//! ## Command Structure
//!
//! - **Build**: `build`, `clean`
//! - **Inspect**: `properties`
//! - **Cache**: `cache path|list|clean|prune`
//! - **Shell**: `completion`

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use colored::*;
use std::path::{Path, PathBuf};

use sketchbuild::build;
use sketchbuild::builder::{BuildOptions, Builder, default_jobs};
use sketchbuild::cache;
use sketchbuild::config::{CONFIG_FILE, Project};
use sketchbuild::library::load_libraries;
use sketchbuild::properties::PropertySet;
use sketchbuild::recipe::Executor;
use sketchbuild::sketch::Sketch;

#[derive(Parser)]
#[command(name = "sb")]
#[command(about = "Incremental build orchestrator for firmware sketches")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the project configuration
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile the sketch, its libraries and the core, then link
    Build {
        /// Show every command and reuse decision
        #[arg(short, long)]
        verbose: bool,
        /// Parallel compile jobs [default: number of CPUs]
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Warnings level (none, default, more, all)
        #[arg(long)]
        warnings: Option<String>,
        /// Do not read or write the core archive cache
        #[arg(long)]
        no_cache: bool,
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Remove the build folder
    Clean,
    /// Print the fully expanded build properties
    Properties {
        /// Only print this key
        key: Option<String>,
    },
    /// Manage the core archive cache
    Cache {
        #[command(subcommand)]
        op: CacheOp,
    },
    /// Generate shell completion scripts
    Completion { shell: Shell },
}

#[derive(Subcommand)]
enum CacheOp {
    /// Print cache directory path
    Path,
    /// List cached core archives
    List,
    /// Remove every cached archive
    Clean,
    /// Remove archives not used by this project
    Prune,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build {
            verbose,
            jobs,
            warnings,
            no_cache,
            no_progress,
        } => run_build(
            &cli.config,
            *verbose,
            *jobs,
            warnings.as_deref(),
            *no_cache,
            !*no_progress,
        ),
        Commands::Clean => run_clean(&cli.config),
        Commands::Properties { key } => print_properties(&cli.config, key.as_deref()),
        Commands::Cache { op } => {
            let cache_dir = cache_dir_for(&cli.config)?;
            match op {
                CacheOp::Path => cache::print_path(&cache_dir),
                CacheOp::List => cache::list(&cache_dir),
                CacheOp::Clean => cache::clean(&cache_dir),
                CacheOp::Prune => {
                    let keep = project_archive_name(&cli.config)?;
                    cache::prune_unused(&cache_dir, &keep).map(|_| ())
                }
            }
        }
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Traces go to stderr, filtered by `SKETCHBUILD_LOG` (e.g. `sketchbuild=debug`).
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if let Ok(filter) = EnvFilter::try_from_env("SKETCHBUILD_LOG") {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(filter)
            .init();
    }
}

fn load_project(config: &Path) -> Result<Project> {
    Project::load(config).with_context(|| format!("Failed to load {}", config.display()))
}

// --- Helper: Load everything a build needs ---
fn load_inputs(project: &Project) -> Result<(PropertySet, Sketch)> {
    let base = project
        .build_properties()
        .context("Failed to load platform properties")?;
    let sketch_path = project.sketch_path();
    let sketch = Sketch::load(&sketch_path)
        .with_context(|| format!("Failed to load sketch {}", sketch_path.display()))?;
    Ok((base, sketch))
}

fn build_options(project: &Project) -> BuildOptions {
    let mut options = BuildOptions::new(project.fqbn(), &project.arch(), project.build_path());
    options.cache_dir = project.cache_dir();
    options.warnings_level = project.warnings_level().to_string();
    options.jobs = project.jobs().unwrap_or_else(default_jobs);
    options.library_folders = project.library_folders();
    options
}

fn run_build(
    config: &Path,
    verbose: bool,
    jobs: Option<usize>,
    warnings: Option<&str>,
    no_cache: bool,
    show_progress: bool,
) -> Result<()> {
    let project = load_project(config)?;
    let (base, sketch) = load_inputs(&project)?;

    let library_folders = project.library_folders();
    let libraries = load_libraries(&library_folders).context("Failed to load libraries")?;

    let mut options = build_options(&project);
    options.verbose = verbose;
    options.show_progress = show_progress;
    if let Some(jobs) = jobs {
        if jobs == 0 {
            bail!("--jobs must be at least 1");
        }
        options.jobs = jobs;
    }
    if let Some(level) = warnings {
        options.warnings_level = level.to_string();
    }
    if no_cache {
        options.cache_dir = None;
    }

    println!(
        "{} Building {} for {}...",
        "🔨".cyan(),
        sketch.name().bold(),
        project.fqbn()
    );
    if verbose {
        println!(
            "   {} {} libraries available, {} jobs",
            "ℹ".blue(),
            libraries.len(),
            options.jobs
        );
    }

    let builder = Builder::new(options, Executor::system(verbose));
    let output = builder
        .build(&base, &libraries, &sketch)
        .context("Build failed")?;

    if output.wiped {
        println!("   {} Build options changed, rebuilt from scratch", "ℹ".blue());
    }
    if output.core_from_cache {
        println!("   {} Core taken from cache", "→".blue());
    }
    for warning in &output.warnings {
        tracing::debug!("{}", warning.trim_end());
    }
    Ok(())
}

fn run_clean(config: &Path) -> Result<()> {
    let project = load_project(config)?;
    build::clean(&project.build_path()).context("Failed to remove build folder")?;
    Ok(())
}

fn print_properties(config: &Path, key: Option<&str>) -> Result<()> {
    let project = load_project(config)?;
    let (base, sketch) = load_inputs(&project)?;
    let builder = Builder::new(build_options(&project), Executor::system(false));
    let props = builder.setup_properties(&base, &sketch);

    match key {
        Some(key) => match props.expand_key(key) {
            Some(value) => println!("{}", value),
            None => bail!("Property '{}' is not set", key),
        },
        None => {
            for (k, v) in props.iter() {
                println!("{}={}", k, props.expand(v));
            }
        }
    }
    Ok(())
}

fn cache_dir_for(config: &Path) -> Result<PathBuf> {
    // Cache commands also work outside a project.
    let configured = if config.exists() {
        load_project(config)?.cache_dir()
    } else {
        cache::default_cache_dir()
    };
    configured.context("Could not determine cache directory")
}

/// Name of the archive this project's core would be cached under.
fn project_archive_name(config: &Path) -> Result<Vec<String>> {
    let project = load_project(config)?;
    let props = project
        .build_properties()
        .context("Failed to load platform properties")?;
    let Some(core) = props.core_path() else {
        return Ok(Vec::new());
    };
    let platform_folder = core
        .parent()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or(core);
    Ok(vec![build::cached_core_archive_name(project.fqbn(), &platform_folder)])
}
