//! COBOL migration CLI
//!
//! # Usage
//!
//! ```bash
//! # Dependency graph of a source tree as JSON
//! cobol-migrate graph ./legacy --output graph.json
//!
//! # Programs and modules that would be processed
//! cobol-migrate units ./legacy
//!
//! # Effective configuration (defaults + file + environment)
//! cobol-migrate config --config migration.yaml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cobol_migration::config::PipelineConfig;
use cobol_migration::source::{ensure_unique_names, load_units};
use cobol_migration::telemetry::init_tracing;
use cobol_migration::DependencyGraph;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "cobol-migrate")]
#[command(about = "COBOL → Java migration pipeline tooling", long_about = None)]
struct Cli {
    /// Pipeline configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the dependency graph and print it as JSON
    Graph {
        /// Source directory
        dir: PathBuf,

        /// Write the JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List discovered programs and modules
    Units {
        /// Source directory
        dir: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    init_tracing("cobol_migration=info");
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Graph { dir, output } => graph(&dir, output, &config),
        Commands::Units { dir } => units(&dir, &config),
        Commands::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_yaml(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    config
        .apply_env_overrides()
        .context("Invalid environment override")?;
    Ok(config)
}

fn graph(dir: &Path, output: Option<PathBuf>, config: &PipelineConfig) -> Result<()> {
    let units = load_units(dir, &config.sources)?;
    ensure_unique_names(&units)?;

    let graph = DependencyGraph::build(&units);
    let json = graph.to_json()?;

    match output {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Dependency graph written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn units(dir: &Path, config: &PipelineConfig) -> Result<()> {
    let units = load_units(dir, &config.sources)?;
    for unit in &units {
        let kind = if unit.is_module { "module" } else { "program" };
        println!("{:<8} {:<32} {:>8} bytes", kind, unit.name, unit.content.len());
    }
    println!(
        "{} units ({} programs, {} modules)",
        units.len(),
        units.iter().filter(|u| u.is_program()).count(),
        units.iter().filter(|u| u.is_module).count()
    );
    Ok(())
}
