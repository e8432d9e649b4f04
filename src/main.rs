use clap::{Parser, Subcommand};
use lazymedia::{config, output, sim::SimPage};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "lazymedia")]
#[command(about = "Deferred media loading engine, run against simulated pages")]
#[command(long_about = "\
Deferred media loading engine, run against simulated pages

Pages are JSON fixtures describing a window, the platform's capabilities
and a tree of elements. Lazy elements carry their real resource in a data
attribute, either a URL or a breakpoint map:

  {\"tag\": \"img\", \"classes\": [\"b-lazy\"],
   \"attrs\": {\"src\": \"placeholder.gif\",
             \"data-src\": \"{\\\"320\\\": \\\"a.jpg\\\", \\\"768\\\": \\\"b.jpg\\\"}\"},
   \"rect\": {\"x\": 0, \"y\": 0, \"width\": 400, \"height\": 300}}

Engine settings come from lazymedia.toml in the --config directory, then
from the page's own \"settings\" object.

Run 'lazymedia gen-config' to generate a documented lazymedia.toml.
Set RUST_LOG=debug to follow each element through its lifecycle.")]
#[command(version)]
struct Cli {
    /// Directory containing lazymedia.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine against a page fixture and print the lifecycle
    Simulate {
        /// Page fixture (JSON)
        page: PathBuf,
        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Validate the resource descriptors of page fixtures
    Check {
        /// A fixture file or a directory of *.json fixtures
        path: PathBuf,
    },
    /// Print a stock lazymedia.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate { page, json } => {
            let base = base_config(&cli.config)?;
            let sim = SimPage::load(&page)?;
            let engine_config = sim.config(base)?;
            let report = sim.run(engine_config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                output::print_simulation(&report, &page);
            }
        }
        Command::Check { path } => {
            let base = base_config(&cli.config)?;
            let (mut pages, mut elements, mut malformed) = (0, 0, 0);
            for fixture in fixture_paths(&path) {
                let sim = SimPage::load(&fixture)?;
                let engine_config = sim.config(base.clone())?;
                let reports = sim.inspect(&engine_config);
                output::print_check(&fixture, &reports);
                pages += 1;
                elements += reports.len();
                malformed += reports.iter().filter(|r| r.result.is_err()).count();
            }
            println!();
            println!("{}", output::format_check_summary(pages, elements, malformed));
            if malformed > 0 {
                return Err(format!("{} malformed resource descriptor(s)", malformed).into());
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Stock defaults with the directory's `lazymedia.toml` merged on top.
fn base_config(dir: &Path) -> Result<toml::Value, config::ConfigError> {
    let base = config::stock_defaults_value();
    Ok(match config::load_raw_config(dir)? {
        Some(overlay) => config::merge_toml(base, overlay),
        None => base,
    })
}

/// A single file as given, or every `*.json` under a directory, sorted.
fn fixture_paths(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut paths: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();
    paths
}
