//! Revo CLI - The `revo` command.
//!
//! Interprets a project directory holding a `revoproj.toml` document,
//! either once (`render`) or on every saved change (`start`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::path::{Path, PathBuf};

use revo_core::{
    spawn_watcher, Config, DirectoryResolver, Interpreter, MidiFileSink, Player, PROJECT_FILE,
};

/// Revo - live-coded music from generator and modifier plugins
#[derive(Parser, Debug)]
#[command(name = "revo")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interprets revo projects into MIDI", long_about = None)]
struct Args {
    /// Configuration file (defaults to the per-user config location)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the `components` folder
    #[arg(long = "resource-dir", global = true, value_name = "DIR")]
    resource_dir: Option<PathBuf>,

    /// MIDI file written after every cycle
    #[arg(short, long, global = true, value_name = "FILE")]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a project and re-interpret it on every change
    Start {
        /// Project directory
        #[arg(value_name = "PROJECT_DIR", default_value = ".")]
        project: PathBuf,
    },

    /// Interpret a project once and exit
    Render {
        /// Project directory
        #[arg(value_name = "PROJECT_DIR", default_value = ".")]
        project: PathBuf,
    },

    /// Write a commented default configuration file
    InitConfig,

    /// Print the configuration file location
    ConfigPath,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    match &args.command {
        Commands::Start { project } => start(&args, project),
        Commands::Render { project } => render(&args, project),
        Commands::InitConfig => {
            let path = Config::create_default_config_file()
                .context("Failed to write default config")?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Commands::ConfigPath => {
            let path = Config::config_path().context("Failed to locate config")?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Load the configuration and apply command-line overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::load_or_default(),
    };

    if let Some(dir) = &args.resource_dir {
        config.interpreter.resource_directory = Some(dir.clone());
    }
    if let Some(output) = &args.output {
        config.output.path = output.clone();
    }

    Ok(config)
}

fn build_interpreter(config: &Config, project: &Path) -> Result<Interpreter> {
    let document = project.join(PROJECT_FILE);
    if !document.exists() {
        anyhow::bail!("Project document not found: {}", document.display());
    }

    let resources = match &config.interpreter.resource_directory {
        Some(dir) => dir.clone(),
        None => {
            log::warn!(
                "No resource directory configured, looking for components in {}",
                project.display()
            );
            project.to_path_buf()
        }
    };

    let output = if config.output.path.is_absolute() {
        config.output.path.clone()
    } else {
        project.join(&config.output.path)
    };

    log::info!("Project: {}", project.display());
    log::info!("Components: {}", resources.join("components").display());
    log::info!("Output: {}", output.display());

    let sink = MidiFileSink::new(
        &output,
        config.output.ticks_per_quarter,
        config.output.velocity,
    );
    let interpreter = Interpreter::new(
        project,
        Box::new(DirectoryResolver::new(&resources)),
        Box::new(sink),
    )
    .context("Failed to load schema document")?;

    Ok(match &config.player.command {
        Some(command) => {
            log::info!("Player: {}", command.display());
            interpreter.with_player(Player::new(command, config.player.args.clone()), output)
        }
        None => interpreter,
    })
}

fn render(args: &Args, project: &Path) -> Result<()> {
    let config = load_config(args)?;
    let mut interpreter = build_interpreter(&config, project)?;
    let report = interpreter.run_cycle().context("Interpretation failed")?;
    println!(
        "{} notes from {} generator(s) in {:.1?}",
        report.notes,
        report.generators.len(),
        report.elapsed
    );
    Ok(())
}

fn start(args: &Args, project: &Path) -> Result<()> {
    let config = load_config(args)?;
    let mut interpreter = build_interpreter(&config, project)?;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Error setting signal handler")?;
    let (shutdown_tx, shutdown) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        if let Some(signal) = signals.forever().next() {
            log::info!("Interrupted by signal {}", signal);
            let _ = shutdown_tx.send(());
        }
    });

    let (events, _watcher) = spawn_watcher(
        interpreter.document_path(),
        config.interpreter.poll_interval(),
    )
    .context("Failed to start file watcher")?;

    log::info!("Watching {} (Press Ctrl+C to exit)", interpreter.document_path().display());
    interpreter.run(&events, &shutdown);

    log::info!("Exiting...");
    Ok(())
}
