//! labdeck command-line interface.
//!
//! # Configuration
//!
//! Settings come from `labdeck.toml` (or `--config`) and `LABDECK_*`
//! environment variables; see [`labdeck::config`].
//!
//! # Exit codes
//!
//! | code | meaning |
//! |------|---------|
//! | 0    | success |
//! | 1    | any other failure |
//! | 3    | run state not found |
//! | 4    | run state corrupt |
//! | 5    | device timeout |
//! | 6    | device command failed |
//! | 7    | stack or allocation exhausted |
//! | 130  | aborted by the operator |

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use labdeck::config::{Settings, DEFAULT_CONFIG_FILE};
use labdeck::driver::MockDriver;
use labdeck::error::{exit_code_for, DeckError};
use labdeck::layout::Layout;
use labdeck::logging;
use labdeck::operator::{ConsoleOperator, HumanInTheLoop, Notification};
use labdeck::protocol::{cherry_pick::WELLMAP_FILE, ProtocolRegistry, ProtocolRun};
use labdeck::retry::{run_with_retry, RetryPolicy};
use labdeck::run::Run;
use labdeck::state::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Resumable protocols for a liquid-handling robot
#[derive(Parser, Debug)]
#[command(name = "labdeck")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the built-in protocols
    Protocols,
    /// List runs, newest first
    Runs,
    /// Start a new run or resume an existing one
    Run {
        /// Protocol to run
        #[arg(short, long)]
        protocol: String,
        /// Resume this run instead of starting a new one
        #[arg(long)]
        run: Option<String>,
        /// Deck layout for a new run
        #[arg(long, value_name = "FILE")]
        layout: Option<PathBuf>,
        /// Well map copied into a new run
        #[arg(long, value_name = "FILE")]
        wellmap: Option<PathBuf>,
    },
    /// Inspect or edit the state of a run
    State {
        #[command(subcommand)]
        action: StateAction,
    },
}

#[derive(Subcommand, Debug)]
enum StateAction {
    /// Print every step flag
    Show {
        #[arg(long)]
        run: String,
        #[arg(long)]
        protocol: String,
    },
    /// Force one step flag
    Set {
        #[arg(long)]
        run: String,
        #[arg(long)]
        protocol: String,
        #[arg(long)]
        step: String,
        #[arg(long)]
        value: u64,
    },
    /// Pick a flag and a value interactively
    Override {
        #[arg(long)]
        run: String,
        #[arg(long)]
        protocol: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli).await {
        let code = exit_code_for(&err);
        error!(error = %err, code, "labdeck failed");
        eprintln!("error: {err:#}");
        std::process::exit(code);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let settings = Settings::load_from(&cli.config)
        .map_err(DeckError::from)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&settings.application.log_level);
    logging::init(level, settings.application.json_logs);

    let registry = ProtocolRegistry::new();
    match cli.command {
        Commands::Protocols => {
            for (name, description) in registry.list() {
                println!("{name:<18} {description}");
            }
        }
        Commands::Runs => {
            for id in Run::list(&settings.runs.root)? {
                println!("{id}");
            }
        }
        Commands::Run {
            protocol,
            run,
            layout,
            wellmap,
        } => run_protocol(&settings, &registry, &protocol, run, layout, wellmap).await?,
        Commands::State { action } => edit_state(&settings, action)?,
    }
    Ok(())
}

async fn run_protocol(
    settings: &Settings,
    registry: &ProtocolRegistry,
    protocol: &str,
    run_id: Option<String>,
    layout: Option<PathBuf>,
    wellmap: Option<PathBuf>,
) -> Result<()> {
    let root = &settings.runs.root;
    let protocol = registry.create(protocol)?;
    let operator: Arc<dyn HumanInTheLoop> = Arc::new(ConsoleOperator);

    let run = match run_id {
        Some(id) => {
            if layout.is_some() || wellmap.is_some() {
                warn!(run = %id, "resuming: --layout and --wellmap are ignored");
            }
            Run::open(root, &id)?
        }
        None => {
            let path = layout.ok_or_else(|| anyhow!("--layout is required to start a new run"))?;
            let mut deck = Layout::from_path(&path)
                .and_then(|layout| layout.build(&settings.allocation))
                .with_context(|| format!("building the deck from {}", path.display()))?;
            deck.confirm_loaded(operator.as_ref())?;
            let run = Run::create_with_deck(root, &deck)?;
            if let Some(src) = wellmap {
                std::fs::copy(&src, run.file(WELLMAP_FILE))
                    .with_context(|| format!("copying well map {}", src.display()))?;
            }
            println!("run {}", run.id());
            run
        }
    };

    info!(run = %run.id(), protocol = protocol.name(), "using the simulated device driver");
    let mut job = ProtocolRun::new(
        protocol,
        &run,
        root.clone(),
        Arc::new(MockDriver::new()),
        operator.clone(),
        settings.device.timeout(),
    );
    let policy = RetryPolicy::from(&settings.retry);

    tokio::select! {
        result = run_with_retry(&mut job, &policy, operator.as_ref()) => result?,
        _ = tokio::signal::ctrl_c() => {
            operator.notify(&Notification::warning(
                "Run aborted",
                format!("Ctrl-C received; resume with --run {}", run.id()),
            ));
            return Err(DeckError::Aborted("interrupted by Ctrl-C".to_string()).into());
        }
    }
    Ok(())
}

fn edit_state(settings: &Settings, action: StateAction) -> Result<()> {
    let root = &settings.runs.root;
    match action {
        StateAction::Show { run, protocol } => {
            let run = Run::open(root, &run)?;
            let store = StateStore::load(&run.state_path(&protocol))?;
            print!("{}", store.state());
        }
        StateAction::Set {
            run,
            protocol,
            step,
            value,
        } => {
            let run = Run::open(root, &run)?;
            let mut store = StateStore::load(&run.state_path(&protocol))?;
            store.set(&step, value)?;
            info!(run = %run.id(), protocol = %protocol, step = %step, value, "flag set from the command line");
            println!("{step} = {value}");
        }
        StateAction::Override { run, protocol } => {
            let run = Run::open(root, &run)?;
            let mut store = StateStore::load(&run.state_path(&protocol))?;
            match store.interactive_override(&ConsoleOperator)? {
                Some((step, value)) => println!("{step} = {value}"),
                None => println!("unchanged"),
            }
        }
    }
    Ok(())
}
