#![forbid(unsafe_code)]
//! trinityd - node identity, bootstrap and genesis export

use clap::{Parser, Subcommand};
use colored::*;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process;
use trinity_bootstrap::app::kvstore::{KvStoreExporter, KvStoreFactory};
use trinity_bootstrap::app::{ExportHeight, ExportRequest, UnknownModulePolicy};
use trinity_bootstrap::commands::{self, OutputFormat};
use trinity_bootstrap::config::{default_home, load_config, NodeConfig, NodeLayout};
use trinity_bootstrap::export::{export_state, genesis_to_string, write_genesis};
use trinity_bootstrap::node::{init_logging, Node, NodeContext};
use trinity_bootstrap::{NodeError, Result};

#[derive(Parser)]
#[command(name = "trinityd", author, version, about, long_about = None)]
struct Cli {
    /// Node home directory (default: ~/.trinityd)
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,
    /// Log level, overrides config.toml (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    log_level: Option<String>,
    /// Application trace file, overrides config.toml ("" disables)
    #[arg(long, global = true, value_name = "FILE")]
    trace_store: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show this node's ID
    ShowNodeId,
    /// Show this node's validator public key
    ShowValidator {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Show this node's validator consensus address
    ShowAddress {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
    /// Print engine and protocol versions
    Version,
    /// Remove the address book, keys, sign state and all data
    UnsafeResetAll,
    /// Bootstrap the node with the reference key/value application
    Start {
        /// JSON-lines file of blocks (arrays of txs) to apply on startup
        #[arg(long, value_name = "FILE")]
        replay: Option<PathBuf>,
        /// Exit after startup instead of waiting for Ctrl-C
        #[arg(long)]
        halt: bool,
    },
    /// Export application state and validators as a genesis document
    Export {
        /// Height to export (default: latest committed)
        #[arg(long)]
        height: Option<u64>,
        /// Prepare the export for a chain restarting at genesis height
        #[arg(long)]
        for_zero_height: bool,
        /// Comma separated modules to leave out
        #[arg(long, value_delimiter = ',')]
        modules_to_skip: Vec<String>,
        /// Warn instead of failing on unknown module names in --modules-to-skip
        #[arg(long)]
        allow_unknown_modules: bool,
        /// Write the genesis document here instead of stdout
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", "Error:".bright_red().bold(), e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Version = cli.command {
        print!("{}", commands::version()?);
        return Ok(());
    }

    let layout = NodeLayout::new(cli.home.clone().unwrap_or_else(default_home));
    let config = effective_config(&cli, &layout)?;
    init_logging(&config.log_level)?;

    match cli.command {
        Commands::Version => {}
        Commands::ShowNodeId => println!("{}", commands::show_node_id(&layout)?),
        Commands::ShowValidator { output } => {
            println!("{}", commands::show_validator(&layout, output)?)
        }
        Commands::ShowAddress { output } => {
            println!("{}", commands::show_address(&layout, output)?)
        }
        Commands::UnsafeResetAll => {
            commands::unsafe_reset_all(&layout)?;
        }
        Commands::Start { replay, halt } => start(layout, config, replay, halt)?,
        Commands::Export {
            height,
            for_zero_height,
            modules_to_skip,
            allow_unknown_modules,
            output,
        } => {
            let request = ExportRequest {
                height: height.map_or(ExportHeight::Latest, ExportHeight::At),
                for_zero_height,
                excluded_modules: modules_to_skip,
                unknown_modules: if allow_unknown_modules {
                    UnknownModulePolicy::Ignore
                } else {
                    UnknownModulePolicy::Reject
                },
            };
            let genesis = export_state(&layout, &config, &KvStoreExporter, &request)?;
            match output {
                Some(path) => {
                    write_genesis(&path, &genesis)?;
                    eprintln!(
                        "{} height {} -> {}",
                        "Exported".bright_green(),
                        genesis.initial_height.saturating_sub(1),
                        path.display().to_string().bright_yellow()
                    );
                }
                None => println!("{}", genesis_to_string(&genesis)?),
            }
        }
    }
    Ok(())
}

fn effective_config(cli: &Cli, layout: &NodeLayout) -> Result<NodeConfig> {
    let mut config = load_config(layout)?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(trace) = &cli.trace_store {
        config.trace_store = trace.clone();
    }
    config.validate()?;
    Ok(config)
}

fn start(layout: NodeLayout, config: NodeConfig, replay: Option<PathBuf>, halt: bool) -> Result<()> {
    let factory = KvStoreFactory {
        pruning_keep_recent: config.storage.pruning_keep_recent,
    };
    let context = NodeContext::load(layout, config)?;
    let mut node = Node::bootstrap(context, &factory)?;

    if let Some(path) = replay {
        let file = File::open(&path).map_err(|e| NodeError::io(&path, e))?;
        let applied = node.replay_blocks(BufReader::new(file))?;
        println!("{} {} blocks", "Replayed".bright_green(), applied);
    }

    println!(
        "{} {}",
        "Node ID:".bright_cyan(),
        node.context().node_key.id().bright_yellow()
    );
    println!(
        "{} {}",
        "Validator:".bright_cyan(),
        node.context().validator_key.bech32_address().bright_yellow()
    );

    if !halt {
        let runtime =
            tokio::runtime::Runtime::new().map_err(|e| NodeError::io(node.context().layout.root(), e))?;
        runtime
            .block_on(tokio::signal::ctrl_c())
            .map_err(|e| NodeError::io(node.context().layout.root(), e))?;
        println!("{}", "Shutting down...".bright_yellow());
    }

    node.shutdown();
    Ok(())
}
