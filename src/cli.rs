use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "catbot")]
#[command(about = "Slack bot for CATMAID neuron queries, annotations and NBLAST searches", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Connect to Slack and serve commands.
    Run {
        /// Config file (default: $CATBOT_CONFIG or ./catbot.json)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Log at debug level (RUST_LOG overrides)
        #[arg(long)]
        debug: bool,
    },

    /// Check configuration and connectivity.
    Doctor {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print a persisted store as JSON.
    Dump {
        #[arg(value_enum)]
        store: StoreKind,
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Write a config file with every default filled in.
    Init {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum StoreKind {
    Neurondb,
    Subscriptions,
}
