//! CLI interface for Weave
//!
//! This module provides the command-line interface using clap's derive API.
//! The commands inspect what an engine has persisted: configuration,
//! session history, sessions per actor and known actors.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Weave conversational memory engine
///
/// Inspect the configuration and the SQLite store an embedding application
/// writes through the engine.
#[derive(Parser, Debug)]
#[command(name = "weave")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the most recent fragments of a session
    History {
        /// Session id, or a name that is mapped to a stable id
        session: String,

        /// Number of fragments to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the sessions an actor was most recently active in
    Sessions {
        /// Actor id, or a name that is mapped to a stable id
        actor: String,

        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List known actors
    Actors {
        /// Only show actors whose name contains this text
        #[arg(short, long)]
        query: Option<String>,

        /// Number of actors to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the resolved configuration
    Show,

    /// Print the configuration file path
    Path,
}
