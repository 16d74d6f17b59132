//! Command-line interface for Clubboard.

use clap::{Parser, Subcommand};

/// Clubboard - community website backend for the club
#[derive(Parser)]
#[command(name = "clubboard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the API server with the background scheduler
    #[command(alias = "-d", alias = "--daemon", alias = "daemon")]
    Serve,

    /// Run a single newsletter dispatch pass and exit
    Newsletter,

    /// Create default config file
    #[command(alias = "--init")]
    Init,
}
