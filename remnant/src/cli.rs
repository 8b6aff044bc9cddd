// remnant/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use remnant_common::error::Result;

pub mod collectors;
pub mod scan;

use crate::cli::collectors::Collectors;
use crate::cli::scan::ScanArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "remnant", bin_name = "remnant")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan the system for residual artifacts of uninstalled software
    Scan(ScanArgs),
    /// List the available evidence collectors
    Collectors(Collectors),
}

impl Command {
    pub async fn run(&self) -> Result<()> {
        match self {
            Self::Scan(command) => command.run().await,
            Self::Collectors(command) => command.run(),
        }
    }
}
