use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;

mod args;
mod auth;
mod config;
mod env;
mod http;
mod query;
mod status;
mod tree;
mod ui;
mod utils;

use crate::args::CLIArgs;

const DEFAULT_DEV_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");
const CLI_VERSION: &str = match option_env!("SFDATA_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_DEV_VERSION,
};

#[derive(Debug, Parser)]
#[command(name = "sfdata", about = "Salesforce data CLI", version = CLI_VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a SOQL query and print the results
    Query(CLIArgs<query::QueryArgs>),
    /// Export a queried record tree into portable JSON files
    Export(CLIArgs<tree::export::ExportArgs>),
    /// Import record-tree JSON files into an org
    Import(CLIArgs<tree::import::ImportArgs>),
    /// Show the resolved org configuration
    Status(CLIArgs<status::StatusArgs>),
    /// Read and write persistent configuration
    Config(CLIArgs<config::ConfigArgs>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);

    match cli.command {
        Commands::Query(cmd) => query::run(cmd.base, cmd.args).await?,
        Commands::Export(cmd) => tree::export::run(cmd.base, cmd.args).await?,
        Commands::Import(cmd) => tree::import::run(cmd.base, cmd.args).await?,
        Commands::Status(cmd) => status::run(cmd.base, cmd.args)?,
        Commands::Config(cmd) => config::run(cmd.base, cmd.args)?,
    }

    Ok(())
}
