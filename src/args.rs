use std::path::PathBuf;

use clap::Args;

pub const DEFAULT_API_VERSION: &str = "62.0";

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Org instance URL, e.g. https://mycompany.my.salesforce.com (or via SFDATA_INSTANCE_URL)
    #[arg(
        short = 'u',
        long,
        env = "SFDATA_INSTANCE_URL",
        hide_env_values = true,
        global = true
    )]
    pub instance_url: Option<String>,

    /// Access token used as Bearer auth (or via SFDATA_ACCESS_TOKEN)
    #[arg(
        long,
        env = "SFDATA_ACCESS_TOKEN",
        hide_env_values = true,
        global = true
    )]
    pub access_token: Option<String>,

    /// REST API version (or via SFDATA_API_VERSION)
    #[arg(long, env = "SFDATA_API_VERSION", global = true)]
    pub api_version: Option<String>,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "SFDATA_ENV_FILE", hide_env_values = true)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}
