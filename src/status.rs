use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::args::{BaseArgs, DEFAULT_API_VERSION};
use crate::config;

#[derive(Debug, Clone, Args)]
pub struct StatusArgs {}

#[derive(Serialize)]
struct StatusOutput {
    instance_url: Option<String>,
    api_version: String,
    authenticated: bool,
    source: Option<String>,
}

pub fn run(base: BaseArgs, _args: StatusArgs) -> Result<()> {
    let global_path = config::global_path().ok();
    let global_cfg = config::load_global().unwrap_or_default();
    let local_path = config::local_path();
    let local_cfg = local_path
        .as_ref()
        .map(|p| config::load_file(p))
        .unwrap_or_default();

    // Resolve values with priority: CLI > local > global
    let (instance_url, api_version, authenticated, source) =
        resolve_status(&base, &global_cfg, &local_cfg, &local_path, &global_path);

    if base.json {
        let output = StatusOutput {
            instance_url,
            api_version,
            authenticated,
            source,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "instance_url: {}",
            instance_url.as_deref().unwrap_or("(not set)")
        );
        println!("api_version: {api_version}");
        println!("authenticated: {}", if authenticated { "yes" } else { "no" });
        if let Some(src) = source {
            println!("source: {src}");
        }
    }

    Ok(())
}

fn resolve_status(
    base: &BaseArgs,
    global: &config::Config,
    local: &config::Config,
    local_path: &Option<std::path::PathBuf>,
    global_path: &Option<std::path::PathBuf>,
) -> (Option<String>, String, bool, Option<String>) {
    // Priority: CLI flags > local config > global config
    let instance_url = base
        .instance_url
        .clone()
        .or_else(|| local.instance_url.clone())
        .or_else(|| global.instance_url.clone());

    let api_version = base
        .api_version
        .clone()
        .or_else(|| local.api_version.clone())
        .or_else(|| global.api_version.clone())
        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

    let authenticated = base.access_token.is_some()
        || local.access_token.is_some()
        || global.access_token.is_some();

    // Determine source based on where the instance URL came from
    let source = if base.instance_url.is_some() {
        Some("cli".to_string())
    } else if local.instance_url.is_some() {
        local_path.as_ref().map(|p| p.display().to_string())
    } else if global.instance_url.is_some() {
        global_path.as_ref().map(|p| p.display().to_string())
    } else {
        None
    };

    (instance_url, api_version, authenticated, source)
}
