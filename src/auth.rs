use anyhow::{bail, Result};

use crate::args::{BaseArgs, DEFAULT_API_VERSION};
use crate::config;

/// Resolved org credentials and context for API calls
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub instance_url: String,
    pub access_token: String,
    pub api_version: String,
}

/// Resolve the target org with priority: CLI flags / env > local config >
/// global config.
pub fn resolve(base: &BaseArgs) -> Result<OrgContext> {
    let cfg = config::load().unwrap_or_default();

    let instance_url = base
        .instance_url
        .clone()
        .or_else(|| cfg.instance_url.clone());
    let access_token = base
        .access_token
        .clone()
        .or_else(|| cfg.access_token.clone());
    let api_version = base
        .api_version
        .clone()
        .or_else(|| cfg.api_version.clone())
        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

    let Some(instance_url) = instance_url else {
        bail!(
            "No instance URL configured. Pass --instance-url, set SFDATA_INSTANCE_URL, \
            or run `sfdata config set instance_url <url>`."
        );
    };
    let Some(access_token) = access_token else {
        bail!(
            "No access token configured. Pass --access-token, set SFDATA_ACCESS_TOKEN, \
            or run `sfdata config set access_token <token>`."
        );
    };

    Ok(OrgContext {
        instance_url: normalize_instance_url(&instance_url),
        access_token,
        api_version,
    })
}

fn normalize_instance_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
