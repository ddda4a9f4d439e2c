use anyhow::{anyhow, Context, Result};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::OrgContext;

/// Error body shape the REST API returns for failed requests, e.g.
/// `[{"message": "Session expired", "errorCode": "INVALID_SESSION_ID"}]`
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
    #[serde(rename = "errorCode")]
    error_code: String,
}

pub struct ApiClient {
    http: Client,
    instance_url: String,
    api_version: String,
    access_token: String,
}

impl ApiClient {
    pub fn new(ctx: &OrgContext) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("sfdata/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            instance_url: ctx.instance_url.clone(),
            api_version: ctx.api_version.clone(),
            access_token: ctx.access_token.clone(),
        })
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/services/data/v{}{}",
            self.instance_url, self.api_version, path
        )
    }

    /// GET a path under /services/data/v{version}, e.g. "/query?q=...".
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.data_url(path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        handle_response(resp).await
    }

    /// GET a server-relative path the API handed back, e.g. a
    /// `nextRecordsUrl` of the form "/services/data/v62.0/query/01g...".
    pub async fn get_server_path<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.instance_url, path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        handle_response(resp).await
    }

    /// POST a JSON body to a path under /services/data/v{version}.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.data_url(path);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        handle_response(resp).await
    }
}

async fn handle_response<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp.json::<T>().await.context("failed to decode API response");
    }
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow!(normalize_api_error(status, &body)))
}

/// All non-2xx responses funnel through here so callers see one message
/// shape regardless of which endpoint failed.
fn normalize_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(errors) = serde_json::from_str::<Vec<ApiErrorBody>>(body) {
        if let Some(first) = errors.first() {
            return format!("{} ({})", first.message, first.error_code);
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {trimmed}")
    }
}
