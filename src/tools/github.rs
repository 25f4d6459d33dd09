//! GitHub REST calls made with a session's provider credential

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::oauth::ProviderCredential;
use crate::oauth::provider::build_http_client;
use crate::{Error, Result};

/// Longest repository name GitHub accepts
const MAX_REPO_NAME_LEN: usize = 100;

/// Arguments of `create_gist`
#[derive(Debug, Clone, Deserialize)]
pub struct NewGist {
    /// Gist description
    #[serde(default)]
    pub description: String,
    /// File name to content
    pub files: BTreeMap<String, String>,
    /// Public or secret gist
    #[serde(default)]
    pub public: bool,
}

/// Arguments of `create_repository`
#[derive(Debug, Clone, Deserialize)]
pub struct NewRepository {
    /// Requested name (sanitized before use)
    pub name: String,
    /// Repository description
    #[serde(default)]
    pub description: String,
    /// Private repository
    #[serde(default)]
    pub private: bool,
    /// Create an initial commit
    #[serde(default = "default_true")]
    pub auto_init: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct GistFile<'a> {
    content: &'a str,
}

/// Thin GitHub REST client. Never retries.
pub struct GitHubApi {
    http_client: Client,
    api_base: String,
}

impl GitHubApi {
    /// Create a client for `api_base` with a bounded timeout
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http_client: build_http_client(timeout)?,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    /// `GET /gists`
    pub async fn list_gists(&self, credential: &ProviderCredential, per_page: u8) -> Result<Value> {
        let request = self
            .http_client
            .get(format!("{}/gists", self.api_base))
            .query(&[("per_page", per_page)]);
        let gists = self.send(request, credential, "List gists").await?;

        let items = gists
            .as_array()
            .map(|list| list.iter().map(summarize_gist).collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(json!({ "count": items.len(), "gists": items }))
    }

    /// `POST /gists`
    pub async fn create_gist(&self, credential: &ProviderCredential, gist: &NewGist) -> Result<Value> {
        if gist.files.is_empty() {
            return Err(Error::InvalidRequest("files must contain at least one file".to_string()));
        }
        let files: BTreeMap<&str, GistFile<'_>> = gist
            .files
            .iter()
            .map(|(name, content)| (name.as_str(), GistFile { content }))
            .collect();

        let request = self
            .http_client
            .post(format!("{}/gists", self.api_base))
            .json(&json!({
                "description": gist.description,
                "public": gist.public,
                "files": files,
            }));
        let created = self.send(request, credential, "Create gist").await?;
        Ok(summarize_gist(&created))
    }

    /// `POST /user/repos`
    pub async fn create_repository(
        &self,
        credential: &ProviderCredential,
        repo: &NewRepository,
    ) -> Result<Value> {
        let name = sanitize_repo_name(&repo.name);
        if name != repo.name {
            debug!(requested = %repo.name, sanitized = %name, "Sanitized repository name");
        }

        let request = self
            .http_client
            .post(format!("{}/user/repos", self.api_base))
            .json(&json!({
                "name": name,
                "description": repo.description,
                "private": repo.private,
                "auto_init": repo.auto_init,
            }));
        let created = self.send(request, credential, "Create repository").await?;

        Ok(json!({
            "id": created["id"],
            "name": created["name"],
            "full_name": created["full_name"],
            "html_url": created["html_url"],
            "private": created["private"],
        }))
    }

    async fn send(
        &self,
        request: RequestBuilder,
        credential: &ProviderCredential,
        context: &str,
    ) -> Result<Value> {
        let response = request
            .bearer_auth(credential.expose())
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| Error::from_transport(context, &e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| format!("HTTP {status}"));
            warn!(status = %status, context = context, "GitHub API call failed");
            return Err(Error::upstream_rejected(format!("GitHub API error: {message}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::from_transport(context, &e))
    }
}

fn summarize_gist(gist: &Value) -> Value {
    let files: Vec<&str> = gist["files"]
        .as_object()
        .map(|files| files.keys().map(String::as_str).collect())
        .unwrap_or_default();
    json!({
        "id": gist["id"],
        "html_url": gist["html_url"],
        "description": gist["description"],
        "public": gist["public"],
        "files": files,
    })
}

/// Map a free-form name onto GitHub's repository name alphabet.
///
/// Disallowed characters become `-`, runs of `-` collapse, leading and
/// trailing `-`/`.` are dropped, and the result is capped at 100 characters.
#[must_use]
pub fn sanitize_repo_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    let trimmed: String = out
        .trim_matches(|c: char| c == '-' || c == '.')
        .chars()
        .take(MAX_REPO_NAME_LEN)
        .collect();
    if trimmed.is_empty() {
        "repository".to_string()
    } else {
        trimmed
    }
}
