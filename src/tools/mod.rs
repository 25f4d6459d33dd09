//! Protected tools exposed to authenticated MCP clients.
//!
//! Each tool declares the provider scope it needs. The scope is checked
//! against the caller's session before any outbound request is made.

pub mod github;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::gateway::auth::DelegatedCall;
use crate::{Error, Result};

pub use github::{GitHubApi, NewGist, NewRepository, sanitize_repo_name};

/// Default and maximum page size for `list_gists`
const DEFAULT_PER_PAGE: u8 = 30;
const MAX_PER_PAGE: u8 = 100;

/// Catalog entry for one tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    /// Tool name, used in `POST /tools/{name}`
    pub name: &'static str,
    /// What the tool does
    pub description: &'static str,
    /// Scope the session must hold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_scope: Option<&'static str>,
    /// JSON schema of the argument object
    pub input_schema: Value,
}

/// All tools the gateway serves
#[must_use]
pub fn catalog() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "get_user_info",
            description: "Return the authenticated identity, granted scopes, and session expiry",
            required_scope: None,
            input_schema: json!({"type": "object", "properties": {}}),
        },
        ToolSpec {
            name: "list_gists",
            description: "List the authenticated user's gists",
            required_scope: None,
            input_schema: json!({
                "type": "object",
                "properties": {
                    "per_page": {"type": "integer", "minimum": 1, "maximum": MAX_PER_PAGE}
                }
            }),
        },
        ToolSpec {
            name: "create_gist",
            description: "Create a gist from one or more files",
            required_scope: Some("gist"),
            input_schema: json!({
                "type": "object",
                "required": ["files"],
                "properties": {
                    "description": {"type": "string"},
                    "public": {"type": "boolean"},
                    "files": {"type": "object", "additionalProperties": {"type": "string"}}
                }
            }),
        },
        ToolSpec {
            name: "create_repository",
            description: "Create a repository owned by the authenticated user",
            required_scope: Some("repo"),
            input_schema: json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "private": {"type": "boolean"},
                    "auto_init": {"type": "boolean"}
                }
            }),
        },
    ]
}

/// Look up a tool by name
#[must_use]
pub fn find(name: &str) -> Option<ToolSpec> {
    catalog().into_iter().find(|t| t.name == name)
}

/// Runs tools on behalf of a [`DelegatedCall`]
pub struct ToolExecutor {
    api: GitHubApi,
}

impl ToolExecutor {
    /// Create an executor backed by `api`
    #[must_use]
    pub fn new(api: GitHubApi) -> Self {
        Self { api }
    }

    /// Invoke `name` with a JSON argument object
    pub async fn invoke(&self, name: &str, call: &DelegatedCall, args: Value) -> Result<Value> {
        let spec = find(name).ok_or_else(|| Error::InvalidRequest(format!("Unknown tool '{name}'")))?;
        if let Some(scope) = spec.required_scope {
            call.require_scope(scope)?;
        }
        info!(tool = name, login = %call.identity().login, "Invoking tool");

        match spec.name {
            "get_user_info" => Ok(user_info(call)),
            "list_gists" => {
                let per_page = args
                    .get("per_page")
                    .and_then(Value::as_u64)
                    .map_or(DEFAULT_PER_PAGE, |n| {
                        u8::try_from(n.clamp(1, u64::from(MAX_PER_PAGE))).unwrap_or(MAX_PER_PAGE)
                    });
                self.api.list_gists(call.credential(), per_page).await
            }
            "create_gist" => {
                let gist: NewGist = parse_args(args)?;
                self.api.create_gist(call.credential(), &gist).await
            }
            "create_repository" => {
                let repo: NewRepository = parse_args(args)?;
                self.api.create_repository(call.credential(), &repo).await
            }
            other => Err(Error::Internal(format!("Tool '{other}' has no implementation"))),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| Error::InvalidRequest(format!("Invalid arguments: {e}")))
}

fn user_info(call: &DelegatedCall) -> Value {
    let session = call.session();
    json!({
        "login": session.identity.login,
        "subject": session.identity.subject,
        "name": session.identity.name,
        "email": session.identity.email,
        "scopes": session.granted_scopes,
        "session_expires_at": session.expires_at,
        "session_active": true,
    })
}
