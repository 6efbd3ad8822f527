use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tokio::process::Command;
use url::Url;

use ghmon_core::{Repo, User};

#[derive(Error, Debug)]
pub enum GithubClientError {
    #[error("Cannot find github cli binary in PATH")]
    CannotFindGithubCLI,
    #[error("Not logged into github cli, please use 'gh auth login'")]
    NotLoggedIn,
    #[error("Operation {operation} exited with {status}, stderr: {stderr}")]
    CommandFailed {
        operation: String,
        status: String,
        stderr: String,
    },
    #[error(
        "Got unexpected output from operation {operation}, stdout: {stdout}, underlying error: {underlying_error}"
    )]
    UnexpectedOutput {
        operation: String,
        stdout: String,
        underlying_error: serde_json::Error,
    },
    #[error("Got unexpected io error when running {operation}: {underlying_error}")]
    UnexpectedCommandError {
        operation: String,
        underlying_error: std::io::Error,
    },
    #[error("Could not parse url {url}: {underlying_error}")]
    InvalidUrl {
        url: String,
        underlying_error: url::ParseError,
    },
}

pub type Result<T> = std::result::Result<T, GithubClientError>;

/// Raw access to the REST API. Returns the response body for `endpoint`.
#[async_trait]
pub trait GithubApi: Send + Sync {
    async fn api(&self, endpoint: &str) -> Result<String>;
}

/// Talks to GitHub through the `gh` command line client.
pub struct GithubClient {}

impl GithubClient {
    pub async fn new() -> Result<GithubClient> {
        match Command::new("gh")
            .arg("auth")
            .arg("status")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
        {
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GithubClientError::CannotFindGithubCLI)
            }
            Err(e) => Err(GithubClientError::UnexpectedCommandError {
                operation: "gh auth status".to_string(),
                underlying_error: e,
            }),
            Ok(status) => match status.code() {
                Some(0) => Ok(GithubClient {}),
                Some(1) => Err(GithubClientError::NotLoggedIn),
                _ => Err(GithubClientError::CommandFailed {
                    operation: "gh auth status".to_string(),
                    status: status.to_string(),
                    stderr: String::new(),
                }),
            },
        }
    }
}

#[async_trait]
impl GithubApi for GithubClient {
    async fn api(&self, endpoint: &str) -> Result<String> {
        let operation = format!("gh api {endpoint}");
        log::debug!("Running {operation}");

        let command_output = Command::new("gh")
            .arg("api")
            .arg(endpoint)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| GithubClientError::UnexpectedCommandError {
                operation: operation.clone(),
                underlying_error: e,
            })?;

        if !command_output.status.success() {
            return Err(GithubClientError::CommandFailed {
                operation,
                status: command_output.status.to_string(),
                stderr: String::from_utf8_lossy(&command_output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&command_output.stdout).to_string())
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct RawUser {
    pub id: u64,
    pub login: String,
}

impl From<RawUser> for User {
    fn from(value: RawUser) -> Self {
        User {
            id: value.id,
            username: value.login,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct RawPullRequestLink {
    pub url: String,
}

/// One hit of an issue search that is backed by a pull request.
#[derive(Deserialize, Debug)]
pub struct RawSearchItem {
    pub id: u64,
    pub title: String,
    pub body: Option<String>,
    pub html_url: String,
    pub user: RawUser,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pull_request: RawPullRequestLink,
    pub repository_url: String,
}

#[derive(Deserialize, Debug)]
pub struct RawSearchResult {
    pub items: Vec<serde_json::Value>,
}

#[derive(Deserialize, Debug)]
pub struct RawRepo {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
}

impl From<RawRepo> for Repo {
    fn from(value: RawRepo) -> Self {
        Repo {
            id: value.id,
            name: value.name,
            full_name: value.full_name,
            description: value.description.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct RawPullRequestDetail {
    #[serde(default)]
    pub requested_reviewers: Vec<RawUser>,
}

#[derive(Deserialize, Debug)]
pub struct RawReview {
    pub user: Option<RawUser>,
    pub state: String,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Fetches `endpoint` and deserializes the body into `T`.
pub async fn fetch<T: DeserializeOwned>(api: &dyn GithubApi, endpoint: &str) -> Result<T> {
    let stdout = api.api(endpoint).await?;
    serde_json::from_str(&stdout).map_err(|e| GithubClientError::UnexpectedOutput {
        operation: format!("gh api {endpoint}"),
        stdout,
        underlying_error: e,
    })
}

/// `gh api` takes endpoints relative to the API host, strip everything else.
pub fn endpoint_from_url<S: AsRef<str>>(url: S) -> Result<String> {
    let url = url.as_ref();
    let parsed = Url::parse(url).map_err(|e| GithubClientError::InvalidUrl {
        url: url.to_string(),
        underlying_error: e,
    })?;
    Ok(parsed.path().to_string())
}

pub async fn current_user(api: &dyn GithubApi) -> Result<User> {
    let raw: RawUser = fetch(api, "/user").await?;
    Ok(raw.into())
}

pub fn search_endpoint<S: AsRef<str>>(query: S) -> String {
    format!("/search/issues?q={}", query.as_ref())
}
