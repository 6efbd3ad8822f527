//! Scripted stand-ins for the `gh` client and canned API payloads.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;

use ghmon_core::{PullRequest, Repo, User};

use crate::gh_client::{GithubApi, GithubClientError, Result};

/// Serves canned bodies per endpoint; unknown endpoints fail like a 404.
#[derive(Default)]
pub struct FakeGithub {
    responses: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl FakeGithub {
    pub fn new() -> FakeGithub {
        FakeGithub::default()
    }

    pub fn with<S: Into<String>>(mut self, endpoint: &str, body: S) -> FakeGithub {
        self.responses.insert(endpoint.to_string(), body.into());
        self
    }

    pub fn with_json(self, endpoint: &str, body: serde_json::Value) -> FakeGithub {
        self.with(endpoint, body.to_string())
    }

    /// Holds the response for `endpoint` back for `delay`.
    pub fn delayed(mut self, endpoint: &str, delay: Duration) -> FakeGithub {
        self.delays.insert(endpoint.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, endpoint: &str) -> usize {
        self.calls().iter().filter(|call| *call == endpoint).count()
    }
}

#[async_trait]
impl GithubApi for FakeGithub {
    async fn api(&self, endpoint: &str) -> Result<String> {
        self.calls.lock().unwrap().push(endpoint.to_string());
        if let Some(delay) = self.delays.get(endpoint) {
            tokio::time::sleep(*delay).await;
        }
        self.responses
            .get(endpoint)
            .cloned()
            .ok_or_else(|| GithubClientError::CommandFailed {
                operation: format!("gh api {endpoint}"),
                status: "exit status: 1".to_string(),
                stderr: "gh: Not Found (HTTP 404)".to_string(),
            })
    }
}

pub fn pull_request_api_path(repo: &str, number: u64) -> String {
    format!("/repos/{repo}/pulls/{number}")
}

pub fn search_item(id: u64, repo: &str, number: u64, author_id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "number": number,
        "title": format!("PR {number} in {repo}"),
        "body": null,
        "html_url": format!("https://github.com/{repo}/pull/{number}"),
        "user": {"id": author_id, "login": format!("user{author_id}")},
        "created_at": "2024-03-01T10:00:00Z",
        "updated_at": "2024-03-02T10:00:00Z",
        "pull_request": {"url": format!("https://api.github.com{}", pull_request_api_path(repo, number))},
        "repository_url": format!("https://api.github.com/repos/{repo}"),
    })
}

pub fn repo_body(id: u64, repo: &str) -> serde_json::Value {
    let name = repo.rsplit('/').next().unwrap_or(repo);
    json!({"id": id, "name": name, "full_name": repo, "description": null})
}

pub fn requested_reviewers(ids: &[u64]) -> serde_json::Value {
    json!({
        "requested_reviewers": ids
            .iter()
            .map(|id| json!({"id": id, "login": format!("user{id}")}))
            .collect::<Vec<_>>()
    })
}

pub fn review(reviewer: u64, state: &str, submitted_at: &str) -> serde_json::Value {
    json!({
        "user": {"id": reviewer, "login": format!("user{reviewer}")},
        "state": state,
        "submitted_at": submitted_at,
    })
}

/// Registers a repo, the pull request detail and its reviews for one item.
pub fn with_pull_request(
    github: FakeGithub,
    repo: &str,
    number: u64,
    requested: &[u64],
    reviews: Vec<serde_json::Value>,
) -> FakeGithub {
    let path = pull_request_api_path(repo, number);
    github
        .with_json(&format!("/repos/{repo}"), repo_body(1000, repo))
        .with_json(&path, requested_reviewers(requested))
        .with_json(&format!("{path}/reviews"), serde_json::Value::Array(reviews))
}

pub fn pull_request(id: u64, author_id: u64) -> PullRequest {
    let created_at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    PullRequest {
        id,
        repo: Repo {
            id: 1000,
            name: "repo".to_string(),
            full_name: "octo/repo".to_string(),
            description: String::new(),
        },
        creator: User {
            id: author_id,
            username: format!("user{author_id}"),
        },
        title: format!("PR {id}"),
        body: String::new(),
        html_url: format!("https://github.com/octo/repo/pull/{id}"),
        api_url: format!("https://api.github.com/repos/octo/repo/pulls/{id}"),
        created_at,
        updated_at: created_at,
        reviews_by_reviewer: BTreeMap::new(),
        reviews_by_priority: vec![],
    }
}
