use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod score;

pub use score::{extract_most_important, order_reviewers, ScoreCalculator};

pub type UserId = u64;
pub type PullRequestId = u64;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Repo {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: String,
}

/// State of a single review as reported by the code host, plus the local
/// `Requested` state for reviewers who have not responded yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ReviewStatus {
    Approved,
    Commented,
    ChangesRequested,
    Pending,
    Requested,
    Dismissed,
    Unknown,
}

impl ReviewStatus {
    /// Lower is more definitive. Only used for ordering.
    pub fn severity_rank(self) -> u8 {
        match self {
            ReviewStatus::ChangesRequested => 10,
            ReviewStatus::Approved => 12,
            // Dismissed is vague: usually an approval invalidated by new commits
            ReviewStatus::Dismissed => 13,
            ReviewStatus::Commented => 15,
            ReviewStatus::Pending => 17,
            ReviewStatus::Requested => 20,
            ReviewStatus::Unknown => 50,
        }
    }

    /// Approvals and change requests supersede each other by submission time.
    pub fn is_definitive(self) -> bool {
        matches!(self, ReviewStatus::Approved | ReviewStatus::ChangesRequested)
    }

    pub fn from_api_state<S: AsRef<str>>(state: S) -> ReviewStatus {
        match state.as_ref() {
            "APPROVED" => ReviewStatus::Approved,
            "COMMENTED" => ReviewStatus::Commented,
            "CHANGES_REQUESTED" => ReviewStatus::ChangesRequested,
            "PENDING" => ReviewStatus::Pending,
            "REQUESTED" => ReviewStatus::Requested,
            "DISMISSED" => ReviewStatus::Dismissed,
            _ => ReviewStatus::Unknown,
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReviewStatus::Approved => "Approved",
            ReviewStatus::Commented => "Commented",
            ReviewStatus::ChangesRequested => "Changes Requested",
            ReviewStatus::Pending => "Pending",
            ReviewStatus::Requested => "Requested",
            ReviewStatus::Dismissed => "Dismissed",
            ReviewStatus::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Review {
    pub reviewer: User,
    pub status: ReviewStatus,
    /// Absent for outstanding review requests.
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Review {
    pub fn requested(reviewer: User) -> Review {
        Review {
            reviewer,
            status: ReviewStatus::Requested,
            submitted_at: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PullRequest {
    pub id: PullRequestId,
    pub repo: Repo,
    pub creator: User,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub html_url: String,
    pub api_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub reviews_by_reviewer: BTreeMap<UserId, Vec<Review>>,
    /// Derived from `reviews_by_reviewer`, see [`order_reviewers`].
    #[serde(default)]
    pub reviews_by_priority: Vec<Vec<Review>>,
}

impl PullRequest {
    /// Replaces the reviewer history wholesale and recomputes the priority view.
    pub fn set_reviews(&mut self, reviews_by_reviewer: BTreeMap<UserId, Vec<Review>>) {
        self.reviews_by_reviewer = reviews_by_reviewer;
        self.reviews_by_priority = order_reviewers(&self.reviews_by_reviewer);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum PullRequestType {
    Own,
    Reviewer,
}

impl fmt::Display for PullRequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullRequestType::Own => f.write_str("Your Pull Request(s)"),
            PullRequestType::Reviewer => f.write_str("Pending Review Request(s)"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Score {
    pub total: f32,
    pub age_sec: u64,
    pub approvals: u32,
    pub changes_requested: u32,
    pub comments: u32,
    pub dismissed: u32,
    pub num_reviewers: u32,
    pub is_mine: bool,
    pub approved_by_me: bool,
    pub seen: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PullRequestWrapper {
    pub id: PullRequestId,
    #[serde(rename = "type")]
    pub pull_request_type: PullRequestType,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub score: Score,
    pub pull_request: PullRequest,
}

impl PullRequestWrapper {
    pub fn new(
        pull_request_type: PullRequestType,
        pull_request: PullRequest,
        first_seen: DateTime<Utc>,
    ) -> PullRequestWrapper {
        PullRequestWrapper {
            id: pull_request.id,
            pull_request_type,
            first_seen,
            seen: false,
            deleted: false,
            score: Score::default(),
            pull_request,
        }
    }
}
