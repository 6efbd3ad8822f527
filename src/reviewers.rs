use std::collections::BTreeMap;

use tokio::sync::Mutex;

use ghmon_core::{PullRequest, Review, ReviewStatus, UserId};

use crate::gh_client::{self, GithubApi, RawPullRequestDetail, RawReview};

/// Reviewer history for one pull request while its sub-fetches race.
struct ReviewLedger {
    author: UserId,
    reviews: Mutex<BTreeMap<UserId, Vec<Review>>>,
}

impl ReviewLedger {
    fn new(author: UserId) -> ReviewLedger {
        ReviewLedger {
            author,
            reviews: Mutex::new(BTreeMap::new()),
        }
    }

    async fn record(&self, review: Review) {
        if review.reviewer.id == self.author {
            log::debug!(
                "Filtering out review by {} on their own pull request",
                review.reviewer.username
            );
            return;
        }

        log::debug!("Adding review: {}/{}", review.reviewer.username, review.status);
        self.reviews
            .lock()
            .await
            .entry(review.reviewer.id)
            .or_default()
            .push(review);
    }

    fn into_inner(self) -> BTreeMap<UserId, Vec<Review>> {
        self.reviews.into_inner()
    }
}

async fn record_requested_reviewers(
    api: &dyn GithubApi,
    endpoint: &str,
    ledger: &ReviewLedger,
) -> gh_client::Result<()> {
    let detail: RawPullRequestDetail = gh_client::fetch(api, endpoint).await?;
    for reviewer in detail.requested_reviewers {
        ledger.record(Review::requested(reviewer.into())).await;
    }
    Ok(())
}

async fn record_submitted_reviews(
    api: &dyn GithubApi,
    endpoint: &str,
    ledger: &ReviewLedger,
) -> gh_client::Result<()> {
    let reviews: Vec<RawReview> = gh_client::fetch(api, &format!("{endpoint}/reviews")).await?;
    for review in reviews {
        // reviews by deleted accounts come back without a user
        let Some(user) = review.user else {
            continue;
        };
        ledger
            .record(Review {
                reviewer: user.into(),
                status: ReviewStatus::from_api_state(&review.state),
                submitted_at: review.submitted_at,
            })
            .await;
    }
    Ok(())
}

/// Rebuilds the reviewer history of `pull_request` from scratch.
///
/// Requested reviewers and submitted reviews are fetched concurrently and
/// both land in the same per-reviewer history. Nothing from a previous
/// refresh is kept.
pub async fn reconcile(api: &dyn GithubApi, pull_request: &mut PullRequest) -> gh_client::Result<()> {
    log::info!("Adding reviewers to: {}/{}", pull_request.id, pull_request.title);

    let endpoint = gh_client::endpoint_from_url(&pull_request.api_url)?;
    let ledger = ReviewLedger::new(pull_request.creator.id);

    let (requested, submitted) = tokio::join!(
        record_requested_reviewers(api, &endpoint, &ledger),
        record_submitted_reviews(api, &endpoint, &ledger),
    );
    requested?;
    submitted?;

    pull_request.set_reviews(ledger.into_inner());
    Ok(())
}
