//! Urgency scoring for pull requests and ordering of their reviewers.
//!
//! Scores are relative: higher means "look at this sooner". They are only
//! meaningful for sorting, and are capped at [`MAX_SCORE`] while negative
//! values are left unbounded so that "ignore me" items sink to the bottom.

use std::{cmp::Reverse, collections::BTreeMap};

use chrono::{DateTime, Utc};

use crate::{PullRequestWrapper, Review, ReviewStatus, Score, User, UserId};

pub const MAX_SCORE: f32 = 100.0;
pub const DELETED_SCORE: f32 = -999.0;
pub const DISMISSED_SCORE: f32 = -10.0;

const HOUR_SECS: u64 = 60 * 60;

/// Picks the review that best represents a reviewer's current stance.
///
/// Approvals and change requests override each other, so the latest of
/// those wins. Without either, the lowest severity rank wins, with the most
/// recent submission breaking ties. The result never depends on the order
/// of `reviews`.
pub fn extract_most_important(reviews: &[Review]) -> Option<&Review> {
    let latest_definitive = reviews
        .iter()
        .filter(|review| review.status.is_definitive())
        .max_by_key(|review| (review.submitted_at, Reverse(review.status.severity_rank())));

    latest_definitive.or_else(|| {
        reviews
            .iter()
            .min_by_key(|review| (review.status.severity_rank(), Reverse(review.submitted_at)))
    })
}

/// Orders each reviewer's full history by the severity of their most
/// important review, then by reviewer id.
pub fn order_reviewers(reviews_by_reviewer: &BTreeMap<UserId, Vec<Review>>) -> Vec<Vec<Review>> {
    let mut ranked: Vec<(u8, UserId, &Vec<Review>)> = reviews_by_reviewer
        .iter()
        .filter_map(|(reviewer_id, reviews)| {
            let most_important = extract_most_important(reviews)?;
            Some((most_important.status.severity_rank(), *reviewer_id, reviews))
        })
        .collect();

    ranked.sort_by_key(|(rank, reviewer_id, _)| (*rank, *reviewer_id));

    ranked
        .into_iter()
        .map(|(_, _, reviews)| reviews.clone())
        .collect()
}

#[derive(Clone, Debug)]
pub struct ScoreCalculator {
    user: User,
}

impl ScoreCalculator {
    pub fn new(user: User) -> ScoreCalculator {
        ScoreCalculator { user }
    }

    pub fn calculate_score(&self, wrapper: &PullRequestWrapper, now: DateTime<Utc>) -> Score {
        let pull_request = &wrapper.pull_request;

        let important_reviews: Vec<&Review> = pull_request
            .reviews_by_reviewer
            .values()
            .filter_map(|reviews| extract_most_important(reviews))
            .collect();

        let mut score = Score {
            is_mine: pull_request.creator.id == self.user.id,
            num_reviewers: important_reviews.len() as u32,
            seen: wrapper.seen,
            age_sec: now
                .signed_duration_since(wrapper.first_seen)
                .num_seconds()
                .max(0) as u64,
            ..Score::default()
        };

        for review in important_reviews {
            match review.status {
                ReviewStatus::Approved => {
                    score.approvals += 1;
                    if review.reviewer.id == self.user.id {
                        score.approved_by_me = true;
                    }
                }
                ReviewStatus::ChangesRequested => score.changes_requested += 1,
                ReviewStatus::Commented => score.comments += 1,
                ReviewStatus::Dismissed => score.dismissed += 1,
                _ => {}
            }
        }

        score.total = calculate_total(&score, wrapper.deleted);
        score
    }
}

/// Folds the aggregated review counts into a single urgency value.
pub fn calculate_total(score: &Score, deleted: bool) -> f32 {
    if deleted {
        return DELETED_SCORE;
    }

    if score.dismissed > 0 {
        return DISMISSED_SCORE;
    }

    let mut total: f32 = 0.0;

    if score.changes_requested > 0 {
        total += 75.0;
    }

    total -= 10.0 * score.approvals as f32;
    total += 10.0 * score.comments as f32;

    if score.approvals == score.num_reviewers {
        if score.is_mine {
            // approved but not merged yet
            total += 50.0;
        } else {
            total -= 100.0;
        }
    }

    if score.is_mine {
        if score.age_sec > 5 * HOUR_SECS {
            total += 50.0;
        } else {
            total += 25.0;
        }
    } else if score.approved_by_me {
        total -= 200.0;
    } else {
        total += match score.age_sec {
            age if age > 48 * HOUR_SECS => 50.0,
            age if age > 24 * HOUR_SECS => 30.0,
            age if age > 6 * HOUR_SECS => 20.0,
            age if age > HOUR_SECS => 10.0,
            _ => 0.0,
        };
    }

    total.min(MAX_SCORE)
}
