//! One refresh cycle: run the configured searches concurrently, reconcile
//! reviewers for every hit concurrently, and feed the results to the merger.

use std::{collections::HashMap, sync::Arc};

use tokio::{
    sync::{mpsc, Mutex, OnceCell},
    task::JoinSet,
};

use ghmon_core::{PullRequest, PullRequestId, PullRequestType, Repo, User};

use crate::{
    events::MergerCommand,
    gh_client::{self, GithubApi, GithubClientError, RawSearchItem, RawSearchResult},
    reviewers,
};

pub const DEFAULT_OWN_QUERY: &str = "is:open+is:pr+author:@me+archived:false";
pub const DEFAULT_REVIEW_REQUESTED_QUERY: &str =
    "is:open+is:pr+review-requested:@me+archived:false";
pub const DEFAULT_REVIEWED_BY_QUERY: &str = "is:open+is:pr+reviewed-by:@me+archived:false";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    pub pull_request_type: PullRequestType,
    pub query: String,
}

/// Expands optional operator overrides into the searches for one cycle.
/// An override replaces the defaults of its category.
pub fn queries(own_query: Option<&str>, review_query: Option<&str>) -> Vec<Query> {
    let query = |pull_request_type, query: &str| Query {
        pull_request_type,
        query: query.to_string(),
    };

    let mut queries = vec![query(
        PullRequestType::Own,
        own_query.unwrap_or(DEFAULT_OWN_QUERY),
    )];
    match review_query {
        Some(review_query) => queries.push(query(PullRequestType::Reviewer, review_query)),
        None => {
            queries.push(query(PullRequestType::Reviewer, DEFAULT_REVIEW_REQUESTED_QUERY));
            queries.push(query(PullRequestType::Reviewer, DEFAULT_REVIEWED_BY_QUERY));
        }
    }
    queries
}

type RepoCache = Arc<Mutex<HashMap<String, Arc<OnceCell<Repo>>>>>;

/// Parsed hits of one search. Incomplete when the search failed or a hit
/// could not be identified, since either may hide a known pull request.
struct QueryOutcome {
    items: Vec<(PullRequestType, PullRequest)>,
    complete: bool,
}

#[derive(Clone)]
pub struct Fetcher {
    api: Arc<dyn GithubApi>,
    user: User,
    queries: Vec<Query>,
    repos: RepoCache,
    merger: mpsc::Sender<MergerCommand>,
}

impl Fetcher {
    pub fn new(
        api: Arc<dyn GithubApi>,
        user: User,
        queries: Vec<Query>,
        merger: mpsc::Sender<MergerCommand>,
    ) -> Fetcher {
        Fetcher {
            api,
            user,
            queries,
            repos: Arc::new(Mutex::new(HashMap::new())),
            merger,
        }
    }

    async fn send(&self, command: MergerCommand) {
        if self.merger.send(command).await.is_err() {
            log::warn!("State merger has shut down, dropping command");
        }
    }

    /// Runs one full cycle. Returns once the merger has been told the cycle
    /// finished, which only happens after every reviewer lookup spawned by
    /// the cycle has completed.
    pub async fn refresh(&self) {
        self.send(MergerCommand::CycleStarted).await;

        let mut query_tasks = JoinSet::new();
        for query in self.queries.iter().cloned() {
            let fetcher = self.clone();
            query_tasks.spawn(async move { fetcher.run_query(query).await });
        }

        let mut item_tasks = JoinSet::new();
        let mut failed_queries = 0;
        while let Some(joined) = query_tasks.join_next().await {
            match joined {
                Ok(QueryOutcome { items, complete }) => {
                    for item in items {
                        let fetcher = self.clone();
                        item_tasks.spawn(async move { fetcher.process_item(item).await });
                    }
                    if !complete {
                        failed_queries += 1;
                    }
                }
                Err(e) => {
                    log::error!("Query task failed: {e}");
                    failed_queries += 1;
                }
            }
        }

        while let Some(joined) = item_tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("Pull request task failed: {e}");
            }
        }

        self.send(MergerCommand::CycleFinished { failed_queries }).await;
    }

    /// Searches and parses the hits of one query.
    async fn run_query(&self, query: Query) -> QueryOutcome {
        let endpoint = gh_client::search_endpoint(&query.query);
        let result: RawSearchResult = match gh_client::fetch(self.api.as_ref(), &endpoint).await
        {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Search {} failed: {e}", query.query);
                self.send(MergerCommand::Status(format!(
                    "failed to fetch pull requests for {}: {e}",
                    query.query
                )))
                .await;
                return QueryOutcome {
                    items: vec![],
                    complete: false,
                };
            }
        };

        self.send(MergerCommand::Status(format!(
            "Fetched {} pull requests",
            result.items.len()
        )))
        .await;

        let mut outcome = QueryOutcome {
            items: vec![],
            complete: true,
        };
        for raw in result.items {
            let id = raw.get("id").and_then(|id| id.as_u64());
            match self.parse_item(query.pull_request_type, raw).await {
                Ok(Some(pull_request)) => {
                    outcome.items.push((query.pull_request_type, pull_request))
                }
                Ok(None) => {}
                Err(e) => {
                    // without an id the hit cannot be marked touched
                    outcome.complete &= id.is_some();
                    self.item_failed(id, e).await;
                }
            }
        }

        outcome
    }

    /// `Ok(None)` for hits that are filtered out.
    async fn parse_item(
        &self,
        pull_request_type: PullRequestType,
        raw: serde_json::Value,
    ) -> Result<Option<PullRequest>, String> {
        let item: RawSearchItem =
            serde_json::from_value(raw).map_err(|e| format!("malformed search result: {e}"))?;

        if pull_request_type == PullRequestType::Reviewer && item.user.id == self.user.id {
            log::debug!("Filtering out {} from list of reviewer", item.id);
            return Ok(None);
        }

        let repo = self
            .repo(&item.repository_url)
            .await
            .map_err(|e| format!("could not resolve repository: {e}"))?;

        Ok(Some(PullRequest {
            id: item.id,
            repo,
            creator: item.user.into(),
            title: item.title,
            body: item.body.unwrap_or_default(),
            html_url: item.html_url,
            api_url: item.pull_request.url,
            created_at: item.created_at,
            updated_at: item.updated_at,
            reviews_by_reviewer: Default::default(),
            reviews_by_priority: vec![],
        }))
    }

    /// Resolves each repository once. Only lookups of the same URL wait on
    /// each other; a failed lookup leaves the cell empty for the next try.
    async fn repo(&self, repository_url: &str) -> gh_client::Result<Repo> {
        let cell = self
            .repos
            .lock()
            .await
            .entry(repository_url.to_string())
            .or_default()
            .clone();

        let repo = cell
            .get_or_try_init(|| async {
                let endpoint = gh_client::endpoint_from_url(repository_url)?;
                let raw: gh_client::RawRepo =
                    gh_client::fetch(self.api.as_ref(), &endpoint).await?;
                Ok::<Repo, GithubClientError>(raw.into())
            })
            .await?;

        Ok(repo.clone())
    }

    async fn process_item(
        &self,
        (pull_request_type, mut pull_request): (PullRequestType, PullRequest),
    ) {
        log::info!("processing pull request {}", pull_request.id);

        match reviewers::reconcile(self.api.as_ref(), &mut pull_request).await {
            Ok(()) => {
                self.send(MergerCommand::ItemUpdated {
                    pull_request_type,
                    pull_request,
                })
                .await
            }
            Err(e) => self.item_failed(Some(pull_request.id), e.to_string()).await,
        }
    }

    async fn item_failed<E: std::fmt::Display>(&self, id: Option<PullRequestId>, error: E) {
        match id {
            Some(id) => {
                log::warn!("Skipping pull request {id}: {error}");
                self.send(MergerCommand::Status(format!(
                    "failed to process pull request {id}: {error}"
                )))
                .await;
                self.send(MergerCommand::ItemFailed(id)).await;
            }
            None => {
                log::warn!("Skipping unidentifiable search result: {error}");
                self.send(MergerCommand::Status(format!(
                    "failed to process search result: {error}"
                )))
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::test_utils::{self, review, search_item, FakeGithub};

    const ME: u64 = 1;

    fn me() -> User {
        User {
            id: ME,
            username: "me".to_string(),
        }
    }

    fn search(items: Vec<serde_json::Value>) -> serde_json::Value {
        json!({"total_count": items.len(), "incomplete_results": false, "items": items})
    }

    async fn run_cycle(
        github: FakeGithub,
        queries: Vec<Query>,
    ) -> (Arc<FakeGithub>, Vec<MergerCommand>) {
        let github = Arc::new(github);
        let (tx, mut rx) = mpsc::channel(4);
        let fetcher = Fetcher::new(github.clone(), me(), queries, tx);

        let collector = tokio::spawn(async move {
            let mut commands = vec![];
            while let Some(command) = rx.recv().await {
                commands.push(command);
            }
            commands
        });
        fetcher.refresh().await;
        drop(fetcher);

        (github, collector.await.unwrap())
    }

    fn updated_ids(commands: &[MergerCommand]) -> Vec<(PullRequestType, PullRequestId)> {
        let mut ids: Vec<_> = commands
            .iter()
            .filter_map(|command| match command {
                MergerCommand::ItemUpdated {
                    pull_request_type,
                    pull_request,
                } => Some((*pull_request_type, pull_request.id)),
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn default_queries_cover_authored_requested_and_reviewed() {
        assert_eq!(
            queries(None, None),
            vec![
                Query {
                    pull_request_type: PullRequestType::Own,
                    query: DEFAULT_OWN_QUERY.to_string()
                },
                Query {
                    pull_request_type: PullRequestType::Reviewer,
                    query: DEFAULT_REVIEW_REQUESTED_QUERY.to_string()
                },
                Query {
                    pull_request_type: PullRequestType::Reviewer,
                    query: DEFAULT_REVIEWED_BY_QUERY.to_string()
                },
            ]
        );
    }

    #[test]
    fn review_override_replaces_both_review_defaults() {
        let queries = queries(Some("is:pr+author:@me"), Some("is:pr+team-review-requested:@me"));

        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].query, "is:pr+author:@me");
        assert_eq!(queries[1].pull_request_type, PullRequestType::Reviewer);
        assert_eq!(queries[1].query, "is:pr+team-review-requested:@me");
    }

    #[tokio::test]
    async fn cycle_is_bracketed_and_filters_own_items_from_review_queries() {
        let github = FakeGithub::new()
            .with_json(
                &gh_client::search_endpoint(DEFAULT_OWN_QUERY),
                search(vec![search_item(10, "octo/repo", 1, ME)]),
            )
            .with_json(
                &gh_client::search_endpoint(DEFAULT_REVIEW_REQUESTED_QUERY),
                search(vec![
                    search_item(20, "octo/repo", 2, 5),
                    search_item(10, "octo/repo", 1, ME),
                ]),
            )
            .with_json(
                &gh_client::search_endpoint(DEFAULT_REVIEWED_BY_QUERY),
                search(vec![]),
            );
        let github = test_utils::with_pull_request(github, "octo/repo", 1, &[5], vec![]);
        let github = test_utils::with_pull_request(
            github,
            "octo/repo",
            2,
            &[],
            vec![review(ME, "APPROVED", "2024-03-01T11:00:00Z")],
        );

        let (github, commands) = run_cycle(github, queries(None, None)).await;

        assert!(matches!(commands.first(), Some(MergerCommand::CycleStarted)));
        assert!(matches!(
            commands.last(),
            Some(MergerCommand::CycleFinished { failed_queries: 0 })
        ));
        assert_eq!(
            updated_ids(&commands),
            vec![(PullRequestType::Own, 10), (PullRequestType::Reviewer, 20)]
        );
        // repository resolved once for all three hits
        assert_eq!(github.call_count("/repos/octo/repo"), 1);
    }

    #[tokio::test]
    async fn missing_body_becomes_empty_and_reviews_are_attached() {
        let github = FakeGithub::new().with_json(
            &gh_client::search_endpoint("custom"),
            search(vec![search_item(20, "octo/repo", 2, 5)]),
        );
        let github = test_utils::with_pull_request(
            github,
            "octo/repo",
            2,
            &[7],
            vec![review(8, "CHANGES_REQUESTED", "2024-03-01T11:00:00Z")],
        );

        let (_, commands) = run_cycle(
            github,
            vec![Query {
                pull_request_type: PullRequestType::Reviewer,
                query: "custom".to_string(),
            }],
        )
        .await;

        let pull_request = commands
            .into_iter()
            .find_map(|command| match command {
                MergerCommand::ItemUpdated { pull_request, .. } => Some(pull_request),
                _ => None,
            })
            .unwrap();
        assert_eq!(pull_request.body, "");
        assert_eq!(pull_request.repo.full_name, "octo/repo");
        assert_eq!(pull_request.creator.id, 5);
        assert_eq!(pull_request.reviews_by_priority.len(), 2);
        assert_eq!(pull_request.reviews_by_priority[0][0].reviewer.id, 8);
    }

    #[tokio::test]
    async fn failed_query_is_reported_and_counted() {
        let github = FakeGithub::new().with_json(
            &gh_client::search_endpoint(DEFAULT_OWN_QUERY),
            search(vec![]),
        );

        let (_, commands) = run_cycle(github, queries(None, Some("broken"))).await;

        assert!(commands.iter().any(|command| matches!(
            command,
            MergerCommand::Status(message) if message.starts_with("failed to fetch pull requests for broken")
        )));
        assert!(matches!(
            commands.last(),
            Some(MergerCommand::CycleFinished { failed_queries: 1 })
        ));
    }

    #[tokio::test]
    async fn failing_items_are_isolated() {
        let mut malformed = search_item(30, "octo/repo", 3, 5);
        malformed["created_at"] = json!("yesterday");
        let github = FakeGithub::new().with_json(
            &gh_client::search_endpoint("custom"),
            search(vec![
                search_item(20, "octo/repo", 2, 5),
                // reviewer lookups for this one are missing
                search_item(40, "octo/repo", 4, 5),
                malformed,
            ]),
        );
        let github = test_utils::with_pull_request(github, "octo/repo", 2, &[], vec![]);

        let (_, commands) = run_cycle(
            github,
            vec![Query {
                pull_request_type: PullRequestType::Reviewer,
                query: "custom".to_string(),
            }],
        )
        .await;

        assert_eq!(updated_ids(&commands), vec![(PullRequestType::Reviewer, 20)]);
        let mut failed: Vec<PullRequestId> = commands
            .iter()
            .filter_map(|command| match command {
                MergerCommand::ItemFailed(id) => Some(*id),
                _ => None,
            })
            .collect();
        failed.sort();
        assert_eq!(failed, vec![30, 40]);
        assert!(matches!(
            commands.last(),
            Some(MergerCommand::CycleFinished { failed_queries: 0 })
        ));
    }

    #[tokio::test]
    async fn unidentifiable_hit_leaves_the_query_incomplete() {
        let github = FakeGithub::new().with_json(
            &gh_client::search_endpoint("custom"),
            search(vec![
                search_item(20, "octo/repo", 2, 5),
                json!({"title": "no id here"}),
            ]),
        );
        let github = test_utils::with_pull_request(github, "octo/repo", 2, &[], vec![]);

        let (_, commands) = run_cycle(
            github,
            vec![Query {
                pull_request_type: PullRequestType::Reviewer,
                query: "custom".to_string(),
            }],
        )
        .await;

        assert_eq!(updated_ids(&commands), vec![(PullRequestType::Reviewer, 20)]);
        assert!(commands.iter().any(|command| matches!(
            command,
            MergerCommand::Status(message) if message.starts_with("failed to process search result")
        )));
        assert!(matches!(
            commands.last(),
            Some(MergerCommand::CycleFinished { failed_queries: 1 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_repository_lookup_only_holds_back_its_own_hits() {
        let github = FakeGithub::new()
            .with_json(
                &gh_client::search_endpoint("slow"),
                search(vec![search_item(20, "octo/slow", 2, 5)]),
            )
            .with_json(
                &gh_client::search_endpoint("fast"),
                search(vec![search_item(21, "octo/fast", 3, 5)]),
            );
        let github = test_utils::with_pull_request(github, "octo/slow", 2, &[], vec![])
            .delayed("/repos/octo/slow", Duration::from_secs(1000));
        let github = test_utils::with_pull_request(github, "octo/fast", 3, &[], vec![]);

        let query = |query: &str| Query {
            pull_request_type: PullRequestType::Reviewer,
            query: query.to_string(),
        };
        let (_, commands) = run_cycle(github, vec![query("slow"), query("fast")]).await;

        let updated: Vec<PullRequestId> = commands
            .iter()
            .filter_map(|command| match command {
                MergerCommand::ItemUpdated { pull_request, .. } => Some(pull_request.id),
                _ => None,
            })
            .collect();
        assert_eq!(updated, vec![21, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_finishes_only_after_slow_reviewer_lookups() {
        let github = FakeGithub::new().with_json(
            &gh_client::search_endpoint("custom"),
            search(vec![search_item(20, "octo/repo", 2, 5)]),
        );
        let github = test_utils::with_pull_request(github, "octo/repo", 2, &[], vec![])
            .delayed("/repos/octo/repo/pulls/2/reviews", Duration::from_secs(30));

        let (_, commands) = run_cycle(
            github,
            vec![Query {
                pull_request_type: PullRequestType::Reviewer,
                query: "custom".to_string(),
            }],
        )
        .await;

        let updated = commands
            .iter()
            .position(|command| matches!(command, MergerCommand::ItemUpdated { .. }))
            .unwrap();
        let finished = commands
            .iter()
            .position(|command| matches!(command, MergerCommand::CycleFinished { .. }))
            .unwrap();
        assert!(updated < finished);
        assert_eq!(finished, commands.len() - 1);
    }
}
