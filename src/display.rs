use std::collections::BTreeMap;

use tabled::{Table, Tabled};

use ghmon_core::{extract_most_important, PullRequestType, PullRequestWrapper};

use crate::events::Notification;

#[derive(Clone, Debug, Tabled)]
pub struct PrettyPullRequest {
    pub score: String,
    pub id: u64,
    pub repository: String,
    pub title: String,
    pub reviewers: String,
    pub age: String,
    pub state: &'static str,
}

fn format_age(age_sec: u64) -> String {
    match age_sec {
        age if age >= 24 * 3600 => format!("{}d", age / (24 * 3600)),
        age if age >= 3600 => format!("{}h", age / 3600),
        age if age >= 60 => format!("{}m", age / 60),
        age => format!("{age}s"),
    }
}

fn summarize_reviewers(wrapper: &PullRequestWrapper) -> String {
    wrapper
        .pull_request
        .reviews_by_priority
        .iter()
        .filter_map(|history| extract_most_important(history))
        .map(|review| format!("{}: {}", review.reviewer.username, review.status))
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<&PullRequestWrapper> for PrettyPullRequest {
    fn from(wrapper: &PullRequestWrapper) -> Self {
        let state = if wrapper.deleted {
            "deleted"
        } else if !wrapper.seen {
            "new"
        } else {
            ""
        };

        PrettyPullRequest {
            score: format!("{:.0}", wrapper.score.total),
            id: wrapper.id,
            repository: wrapper.pull_request.repo.full_name.clone(),
            title: wrapper.pull_request.title.clone(),
            reviewers: summarize_reviewers(wrapper),
            age: format_age(wrapper.score.age_sec),
            state,
        }
    }
}

pub fn prettyify_pull_requests(wrappers: &[PullRequestWrapper]) -> Vec<PrettyPullRequest> {
    wrappers.iter().map(PrettyPullRequest::from).collect()
}

/// Keeps the latest published list per category and renders them.
#[derive(Default)]
pub struct Screen {
    lists: BTreeMap<PullRequestType, Vec<PullRequestWrapper>>,
    status: String,
    cycle_running: bool,
}

impl Screen {
    /// Returns whether the screen should be redrawn. Row updates inside a
    /// refresh cycle are applied quietly; the sorted lists that close the
    /// cycle redraw everything.
    pub fn apply(&mut self, notification: Notification) -> bool {
        match notification {
            Notification::SortedListPublished(pull_request_type, wrappers) => {
                self.lists.insert(pull_request_type, wrappers);
                true
            }
            Notification::ItemUpdated(wrapper) | Notification::ItemDeleted(wrapper) => {
                self.replace(wrapper) && !self.cycle_running
            }
            Notification::ItemRemoved(id) => {
                let mut removed = false;
                for list in self.lists.values_mut() {
                    let before = list.len();
                    list.retain(|wrapper| wrapper.id != id);
                    removed |= list.len() != before;
                }
                removed
            }
            Notification::StatusMessage(status) => {
                self.status = status;
                true
            }
            Notification::CycleStarted => {
                self.cycle_running = true;
                false
            }
            Notification::CycleFinished => {
                self.cycle_running = false;
                false
            }
        }
    }

    /// Swaps in a fresher copy of a listed wrapper, keeping its position
    /// until the next sorted list arrives.
    fn replace(&mut self, wrapper: PullRequestWrapper) -> bool {
        let Some(list) = self.lists.get_mut(&wrapper.pull_request_type) else {
            return false;
        };
        match list.iter_mut().find(|existing| existing.id == wrapper.id) {
            Some(existing) => {
                *existing = wrapper;
                true
            }
            None => false,
        }
    }

    pub fn list(&self, pull_request_type: PullRequestType) -> &[PullRequestWrapper] {
        self.lists
            .get(&pull_request_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn render(&self) -> String {
        let mut rendered = String::new();
        for pull_request_type in [PullRequestType::Own, PullRequestType::Reviewer] {
            rendered.push_str(&format!(
                "{pull_request_type}\n{}\n",
                Table::new(prettyify_pull_requests(self.list(pull_request_type)))
            ));
        }
        rendered.push_str(&format!("> {}", self.status));
        rendered
    }
}
