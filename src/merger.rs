//! The single writer of the canonical id → wrapper map.
//!
//! Every mutation arrives as a [`MergerCommand`] on one channel and is
//! applied in order by [`StateMerger::run`]. Consumers never see the map
//! itself, only the [`Notification`]s published after each change.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use tokio::sync::mpsc;

use ghmon_core::{
    PullRequest, PullRequestId, PullRequestType, PullRequestWrapper, ScoreCalculator,
};

use crate::{
    events::{EventNotifier, MergerCommand, Notification},
    store::SnapshotStore,
};

/// Canonical order: highest score first, then ascending id.
pub fn canonical_order(left: &PullRequestWrapper, right: &PullRequestWrapper) -> Ordering {
    right
        .score
        .total
        .total_cmp(&left.score.total)
        .then(left.id.cmp(&right.id))
}

pub struct StateMerger {
    calculator: ScoreCalculator,
    store: Arc<SnapshotStore>,
    notifier: EventNotifier,
    wrappers: HashMap<PullRequestId, PullRequestWrapper>,
    /// Ids updated or accounted for since the last `CycleStarted`.
    touched: HashSet<PullRequestId>,
}

impl StateMerger {
    pub fn new(
        calculator: ScoreCalculator,
        store: Arc<SnapshotStore>,
        notifier: EventNotifier,
    ) -> StateMerger {
        StateMerger {
            calculator,
            store,
            notifier,
            wrappers: HashMap::new(),
            touched: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn wrappers(&self) -> &HashMap<PullRequestId, PullRequestWrapper> {
        &self.wrappers
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<MergerCommand>) {
        self.restore().await;
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
        }
        log::info!("State merger stopped");
    }

    /// Seeds the map from storage. Unreadable snapshots are skipped.
    pub async fn restore(&mut self) {
        let ids = match self.store.list_known_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                log::warn!("Could not list stored pull requests: {e}");
                return;
            }
        };

        for id in ids {
            match self.store.load(id).await {
                Ok(Some(mut wrapper)) => {
                    wrapper.score = self.calculator.calculate_score(&wrapper, Utc::now());
                    self.wrappers.insert(id, wrapper);
                }
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring stored pull request {id}: {e}"),
            }
        }

        log::info!("Restored {} pull requests", self.wrappers.len());
        if !self.wrappers.is_empty() {
            self.publish_sorted();
        }
    }

    pub async fn handle(&mut self, command: MergerCommand) {
        match command {
            MergerCommand::CycleStarted => {
                self.touched.clear();
                self.notifier.status("fetching pull requests");
                self.notifier.publish(Notification::CycleStarted);
            }
            MergerCommand::ItemUpdated {
                pull_request_type,
                pull_request,
            } => self.update(pull_request_type, pull_request).await,
            MergerCommand::ItemFailed(id) => {
                self.touched.insert(id);
            }
            MergerCommand::Status(message) => self.notifier.status(message),
            MergerCommand::CycleFinished { failed_queries } => {
                self.finish_cycle(failed_queries).await
            }
            MergerCommand::Purge => self.purge().await,
            MergerCommand::MarkSeen { id, seen } => self.mark_seen(id, seen).await,
        }
    }

    async fn update(&mut self, pull_request_type: PullRequestType, pull_request: PullRequest) {
        let id = pull_request.id;
        self.touched.insert(id);

        let mut wrapper = match self.wrappers.remove(&id) {
            Some(existing) => existing,
            None => match self.store.load(id).await {
                Ok(stored) => stored.unwrap_or_else(|| {
                    PullRequestWrapper::new(pull_request_type, pull_request.clone(), Utc::now())
                }),
                Err(e) => {
                    log::warn!("Could not load stored pull request {id}, treating as new: {e}");
                    PullRequestWrapper::new(pull_request_type, pull_request.clone(), Utc::now())
                }
            },
        };

        if wrapper.deleted {
            log::info!("Pull request {id} reappeared");
        }
        wrapper.pull_request_type = pull_request_type;
        wrapper.pull_request = pull_request;
        wrapper.deleted = false;
        wrapper.score = self.calculator.calculate_score(&wrapper, Utc::now());

        self.persist(&wrapper).await;
        self.notifier.publish(Notification::ItemUpdated(wrapper.clone()));
        self.wrappers.insert(id, wrapper);
    }

    async fn finish_cycle(&mut self, failed_queries: usize) {
        let now = Utc::now();

        if failed_queries > 0 {
            log::warn!("{failed_queries} queries failed, skipping deletion pass");
            self.notifier.status(format!(
                "{failed_queries} queries failed, keeping previous pull requests"
            ));
        } else {
            let mut vanished: Vec<PullRequestId> = self
                .wrappers
                .iter()
                .filter(|(id, wrapper)| !wrapper.deleted && !self.touched.contains(*id))
                .map(|(id, _)| *id)
                .collect();
            vanished.sort_unstable();

            for id in vanished {
                let Some(wrapper) = self.wrappers.get_mut(&id) else {
                    continue;
                };
                log::info!("Pull request {id} no longer returned, marking deleted");
                wrapper.deleted = true;
                wrapper.score = self.calculator.calculate_score(wrapper, now);
                let wrapper = wrapper.clone();

                self.persist(&wrapper).await;
                self.notifier.publish(Notification::ItemDeleted(wrapper));
            }
        }

        // age moved on for everything else
        for wrapper in self.wrappers.values_mut() {
            wrapper.score = self.calculator.calculate_score(wrapper, now);
        }

        self.publish_sorted();
        self.notifier.publish(Notification::CycleFinished);
        self.notifier.status("idle");
    }

    async fn purge(&mut self) {
        let mut purged: Vec<PullRequestId> = self
            .wrappers
            .values()
            .filter(|wrapper| wrapper.deleted)
            .map(|wrapper| wrapper.id)
            .collect();
        purged.sort_unstable();

        for id in purged.iter().copied() {
            self.wrappers.remove(&id);
            if let Err(e) = self.store.delete(id).await {
                log::warn!("Could not delete stored pull request {id}: {e}");
            }
            self.notifier.publish(Notification::ItemRemoved(id));
        }

        log::info!("Purged {} pull requests", purged.len());
        if !purged.is_empty() {
            self.publish_sorted();
        }
    }

    async fn mark_seen(&mut self, id: PullRequestId, seen: bool) {
        let Some(wrapper) = self.wrappers.get_mut(&id) else {
            log::debug!("Ignoring seen flag for unknown pull request {id}");
            self.notifier.status(format!("unknown pull request {id}"));
            return;
        };
        wrapper.seen = seen;
        let wrapper = wrapper.clone();

        self.persist(&wrapper).await;
        self.notifier.publish(Notification::ItemUpdated(wrapper));
    }

    async fn persist(&self, wrapper: &PullRequestWrapper) {
        if let Err(e) = self.store.store(wrapper).await {
            log::warn!("Could not store pull request {}: {e}", wrapper.id);
        }
    }

    /// Snapshot of one category in canonical order.
    pub fn sorted(&self, pull_request_type: PullRequestType) -> Vec<PullRequestWrapper> {
        let mut sorted: Vec<PullRequestWrapper> = self
            .wrappers
            .values()
            .filter(|wrapper| wrapper.pull_request_type == pull_request_type)
            .cloned()
            .collect();
        sorted.sort_by(canonical_order);
        sorted
    }

    fn publish_sorted(&self) {
        for pull_request_type in [PullRequestType::Own, PullRequestType::Reviewer] {
            self.notifier.publish(Notification::SortedListPublished(
                pull_request_type,
                self.sorted(pull_request_type),
            ));
        }
    }
}
