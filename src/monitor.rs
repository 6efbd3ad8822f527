use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{sync::mpsc, task::JoinHandle, time::MissedTickBehavior};

use ghmon_core::{PullRequestId, ScoreCalculator, User};

use crate::{
    config::Config,
    events::{EventNotifier, MergerCommand},
    fetch::{self, Fetcher},
    gh_client::GithubApi,
    merger::StateMerger,
    seen::SeenTimer,
    store::SnapshotStore,
};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Owns the merger actor and the refresh loop feeding it.
pub struct Monitor {
    fetcher: Fetcher,
    commands: mpsc::Sender<MergerCommand>,
    refresh_requests: Option<mpsc::Sender<()>>,
    merger_task: JoinHandle<()>,
    refresh_task: Option<JoinHandle<()>>,
}

impl Monitor {
    /// Restores persisted state and starts the merger. Subscribe to
    /// `notifier` beforehand to receive the restored lists.
    pub async fn start(
        api: Arc<dyn GithubApi>,
        user: User,
        config: &Config,
        notifier: EventNotifier,
    ) -> anyhow::Result<Monitor> {
        let pull_request_dir = config.pull_request_dir();
        let store = SnapshotStore::open(&pull_request_dir)
            .await
            .with_context(|| format!("Failed to open state in {}", pull_request_dir.display()))?;

        let (commands, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let merger = StateMerger::new(
            ScoreCalculator::new(user.clone()),
            Arc::new(store),
            notifier,
        );
        let merger_task = tokio::spawn(merger.run(receiver));

        let queries = fetch::queries(config.own_query.as_deref(), config.review_query.as_deref());
        let fetcher = Fetcher::new(api, user, queries, commands.clone());

        Ok(Monitor {
            fetcher,
            commands,
            refresh_requests: None,
            merger_task,
            refresh_task: None,
        })
    }

    /// Refreshes now and then every `interval`, plus whenever
    /// [`Monitor::request_refresh`] is called. Cycles never overlap.
    pub fn spawn_refresh_loop(&mut self, interval: Duration) {
        let (requests, receiver) = mpsc::channel(1);
        self.refresh_requests = Some(requests);
        self.refresh_task = Some(tokio::spawn(refresh_loop(
            self.fetcher.clone(),
            interval,
            receiver,
        )));
    }

    pub fn request_refresh(&self) {
        match &self.refresh_requests {
            // a full queue already means a refresh is pending
            Some(requests) => {
                let _ = requests.try_send(());
            }
            None => log::warn!("Refresh requested but no refresh loop is running"),
        }
    }

    pub async fn refresh_once(&self) {
        self.fetcher.refresh().await;
    }

    async fn send(&self, command: MergerCommand) {
        if self.commands.send(command).await.is_err() {
            log::error!("State merger is gone");
        }
    }

    pub async fn purge(&self) {
        self.send(MergerCommand::Purge).await;
    }

    pub async fn mark_seen(&self, id: PullRequestId, seen: bool) {
        self.send(MergerCommand::MarkSeen { id, seen }).await;
    }

    pub fn seen_timer(&self, delay: Duration) -> SeenTimer {
        SeenTimer::new(delay, self.commands.clone())
    }

    /// Stops refreshing and waits for the merger to apply everything queued.
    pub async fn shutdown(self) {
        let Monitor {
            fetcher,
            commands,
            refresh_requests,
            merger_task,
            refresh_task,
        } = self;

        if let Some(refresh_task) = refresh_task {
            refresh_task.abort();
            let _ = refresh_task.await;
        }
        drop(refresh_requests);
        drop(fetcher);
        drop(commands);

        if let Err(e) = merger_task.await {
            log::error!("State merger task failed: {e}");
        }
    }
}

async fn refresh_loop(fetcher: Fetcher, interval: Duration, mut requests: mpsc::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => log::info!("Scheduled refresh"),
            request = requests.recv() => match request {
                Some(()) => {
                    log::info!("Manual refresh");
                    ticker.reset();
                }
                None => break,
            },
        }
        fetcher.refresh().await;
    }
}
