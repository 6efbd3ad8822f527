use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle};

use ghmon_core::PullRequestId;

use crate::events::MergerCommand;

/// Marks a pull request as seen once it has stayed selected for `delay`.
///
/// Selecting another pull request cancels the pending timer.
pub struct SeenTimer {
    delay: Duration,
    merger: mpsc::Sender<MergerCommand>,
    pending: Option<(PullRequestId, JoinHandle<()>)>,
}

impl SeenTimer {
    pub fn new(delay: Duration, merger: mpsc::Sender<MergerCommand>) -> SeenTimer {
        SeenTimer {
            delay,
            merger,
            pending: None,
        }
    }

    pub fn select(&mut self, id: PullRequestId) {
        if let Some((pending_id, handle)) = &self.pending {
            if *pending_id == id && !handle.is_finished() {
                return;
            }
        }
        self.cancel();

        let delay = self.delay;
        let merger = self.merger.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            log::debug!("Pull request {id} selected for {delay:?}, marking seen");
            if merger
                .send(MergerCommand::MarkSeen { id, seen: true })
                .await
                .is_err()
            {
                log::warn!("State merger has shut down, could not mark {id} seen");
            }
        });
        self.pending = Some((id, handle));
    }

    pub fn cancel(&mut self) {
        if let Some((id, handle)) = self.pending.take() {
            if !handle.is_finished() {
                log::debug!("Cancelling seen timer for {id}");
                handle.abort();
            }
        }
    }
}

impl Drop for SeenTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
