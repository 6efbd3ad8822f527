use tokio::sync::broadcast;

use ghmon_core::{PullRequest, PullRequestId, PullRequestType, PullRequestWrapper};

/// Everything the state merger consumes. The merger is the only reader.
#[derive(Debug)]
pub enum MergerCommand {
    CycleStarted,
    ItemUpdated {
        pull_request_type: PullRequestType,
        pull_request: PullRequest,
    },
    /// The item was seen in this cycle but could not be refreshed; keep it as is.
    ItemFailed(PullRequestId),
    Status(String),
    CycleFinished {
        failed_queries: usize,
    },
    Purge,
    MarkSeen {
        id: PullRequestId,
        seen: bool,
    },
}

/// State changes published to the display layer.
#[derive(Clone, Debug)]
pub enum Notification {
    StatusMessage(String),
    CycleStarted,
    ItemUpdated(PullRequestWrapper),
    ItemDeleted(PullRequestWrapper),
    ItemRemoved(PullRequestId),
    SortedListPublished(PullRequestType, Vec<PullRequestWrapper>),
    CycleFinished,
}

#[derive(Clone)]
pub struct EventNotifier {
    sender: broadcast::Sender<Notification>,
}

impl EventNotifier {
    pub fn new(capacity: usize) -> EventNotifier {
        let (sender, _) = broadcast::channel(capacity);
        EventNotifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        if self.sender.send(notification).is_err() {
            log::trace!("No subscribers for notification");
        }
    }

    pub fn status<S: Into<String>>(&self, message: S) {
        self.publish(Notification::StatusMessage(message.into()));
    }
}
