use std::sync::Mutex;

use crossbeam::channel::{self, Receiver, Sender};

/// UI update posted after every successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    SyncTimeUpdated(String),
    UploadCountUpdated(String),
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::SyncTimeUpdated(_) => "sync_time",
            SyncEvent::UploadCountUpdated(_) => "upload_count",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            SyncEvent::SyncTimeUpdated(m) | SyncEvent::UploadCountUpdated(m) => m,
        }
    }

    pub fn sync_time(formatted_time: &str) -> Self {
        SyncEvent::SyncTimeUpdated(format!("Last sync: {}", formatted_time))
    }

    pub fn upload_count(total: i64) -> Self {
        SyncEvent::UploadCountUpdated(format!("Total uploaded: {}", total))
    }
}

/// In-process publish/subscribe for [`SyncEvent`]s.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = channel::unbounded();
        self.lock().push(tx);
        rx
    }

    /// Deliver to every live subscriber; dropped receivers are forgotten.
    pub fn post(&self, event: SyncEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<SyncEvent>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
