use colored::*;
use serde::Serialize;

/// Every notification replaces the previous one under this id.
pub const NOTIFICATION_ID: u32 = 1;
pub const CHANNEL_ID: &str = "image_upload_channel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Progress { current: usize, total: usize },
    Complete,
    Error,
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Progress { .. } => "progress",
            Notification::Complete => "complete",
            Notification::Error => "error",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Notification::Progress { .. } => "Uploading images",
            Notification::Complete => "Image upload complete",
            Notification::Error => "Image upload error",
        }
    }

    pub fn text(&self) -> String {
        match self {
            Notification::Progress { current, total } => {
                format!("Uploading image {} of {}", current, total)
            }
            Notification::Complete => "All images uploaded successfully".to_string(),
            Notification::Error => "Some images failed to upload".to_string(),
        }
    }

    /// Progress notifications stay pinned until a terminal one replaces them.
    pub fn is_ongoing(&self) -> bool {
        matches!(self, Notification::Progress { .. })
    }
}

/// Where notifications end up: terminal, native host, test recorder.
pub trait Notifier: Send + Sync {
    fn notify(&self, id: u32, notification: &Notification);
}

/// Prints notifications to stdout.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, id: u32, notification: &Notification) {
        let title = match notification {
            Notification::Progress { .. } => notification.title().blue(),
            Notification::Complete => notification.title().green(),
            Notification::Error => notification.title().red(),
        };
        println!("[{}#{}] {}: {}", CHANNEL_ID, id, title, notification.text());
    }
}
