//! Control messages posted to the worker by pages or operators.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::lifecycle::WorkerState;
use super::manager::CacheManager;
use super::sweeper::SweepReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    /// Activate an installed worker now instead of waiting.
    SkipWaiting,
    /// Empty every live partition.
    ClearCache,
    GetVersion,
    Sweep,
    BackgroundSync { tag: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageReply {
    State { state: WorkerState },
    Version { version: String },
    Cleared { partitions: Vec<String> },
    Swept { report: SweepReport },
    Synced { tag: String, report: SweepReport },
}

impl CacheManager {
    pub async fn handle_message(&self, message: WorkerMessage) -> MessageReply {
        info!(message = ?message, "worker message received");
        match message {
            WorkerMessage::SkipWaiting => {
                // Only an installed worker is waiting; anything else is left as is.
                if self.state() == WorkerState::Installed {
                    self.activate().await;
                }
                MessageReply::State {
                    state: self.state(),
                }
            }
            WorkerMessage::ClearCache => MessageReply::Cleared {
                partitions: self.clear_live_partitions().await,
            },
            WorkerMessage::GetVersion => MessageReply::Version {
                version: self.config().version.clone(),
            },
            WorkerMessage::Sweep => MessageReply::Swept {
                report: self.sweep().await,
            },
            WorkerMessage::BackgroundSync { tag } => {
                let report = self.background_sync(&tag).await;
                MessageReply::Synced { tag, report }
            }
        }
    }

    async fn clear_live_partitions(&self) -> Vec<String> {
        let mut cleared = Vec::new();
        for name in self.names().all() {
            let result = match self.storage().delete_partition(name).await {
                Ok(_) => self.storage().open(name).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => cleared.push(name.to_string()),
                Err(err) => warn!(partition = name, error = %err, "failed to clear partition"),
            }
        }
        cleared
    }
}
