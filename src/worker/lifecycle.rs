//! Install and activate hooks.

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::cache::{PartitionKind, RequestKey};
use crate::fetch::CacheRequest;

use super::manager::CacheManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Constructed; requests pass through.
    Parsed,
    /// Partitions opened and the static manifest fetched.
    Installed,
    /// Stale partitions purged; requests are routed through the cache.
    Activated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrecacheFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub opened: Vec<String>,
    pub precached: Vec<String>,
    pub failed: Vec<PrecacheFailure>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    pub deleted: Vec<String>,
    pub live: Vec<String>,
}

impl CacheManager {
    /// Open the partitions and pre-fetch the static manifest.
    ///
    /// Never fails: anything that goes wrong is logged and listed in the report.
    #[instrument(skip_all, fields(version = %self.config().version))]
    pub async fn install(&self) -> InstallReport {
        let mut report = InstallReport::default();

        for kind in PartitionKind::ALL {
            let name = self.names().name(kind);
            match self.storage().open(name).await {
                Ok(()) => report.opened.push(name.to_string()),
                Err(err) => warn!(partition = name, error = %err, "failed to open partition"),
            }
        }

        let outcomes = join_all(
            self.config()
                .static_manifest
                .iter()
                .map(|path| self.precache(path)),
        )
        .await;
        for (path, outcome) in self.config().static_manifest.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.precached.push(path.clone()),
                Err(reason) => {
                    warn!(path = %path, reason = %reason, "precache failed");
                    report.failed.push(PrecacheFailure {
                        path: path.clone(),
                        reason,
                    });
                }
            }
        }

        self.set_state(WorkerState::Installed);
        info!(
            precached = report.precached.len(),
            failed = report.failed.len(),
            "cache installed"
        );
        report
    }

    async fn precache(&self, path: &str) -> Result<(), String> {
        let url = self
            .app_origin()
            .join(path)
            .map_err(|err| format!("invalid manifest path: {err}"))?;
        let request = CacheRequest::get(url.clone());
        let response = self
            .fetcher()
            .fetch(&request)
            .await
            .map_err(|err| err.to_string())?;
        if !response.is_ok() {
            return Err(format!("unexpected status {}", response.status));
        }
        self.storage()
            .put(
                self.names().name(PartitionKind::Static),
                RequestKey::get(url),
                response,
            )
            .await
            .map_err(|err| err.to_string())
    }

    /// Delete every partition outside the current version, then take control.
    #[instrument(skip_all, fields(version = %self.config().version))]
    pub async fn activate(&self) -> ActivationReport {
        let mut report = ActivationReport::default();

        match self.storage().partition_names().await {
            Ok(names) => {
                for name in names.into_iter().filter(|name| !self.names().contains(name)) {
                    match self.storage().delete_partition(&name).await {
                        Ok(_) => {
                            info!(partition = %name, "deleted stale partition");
                            report.deleted.push(name);
                        }
                        Err(err) => {
                            warn!(partition = %name, error = %err, "failed to delete stale partition")
                        }
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list partitions; skipping cleanup"),
        }

        for name in self.names().all() {
            match self.storage().open(name).await {
                Ok(()) => report.live.push(name.to_string()),
                Err(err) => warn!(partition = name, error = %err, "failed to open partition"),
            }
        }

        self.set_state(WorkerState::Activated);
        info!(deleted = report.deleted.len(), "cache activated; clients claimed");
        report
    }
}
