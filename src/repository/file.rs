//! Status persistence in a single JSON file.
//!
//! The file maps `pin/mode` to that claim's status. Every update rewrites the
//! whole file through a temporary sibling and a rename, so a crash leaves
//! either the old or the new document behind.

use super::ClaimRepository;
use crate::claim::{ClaimId, PinClaimStatus};
use crate::error::RepositoryError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

pub struct FileClaimRepository {
    path: PathBuf,
    statuses: Mutex<BTreeMap<String, PinClaimStatus>>,
}

impl FileClaimRepository {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let path = path.into();
        let statuses = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, PinClaimStatus>>(&bytes) {
                Ok(statuses) => {
                    info!("[Repo] Loaded status for {} claim(s) from {:?}", statuses.len(), path);
                    statuses
                }
                Err(e) => {
                    warn!("[Repo] Ignoring unreadable status file {:?}: {}", path, e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("[Repo] No status file at {:?} (first run)", path);
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            statuses: Mutex::new(statuses),
        })
    }

    async fn save(&self, statuses: &BTreeMap<String, PinClaimStatus>) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(statuses)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("[Repo] Saved {} status entries to {:?}", statuses.len(), self.path);
        Ok(())
    }
}

#[async_trait]
impl ClaimRepository for FileClaimRepository {
    async fn load_status(&self, claim: &ClaimId) -> Result<Option<PinClaimStatus>, RepositoryError> {
        Ok(self.statuses.lock().await.get(&claim.to_string()).cloned())
    }

    async fn update_status(&self, claim: &ClaimId, status: &PinClaimStatus) -> Result<(), RepositoryError> {
        // Held across the write so saves land in update order
        let mut statuses = self.statuses.lock().await;
        statuses.insert(claim.to_string(), status.clone());
        self.save(&statuses).await
    }

    async fn remove_status(&self, claim: &ClaimId) -> Result<(), RepositoryError> {
        let mut statuses = self.statuses.lock().await;
        if statuses.remove(&claim.to_string()).is_none() {
            return Ok(());
        }
        self.save(&statuses).await
    }
}
