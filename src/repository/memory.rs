use super::ClaimRepository;
use crate::claim::{ClaimId, PinClaimStatus};
use crate::error::RepositoryError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Keeps statuses in memory only. Used for dry runs and tests.
#[derive(Default)]
pub struct MemoryClaimRepository {
    statuses: Mutex<HashMap<ClaimId, PinClaimStatus>>,
    updates: AtomicUsize,
}

impl MemoryClaimRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository that already holds `status` for `claim`.
    pub fn with_status(claim: ClaimId, status: PinClaimStatus) -> Self {
        let repository = Self::new();
        repository.statuses.lock().insert(claim, status);
        repository
    }

    pub fn status(&self, claim: &ClaimId) -> Option<PinClaimStatus> {
        self.statuses.lock().get(claim).cloned()
    }

    /// Number of writes received so far.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClaimRepository for MemoryClaimRepository {
    async fn load_status(&self, claim: &ClaimId) -> Result<Option<PinClaimStatus>, RepositoryError> {
        Ok(self.status(claim))
    }

    async fn update_status(&self, claim: &ClaimId, status: &PinClaimStatus) -> Result<(), RepositoryError> {
        self.statuses.lock().insert(claim.clone(), status.clone());
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_status(&self, claim: &ClaimId) -> Result<(), RepositoryError> {
        self.statuses.lock().remove(claim);
        Ok(())
    }
}
