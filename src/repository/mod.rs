//! Where claims come from and where their status goes.

pub mod file;
pub mod memory;

use crate::claim::{ClaimId, PinClaim, PinClaimStatus};
use crate::error::RepositoryError;
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use std::path::Path;

pub use file::FileClaimRepository;
pub use memory::MemoryClaimRepository;

/// Status store for claims. Specs are authoritative elsewhere; this side only
/// holds what the agent reports back.
#[async_trait]
pub trait ClaimRepository: Send + Sync {
    /// Last persisted status for `claim`, if any.
    async fn load_status(&self, claim: &ClaimId) -> Result<Option<PinClaimStatus>, RepositoryError>;

    async fn update_status(&self, claim: &ClaimId, status: &PinClaimStatus) -> Result<(), RepositoryError>;

    /// Forget `claim` entirely. Removing an unknown claim is not an error.
    async fn remove_status(&self, claim: &ClaimId) -> Result<(), RepositoryError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClaimsFile {
    List(Vec<PinClaim>),
    Items { items: Vec<PinClaim> },
}

/// Parse a claims document: either a JSON array of claims or an object with
/// an `items` array (the shape a list API returns).
pub fn parse_claims(data: &[u8]) -> Result<Vec<PinClaim>, RepositoryError> {
    let claims = match serde_json::from_slice::<ClaimsFile>(data)? {
        ClaimsFile::List(claims) => claims,
        ClaimsFile::Items { items } => items,
    };
    Ok(claims)
}

pub fn load_claims(path: &Path) -> Result<Vec<PinClaim>, RepositoryError> {
    let data = std::fs::read(path)?;
    let claims = parse_claims(&data)?;
    info!("[Repo] Loaded {} claim(s) from {:?}", claims.len(), path);
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::Mode;

    const CLAIM: &str = r#"{"spec": {"pin": "4", "mode": "output", "outputSpec": {"source": "high"}}}"#;

    #[test]
    fn test_parse_claims_accepts_both_shapes() {
        let list = parse_claims(format!("[{CLAIM}]").as_bytes()).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].spec.mode, Mode::Output);

        let items = parse_claims(format!(r#"{{"items": [{CLAIM}, {CLAIM}]}}"#).as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_parse_claims_rejects_mismatched_spec() {
        let bad = r#"[{"spec": {"pin": "4", "mode": "input_low", "outputSpec": {"source": "high"}}}]"#;
        assert!(matches!(parse_claims(bad.as_bytes()), Err(RepositoryError::Corrupt(_))));
    }

    #[test]
    fn test_load_claims_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("claims.json");
        assert!(matches!(load_claims(&path), Err(RepositoryError::Io(_))));
    }
}
