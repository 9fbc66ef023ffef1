use async_trait::async_trait;

use crate::{domain::Proposal, errors::FetchError};

/// Hexagonal port for the proposal backend (Snapshot hub today).
///
/// Implementations must never panic on bad responses: every transport or decoding
/// failure comes back as a `FetchError` with a readable cause. An empty `Vec` means
/// the space has no open proposals.
#[async_trait]
pub trait ProposalSource: Send + Sync {
    async fn open_proposals(&self, space: &str) -> std::result::Result<Vec<Proposal>, FetchError>;
}
