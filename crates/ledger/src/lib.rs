//! Commitment ledger and the co-signing protocol that feeds it.

pub mod commitment;
pub mod participant;
pub mod protocol;
mod snapshot;

pub use commitment::{CommitmentLedger, RelationshipSet};
pub use participant::Participant;
pub use protocol::{
    by_signer, commit_staged, stage, Proposal, ProposalKind, ProposalState, ProtocolResult,
    RequiredSignature, SignatureEntry, StagedProposal, StagedUpdate,
};

use mpt::MptError;
use receipts::AccountId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Commitment {0} does not exist")]
    VersionOutOfRange(u64),

    #[error("Unknown relationship {0}")]
    UnknownRelationship(String),

    #[error("Invalid relationship: {0}")]
    InvalidRelationship(String),

    #[error("Internal invariant violated: {0}")]
    InternalInvariantViolation(String),

    #[error("MPT error: {0}")]
    Mpt(#[from] MptError),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Malformed proposal: {0}")]
    MalformedProposal(String),

    #[error("Unknown party {0}")]
    UnknownParty(AccountId),

    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("Digest mismatch: {0}")]
    DigestMismatch(String),

    #[error("Stale state for relationship {0}")]
    StaleState(String),

    #[error("Server untrusted: {0}")]
    ServerUntrusted(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
