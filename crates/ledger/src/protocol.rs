//! Multi-party update protocol.
//!
//! A proposal is staged against scratch copies of every relationship set it
//! touches, then counter-signed by every owner of each touched set over that
//! set's new digest. Only a fully signed proposal whose base digests still
//! match the live ledger is applied, in a single commit.

use std::collections::BTreeMap;

use mpt::{Hash32, MptError};
use receipts::{relationship_id, AccountId, PkiDirectory, Receipt, RelationshipId, Witness};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{CommitmentLedger, LedgerError, ProtocolError, RelationshipSet};

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalKind {
    Issue {
        receipt: Receipt,
    },
    /// Moves `receipt` from the (issuer, current owner) set to the
    /// (issuer, new owner) set.
    Transfer {
        receipt: Receipt,
        current_owner: AccountId,
        new_owner: AccountId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub signer: AccountId,
    pub relationship: RelationshipId,
    /// New set digest the signer computed and signed.
    pub digest: Hash32,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub proposer: AccountId,
    pub kind: ProposalKind,
    pub signatures: Vec<SignatureEntry>,
}

impl Proposal {
    pub fn new(proposer: AccountId, kind: ProposalKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            proposer,
            kind,
            signatures: Vec::new(),
        }
    }

    /// Adds signatures, replacing any earlier entry for the same signer and
    /// relationship.
    pub fn add_signatures(&mut self, entries: impl IntoIterator<Item = SignatureEntry>) {
        for entry in entries {
            self.signatures
                .retain(|s| !(s.signer == entry.signer && s.relationship == entry.relationship));
            self.signatures.push(entry);
        }
    }

    fn signature_for(&self, signer: &AccountId, relationship: &RelationshipId) -> Option<&SignatureEntry> {
        self.signatures
            .iter()
            .find(|s| s.signer == *signer && s.relationship == *relationship)
    }

    /// Every account the proposal names.
    pub fn parties(&self) -> Vec<AccountId> {
        let mut out = vec![self.proposer];
        match &self.kind {
            ProposalKind::Issue { receipt } => {
                out.extend([receipt.issuer, receipt.depositor]);
            }
            ProposalKind::Transfer {
                receipt,
                current_owner,
                new_owner,
            } => {
                out.extend([receipt.issuer, receipt.depositor, *current_owner, *new_owner]);
            }
        }
        out.extend(self.signatures.iter().map(|s| s.signer));
        out.sort();
        out.dedup();
        out
    }
}

/// Lifecycle of a staged proposal. A proposal that has not been staged yet
/// is just a [`Proposal`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalState {
    ScratchApplied,
    CoSigning,
    Committed,
    Rejected,
}

/// One change to one relationship set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Mutation {
    pub(crate) relationship: RelationshipId,
    pub(crate) remove: Option<Witness>,
    pub(crate) insert: Option<Receipt>,
}

/// Every set mutation a proposal implies, before any set is consulted.
pub(crate) fn mutations(kind: &ProposalKind) -> ProtocolResult<Vec<Mutation>> {
    match kind {
        ProposalKind::Issue { receipt } => {
            if receipt.issuer == receipt.depositor {
                return Err(ProtocolError::MalformedProposal(
                    "issuer and depositor must differ".into(),
                ));
            }
            Ok(vec![Mutation {
                relationship: relationship_id(&[receipt.issuer, receipt.depositor]),
                remove: None,
                insert: Some(receipt.clone()),
            }])
        }
        ProposalKind::Transfer {
            receipt,
            current_owner,
            new_owner,
        } => {
            if current_owner == new_owner {
                return Err(ProtocolError::MalformedProposal(
                    "transfer to the current owner".into(),
                ));
            }
            if receipt.issuer == *current_owner || receipt.issuer == *new_owner {
                return Err(ProtocolError::MalformedProposal(
                    "issuer cannot be a transfer party".into(),
                ));
            }
            Ok(vec![
                Mutation {
                    relationship: relationship_id(&[receipt.issuer, *current_owner]),
                    remove: Some(receipt.witness()),
                    insert: None,
                },
                Mutation {
                    relationship: relationship_id(&[receipt.issuer, *new_owner]),
                    remove: None,
                    insert: Some(receipt.clone()),
                },
            ])
        }
    }
}

/// A touched set: its digest before and after, and the scratch state that
/// replaces the live one on commit.
#[derive(Clone, Debug)]
pub struct StagedUpdate {
    pub relationship: RelationshipId,
    pub owners: Vec<AccountId>,
    pub base_digest: Hash32,
    pub new_digest: Hash32,
    pub(crate) scratch: RelationshipSet,
}

impl Mutation {
    pub(crate) fn apply(&self, mut scratch: RelationshipSet) -> ProtocolResult<StagedUpdate> {
        let base_digest = scratch.digest();
        let rel = hex::encode(self.relationship);

        if let Some(w) = &self.remove {
            if scratch.records.remove(w).is_none() {
                return Err(ProtocolError::MalformedProposal(format!(
                    "receipt {} not held in relationship {rel}",
                    hex::encode(w)
                )));
            }
            scratch.set.delete(w)?;
        }
        if let Some(receipt) = &self.insert {
            let w = receipt.witness();
            if scratch.records.contains(&w) {
                return Err(ProtocolError::MalformedProposal(format!(
                    "receipt {} already present in relationship {rel}",
                    hex::encode(w)
                )));
            }
            scratch.records.insert(receipt.clone());
            scratch.set.insert(w)?;
        }

        Ok(StagedUpdate {
            relationship: self.relationship,
            owners: scratch.owners.clone(),
            base_digest,
            new_digest: scratch.digest(),
            scratch,
        })
    }
}

/// A signature the proposal still lacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredSignature {
    pub signer: AccountId,
    pub relationship: RelationshipId,
    pub digest: Hash32,
}

#[derive(Clone, Debug)]
pub struct StagedProposal {
    proposal: Proposal,
    state: ProposalState,
    updates: Vec<StagedUpdate>,
}

impl StagedProposal {
    pub fn proposal(&self) -> &Proposal {
        &self.proposal
    }

    pub fn id(&self) -> Uuid {
        self.proposal.id
    }

    pub fn state(&self) -> ProposalState {
        self.state
    }

    pub fn updates(&self) -> &[StagedUpdate] {
        &self.updates
    }

    pub fn required_signatures(&self) -> Vec<RequiredSignature> {
        self.updates
            .iter()
            .flat_map(|u| {
                u.owners.iter().map(move |owner| RequiredSignature {
                    signer: *owner,
                    relationship: u.relationship,
                    digest: u.new_digest,
                })
            })
            .collect()
    }

    /// Required signatures with no entry yet. An entry is counted here
    /// whether or not it verifies; verification happens at commit.
    pub fn missing_signers(&self) -> Vec<RequiredSignature> {
        self.required_signatures()
            .into_iter()
            .filter(|r| self.proposal.signature_for(&r.signer, &r.relationship).is_none())
            .collect()
    }

    pub fn add_signatures(&mut self, entries: impl IntoIterator<Item = SignatureEntry>) {
        self.proposal.add_signatures(entries);
        if self.state == ProposalState::ScratchApplied {
            self.state = ProposalState::CoSigning;
        }
    }

    pub fn reject(&mut self) {
        self.state = ProposalState::Rejected;
    }
}

/// Validates `proposal` and applies it to scratch copies of the sets it
/// touches. The ledger is only read.
pub fn stage(
    ledger: &CommitmentLedger,
    pki: &PkiDirectory,
    proposal: Proposal,
) -> ProtocolResult<StagedProposal> {
    for party in proposal.parties() {
        if pki.get(&party).is_err() {
            warn!(proposal=%proposal.id, party=%party, "protocol: unknown party");
            return Err(ProtocolError::UnknownParty(party));
        }
    }

    let proposer_ok = match &proposal.kind {
        ProposalKind::Issue { receipt } => proposal.proposer == receipt.issuer,
        ProposalKind::Transfer {
            receipt,
            current_owner,
            new_owner,
        } => [receipt.issuer, *current_owner, *new_owner].contains(&proposal.proposer),
    };
    if !proposer_ok {
        return Err(ProtocolError::MalformedProposal(format!(
            "{} may not propose this mutation",
            proposal.proposer
        )));
    }

    let mut updates = Vec::new();
    for m in mutations(&proposal.kind)? {
        let scratch = ledger.relationship_set(&m.relationship).map_err(|e| match e {
            LedgerError::UnknownRelationship(rel) => {
                ProtocolError::MalformedProposal(format!("no relationship {rel}"))
            }
            other => ProtocolError::Ledger(other),
        })?;
        updates.push(m.apply(scratch)?);
    }

    info!(proposal=%proposal.id, sets=%updates.len(), "protocol: staged");
    let state = if proposal.signatures.is_empty() {
        ProposalState::ScratchApplied
    } else {
        ProposalState::CoSigning
    };
    Ok(StagedProposal {
        proposal,
        state,
        updates,
    })
}

/// Applies a fully signed proposal and publishes one new commitment.
///
/// Fails with `StaleState` if any touched set changed since staging and with
/// `SignatureMismatch` if any required signature is absent, for the wrong
/// digest, or invalid. On failure the proposal is rejected and the ledger
/// is left as it was.
pub fn commit_staged(
    ledger: &mut CommitmentLedger,
    pki: &PkiDirectory,
    staged: &mut StagedProposal,
) -> ProtocolResult<(u64, Hash32)> {
    if matches!(staged.state, ProposalState::Committed | ProposalState::Rejected) {
        return Err(ProtocolError::MalformedProposal(format!(
            "proposal {} already {:?}",
            staged.id(),
            staged.state
        )));
    }

    let result = check_and_apply(ledger, pki, staged);
    match &result {
        Ok((number, root)) => {
            staged.state = ProposalState::Committed;
            info!(proposal=%staged.id(), number=%number, root=%hex::encode(root), "protocol: committed");
        }
        Err(e) => {
            staged.state = ProposalState::Rejected;
            warn!(proposal=%staged.id(), error=%e, "protocol: rejected");
        }
    }
    result
}

fn check_and_apply(
    ledger: &mut CommitmentLedger,
    pki: &PkiDirectory,
    staged: &StagedProposal,
) -> ProtocolResult<(u64, Hash32)> {
    for u in &staged.updates {
        let live = ledger.live_digest(&u.relationship)?;
        if live != u.base_digest {
            return Err(ProtocolError::StaleState(hex::encode(u.relationship)));
        }
    }

    for req in staged.required_signatures() {
        let entry = staged
            .proposal
            .signature_for(&req.signer, &req.relationship)
            .ok_or_else(|| ProtocolError::SignatureMismatch(format!("{} did not sign", req.signer)))?;
        if entry.digest != req.digest {
            return Err(ProtocolError::SignatureMismatch(format!(
                "{} signed digest {} for relationship {}",
                req.signer,
                hex::encode(entry.digest),
                hex::encode(req.relationship)
            )));
        }
        let key = pki
            .verifying_key(&req.signer)
            .map_err(|_| ProtocolError::UnknownParty(req.signer))?;
        if !receipts::verify(&req.digest, &entry.signature, key) {
            return Err(ProtocolError::SignatureMismatch(format!(
                "invalid signature from {}",
                req.signer
            )));
        }
    }

    let updates = staged
        .updates
        .iter()
        .map(|u| (u.relationship, u.scratch.records.clone(), u.scratch.set.snapshot()))
        .collect();
    ledger.update_relationship_sets(updates)?;
    let root = ledger.commit()?;
    let number = ledger
        .current_commitment_number()
        .ok_or_else(|| LedgerError::InternalInvariantViolation("commit left no commitment".into()))?;
    Ok((number, root))
}

/// Groups required signatures by signer.
pub fn by_signer(required: &[RequiredSignature]) -> BTreeMap<AccountId, Vec<RequiredSignature>> {
    let mut out: BTreeMap<AccountId, Vec<RequiredSignature>> = BTreeMap::new();
    for r in required {
        out.entry(r.signer).or_default().push(r.clone());
    }
    out
}

impl From<MptError> for ProtocolError {
    fn from(e: MptError) -> Self {
        ProtocolError::Ledger(LedgerError::Mpt(e))
    }
}
