use std::collections::BTreeMap;

use mpt::{key_from_slice, Hash32, MptDictionaryPartial};
use receipts::{relationship_id, AccountId, Identity, Receipt, RecordSet, RelationshipId};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{mutations, ProtocolResult, StagedUpdate};
use crate::{Proposal, ProposalKind, ProtocolError, RelationshipSet, SignatureEntry};

/// A client: an identity plus its own copy of every relationship set it
/// belongs to. It never trusts the server's view of those sets.
#[derive(Debug)]
pub struct Participant {
    identity: Identity,
    sets: BTreeMap<RelationshipId, RelationshipSet>,
    pending: BTreeMap<Uuid, Vec<StagedUpdate>>,
    accepted: Option<(u64, Hash32)>,
}

impl Participant {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            sets: BTreeMap::new(),
            pending: BTreeMap::new(),
            accepted: None,
        }
    }

    pub fn id(&self) -> AccountId {
        self.identity.id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Starts tracking a relationship this participant owns.
    pub fn join(&mut self, owners: &[AccountId], records: RecordSet) -> ProtocolResult<RelationshipId> {
        if !owners.contains(&self.id()) {
            return Err(ProtocolError::MalformedProposal(format!(
                "{} is not an owner",
                self.id()
            )));
        }
        let mut owners = owners.to_vec();
        owners.sort();
        owners.dedup();
        let id = relationship_id(&owners);
        let set = records.authenticated_set()?;
        self.sets.insert(id, RelationshipSet { owners, records, set });
        Ok(id)
    }

    pub fn relationship_ids(&self) -> Vec<RelationshipId> {
        self.sets.keys().copied().collect()
    }

    pub fn local_digest(&self, relationship: &RelationshipId) -> Option<Hash32> {
        self.sets.get(relationship).map(|s| s.digest())
    }

    pub fn records(&self, relationship: &RelationshipId) -> Option<&RecordSet> {
        self.sets.get(relationship).map(|s| &s.records)
    }

    pub fn last_accepted(&self) -> Option<(u64, Hash32)> {
        self.accepted
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn propose_issue(&mut self, receipt: Receipt) -> ProtocolResult<Proposal> {
        if receipt.issuer != self.id() {
            return Err(ProtocolError::MalformedProposal(
                "only the issuer proposes an issue".into(),
            ));
        }
        self.propose(ProposalKind::Issue { receipt })
    }

    pub fn propose_transfer(
        &mut self,
        receipt: Receipt,
        current_owner: AccountId,
        new_owner: AccountId,
    ) -> ProtocolResult<Proposal> {
        self.propose(ProposalKind::Transfer {
            receipt,
            current_owner,
            new_owner,
        })
    }

    fn propose(&mut self, kind: ProposalKind) -> ProtocolResult<Proposal> {
        let updates = self.stage_locally(&kind)?;
        let mut proposal = Proposal::new(self.id(), kind);
        proposal.add_signatures(self.sign_updates(&updates));
        self.pending.insert(proposal.id, updates);
        debug!(proposal=%proposal.id, account=%self.id(), "participant: proposed");
        Ok(proposal)
    }

    /// Recomputes the proposal against local copies and signs the digests
    /// this participant computed itself. Any signature already on the
    /// proposal that names a different digest is refused.
    pub fn approve(&mut self, proposal: &Proposal) -> ProtocolResult<Vec<SignatureEntry>> {
        let updates = self.stage_locally(&proposal.kind)?;
        for entry in &proposal.signatures {
            if let Some(u) = updates.iter().find(|u| u.relationship == entry.relationship) {
                if entry.digest != u.new_digest {
                    warn!(proposal=%proposal.id, signer=%entry.signer, "participant: digest mismatch");
                    return Err(ProtocolError::DigestMismatch(format!(
                        "{} signed {} but relationship {} becomes {}",
                        entry.signer,
                        hex::encode(entry.digest),
                        hex::encode(u.relationship),
                        hex::encode(u.new_digest)
                    )));
                }
            }
        }
        if let Some(held) = self.pending.get(&proposal.id) {
            let same = held.len() == updates.len()
                && held
                    .iter()
                    .zip(&updates)
                    .all(|(h, u)| h.relationship == u.relationship && h.new_digest == u.new_digest);
            if !same {
                warn!(proposal=%proposal.id, "participant: proposal id reused");
                return Err(ProtocolError::MalformedProposal(format!(
                    "proposal {} is already pending for a different mutation",
                    proposal.id
                )));
            }
        }
        let signatures = self.sign_updates(&updates);
        self.pending.insert(proposal.id, updates);
        debug!(proposal=%proposal.id, account=%self.id(), "participant: approved");
        Ok(signatures)
    }

    /// Forgets a proposal that will not be committed.
    pub fn discard(&mut self, proposal: &Uuid) {
        self.pending.remove(proposal);
    }

    /// Checks a published commitment against local state.
    ///
    /// `proof` must cover every relationship this participant owns, hash to
    /// `root`, and map each relationship either to the local digest or to
    /// the new digest of a pending proposal, which is then adopted. Anything
    /// else means the server cannot be trusted; nothing is adopted.
    pub fn accept_commitment(&mut self, number: u64, root: &Hash32, proof: &[u8]) -> ProtocolResult<()> {
        let untrusted = |msg: String| {
            warn!(number=%number, "participant: server untrusted: {msg}");
            ProtocolError::ServerUntrusted(msg)
        };

        if let Some((last, _)) = self.accepted {
            if number < last {
                return Err(untrusted(format!("commitment {number} precedes {last}")));
            }
        }

        let partial = MptDictionaryPartial::deserialize(proof).map_err(|e| untrusted(e.to_string()))?;
        if partial.commitment() != *root {
            return Err(untrusted("proof does not hash to the published root".into()));
        }

        let mut adopt: Vec<(RelationshipId, RelationshipSet)> = Vec::new();
        for (rel, local) in &self.sets {
            let value = partial
                .get(rel)
                .map_err(|e| untrusted(e.to_string()))?
                .ok_or_else(|| untrusted(format!("relationship {} missing", hex::encode(rel))))?;
            let published = key_from_slice(value).map_err(|e| untrusted(e.to_string()))?;

            let current = local.digest();
            if published == current {
                continue;
            }
            let update = self
                .pending
                .values()
                .flatten()
                .find(|u| u.relationship == *rel && u.base_digest == current && u.new_digest == published)
                .ok_or_else(|| {
                    untrusted(format!(
                        "relationship {} published as {}",
                        hex::encode(rel),
                        hex::encode(published)
                    ))
                })?;
            adopt.push((*rel, update.scratch.clone()));
        }

        for (rel, set) in adopt {
            self.sets.insert(rel, set);
        }
        let sets = &self.sets;
        self.pending.retain(|_, updates| {
            updates
                .iter()
                .all(|u| sets.get(&u.relationship).map(|s| s.digest()) == Some(u.base_digest))
        });
        self.accepted = Some((number, *root));
        info!(account=%self.id(), number=%number, root=%hex::encode(root), "participant: commitment accepted");
        Ok(())
    }

    fn stage_locally(&self, kind: &ProposalKind) -> ProtocolResult<Vec<StagedUpdate>> {
        let mut updates = Vec::new();
        for m in mutations(kind)? {
            if let Some(local) = self.sets.get(&m.relationship) {
                updates.push(m.apply(local.clone())?);
            }
        }
        if updates.is_empty() {
            return Err(ProtocolError::MalformedProposal(format!(
                "{} owns none of the touched relationships",
                self.id()
            )));
        }
        Ok(updates)
    }

    fn sign_updates(&self, updates: &[StagedUpdate]) -> Vec<SignatureEntry> {
        updates
            .iter()
            .filter(|u| u.owners.contains(&self.id()))
            .map(|u| SignatureEntry {
                signer: self.id(),
                relationship: u.relationship,
                digest: u.new_digest,
                signature: self.identity.sign(&u.new_digest),
            })
            .collect()
    }
}
