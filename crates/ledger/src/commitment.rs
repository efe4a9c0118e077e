use std::collections::BTreeMap;
use std::sync::Arc;

use mpt::{Hash32, MptDictionaryFull, MptDictionaryPartial, MptSetFull};
use receipts::{relationship_id, AccountId, RecordSet, RelationshipId};
use tracing::{debug, info};

use crate::{LedgerError, Result};

/// One relationship's records and the authenticated set over them.
#[derive(Clone, Debug)]
pub struct RelationshipSet {
    pub owners: Vec<AccountId>,
    pub records: RecordSet,
    pub set: MptSetFull,
}

impl RelationshipSet {
    pub fn digest(&self) -> Hash32 {
        self.set.commitment()
    }
}

#[derive(Clone, Debug)]
pub(crate) struct LiveRelationship {
    pub(crate) owners: Vec<AccountId>,
    pub(crate) records: Arc<RecordSet>,
    pub(crate) set: MptSetFull,
}

/// Versioned map from relationship id to relationship-set digest.
///
/// Every `commit()` appends an immutable snapshot of the top-level trie and
/// of every record set, so proofs and record sets stay servable for any
/// past commitment number. Cloning shares every trie and record set.
#[derive(Clone, Debug, Default)]
pub struct CommitmentLedger {
    pub(crate) top: MptDictionaryFull,
    pub(crate) relationships: BTreeMap<RelationshipId, LiveRelationship>,
    pub(crate) history: Vec<MptDictionaryFull>,
    pub(crate) roots: Vec<Hash32>,
    pub(crate) record_history: Vec<BTreeMap<RelationshipId, Arc<RecordSet>>>,
}

impl CommitmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a relationship between one or two owners, seeded with `records`.
    /// The top-level entry is written but nothing is published.
    pub fn register_relationship(
        &mut self,
        owners: &[AccountId],
        records: RecordSet,
    ) -> Result<RelationshipId> {
        let mut owners = owners.to_vec();
        owners.sort();
        owners.dedup();
        if owners.is_empty() || owners.len() > 2 {
            return Err(LedgerError::InvalidRelationship(format!(
                "expected 1 or 2 owners, got {}",
                owners.len()
            )));
        }

        let id = relationship_id(&owners);
        if self.relationships.contains_key(&id) {
            return Err(LedgerError::InvalidRelationship(format!(
                "relationship {} already registered",
                hex::encode(id)
            )));
        }

        let set = records.authenticated_set()?;
        self.top.insert(id, set.commitment().to_vec())?;
        debug!(relationship=%hex::encode(id), records=%records.len(), "ledger: registered relationship");
        self.relationships.insert(
            id,
            LiveRelationship {
                owners,
                records: Arc::new(records),
                set,
            },
        );
        Ok(id)
    }

    pub fn relationship_ids(&self) -> impl Iterator<Item = &RelationshipId> {
        self.relationships.keys()
    }

    pub fn owners(&self, id: &RelationshipId) -> Result<&[AccountId]> {
        Ok(&self.live(id)?.owners)
    }

    /// Digest of the live (possibly uncommitted) set.
    pub fn live_digest(&self, id: &RelationshipId) -> Result<Hash32> {
        Ok(self.live(id)?.set.commitment())
    }

    /// Scratch copy of the live set. Mutating it never touches the ledger.
    pub fn relationship_set(&self, id: &RelationshipId) -> Result<RelationshipSet> {
        let live = self.live(id)?;
        Ok(RelationshipSet {
            owners: live.owners.clone(),
            records: (*live.records).clone(),
            set: live.set.snapshot(),
        })
    }

    pub fn update_relationship_set(
        &mut self,
        id: RelationshipId,
        records: RecordSet,
        set: MptSetFull,
    ) -> Result<()> {
        self.update_relationship_sets(vec![(id, records, set)])
    }

    /// Replaces several live sets at once. Either every update applies or
    /// none does.
    pub fn update_relationship_sets(
        &mut self,
        updates: Vec<(RelationshipId, RecordSet, MptSetFull)>,
    ) -> Result<()> {
        for (id, records, set) in &updates {
            self.live(id)?;
            if records.len() != set.len() {
                return Err(LedgerError::InternalInvariantViolation(format!(
                    "relationship {}: {} records but {} witnesses",
                    hex::encode(id),
                    records.len(),
                    set.len()
                )));
            }
        }

        // Stage the new top-level trie first so a trie error leaves the
        // live state untouched.
        let mut top = self.top.snapshot();
        for (id, _, set) in &updates {
            top.insert(*id, set.commitment().to_vec())?;
        }
        self.top = top;

        for (id, records, set) in updates {
            debug!(relationship=%hex::encode(id), digest=%hex::encode(set.commitment()), "ledger: relationship updated");
            if let Some(live) = self.relationships.get_mut(&id) {
                live.records = Arc::new(records);
                live.set = set;
            }
        }
        Ok(())
    }

    /// Publishes the current state and returns the new root.
    pub fn commit(&mut self) -> Result<Hash32> {
        self.check_lengths()?;

        let root = self.top.commitment();
        let records = self
            .relationships
            .iter()
            .map(|(id, live)| (*id, Arc::clone(&live.records)))
            .collect();

        self.history.push(self.top.snapshot());
        self.roots.push(root);
        self.record_history.push(records);

        let number = self.roots.len() - 1;
        info!(number, root=%hex::encode(root), "ledger: commit");
        Ok(root)
    }

    pub fn get_commitment(&self, number: u64) -> Result<Hash32> {
        self.check_lengths()?;
        self.roots
            .get(self.index(number)?)
            .copied()
            .ok_or(LedgerError::VersionOutOfRange(number))
    }

    /// Every published root, oldest first; position is the commitment number.
    pub fn commitments(&self) -> Result<&[Hash32]> {
        self.check_lengths()?;
        Ok(&self.roots)
    }

    /// `None` before the first commit.
    pub fn current_commitment_number(&self) -> Option<u64> {
        (self.roots.len() as u64).checked_sub(1)
    }

    /// Proof for `keys` against the trie published as commitment `number`.
    pub fn get_proof(&self, keys: &[Hash32], number: u64) -> Result<MptDictionaryPartial> {
        self.check_lengths()?;
        let snapshot = &self.history[self.index(number)?];
        Ok(MptDictionaryPartial::from_full(snapshot, keys))
    }

    pub fn get_record_set(&self, id: &RelationshipId, number: u64) -> Result<Arc<RecordSet>> {
        self.check_lengths()?;
        self.record_history[self.index(number)?]
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownRelationship(hex::encode(id)))
    }

    pub fn live_record_set(&self, id: &RelationshipId) -> Result<Arc<RecordSet>> {
        Ok(Arc::clone(&self.live(id)?.records))
    }

    fn live(&self, id: &RelationshipId) -> Result<&LiveRelationship> {
        self.relationships
            .get(id)
            .ok_or_else(|| LedgerError::UnknownRelationship(hex::encode(id)))
    }

    fn index(&self, number: u64) -> Result<usize> {
        usize::try_from(number)
            .ok()
            .filter(|i| *i < self.roots.len())
            .ok_or(LedgerError::VersionOutOfRange(number))
    }

    pub(crate) fn check_lengths(&self) -> Result<()> {
        if self.history.len() != self.roots.len() || self.record_history.len() != self.roots.len() {
            return Err(LedgerError::InternalInvariantViolation(format!(
                "history {} / roots {} / record sets {}",
                self.history.len(),
                self.roots.len(),
                self.record_history.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use receipts::Receipt;
    use uuid::Uuid;

    fn receipt(issuer: AccountId, depositor: AccountId, category: &str) -> Receipt {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        Receipt::new(issuer, depositor, category, at)
    }

    #[test]
    fn test_empty_ledger() {
        let ledger = CommitmentLedger::new();
        assert_eq!(ledger.current_commitment_number(), None);
        assert!(ledger.commitments().unwrap().is_empty());
        assert!(matches!(
            ledger.get_commitment(0),
            Err(LedgerError::VersionOutOfRange(0))
        ));
    }

    #[test]
    fn test_register_validates_owners() {
        let mut ledger = CommitmentLedger::new();
        let ids: Vec<AccountId> = (1..=3).map(Uuid::from_u128).collect();

        assert!(matches!(
            ledger.register_relationship(&[], RecordSet::new()),
            Err(LedgerError::InvalidRelationship(_))
        ));
        assert!(matches!(
            ledger.register_relationship(&ids, RecordSet::new()),
            Err(LedgerError::InvalidRelationship(_))
        ));

        let rel = ledger.register_relationship(&ids[..2], RecordSet::new()).unwrap();
        assert_eq!(rel, relationship_id(&[ids[1], ids[0]]));
        assert!(matches!(
            ledger.register_relationship(&[ids[1], ids[0]], RecordSet::new()),
            Err(LedgerError::InvalidRelationship(_))
        ));
    }

    #[test]
    fn test_scratch_copy_is_isolated() {
        let (w, a) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let mut ledger = CommitmentLedger::new();
        let rel = ledger.register_relationship(&[w, a], RecordSet::new()).unwrap();
        let before = ledger.live_digest(&rel).unwrap();

        let mut scratch = ledger.relationship_set(&rel).unwrap();
        let wit = scratch.records.insert(receipt(w, a, "oats"));
        scratch.set.insert(wit).unwrap();

        assert_ne!(scratch.digest(), before);
        assert_eq!(ledger.live_digest(&rel).unwrap(), before);
    }

    #[test]
    fn test_update_does_not_publish() {
        let (w, a) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let mut ledger = CommitmentLedger::new();
        let rel = ledger.register_relationship(&[w, a], RecordSet::new()).unwrap();
        let root0 = ledger.commit().unwrap();

        let mut scratch = ledger.relationship_set(&rel).unwrap();
        let wit = scratch.records.insert(receipt(w, a, "oats"));
        scratch.set.insert(wit).unwrap();
        ledger
            .update_relationship_set(rel, scratch.records, scratch.set)
            .unwrap();

        assert_eq!(ledger.commitments().unwrap(), &[root0]);
        assert!(ledger.get_record_set(&rel, 0).unwrap().is_empty());
        assert_eq!(ledger.live_record_set(&rel).unwrap().len(), 1);

        let root1 = ledger.commit().unwrap();
        assert_ne!(root0, root1);
        assert_eq!(ledger.get_record_set(&rel, 1).unwrap().len(), 1);
        assert!(ledger.get_record_set(&rel, 0).unwrap().is_empty());
    }

    #[test]
    fn test_mismatched_update_rejected_atomically() {
        let (w, a, b) = (Uuid::from_u128(1), Uuid::from_u128(2), Uuid::from_u128(3));
        let mut ledger = CommitmentLedger::new();
        let ra = ledger.register_relationship(&[w, a], RecordSet::new()).unwrap();
        let rb = ledger.register_relationship(&[w, b], RecordSet::new()).unwrap();
        let top = ledger.top.commitment();

        let mut good = ledger.relationship_set(&ra).unwrap();
        let wit = good.records.insert(receipt(w, a, "oats"));
        good.set.insert(wit).unwrap();

        // records without a matching witness
        let mut bad = ledger.relationship_set(&rb).unwrap();
        bad.records.insert(receipt(w, b, "rye"));

        let err = ledger
            .update_relationship_sets(vec![
                (ra, good.records, good.set),
                (rb, bad.records, bad.set),
            ])
            .unwrap_err();
        assert!(matches!(err, LedgerError::InternalInvariantViolation(_)));
        assert_eq!(ledger.top.commitment(), top);
        assert!(ledger.live_record_set(&ra).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_relationship() {
        let mut ledger = CommitmentLedger::new();
        ledger.commit().unwrap();
        let rel = mpt::hash_bytes(b"nobody");
        assert!(matches!(
            ledger.get_record_set(&rel, 0),
            Err(LedgerError::UnknownRelationship(_))
        ));
        assert!(matches!(
            ledger.update_relationship_set(rel, RecordSet::new(), MptSetFull::new()),
            Err(LedgerError::UnknownRelationship(_))
        ));
    }

    #[test]
    fn test_length_invariant_checked_on_read() {
        let mut ledger = CommitmentLedger::new();
        ledger.commit().unwrap();
        ledger.roots.push([0u8; 32]);
        assert!(matches!(
            ledger.get_commitment(0),
            Err(LedgerError::InternalInvariantViolation(_))
        ));
        assert!(matches!(
            ledger.commit(),
            Err(LedgerError::InternalInvariantViolation(_))
        ));
    }
}
