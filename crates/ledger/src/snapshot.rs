//! Whole-ledger snapshots on disk.
//!
//! Record sets shared between commits are written once and referenced by
//! index, so a snapshot grows with the number of distinct sets rather than
//! with commits times relationships.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use mpt::{Hash32, MptDictionaryFull};
use receipts::{AccountId, RecordSet, RelationshipId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::commitment::LiveRelationship;
use crate::{CommitmentLedger, LedgerError, Result};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct LedgerSnapshot {
    version: u32,
    pool: Vec<RecordSet>,
    live: Vec<(RelationshipId, Vec<AccountId>, usize)>,
    top: Vec<u8>,
    history: Vec<Vec<u8>>,
    roots: Vec<Hash32>,
    record_history: Vec<Vec<(RelationshipId, usize)>>,
}

#[derive(Default)]
struct Pool {
    sets: Vec<RecordSet>,
    seen: HashMap<*const RecordSet, usize>,
}

impl Pool {
    fn intern(&mut self, set: &Arc<RecordSet>) -> usize {
        let ptr = Arc::as_ptr(set);
        if let Some(i) = self.seen.get(&ptr) {
            return *i;
        }
        self.sets.push((**set).clone());
        let i = self.sets.len() - 1;
        self.seen.insert(ptr, i);
        i
    }
}

fn persistence(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Persistence(e.to_string())
}

impl CommitmentLedger {
    /// Writes the whole ledger to `path`, replacing any previous file only
    /// once the new one is complete.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.check_lengths()?;
        let path = path.as_ref();

        let mut pool = Pool::default();
        let live = self
            .relationships
            .iter()
            .map(|(id, rel)| (*id, rel.owners.clone(), pool.intern(&rel.records)))
            .collect();
        let record_history = self
            .record_history
            .iter()
            .map(|sets| sets.iter().map(|(id, s)| (*id, pool.intern(s))).collect())
            .collect();
        let history = self
            .history
            .iter()
            .map(|t| t.serialize())
            .collect::<mpt::Result<Vec<_>>>()?;

        let snapshot = LedgerSnapshot {
            version: SNAPSHOT_VERSION,
            pool: pool.sets,
            live,
            top: self.top.serialize()?,
            history,
            roots: self.roots.clone(),
            record_history,
        };
        let bytes = bincode::serialize(&snapshot).map_err(persistence)?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persistence)?;
        tmp.write_all(&bytes).map_err(persistence)?;
        tmp.as_file().sync_all().map_err(persistence)?;
        tmp.persist(path).map_err(persistence)?;

        info!(path=%path.display(), commitments=%self.roots.len(), bytes=%bytes.len(), "ledger: saved");
        Ok(())
    }

    /// Restores a ledger written by [`CommitmentLedger::save`], re-checking
    /// every stored root against its trie and every record set, live or
    /// historical, against the digest its trie holds for it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(persistence)?;
        let snapshot: LedgerSnapshot = bincode::deserialize(&bytes).map_err(persistence)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LedgerError::Persistence(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let pool: Vec<Arc<RecordSet>> = snapshot.pool.into_iter().map(Arc::new).collect();
        let shared = |i: usize| {
            pool.get(i)
                .cloned()
                .ok_or_else(|| LedgerError::Persistence(format!("record set {i} missing")))
        };

        let digests = pool
            .iter()
            .map(|s| -> Result<Hash32> { Ok(s.authenticated_set()?.commitment()) })
            .collect::<Result<Vec<Hash32>>>()?;

        let top = MptDictionaryFull::deserialize(&snapshot.top)?;
        let mut relationships = BTreeMap::new();
        for (id, owners, i) in snapshot.live {
            let records = shared(i)?;
            let set = records.authenticated_set()?;
            if top.get(&id) != Some(&set.commitment()[..]) {
                return Err(LedgerError::Persistence(format!(
                    "relationship {} does not match the top-level trie",
                    hex::encode(id)
                )));
            }
            relationships.insert(id, LiveRelationship { owners, records, set });
        }

        let mut history = Vec::with_capacity(snapshot.history.len());
        for (bytes, root) in snapshot.history.iter().zip(&snapshot.roots) {
            let trie = MptDictionaryFull::deserialize(bytes)?;
            if trie.commitment() != *root {
                return Err(LedgerError::Persistence(format!(
                    "stored root {} does not match its trie",
                    hex::encode(root)
                )));
            }
            history.push(trie);
        }

        let mut record_history = Vec::with_capacity(snapshot.record_history.len());
        for (n, sets) in snapshot.record_history.into_iter().enumerate() {
            let trie = history
                .get(n)
                .ok_or_else(|| LedgerError::Persistence(format!("record sets for missing commitment {n}")))?;
            if trie.len() != sets.len() {
                return Err(LedgerError::Persistence(format!(
                    "commitment {n} holds {} relationships but {} record sets",
                    trie.len(),
                    sets.len()
                )));
            }
            let mut m = BTreeMap::new();
            for (id, i) in sets {
                let records = shared(i)?;
                if trie.get(&id) != Some(&digests[i][..]) {
                    return Err(LedgerError::Persistence(format!(
                        "record set of {} at commitment {n} does not match its proof",
                        hex::encode(id)
                    )));
                }
                m.insert(id, records);
            }
            record_history.push(m);
        }

        let ledger = CommitmentLedger {
            top,
            relationships,
            history,
            roots: snapshot.roots,
            record_history,
        };
        ledger.check_lengths()?;
        info!(path=%path.display(), commitments=%ledger.roots.len(), "ledger: loaded");
        Ok(ledger)
    }
}
