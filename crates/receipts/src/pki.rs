use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use ed25519_dalek::{SigningKey, VerifyingKey};
use mpt::Hash32;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};

use crate::{AccountId, ReceiptError, Result};

pub type RelationshipId = Hash32;

/// Relationship key: hash of the owners' ids, sorted and deduplicated, so
/// every owner derives the same id independently.
pub fn relationship_id(owners: &[AccountId]) -> RelationshipId {
    let owners: BTreeSet<&AccountId> = owners.iter().collect();
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"relationship");
    for id in owners {
        hasher.update(id.as_bytes());
    }
    hasher.finalize().into()
}

/// Public view of a participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub verifying_key: VerifyingKey,
    pub relationships: BTreeSet<RelationshipId>,
}

impl Account {
    pub fn join(&mut self, relationship: RelationshipId) {
        self.relationships.insert(relationship);
    }
}

/// An account together with its signing key. Never leaves its owner.
#[derive(Clone, Debug)]
pub struct Identity {
    account: Account,
    signing_key: SigningKey,
}

impl Identity {
    pub fn generate(name: impl Into<String>) -> Self {
        Self::from_signing_key(name, SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(name: impl Into<String>, signing_key: SigningKey) -> Self {
        let account = Account {
            id: uuid::Uuid::new_v4(),
            name: name.into(),
            verifying_key: signing_key.verifying_key(),
            relationships: BTreeSet::new(),
        };
        Self {
            account,
            signing_key,
        }
    }

    pub fn id(&self) -> AccountId {
        self.account.id
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn account_mut(&mut self) -> &mut Account {
        &mut self.account
    }

    pub fn sign(&self, digest: &Hash32) -> Vec<u8> {
        crate::sign(digest, &self.signing_key)
    }
}

/// Directory of every known account and the relationships between them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Account>", into = "Vec<Account>")]
pub struct PkiDirectory {
    accounts: BTreeMap<AccountId, Account>,
}

impl PkiDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn get(&self, id: &AccountId) -> Result<&Account> {
        self.accounts
            .get(id)
            .ok_or(ReceiptError::UnknownAccount(*id))
    }

    pub fn verifying_key(&self, id: &AccountId) -> Result<&VerifyingKey> {
        Ok(&self.get(id)?.verifying_key)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Registers a relationship between the given accounts and returns its
    /// id. Every owner must already be in the directory.
    pub fn link(&mut self, owners: &[AccountId]) -> Result<RelationshipId> {
        for id in owners {
            self.get(id)?;
        }
        let rel = relationship_id(owners);
        for id in owners {
            if let Some(account) = self.accounts.get_mut(id) {
                account.join(rel);
            }
        }
        Ok(rel)
    }

    /// Every relationship with its sorted owners.
    ///
    /// Fails if a relationship listed by an account does not hash back to
    /// the set of accounts that list it.
    pub fn relationships(&self) -> Result<BTreeMap<RelationshipId, Vec<AccountId>>> {
        let mut out: BTreeMap<RelationshipId, Vec<AccountId>> = BTreeMap::new();
        for account in self.accounts.values() {
            for rel in &account.relationships {
                out.entry(*rel).or_default().push(account.id);
            }
        }
        for (rel, owners) in &out {
            if relationship_id(owners) != *rel {
                return Err(ReceiptError::MalformedInput(format!(
                    "relationship {} does not match its owners",
                    hex::encode(rel)
                )));
            }
        }
        Ok(out)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| ReceiptError::Serialization(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ReceiptError::Serialization(e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| ReceiptError::Serialization(e.to_string()))?;
        fs::write(path.as_ref(), text).map_err(|e| ReceiptError::Serialization(e.to_string()))
    }
}

impl From<Vec<Account>> for PkiDirectory {
    fn from(accounts: Vec<Account>) -> Self {
        Self {
            accounts: accounts.into_iter().map(|a| (a.id, a)).collect(),
        }
    }
}

impl From<PkiDirectory> for Vec<Account> {
    fn from(dir: PkiDirectory) -> Self {
        dir.accounts.into_values().collect()
    }
}
