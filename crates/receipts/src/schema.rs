use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mpt::{Hash32, MptSetFull};
use serde::{Deserialize, Serialize};

pub type AccountId = uuid::Uuid;
pub type Witness = Hash32;

/// Warehouse receipt: a signed record shared by the issuing warehouse and
/// the depositor holding the goods.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Receipt {
    pub issuer: AccountId,
    pub depositor: AccountId,
    pub accountant: String,
    pub category: String,
    pub issued_at: DateTime<Utc>,
    pub insurance: String,
    pub weight_grams: u64,
    pub volume_ml: u64,
    pub humidity_permille: u16,
    pub price_cents: u64,
    pub details: String,
}

impl Receipt {
    pub fn new(
        issuer: AccountId,
        depositor: AccountId,
        category: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            issuer,
            depositor,
            accountant: String::new(),
            category: category.into(),
            issued_at,
            insurance: String::new(),
            weight_grams: 0,
            volume_ml: 0,
            humidity_permille: 0,
            price_cents: 0,
            details: String::new(),
        }
    }

    /// Deterministic content hash used as the receipt's key in its
    /// relationship set.
    ///
    /// Every field goes into the hasher length-prefixed, in declaration
    /// order, so two receipts share a witness only if they are equal.
    pub fn witness(&self) -> Witness {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"receipt-v1");
        hasher.update(self.issuer.as_bytes());
        hasher.update(self.depositor.as_bytes());
        put_str(&mut hasher, &self.accountant);
        put_str(&mut hasher, &self.category);
        put_str(&mut hasher, &self.issued_at.to_rfc3339());
        put_str(&mut hasher, &self.insurance);
        hasher.update(&self.weight_grams.to_le_bytes());
        hasher.update(&self.volume_ml.to_le_bytes());
        hasher.update(&self.humidity_permille.to_le_bytes());
        hasher.update(&self.price_cents.to_le_bytes());
        put_str(&mut hasher, &self.details);
        hasher.finalize().into()
    }
}

fn put_str(hasher: &mut blake3::Hasher, s: &str) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// The receipts of one relationship, keyed by witness.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Receipt>", into = "Vec<Receipt>")]
pub struct RecordSet {
    records: BTreeMap<Witness, Receipt>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the receipt's witness.
    pub fn insert(&mut self, receipt: Receipt) -> Witness {
        let w = receipt.witness();
        self.records.insert(w, receipt);
        w
    }

    pub fn remove(&mut self, witness: &Witness) -> Option<Receipt> {
        self.records.remove(witness)
    }

    pub fn get(&self, witness: &Witness) -> Option<&Receipt> {
        self.records.get(witness)
    }

    pub fn contains(&self, witness: &Witness) -> bool {
        self.records.contains_key(witness)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Witness, &Receipt)> {
        self.records.iter()
    }

    pub fn receipts(&self) -> impl Iterator<Item = &Receipt> {
        self.records.values()
    }

    /// Authenticated set over the witnesses of these receipts.
    pub fn authenticated_set(&self) -> mpt::Result<MptSetFull> {
        MptSetFull::from_witnesses(self.records.keys().copied())
    }
}

impl From<Vec<Receipt>> for RecordSet {
    fn from(receipts: Vec<Receipt>) -> Self {
        receipts.into_iter().collect()
    }
}

impl From<RecordSet> for Vec<Receipt> {
    fn from(set: RecordSet) -> Self {
        set.records.into_values().collect()
    }
}

impl FromIterator<Receipt> for RecordSet {
    fn from_iter<I: IntoIterator<Item = Receipt>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for r in iter {
            set.insert(r);
        }
        set
    }
}
