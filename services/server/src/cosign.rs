//! Collecting counter-signatures from the owners of touched relationships.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::bail;
use async_trait::async_trait;
use ledger::{Proposal, SignatureEntry};
use receipts::AccountId;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

#[async_trait]
pub trait CoSigner: Send + Sync {
    /// Asks `signer` to approve `proposal`. Resolves once the signer answers;
    /// any deadline is the caller's.
    async fn request(&self, signer: AccountId, proposal: &Proposal) -> anyhow::Result<Vec<SignatureEntry>>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Approval {
    Signed(Vec<SignatureEntry>),
    Declined(String),
}

/// Holds proposals forwarded to each account until that account posts its
/// answer.
#[derive(Default)]
pub struct Mailbox {
    inner: Mutex<MailboxInner>,
}

#[derive(Default)]
struct MailboxInner {
    forwarded: HashMap<AccountId, Vec<Proposal>>,
    waiting: HashMap<(Uuid, AccountId), oneshot::Sender<Approval>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MailboxInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Proposals awaiting `account`'s approval.
    pub fn forwarded(&self, account: &AccountId) -> Vec<Proposal> {
        self.lock().forwarded.get(account).cloned().unwrap_or_default()
    }

    /// Delivers `signer`'s answer. Returns `false` if nothing was waiting for
    /// it. Signatures claiming another signer are dropped.
    pub fn respond(&self, proposal: Uuid, signer: AccountId, approval: Approval) -> bool {
        let approval = match approval {
            Approval::Signed(entries) => {
                Approval::Signed(entries.into_iter().filter(|e| e.signer == signer).collect())
            }
            declined => declined,
        };
        let Some(tx) = self.lock().waiting.remove(&(proposal, signer)) else {
            return false;
        };
        debug!(proposal=%proposal, signer=%signer, "mailbox: answer received");
        tx.send(approval).is_ok()
    }

    fn withdraw(&self, proposal: Uuid, signer: AccountId) {
        let mut inner = self.lock();
        inner.waiting.remove(&(proposal, signer));
        if let Some(list) = inner.forwarded.get_mut(&signer) {
            list.retain(|p| p.id != proposal);
            if list.is_empty() {
                inner.forwarded.remove(&signer);
            }
        }
    }
}

/// Removes a forwarded request however the wait ends, including when the
/// waiting future is dropped on timeout.
struct Forwarded<'a> {
    mailbox: &'a Mailbox,
    proposal: Uuid,
    signer: AccountId,
}

impl Drop for Forwarded<'_> {
    fn drop(&mut self) {
        self.mailbox.withdraw(self.proposal, self.signer);
    }
}

#[async_trait]
impl CoSigner for Mailbox {
    async fn request(&self, signer: AccountId, proposal: &Proposal) -> anyhow::Result<Vec<SignatureEntry>> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.lock();
            inner
                .forwarded
                .entry(signer)
                .or_default()
                .push(proposal.clone());
            inner.waiting.insert((proposal.id, signer), tx);
        }
        let _guard = Forwarded {
            mailbox: self,
            proposal: proposal.id,
            signer,
        };
        info!(proposal=%proposal.id, signer=%signer, "mailbox: forwarded");

        match rx.await {
            Ok(Approval::Signed(entries)) => Ok(entries),
            Ok(Approval::Declined(reason)) => bail!("{signer} declined: {reason}"),
            Err(_) => bail!("request to {signer} was withdrawn"),
        }
    }
}
