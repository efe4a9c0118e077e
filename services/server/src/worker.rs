use std::sync::Arc;

use ledger::{by_signer, commit_staged, stage, CommitmentLedger, Proposal, ProtocolError};
use mpt::Hash32;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cosign::CoSigner;
use crate::ledger_exec::with_ledger_blocking;
use crate::state::SharedState;

pub struct Submission {
    pub proposal: Proposal,
    pub reply: oneshot::Sender<Result<CommitNotice, WorkerError>>,
}

/// Published after every successful commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitNotice {
    pub proposal: Uuid,
    pub number: u64,
    #[serde(with = "hex::serde")]
    pub root: Hash32,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Co-signing failed: {0}")]
    CoSign(String),

    #[error("Co-signing timed out")]
    CoSignTimeout,

    /// The commitment was not written to disk and is not published.
    #[error("Snapshot write failed: {0}")]
    Persistence(String),

    #[error("Apply worker stopped")]
    Closed,
}

pub fn spawn_apply_worker(
    state: SharedState,
    rx: mpsc::Receiver<Submission>,
    cosigner: Arc<dyn CoSigner>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_apply_worker(state, rx, cosigner, shutdown))
}

/// Applies queued proposals one at a time, so commits are totally ordered.
pub async fn run_apply_worker(
    state: SharedState,
    mut rx: mpsc::Receiver<Submission>,
    cosigner: Arc<dyn CoSigner>,
    shutdown: CancellationToken,
) {
    info!("apply_worker: started");
    loop {
        let sub = tokio::select! {
            _ = shutdown.cancelled() => break,
            sub = rx.recv() => match sub {
                Some(s) => s,
                None => break,
            },
        };

        let id = sub.proposal.id;
        let result = apply(&state, cosigner.clone(), sub.proposal).await;
        match &result {
            Ok(notice) => {
                // no subscribers is fine
                let _ = state.commits.send(notice.clone());
            }
            Err(e) => warn!(proposal=%id, error=%e, "apply_worker: proposal rejected"),
        }
        if sub.reply.send(result).is_err() {
            warn!(proposal=%id, "apply_worker: submitter went away");
        }
    }
    info!("apply_worker: stopped");
}

async fn apply(
    state: &SharedState,
    cosigner: Arc<dyn CoSigner>,
    proposal: Proposal,
) -> Result<CommitNotice, WorkerError> {
    let mut staged = {
        let ledger = state.ledger.read().await;
        stage(&ledger, &state.pki, proposal)?
    };
    let id = staged.id();

    // No lock is held while waiting on remote parties.
    let missing = staged.missing_signers();
    if !missing.is_empty() {
        let mut requests = JoinSet::new();
        for signer in by_signer(&missing).into_keys() {
            let cosigner = cosigner.clone();
            let proposal = staged.proposal().clone();
            requests.spawn(async move { cosigner.request(signer, &proposal).await });
        }

        let collected = tokio::time::timeout(state.config.cosign_timeout, async {
            let mut entries = Vec::new();
            while let Some(joined) = requests.join_next().await {
                let answer = joined.map_err(|e| WorkerError::CoSign(e.to_string()))?;
                entries.extend(answer.map_err(|e| WorkerError::CoSign(e.to_string()))?);
            }
            Ok::<_, WorkerError>(entries)
        })
        .await;

        let entries = match collected {
            Ok(r) => r,
            Err(_) => {
                staged.reject();
                return Err(WorkerError::CoSignTimeout);
            }
        };
        let entries = match entries {
            Ok(e) => e,
            Err(err) => {
                staged.reject();
                return Err(err);
            }
        };
        staged.add_signatures(entries);
    }

    // Commit into a copy and swap it in once it is on disk. Only this worker
    // writes the ledger, so the copy cannot go stale in between.
    let pki = state.pki.clone();
    let path = state.config.snapshot_path();
    let commit = move |live: &CommitmentLedger| -> Result<(CommitmentLedger, u64, Hash32), WorkerError> {
        let mut next = live.clone();
        let (number, root) = commit_staged(&mut next, &pki, &mut staged)?;
        if let Err(e) = next.save(&path) {
            error!(number=%number, "apply_worker: snapshot failed: {e}");
            return Err(WorkerError::Persistence(e.to_string()));
        }
        Ok((next, number, root))
    };
    let (next, number, root) = with_ledger_blocking(state.ledger.clone(), commit)
        .await
        .map_err(|e| WorkerError::Persistence(e.to_string()))??;

    *state.ledger.write().await = next;

    Ok(CommitNotice {
        proposal: id,
        number,
        root,
    })
}
