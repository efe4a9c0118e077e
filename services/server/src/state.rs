use std::sync::Arc;

use anyhow::{Context, Result};
use ledger::{CommitmentLedger, Proposal};
use receipts::{PkiDirectory, RecordSet};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tracing::info;

use crate::config::AppConfig;
use crate::cosign::Mailbox;
use crate::worker::{CommitNotice, Submission, WorkerError};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: AppConfig,
    pub ledger: Arc<RwLock<CommitmentLedger>>,
    pub pki: Arc<PkiDirectory>,
    pub mailbox: Arc<Mailbox>,
    pub queue: mpsc::Sender<Submission>,
    pub commits: broadcast::Sender<CommitNotice>,
}

impl AppState {
    /// Returns the state and the receiving end of its proposal queue, which
    /// belongs to the apply worker.
    pub fn new(
        config: AppConfig,
        ledger: CommitmentLedger,
        pki: PkiDirectory,
    ) -> (Self, mpsc::Receiver<Submission>) {
        let (queue, rx) = mpsc::channel(config.queue_capacity);
        let (commits, _) = broadcast::channel(64);
        let state = Self {
            config,
            ledger: Arc::new(RwLock::new(ledger)),
            pki: Arc::new(pki),
            mailbox: Arc::new(Mailbox::new()),
            queue,
            commits,
        };
        (state, rx)
    }

    /// Queues `proposal` and waits for the worker's verdict.
    pub async fn submit(&self, proposal: Proposal) -> Result<CommitNotice, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(Submission { proposal, reply })
            .await
            .map_err(|_| WorkerError::Closed)?;
        rx.await.map_err(|_| WorkerError::Closed)?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommitNotice> {
        self.commits.subscribe()
    }
}

/// Loads the ledger snapshot, or starts a fresh ledger holding every
/// relationship in the directory and publishes it as commitment 0.
pub fn open_ledger(config: &AppConfig, pki: &PkiDirectory) -> Result<CommitmentLedger> {
    let path = config.snapshot_path();
    if path.exists() {
        return CommitmentLedger::load(&path)
            .with_context(|| format!("Failed to load ledger snapshot {}", path.display()));
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    let mut ledger = CommitmentLedger::new();
    for owners in pki.relationships()?.values() {
        ledger.register_relationship(owners, RecordSet::new())?;
    }
    let root = ledger.commit()?;
    ledger.save(&path)?;
    info!(root=%hex::encode(root), relationships=%ledger.relationship_ids().count(), "ledger: genesis");
    Ok(ledger)
}
