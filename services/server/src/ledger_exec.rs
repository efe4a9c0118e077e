use std::sync::Arc;

use ledger::CommitmentLedger;
use tokio::sync::RwLock;

/// Runs `f` against the ledger on a blocking thread under the read lock, so
/// snapshot file I/O never stalls the runtime and readers keep going.
pub async fn with_ledger_blocking<R, F>(
    ledger: Arc<RwLock<CommitmentLedger>>,
    f: F,
) -> Result<R, tokio::task::JoinError>
where
    R: Send + 'static,
    F: FnOnce(&CommitmentLedger) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let guard = ledger.blocking_read();
        f(&guard)
    })
    .await
}
