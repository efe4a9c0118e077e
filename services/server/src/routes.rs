use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ledger::{LedgerError, Proposal, ProtocolError, SignatureEntry};
use mpt::{key_from_slice, Hash32};
use receipts::{AccountId, RecordSet};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::cosign::Approval;
use crate::state::SharedState;
use crate::worker::{CommitNotice, WorkerError};

type ApiResult<T> = Result<T, (StatusCode, String)>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/commitments", get(get_commitments))
        .route("/commitments/next/:after", get(get_next_commitment))
        .route("/proofs", post(post_proof))
        .route("/records/:relationship/:number", get(get_records))
        .route("/proposals", post(post_proposal))
        .route("/forwarded/:account", get(get_forwarded))
        .route("/approvals", post(post_approval))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommitmentsResponse {
    pub commitments: Vec<String>,
}

pub async fn get_commitments(State(state): State<SharedState>) -> ApiResult<Json<CommitmentsResponse>> {
    let ledger = state.ledger.read().await;
    let commitments = ledger.commitments().map_err(ledger_error)?;
    Ok(Json(CommitmentsResponse {
        commitments: commitments.iter().map(hex::encode).collect(),
    }))
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedCommitment {
    pub number: u64,
    pub root: String,
}

/// Long poll for the first commitment numbered above `after`. Answers at
/// once if it already exists, otherwise waits for the apply worker to
/// publish it, and answers 204 when the poll times out.
pub async fn get_next_commitment(
    State(state): State<SharedState>,
    Path(after): Path<u64>,
) -> ApiResult<Response> {
    // subscribe before reading so a commit in between is not missed
    let mut commits = state.subscribe();
    let deadline = tokio::time::Instant::now() + state.config.poll_timeout;
    loop {
        if let Some(published) = published_after(&state, after).await? {
            return Ok(Json(published).into_response());
        }
        match tokio::time::timeout_at(deadline, commits.recv()).await {
            Err(_) => return Ok(StatusCode::NO_CONTENT.into_response()),
            Ok(Err(RecvError::Closed)) => {
                return Err((StatusCode::SERVICE_UNAVAILABLE, "apply worker stopped".into()))
            }
            // a notice or a lagged receiver: either way re-read the ledger
            Ok(_) => continue,
        }
    }
}

async fn published_after(state: &SharedState, after: u64) -> ApiResult<Option<PublishedCommitment>> {
    let ledger = state.ledger.read().await;
    match ledger.current_commitment_number() {
        Some(current) if current > after => {
            let number = after + 1;
            let root = ledger.get_commitment(number).map_err(ledger_error)?;
            Ok(Some(PublishedCommitment {
                number,
                root: hex::encode(root),
            }))
        }
        _ => Ok(None),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProofRequest {
    /// Hex-encoded relationship ids.
    pub keys: Vec<String>,
    /// Latest commitment when absent.
    pub number: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProofResponse {
    pub number: u64,
    pub root: String,
    /// Hex of the serialized partial trie.
    pub proof: String,
}

pub async fn post_proof(
    State(state): State<SharedState>,
    Json(req): Json<ProofRequest>,
) -> ApiResult<Json<ProofResponse>> {
    let keys = req
        .keys
        .iter()
        .map(|k| parse_hash(k))
        .collect::<ApiResult<Vec<_>>>()?;

    let ledger = state.ledger.read().await;
    let number = match req.number.or(ledger.current_commitment_number()) {
        Some(n) => n,
        None => return Err((StatusCode::NOT_FOUND, "nothing committed yet".into())),
    };
    let root = ledger.get_commitment(number).map_err(ledger_error)?;
    let proof = ledger.get_proof(&keys, number).map_err(ledger_error)?;
    let bytes = proof
        .serialize()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(ProofResponse {
        number,
        root: hex::encode(root),
        proof: hex::encode(bytes),
    }))
}

pub async fn get_records(
    State(state): State<SharedState>,
    Path((relationship, number)): Path<(String, u64)>,
) -> ApiResult<Json<RecordSet>> {
    let relationship = parse_hash(&relationship)?;
    let ledger = state.ledger.read().await;
    let set = ledger
        .get_record_set(&relationship, number)
        .map_err(ledger_error)?;
    Ok(Json((*set).clone()))
}

pub async fn post_proposal(
    State(state): State<SharedState>,
    Json(proposal): Json<Proposal>,
) -> ApiResult<(StatusCode, Json<CommitNotice>)> {
    let notice = state.submit(proposal).await.map_err(worker_error)?;
    Ok((StatusCode::CREATED, Json(notice)))
}

pub async fn get_forwarded(
    State(state): State<SharedState>,
    Path(account): Path<AccountId>,
) -> Json<Vec<Proposal>> {
    Json(state.mailbox.forwarded(&account))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub proposal: Uuid,
    pub signer: AccountId,
    #[serde(default)]
    pub signatures: Vec<SignatureEntry>,
    /// Set to decline instead of signing.
    pub declined: Option<String>,
}

pub async fn post_approval(
    State(state): State<SharedState>,
    Json(req): Json<ApprovalRequest>,
) -> ApiResult<StatusCode> {
    let approval = match req.declined {
        Some(reason) => Approval::Declined(reason),
        None => Approval::Signed(req.signatures),
    };
    if state.mailbox.respond(req.proposal, req.signer, approval) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            format!("no pending request for {} on {}", req.signer, req.proposal),
        ))
    }
}

fn parse_hash(s: &str) -> ApiResult<Hash32> {
    let bytes = hex::decode(s).map_err(|e| (StatusCode::BAD_REQUEST, format!("bad hex {s}: {e}")))?;
    key_from_slice(&bytes).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

fn ledger_error(e: LedgerError) -> (StatusCode, String) {
    let status = match e {
        LedgerError::VersionOutOfRange(_) | LedgerError::UnknownRelationship(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn worker_error(e: WorkerError) -> (StatusCode, String) {
    let status = match &e {
        WorkerError::Protocol(ProtocolError::MalformedProposal(_))
        | WorkerError::Protocol(ProtocolError::UnknownParty(_)) => StatusCode::BAD_REQUEST,
        WorkerError::Protocol(ProtocolError::SignatureMismatch(_))
        | WorkerError::Protocol(ProtocolError::StaleState(_))
        | WorkerError::CoSign(_) => StatusCode::CONFLICT,
        WorkerError::CoSignTimeout => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}
