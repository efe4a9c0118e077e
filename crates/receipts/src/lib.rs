pub mod pki;
pub mod schema;
pub mod signature;

pub use pki::*;
pub use schema::*;
pub use signature::*;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiptError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Unknown account {0}")]
    UnknownAccount(AccountId),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, ReceiptError>;
