use std::fmt;

use thiserror::Error;

/// The asset dimension an amount belongs to inside one transaction.
///
/// A coin's decoded identifier places it in exactly one dimension, so the
/// per-dimension selections inside a single transaction never overlap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dimension {
    BaseCurrency,
    Token,
    FeeToken,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::BaseCurrency => write!(f, "base currency"),
            Dimension::Token => write!(f, "token"),
            Dimension::FeeToken => write!(f, "fee token"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenGroupError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not enough {dimension} in the wallet, need {shortfall} more")]
    InsufficientFunds { dimension: Dimension, shortfall: u64 },

    #[error("No authority output carries the required capabilities: {0}")]
    MissingAuthority(String),

    #[error("Keypool ran out, refill the key pool first")]
    KeyPoolExhausted,

    #[error("Signing transaction failed: {0}")]
    SigningFailure(String),

    #[error("Transaction rejected by the ledger: {0}")]
    SubmissionRejected(String),

    #[error("Wallet lock poisoned: {0}")]
    WalletPoisoned(String),

    #[error("Ledger lock poisoned: {0}")]
    LedgerPoisoned(String),
}
