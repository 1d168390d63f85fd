//! Narrow interfaces onto the wallet/key-management and ledger
//! collaborators.
//!
//! Everything the engine reads or writes outside its own call frame goes
//! through these traits: coin scanning, reserved-key allocation, signing
//! and submission. Key custody and UTXO maintenance stay on the other side.

use crate::coin::{Coin, Transaction};
use crate::error::TokenGroupError;

/// A key drawn from the wallet's reserved pool. The engine must hand every
/// reservation back, either kept (the transaction committed) or released
/// (any failure path).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReservedKey {
    pub index: u64,
    pub key_hash: [u8; 20],
}

/// Wallet-side collaborator: coin visibility, key pool and signing.
pub trait WalletProvider {
    /// All spendable coins matching the predicate, one consistent snapshot.
    fn scan_coins(&self, predicate: &mut dyn FnMut(&Coin) -> bool) -> Vec<Coin>;

    /// Draw a fresh key from the pool.
    fn reserve_key(&mut self) -> Result<ReservedKey, TokenGroupError>;

    /// Commit a reservation permanently.
    fn keep_key(&mut self, key: &ReservedKey);

    /// Return a reservation to the pool.
    fn release_key(&mut self, key: &ReservedKey);

    fn sign_transaction(&self, tx: &mut Transaction) -> Result<(), TokenGroupError>;
}

/// Ledger-side collaborator: final submission only. Rejections surface
/// verbatim and are never retried here.
pub trait Ledger {
    fn submit(&mut self, tx: &Transaction) -> Result<(), TokenGroupError>;
}
