//! In-memory wallet and ledger doubles plus coin fixtures, shared by the
//! unit tests.

use crate::authority::GroupAuthorityFlags;
use crate::coin::{Coin, GROUPED_SATOSHI_AMT, OutPoint, Transaction};
use crate::error::TokenGroupError;
use crate::group_id::GroupId;
use crate::script::{Destination, Script, script_for_destination};
use crate::wallet::{Ledger, ReservedKey, WalletProvider};

/// Wallet double backed by a plain coin list and a counting key pool.
/// Reservation bookkeeping is recorded so tests can assert the
/// keep-or-release invariant.
#[derive(Debug, Default)]
pub(crate) struct MockWallet {
    pub coins: Vec<Coin>,
    pub reserved_count: usize,
    pub kept: Vec<u64>,
    pub released: Vec<u64>,
    pub fail_reserve: bool,
    pub fail_sign: bool,
}

/// Deterministic key hash for pool index `index`.
pub(crate) fn key_hash_for(index: u64) -> [u8; 20] {
    let mut hash = [0xabu8; 20];
    hash[..8].copy_from_slice(&index.to_le_bytes());
    hash
}

impl WalletProvider for MockWallet {
    fn scan_coins(&self, predicate: &mut dyn FnMut(&Coin) -> bool) -> Vec<Coin> {
        self.coins
            .iter()
            .filter(|coin| predicate(coin))
            .cloned()
            .collect()
    }

    fn reserve_key(&mut self) -> Result<ReservedKey, TokenGroupError> {
        if self.fail_reserve {
            return Err(TokenGroupError::KeyPoolExhausted);
        }
        let index = self.reserved_count as u64;
        self.reserved_count += 1;
        Ok(ReservedKey {
            index,
            key_hash: key_hash_for(index),
        })
    }

    fn keep_key(&mut self, key: &ReservedKey) {
        self.kept.push(key.index);
    }

    fn release_key(&mut self, key: &ReservedKey) {
        self.released.push(key.index);
    }

    fn sign_transaction(&self, tx: &mut Transaction) -> Result<(), TokenGroupError> {
        if self.fail_sign {
            return Err(TokenGroupError::SigningFailure(
                "mock wallet is set to fail signing".to_string(),
            ));
        }
        for input in &mut tx.inputs {
            input.script_sig = Script::from_bytes(vec![0u8; 72]);
        }
        Ok(())
    }
}

/// Ledger double that records accepted transactions.
#[derive(Debug, Default)]
pub(crate) struct MockLedger {
    pub submitted: Vec<Transaction>,
    pub reject: bool,
}

impl Ledger for MockLedger {
    fn submit(&mut self, tx: &Transaction) -> Result<(), TokenGroupError> {
        if self.reject {
            return Err(TokenGroupError::SubmissionRejected(
                "mock ledger is set to reject".to_string(),
            ));
        }
        self.submitted.push(tx.clone());
        Ok(())
    }
}

pub(crate) fn outpoint(n: u8) -> OutPoint {
    OutPoint {
        txid: [n; 32],
        vout: 0,
    }
}

/// An untagged base-currency coin.
pub(crate) fn base_coin(n: u8, value: u64) -> Coin {
    Coin::new(
        outpoint(n),
        value,
        script_for_destination(&Destination::KeyHash([n; 20]), &GroupId::none(), 0),
        true,
    )
}

/// A grouped quantity-bearing coin.
pub(crate) fn token_coin(n: u8, group: &GroupId, quantity: u64) -> Coin {
    Coin::new(
        outpoint(n),
        GROUPED_SATOSHI_AMT,
        script_for_destination(&Destination::KeyHash([n; 20]), group, quantity),
        true,
    )
}

/// An authority coin carrying the given capability word.
pub(crate) fn authority_coin(n: u8, group: &GroupId, flags: GroupAuthorityFlags) -> Coin {
    Coin::new(
        outpoint(n),
        GROUPED_SATOSHI_AMT,
        script_for_destination(&Destination::KeyHash([n; 20]), group, flags.bits()),
        true,
    )
}
