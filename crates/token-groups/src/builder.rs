//! Transaction assembly across asset dimensions.
//!
//! `construct_tx` turns chosen coins and requested outputs into one
//! balanced transaction: change per dimension, base-currency fee sourcing,
//! signing and submission. Key reservations made along the way are
//! finalized here — kept only once the ledger accepts the transaction,
//! released on every failure path.

use tracing::{debug, info};

use crate::coin::{Coin, GROUPED_SATOSHI_AMT, Recipient, Transaction, TxIn, TxOut};
use crate::context::TokenContext;
use crate::error::{Dimension, TokenGroupError};
use crate::group_id::GroupId;
use crate::script::{Destination, decode_script, script_for_destination};
use crate::selection::nearest_greater;
use crate::wallet::{Ledger, ReservedKey, WalletProvider};

/// Approximate size of a signature script, for fee estimation.
pub const TX_SIG_SCRIPT_LEN: usize = 72;

/// Overpay the fee up to this many times rather than emit an uneconomical
/// base-currency change output.
pub const FEE_FUDGE: u64 = 2;

/// Available/needed amounts per asset dimension for one assembly.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildTotals {
    pub base_available: u64,
    pub base_needed: u64,
    pub token_available: u64,
    pub token_needed: u64,
    pub fee_token_available: u64,
    pub fee_token_needed: u64,
}

/// Assemble, sign and submit one transaction.
///
/// `reserved` carries the caller's key reservations (renewal keys and the
/// like); assembly may add more. On success every reservation is kept, on
/// failure every one is released — the vector is drained either way.
#[allow(clippy::too_many_arguments)]
pub fn construct_tx<W: WalletProvider, L: Ledger>(
    wallet: &mut W,
    ledger: &mut L,
    context: &TokenContext,
    chosen_coins: &[Coin],
    outputs: &[Recipient],
    totals: BuildTotals,
    group: &GroupId,
    reserved: &mut Vec<ReservedKey>,
) -> Result<Transaction, TokenGroupError> {
    let result = assemble_and_commit(
        wallet,
        ledger,
        context,
        chosen_coins,
        outputs,
        totals,
        group,
        reserved,
    );
    match result {
        Ok(tx) => {
            for key in reserved.drain(..) {
                wallet.keep_key(&key);
            }
            Ok(tx)
        }
        Err(err) => {
            for key in reserved.drain(..) {
                wallet.release_key(&key);
            }
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble_and_commit<W: WalletProvider, L: Ledger>(
    wallet: &mut W,
    ledger: &mut L,
    context: &TokenContext,
    chosen_coins: &[Coin],
    outputs: &[Recipient],
    mut totals: BuildTotals,
    group: &GroupId,
    reserved: &mut Vec<ReservedKey>,
) -> Result<Transaction, TokenGroupError> {
    let mut tx = Transaction::new();
    let mut approx_size = 0usize;

    for recipient in outputs {
        let txout = TxOut {
            value: recipient.value,
            script_pubkey: recipient.script_pubkey.clone(),
        };
        approx_size += txout.serialized_size();
        tx.outputs.push(txout);
    }

    let mut inp_size = 0usize;
    for coin in chosen_coins {
        let txin = TxIn::new(coin.outpoint);
        inp_size = txin.serialized_size() + TX_SIG_SCRIPT_LEN;
        approx_size += inp_size;
        tx.inputs.push(txin);
    }

    if totals.token_available > totals.token_needed {
        let key = wallet.reserve_key()?;
        let txout = TxOut {
            value: GROUPED_SATOSHI_AMT,
            script_pubkey: script_for_destination(
                &Destination::KeyHash(key.key_hash),
                group,
                totals.token_available - totals.token_needed,
            ),
        };
        reserved.push(key);
        approx_size += txout.serialized_size();
        tx.outputs.push(txout);
    }

    if totals.fee_token_available > totals.fee_token_needed {
        if let Some(fee_token) = context.fee_token() {
            let key = wallet.reserve_key()?;
            let txout = TxOut {
                value: GROUPED_SATOSHI_AMT,
                script_pubkey: script_for_destination(
                    &Destination::KeyHash(key.key_hash),
                    &fee_token.group,
                    totals.fee_token_available - totals.fee_token_needed,
                ),
            };
            reserved.push(key);
            approx_size += txout.serialized_size();
            tx.outputs.push(txout);
        }
    }

    // Room for the potential fee input and its change, counted up front.
    approx_size += inp_size * 3;

    let fee = context.fee_policy().required_fee(approx_size);

    if totals.base_available < totals.base_needed + fee {
        let chosen: Vec<_> = tx.inputs.iter().map(|i| i.prevout).collect();
        let base_coins = wallet.scan_coins(&mut |coin| {
            coin.spendable
                && coin.tagged().group.is_none()
                && !chosen.contains(&coin.outpoint)
        });

        let Some(fee_coin) = nearest_greater(&base_coins, fee) else {
            return Err(TokenGroupError::InsufficientFunds {
                dimension: Dimension::BaseCurrency,
                shortfall: totals.base_needed + fee - totals.base_available,
            });
        };
        let mut txin = TxIn::new(fee_coin.outpoint);
        txin.sequence = u32::MAX - 1;
        tx.inputs.push(txin);
        totals.base_available += fee_coin.value;
    }

    // Change only when the excess clears the fudge margin; otherwise the
    // excess is absorbed as extra fee instead of becoming dust.
    if totals.base_available > totals.base_needed + FEE_FUDGE * fee {
        let key = wallet.reserve_key()?;
        let txout = TxOut {
            value: totals.base_available - totals.base_needed - fee,
            script_pubkey: script_for_destination(
                &Destination::KeyHash(key.key_hash),
                &GroupId::none(),
                0,
            ),
        };
        reserved.push(key);
        tx.outputs.push(txout);
    }

    wallet.sign_transaction(&mut tx)?;

    for txout in &tx.outputs {
        let tagged = decode_script(&txout.script_pubkey);
        if tagged.group.is_user_group() {
            let name = context
                .description(&tagged.group)
                .map_or("", |d| d.name.as_str());
            debug!(
                group = %tagged.group,
                name,
                quantity = tagged.quantity(),
                authority = tagged.is_authority(),
                "grouped output"
            );
        }
    }

    ledger.submit(&tx)?;
    info!(txid = %hex::encode(tx.txid()), "committed transaction");

    Ok(tx)
}

/// Renew a consumed authority into a child authority output when the
/// source carries CHILD. Returns the base currency the new output needs.
pub fn renew_authority<W: WalletProvider>(
    wallet: &mut W,
    authority: &Coin,
    outputs: &mut Vec<Recipient>,
    reserved: &mut Vec<ReservedKey>,
) -> Result<u64, TokenGroupError> {
    let tagged = authority.tagged();
    let flags = tagged.authority_flags();
    if !flags.is_renewable() {
        return Ok(0);
    }

    let key = wallet.reserve_key()?;
    let script = script_for_destination(
        &Destination::KeyHash(key.key_hash),
        &tagged.group,
        flags.capability_bits().bits(),
    );
    reserved.push(key);
    outputs.push(Recipient {
        script_pubkey: script,
        value: GROUPED_SATOSHI_AMT,
    });
    Ok(GROUPED_SATOSHI_AMT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::GroupAuthorityFlags;
    use crate::context::FeePolicy;
    use crate::test_support::{MockLedger, MockWallet, base_coin, token_coin};

    fn group() -> GroupId {
        GroupId::single([7u8; 20])
    }

    #[test]
    fn adds_fee_input_when_base_is_short() {
        let mut wallet = MockWallet::default();
        let spare = base_coin(9, 50_000);
        wallet.coins.push(spare.clone());
        let mut ledger = MockLedger::default();
        let context = TokenContext::new(FeePolicy::default());

        let chosen = vec![token_coin(1, &group(), 100)];
        let mut reserved = Vec::new();
        let tx = construct_tx(
            &mut wallet,
            &mut ledger,
            &context,
            &chosen,
            &[],
            BuildTotals {
                base_available: GROUPED_SATOSHI_AMT,
                token_available: 100,
                token_needed: 100,
                ..Default::default()
            },
            &group(),
            &mut reserved,
        )
        .expect("builds");

        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.inputs[1].prevout, spare.outpoint);
        assert_eq!(tx.inputs[1].sequence, u32::MAX - 1);
        assert_eq!(ledger.submitted.len(), 1);
    }

    #[test]
    fn fails_without_any_base_coin() {
        let mut wallet = MockWallet::default();
        let mut ledger = MockLedger::default();
        let context = TokenContext::new(FeePolicy::default());

        let chosen = vec![token_coin(1, &group(), 100)];
        let mut reserved = Vec::new();
        let err = construct_tx(
            &mut wallet,
            &mut ledger,
            &context,
            &chosen,
            &[],
            BuildTotals {
                base_available: GROUPED_SATOSHI_AMT,
                ..Default::default()
            },
            &group(),
            &mut reserved,
        )
        .expect_err("no fee coin");
        assert!(matches!(
            err,
            TokenGroupError::InsufficientFunds {
                dimension: Dimension::BaseCurrency,
                ..
            }
        ));
        assert!(ledger.submitted.is_empty());
    }

    #[test]
    fn token_change_goes_to_fresh_key() {
        let mut wallet = MockWallet::default();
        wallet.coins.push(base_coin(9, 50_000));
        let mut ledger = MockLedger::default();
        let context = TokenContext::new(FeePolicy::default());

        let chosen = vec![token_coin(1, &group(), 300)];
        let mut reserved = Vec::new();
        let tx = construct_tx(
            &mut wallet,
            &mut ledger,
            &context,
            &chosen,
            &[],
            BuildTotals {
                base_available: GROUPED_SATOSHI_AMT,
                token_available: 300,
                token_needed: 120,
                ..Default::default()
            },
            &group(),
            &mut reserved,
        )
        .expect("builds");

        let change = tx
            .outputs
            .iter()
            .map(|o| decode_script(&o.script_pubkey))
            .find(|t| t.group == group())
            .expect("token change output");
        assert_eq!(change.quantity(), 180);
        assert_eq!(wallet.kept.len(), wallet.reserved_count);
        assert!(wallet.released.is_empty());
    }

    #[test]
    fn base_change_respects_fudge_margin() {
        let mut ledger = MockLedger::default();
        let context = TokenContext::new(FeePolicy::default());
        let needed = 0u64;

        // Excess below FEE_FUDGE * fee is absorbed as fee, no change output.
        let mut wallet = MockWallet::default();
        let chosen = vec![base_coin(1, 1800)];
        let mut reserved = Vec::new();
        let tx = construct_tx(
            &mut wallet,
            &mut ledger,
            &context,
            &chosen,
            &[],
            BuildTotals {
                base_available: 1800,
                base_needed: needed,
                ..Default::default()
            },
            &group(),
            &mut reserved,
        )
        .expect("builds");
        assert!(tx.outputs.is_empty());

        // Excess past the margin makes a change output of excess - fee.
        let mut wallet = MockWallet::default();
        let chosen = vec![base_coin(1, 10_000)];
        let mut reserved = Vec::new();
        let tx = construct_tx(
            &mut wallet,
            &mut ledger,
            &context,
            &chosen,
            &[],
            BuildTotals {
                base_available: 10_000,
                base_needed: needed,
                ..Default::default()
            },
            &group(),
            &mut reserved,
        )
        .expect("builds");
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 10_000 - 1000);
        assert!(decode_script(&tx.outputs[0].script_pubkey).group.is_none());
    }

    #[test]
    fn rejection_releases_every_reservation() {
        let mut wallet = MockWallet::default();
        let mut ledger = MockLedger {
            reject: true,
            ..Default::default()
        };
        let context = TokenContext::new(FeePolicy::default());

        let mut reserved = vec![wallet.reserve_key().expect("key")];
        let chosen = vec![base_coin(1, 10_000)];
        let err = construct_tx(
            &mut wallet,
            &mut ledger,
            &context,
            &chosen,
            &[],
            BuildTotals {
                base_available: 10_000,
                ..Default::default()
            },
            &group(),
            &mut reserved,
        )
        .expect_err("rejected");

        assert!(matches!(err, TokenGroupError::SubmissionRejected(_)));
        assert!(reserved.is_empty());
        assert!(wallet.kept.is_empty());
        // Caller's key plus the change key, both back in the pool.
        assert_eq!(wallet.released.len(), 2);
    }

    #[test]
    fn signing_failure_surfaces_and_releases() {
        let mut wallet = MockWallet {
            fail_sign: true,
            ..Default::default()
        };
        let mut ledger = MockLedger::default();
        let context = TokenContext::new(FeePolicy::default());

        let chosen = vec![base_coin(1, 10_000)];
        let mut reserved = Vec::new();
        let err = construct_tx(
            &mut wallet,
            &mut ledger,
            &context,
            &chosen,
            &[],
            BuildTotals {
                base_available: 10_000,
                ..Default::default()
            },
            &group(),
            &mut reserved,
        )
        .expect_err("signing fails");
        assert!(matches!(err, TokenGroupError::SigningFailure(_)));
        assert!(ledger.submitted.is_empty());
        assert_eq!(wallet.released.len(), wallet.reserved_count);
    }

    #[test]
    fn renew_emits_child_only_for_renewable_source() {
        let mut wallet = MockWallet::default();
        let flags = GroupAuthorityFlags::CTRL
            .with(GroupAuthorityFlags::MINT)
            .with(GroupAuthorityFlags::CHILD);
        let authority = crate::test_support::authority_coin(1, &group(), flags);

        let mut outputs = Vec::new();
        let mut reserved = Vec::new();
        let needed =
            renew_authority(&mut wallet, &authority, &mut outputs, &mut reserved).expect("renews");
        assert_eq!(needed, GROUPED_SATOSHI_AMT);
        assert_eq!(outputs.len(), 1);
        let tagged = decode_script(&outputs[0].script_pubkey);
        assert_eq!(tagged.authority_flags(), flags);

        let fixed = crate::test_support::authority_coin(
            2,
            &group(),
            GroupAuthorityFlags::CTRL.with(GroupAuthorityFlags::MINT),
        );
        let mut outputs = Vec::new();
        let needed = renew_authority(&mut wallet, &fixed, &mut outputs, &mut reserved)
            .expect("not renewable");
        assert_eq!(needed, 0);
        assert!(outputs.is_empty());
    }
}
