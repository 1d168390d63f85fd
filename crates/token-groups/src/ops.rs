//! High-level group operations: create, mint, melt, send, authority
//! management and wallet queries.
//!
//! `GroupWallet` owns nothing but handles to the wallet and ledger
//! collaborators plus the load-once context. Every mutating operation takes
//! the ledger lock first, then the wallet lock, and holds both from coin
//! selection through submission so the observed coin set cannot shift
//! underneath the transaction being built.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::debug;

use crate::authority::GroupAuthorityFlags;
use crate::balance::aggregate;
use crate::builder::{BuildTotals, construct_tx, renew_authority};
use crate::coin::{Coin, GROUPED_SATOSHI_AMT, OutPoint, Recipient, Transaction};
use crate::context::{AssetDescription, TokenContext};
use crate::error::{Dimension, TokenGroupError};
use crate::group_id::{GroupId, GroupTag, derive_group_id};
use crate::script::{Destination, script_for_destination};
use crate::selection::accumulate_quantity;
use crate::wallet::{Ledger, ReservedKey, WalletProvider};

/// Result of a group creation: the ground identifier, the nonce that
/// produced it, and the committed genesis transaction.
#[derive(Clone, Debug, Serialize)]
pub struct GroupCreation {
    pub group: GroupId,
    pub nonce: u64,
    pub transaction: Transaction,
}

/// Result of an authority drop.
#[derive(Clone, Debug, Serialize)]
pub struct AuthorityDrop {
    pub group: GroupId,
    pub former: GroupAuthorityFlags,
    pub kept: GroupAuthorityFlags,
    /// No replacement output was emitted; the capability is gone for good
    /// at this coin.
    pub destroyed: bool,
    pub transaction: Transaction,
}

/// One row of a balance report.
#[derive(Clone, Debug, Serialize)]
pub struct GroupBalanceReport {
    pub group: String,
    pub parent: Option<String>,
    pub subgroup_data: Option<String>,
    pub ticker: Option<String>,
    pub name: Option<String>,
    pub balance: u64,
    /// Capability union, present when the wallet holds any authority.
    pub authorities: Option<String>,
}

/// One authority coin held by the wallet.
#[derive(Clone, Debug, Serialize)]
pub struct AuthorityReport {
    pub group: String,
    pub txid: String,
    pub vout: u32,
    pub authorities: String,
}

/// The operation orchestrator.
pub struct GroupWallet<W, L> {
    wallet: Arc<Mutex<W>>,
    ledger: Arc<Mutex<L>>,
    context: TokenContext,
}

impl<W: WalletProvider, L: Ledger> GroupWallet<W, L> {
    #[must_use]
    pub fn new(wallet: Arc<Mutex<W>>, ledger: Arc<Mutex<L>>, context: TokenContext) -> Self {
        Self {
            wallet,
            ledger,
            context,
        }
    }

    #[must_use]
    pub fn context(&self) -> &TokenContext {
        &self.context
    }

    /// Ledger lock before wallet lock, always in this order.
    fn lock(&self) -> Result<(MutexGuard<'_, L>, MutexGuard<'_, W>), TokenGroupError> {
        let ledger = self
            .ledger
            .lock()
            .map_err(|err| TokenGroupError::LedgerPoisoned(err.to_string()))?;
        let wallet = self
            .wallet
            .lock()
            .map_err(|err| TokenGroupError::WalletPoisoned(err.to_string()))?;
        Ok((ledger, wallet))
    }

    fn lock_wallet(&self) -> Result<MutexGuard<'_, W>, TokenGroupError> {
        self.wallet
            .lock()
            .map_err(|err| TokenGroupError::WalletPoisoned(err.to_string()))
    }

    /// Mint a brand-new group: grind an identifier from the lowest-value
    /// untagged coin and commit a genesis transaction carrying one
    /// all-capability authority output, plus the description commitment
    /// when given.
    pub fn create(
        &self,
        tag: GroupTag,
        description: Option<&AssetDescription>,
        authority_destination: Option<Destination>,
    ) -> Result<GroupCreation, TokenGroupError> {
        let (mut ledger, mut wallet) = self.lock()?;
        let mut reserved = Vec::new();
        let result = create_inner(
            &mut *wallet,
            &mut *ledger,
            &self.context,
            tag,
            description,
            authority_destination,
            &mut reserved,
        );
        if result.is_err() {
            release_all(&mut *wallet, &mut reserved);
        }
        result
    }

    /// Mint token quantity into existence, consuming (and possibly
    /// renewing) a MINT authority.
    pub fn mint(
        &self,
        group: &GroupId,
        recipients: &[(Destination, u64)],
    ) -> Result<Transaction, TokenGroupError> {
        require_user_group(group)?;
        require_quantities(recipients)?;
        let (mut ledger, mut wallet) = self.lock()?;
        let mut reserved = Vec::new();
        let result = mint_inner(
            &mut *wallet,
            &mut *ledger,
            &self.context,
            group,
            recipients,
            &mut reserved,
        );
        if result.is_err() {
            release_all(&mut *wallet, &mut reserved);
        }
        result
    }

    /// Destroy token quantity. The melted amount vanishes by exclusion
    /// from the outputs; only the surplus of the selected coins survives
    /// as grouped change.
    pub fn melt(&self, group: &GroupId, quantity: u64) -> Result<Transaction, TokenGroupError> {
        require_user_group(group)?;
        if quantity == 0 {
            return Err(TokenGroupError::InvalidParameter(
                "melt quantity must be greater than zero".to_string(),
            ));
        }
        let (mut ledger, mut wallet) = self.lock()?;
        let mut reserved = Vec::new();
        let result = melt_inner(
            &mut *wallet,
            &mut *ledger,
            &self.context,
            group,
            quantity,
            &mut reserved,
        );
        if result.is_err() {
            release_all(&mut *wallet, &mut reserved);
        }
        result
    }

    /// Move token quantity between destinations, paying the auxiliary
    /// fee-token fee when one is configured.
    pub fn send(
        &self,
        group: &GroupId,
        recipients: &[(Destination, u64)],
    ) -> Result<Transaction, TokenGroupError> {
        require_user_group(group)?;
        require_quantities(recipients)?;
        let (mut ledger, mut wallet) = self.lock()?;
        let mut reserved = Vec::new();
        let result = send_inner(
            &mut *wallet,
            &mut *ledger,
            &self.context,
            group,
            recipients,
            &mut reserved,
        );
        if result.is_err() {
            release_all(&mut *wallet, &mut reserved);
        }
        result
    }

    /// Emit a new authority output for `group`, sourced from a renewable
    /// authority already granting every requested capability.
    pub fn create_authority(
        &self,
        group: &GroupId,
        destination: &Destination,
        capabilities: Option<GroupAuthorityFlags>,
    ) -> Result<Transaction, TokenGroupError> {
        require_user_group(group)?;
        let word = GroupAuthorityFlags::authority(capabilities.unwrap_or(GroupAuthorityFlags::ALL));
        if word == GroupAuthorityFlags::NONE {
            return Err(TokenGroupError::InvalidParameter(
                "the new authority must grant at least one capability".to_string(),
            ));
        }
        let (mut ledger, mut wallet) = self.lock()?;
        let mut reserved = Vec::new();
        let result = create_authority_inner(
            &mut *wallet,
            &mut *ledger,
            &self.context,
            group,
            destination,
            word,
            &mut reserved,
        );
        if result.is_err() {
            release_all(&mut *wallet, &mut reserved);
        }
        result
    }

    /// Rewrite the capability word at a specific authority coin, dropping
    /// the named capabilities. When nothing meaningful survives, no
    /// replacement is emitted and the capability is destroyed at that coin.
    pub fn drop_authority(
        &self,
        group: &GroupId,
        outpoint: OutPoint,
        to_drop: GroupAuthorityFlags,
    ) -> Result<AuthorityDrop, TokenGroupError> {
        require_user_group(group)?;
        if to_drop == GroupAuthorityFlags::NONE {
            return Err(TokenGroupError::InvalidParameter(
                "no capabilities to drop were specified".to_string(),
            ));
        }
        let (mut ledger, mut wallet) = self.lock()?;
        let mut reserved = Vec::new();
        let result = drop_authority_inner(
            &mut *wallet,
            &mut *ledger,
            &self.context,
            group,
            outpoint,
            to_drop,
            &mut reserved,
        );
        if result.is_err() {
            release_all(&mut *wallet, &mut reserved);
        }
        result
    }

    /// Balance and capability union for every group the wallet holds.
    pub fn balances(&self) -> Result<Vec<GroupBalanceReport>, TokenGroupError> {
        let wallet = self.lock_wallet()?;
        let coins = wallet.scan_coins(&mut |coin| coin.spendable);
        let aggregated = aggregate(&coins, None);

        let mut reports = Vec::with_capacity(aggregated.balances.len());
        for (group, balance) in &aggregated.balances {
            let flags = aggregated
                .authorities
                .get(group)
                .copied()
                .unwrap_or(GroupAuthorityFlags::NONE);
            reports.push(balance_report(&self.context, group, *balance, flags));
        }
        Ok(reports)
    }

    /// Balance for one group, optionally restricted to coins paying one
    /// destination.
    pub fn balance(
        &self,
        group: &GroupId,
        destination: Option<&Destination>,
    ) -> Result<GroupBalanceReport, TokenGroupError> {
        require_user_group(group)?;
        let wallet = self.lock_wallet()?;
        let coins = wallet.scan_coins(&mut |coin| coin.spendable);
        let aggregated = aggregate(&coins, destination);
        let balance = aggregated.balances.get(group).copied().unwrap_or(0);
        let flags = aggregated
            .authorities
            .get(group)
            .copied()
            .unwrap_or(GroupAuthorityFlags::NONE);
        Ok(balance_report(&self.context, group, balance, flags))
    }

    /// Derive a subgroup identifier from a parent and postfix data. Pure;
    /// touches neither the wallet nor the ledger.
    pub fn subgroup(&self, parent: &GroupId, postfix: &[u8]) -> Result<GroupId, TokenGroupError> {
        GroupId::subgroup(parent, postfix)
    }

    /// Every authority coin the wallet holds, for all groups or one.
    pub fn authorities(
        &self,
        group: Option<&GroupId>,
    ) -> Result<Vec<AuthorityReport>, TokenGroupError> {
        let wallet = self.lock_wallet()?;
        let coins = wallet.scan_coins(&mut |coin| {
            let tagged = coin.tagged();
            coin.spendable
                && tagged.is_authority()
                && group.is_none_or(|wanted| &tagged.group == wanted)
        });
        Ok(coins
            .iter()
            .map(|coin| AuthorityReport {
                group: coin.tagged().group.to_hex(),
                txid: hex::encode(coin.outpoint.txid),
                vout: coin.outpoint.vout,
                authorities: coin.tagged().authority_flags().to_string(),
            })
            .collect())
    }
}

fn require_user_group(group: &GroupId) -> Result<(), TokenGroupError> {
    if group.is_user_group() {
        Ok(())
    } else {
        Err(TokenGroupError::InvalidParameter(
            "the operation requires a group identifier".to_string(),
        ))
    }
}

fn require_quantities(recipients: &[(Destination, u64)]) -> Result<(), TokenGroupError> {
    if recipients.is_empty() {
        return Err(TokenGroupError::InvalidParameter(
            "no recipients were specified".to_string(),
        ));
    }
    if recipients.iter().any(|(_, quantity)| *quantity == 0) {
        return Err(TokenGroupError::InvalidParameter(
            "token quantity must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn release_all<W: WalletProvider>(wallet: &mut W, reserved: &mut Vec<ReservedKey>) {
    for key in reserved.drain(..) {
        wallet.release_key(&key);
    }
}

fn base_value(coins: &[Coin]) -> u64 {
    coins.iter().map(|coin| coin.value).fold(0, u64::saturating_add)
}

/// Locate an authority coin granting `capabilities` for `group`. When the
/// group is a subgroup and no dedicated authority exists, fall back to a
/// parent authority that is renewable and delegates to subgroups.
fn find_authority<W: WalletProvider>(
    wallet: &W,
    group: &GroupId,
    capabilities: GroupAuthorityFlags,
    require_renewable: bool,
) -> Result<Coin, TokenGroupError> {
    let required = GroupAuthorityFlags::CTRL.with(capabilities);
    let mut coins = wallet.scan_coins(&mut |coin| {
        let tagged = coin.tagged();
        let flags = tagged.authority_flags();
        coin.spendable
            && tagged.group == *group
            && flags.has_capability(required)
            && (!require_renewable || flags.is_renewable())
    });

    if coins.is_empty() && group.is_subgroup() {
        let parent = group.parent()?;
        coins = wallet.scan_coins(&mut |coin| {
            let tagged = coin.tagged();
            let flags = tagged.authority_flags();
            coin.spendable
                && tagged.group == parent
                && flags.is_renewable()
                && flags.allows_subgroup_delegation()
                && flags.has_capability(required)
        });
    }

    coins
        .into_iter()
        .next()
        .ok_or_else(|| TokenGroupError::MissingAuthority(required.to_string()))
}

/// Select fee-token coins covering `needed`, appending them to `chosen`.
/// Returns the accumulated fee-token quantity.
fn select_fee_token<W: WalletProvider>(
    wallet: &W,
    context: &TokenContext,
    needed: u64,
    chosen: &mut Vec<Coin>,
) -> Result<u64, TokenGroupError> {
    if needed == 0 {
        return Ok(0);
    }
    let Some(fee_token) = context.fee_token() else {
        return Ok(0);
    };
    let coins = wallet.scan_coins(&mut |coin| {
        let tagged = coin.tagged();
        coin.spendable && tagged.group == fee_token.group && !tagged.is_authority()
    });
    let available = coins
        .iter()
        .map(|coin| coin.tagged().quantity())
        .fold(0, u64::saturating_add);
    if available < needed {
        return Err(TokenGroupError::InsufficientFunds {
            dimension: Dimension::FeeToken,
            shortfall: needed - available,
        });
    }
    Ok(accumulate_quantity(&coins, needed, chosen))
}

#[allow(clippy::too_many_arguments)]
fn create_inner<W: WalletProvider, L: Ledger>(
    wallet: &mut W,
    ledger: &mut L,
    context: &TokenContext,
    tag: GroupTag,
    description: Option<&AssetDescription>,
    authority_destination: Option<Destination>,
    reserved: &mut Vec<ReservedKey>,
) -> Result<GroupCreation, TokenGroupError> {
    let candidates = wallet.scan_coins(&mut |coin| coin.spendable && coin.tagged().group.is_none());
    let entropy = candidates
        .into_iter()
        .min_by_key(|coin| coin.value)
        .ok_or_else(|| {
            TokenGroupError::InvalidParameter("no coins available in the wallet".to_string())
        })?;

    let commitment = description.map(AssetDescription::commitment_script);
    let (group, nonce) = derive_group_id(&entropy.outpoint, commitment.as_ref(), tag);
    debug!(%group, nonce, tag = ?tag, "ground group identifier");

    let destination = match authority_destination {
        Some(destination) => destination,
        None => {
            let key = wallet.reserve_key()?;
            let destination = Destination::KeyHash(key.key_hash);
            reserved.push(key);
            destination
        }
    };

    let mut outputs = Vec::new();
    if let Some(commitment) = commitment {
        outputs.push(Recipient {
            script_pubkey: commitment,
            value: 0,
        });
    }
    outputs.push(Recipient {
        script_pubkey: script_for_destination(
            &destination,
            &group,
            GroupAuthorityFlags::ALL.bits() | nonce,
        ),
        value: GROUPED_SATOSHI_AMT,
    });

    let fee_token_needed = context.creation_fee(&group);
    context.ensure_fee_token_output(&mut outputs, fee_token_needed);

    let mut chosen = vec![entropy];
    let fee_token_available = select_fee_token(wallet, context, fee_token_needed, &mut chosen)?;

    let transaction = construct_tx(
        wallet,
        ledger,
        context,
        &chosen,
        &outputs,
        BuildTotals {
            base_available: base_value(&chosen),
            base_needed: 0,
            fee_token_available,
            fee_token_needed,
            ..Default::default()
        },
        &group,
        reserved,
    )?;

    Ok(GroupCreation {
        group,
        nonce,
        transaction,
    })
}

fn mint_inner<W: WalletProvider, L: Ledger>(
    wallet: &mut W,
    ledger: &mut L,
    context: &TokenContext,
    group: &GroupId,
    recipients: &[(Destination, u64)],
    reserved: &mut Vec<ReservedKey>,
) -> Result<Transaction, TokenGroupError> {
    let mut outputs: Vec<Recipient> = recipients
        .iter()
        .map(|(destination, quantity)| Recipient {
            script_pubkey: script_for_destination(destination, group, *quantity),
            value: GROUPED_SATOSHI_AMT,
        })
        .collect();
    let mut base_needed = GROUPED_SATOSHI_AMT * outputs.len() as u64;

    let authority = find_authority(wallet, group, GroupAuthorityFlags::MINT, false)?;
    base_needed += renew_authority(wallet, &authority, &mut outputs, reserved)?;

    let fee_token_needed = context.creation_fee(group);
    context.ensure_fee_token_output(&mut outputs, fee_token_needed);

    let mut chosen = vec![authority];
    let fee_token_available = select_fee_token(wallet, context, fee_token_needed, &mut chosen)?;

    construct_tx(
        wallet,
        ledger,
        context,
        &chosen,
        &outputs,
        BuildTotals {
            base_available: base_value(&chosen),
            base_needed,
            fee_token_available,
            fee_token_needed,
            ..Default::default()
        },
        group,
        reserved,
    )
}

fn melt_inner<W: WalletProvider, L: Ledger>(
    wallet: &mut W,
    ledger: &mut L,
    context: &TokenContext,
    group: &GroupId,
    quantity: u64,
    reserved: &mut Vec<ReservedKey>,
) -> Result<Transaction, TokenGroupError> {
    let authority = find_authority(wallet, group, GroupAuthorityFlags::MELT, false)?;

    let mut outputs = Vec::new();
    let base_needed = renew_authority(wallet, &authority, &mut outputs, reserved)?;

    let coins = wallet.scan_coins(&mut |coin| {
        let tagged = coin.tagged();
        coin.spendable && tagged.group == *group && !tagged.is_authority()
    });
    let mut chosen = vec![authority];
    let token_available = accumulate_quantity(&coins, quantity, &mut chosen);
    if token_available < quantity {
        return Err(TokenGroupError::InsufficientFunds {
            dimension: Dimension::Token,
            shortfall: quantity - token_available,
        });
    }

    construct_tx(
        wallet,
        ledger,
        context,
        &chosen,
        &outputs,
        BuildTotals {
            base_available: base_value(&chosen),
            base_needed,
            token_available,
            token_needed: quantity,
            ..Default::default()
        },
        group,
        reserved,
    )
}

fn send_inner<W: WalletProvider, L: Ledger>(
    wallet: &mut W,
    ledger: &mut L,
    context: &TokenContext,
    group: &GroupId,
    recipients: &[(Destination, u64)],
    reserved: &mut Vec<ReservedKey>,
) -> Result<Transaction, TokenGroupError> {
    let mut outputs: Vec<Recipient> = recipients
        .iter()
        .map(|(destination, quantity)| Recipient {
            script_pubkey: script_for_destination(destination, group, *quantity),
            value: GROUPED_SATOSHI_AMT,
        })
        .collect();
    let mut token_needed = recipients
        .iter()
        .map(|(_, quantity)| *quantity)
        .fold(0, u64::saturating_add);

    // The fee-token fee folds into the send's own dimension when the group
    // being sent is the fee-token itself.
    let fee = context.send_fee(group);
    let mut fee_token_needed = 0;
    if fee > 0 {
        context.ensure_fee_token_output(&mut outputs, fee);
        if context.matches_fee_token(group) {
            token_needed = token_needed.saturating_add(fee);
        } else {
            fee_token_needed = fee;
        }
    }
    let base_needed = GROUPED_SATOSHI_AMT * outputs.len() as u64;

    let mut chosen = Vec::new();
    let fee_token_available = select_fee_token(wallet, context, fee_token_needed, &mut chosen)?;

    let coins = wallet.scan_coins(&mut |coin| {
        let tagged = coin.tagged();
        coin.spendable && tagged.group == *group && !tagged.is_authority()
    });
    let available = coins
        .iter()
        .map(|coin| coin.tagged().quantity())
        .fold(0, u64::saturating_add);
    if available < token_needed {
        return Err(TokenGroupError::InsufficientFunds {
            dimension: Dimension::Token,
            shortfall: token_needed - available,
        });
    }
    let token_available = accumulate_quantity(&coins, token_needed, &mut chosen);
    debug!(%group, token_needed, token_available, "send selection");

    construct_tx(
        wallet,
        ledger,
        context,
        &chosen,
        &outputs,
        BuildTotals {
            base_available: base_value(&chosen),
            base_needed,
            token_available,
            token_needed,
            fee_token_available,
            fee_token_needed,
        },
        group,
        reserved,
    )
}

#[allow(clippy::too_many_arguments)]
fn create_authority_inner<W: WalletProvider, L: Ledger>(
    wallet: &mut W,
    ledger: &mut L,
    context: &TokenContext,
    group: &GroupId,
    destination: &Destination,
    word: GroupAuthorityFlags,
    reserved: &mut Vec<ReservedKey>,
) -> Result<Transaction, TokenGroupError> {
    let authority = find_authority(wallet, group, word.without(GroupAuthorityFlags::CTRL), true)?;

    let mut outputs = vec![Recipient {
        script_pubkey: script_for_destination(destination, group, word.bits()),
        value: GROUPED_SATOSHI_AMT,
    }];
    let mut base_needed = GROUPED_SATOSHI_AMT;
    base_needed += renew_authority(wallet, &authority, &mut outputs, reserved)?;

    let chosen = vec![authority];
    construct_tx(
        wallet,
        ledger,
        context,
        &chosen,
        &outputs,
        BuildTotals {
            base_available: base_value(&chosen),
            base_needed,
            ..Default::default()
        },
        group,
        reserved,
    )
}

#[allow(clippy::too_many_arguments)]
fn drop_authority_inner<W: WalletProvider, L: Ledger>(
    wallet: &mut W,
    ledger: &mut L,
    context: &TokenContext,
    group: &GroupId,
    outpoint: OutPoint,
    to_drop: GroupAuthorityFlags,
    reserved: &mut Vec<ReservedKey>,
) -> Result<AuthorityDrop, TokenGroupError> {
    let coin = wallet
        .scan_coins(&mut |coin| coin.spendable && coin.outpoint == outpoint)
        .into_iter()
        .next()
        .ok_or_else(|| {
            TokenGroupError::InvalidParameter(
                "the specified output is not available in the wallet".to_string(),
            )
        })?;

    let tagged = coin.tagged();
    if !tagged.is_authority() || tagged.group != *group {
        return Err(TokenGroupError::InvalidParameter(
            "the specified output is not an authority for this group".to_string(),
        ));
    }

    let former = tagged.authority_flags().capability_bits();
    let kept = former.without(to_drop);
    let destroyed = kept == GroupAuthorityFlags::NONE
        || kept == GroupAuthorityFlags::CTRL
        || !kept.has_capability(GroupAuthorityFlags::CTRL);

    let mut outputs = Vec::new();
    let mut base_needed = 0;
    if !destroyed {
        let destination = tagged.destination.ok_or_else(|| {
            TokenGroupError::InvalidParameter(
                "the authority output pays a nonstandard destination".to_string(),
            )
        })?;
        outputs.push(Recipient {
            script_pubkey: script_for_destination(&destination, group, kept.bits()),
            value: GROUPED_SATOSHI_AMT,
        });
        base_needed = GROUPED_SATOSHI_AMT;
    }

    let chosen = vec![coin.clone()];
    let transaction = construct_tx(
        wallet,
        ledger,
        context,
        &chosen,
        &outputs,
        BuildTotals {
            base_available: base_value(&chosen),
            base_needed,
            ..Default::default()
        },
        group,
        reserved,
    )?;

    Ok(AuthorityDrop {
        group: group.clone(),
        former,
        kept,
        destroyed,
        transaction,
    })
}

fn balance_report(
    context: &TokenContext,
    group: &GroupId,
    balance: u64,
    flags: GroupAuthorityFlags,
) -> GroupBalanceReport {
    let description = context.description(group);
    GroupBalanceReport {
        group: group.to_hex(),
        parent: group
            .parent()
            .ok()
            .map(|parent| parent.to_hex()),
        subgroup_data: group.subgroup_data().ok().map(hex::encode),
        ticker: description.map(|d| d.ticker.clone()),
        name: description.map(|d| d.name.clone()),
        balance,
        authorities: flags.is_authority().then(|| flags.to_string()),
    }
}
