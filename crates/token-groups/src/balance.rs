//! Per-group balance and capability aggregation over a coin set.

use std::collections::BTreeMap;

use crate::authority::GroupAuthorityFlags;
use crate::coin::Coin;
use crate::group_id::GroupId;
use crate::script::Destination;

/// Result of folding a coin set: spendable quantity and the union of held
/// capabilities, per group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregatedBalances {
    pub balances: BTreeMap<GroupId, u64>,
    pub authorities: BTreeMap<GroupId, GroupAuthorityFlags>,
}

/// Fold a coin set into per-group balances and capability unions.
///
/// Authority outputs contribute their capability bits and never their
/// amount word; quantities accumulate with saturating addition. With a
/// destination filter, only coins paying that destination contribute (to
/// both maps).
#[must_use]
pub fn aggregate(coins: &[Coin], destination: Option<&Destination>) -> AggregatedBalances {
    let mut result = AggregatedBalances::default();
    for coin in coins {
        let tagged = coin.tagged();
        if tagged.group.is_none() {
            continue;
        }
        if let Some(filter) = destination {
            if tagged.destination.as_ref() != Some(filter) {
                continue;
            }
        }

        let entry = result
            .authorities
            .entry(tagged.group.clone())
            .or_insert(GroupAuthorityFlags::NONE);
        *entry = entry.with(tagged.authority_flags());

        let balance = result.balances.entry(tagged.group.clone()).or_insert(0);
        if !tagged.is_authority() {
            *balance = balance.saturating_add(tagged.quantity());
        }
    }
    result
}

/// Balance and capability union for one group, optionally restricted to a
/// destination.
#[must_use]
pub fn group_balance(
    coins: &[Coin],
    group: &GroupId,
    destination: Option<&Destination>,
) -> (u64, GroupAuthorityFlags) {
    let aggregated = aggregate(coins, destination);
    (
        aggregated.balances.get(group).copied().unwrap_or(0),
        aggregated
            .authorities
            .get(group)
            .copied()
            .unwrap_or(GroupAuthorityFlags::NONE),
    )
}
