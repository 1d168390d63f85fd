//! Coin selection policies.
//!
//! Both policies run over a caller-filtered coin list for one asset
//! dimension. The greedy accumulator is deliberately first-fit rather than
//! value-optimal; the fee estimation constants are calibrated against its
//! behavior.

use crate::coin::Coin;

/// The coin whose base-currency value exceeds `target` by the smallest
/// margin, or `None` when no coin does. Picks a single funding coin
/// without fragmenting the pool.
#[must_use]
pub fn nearest_greater(coins: &[Coin], target: u64) -> Option<Coin> {
    let mut best: Option<&Coin> = None;
    for coin in coins {
        if coin.value > target && best.is_none_or(|b| coin.value < b.value) {
            best = Some(coin);
        }
    }
    best.cloned()
}

/// Greedy first-fit accumulation by base-currency value. Appends coins to
/// `chosen` in the order given until the running total reaches `target` or
/// the list runs out, returning the total. The caller detects a total
/// below target as insufficiency.
pub fn accumulate_value(coins: &[Coin], target: u64, chosen: &mut Vec<Coin>) -> u64 {
    let mut total: u64 = 0;
    for coin in coins {
        chosen.push(coin.clone());
        total = total.saturating_add(coin.value);
        if total >= target {
            break;
        }
    }
    total
}

/// Greedy first-fit accumulation by decoded token quantity.
pub fn accumulate_quantity(coins: &[Coin], target: u64, chosen: &mut Vec<Coin>) -> u64 {
    let mut total: u64 = 0;
    for coin in coins {
        chosen.push(coin.clone());
        total = total.saturating_add(coin.tagged().quantity());
        if total >= target {
            break;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coin::OutPoint;
    use crate::group_id::GroupId;
    use crate::script::{Destination, script_for_destination};

    fn base_coin(n: u8, value: u64) -> Coin {
        Coin::new(
            OutPoint {
                txid: [n; 32],
                vout: 0,
            },
            value,
            script_for_destination(&Destination::KeyHash([n; 20]), &GroupId::none(), 0),
            true,
        )
    }

    fn token_coin(n: u8, quantity: u64) -> Coin {
        let group = GroupId::single([9u8; 20]);
        Coin::new(
            OutPoint {
                txid: [n; 32],
                vout: 0,
            },
            1,
            script_for_destination(&Destination::KeyHash([n; 20]), &group, quantity),
            true,
        )
    }

    #[test]
    fn nearest_greater_minimizes_margin() {
        let coins = vec![base_coin(1, 5000), base_coin(2, 1200), base_coin(3, 900)];
        let chosen = nearest_greater(&coins, 1000).expect("one qualifies");
        assert_eq!(chosen.value, 1200);
    }

    #[test]
    fn nearest_greater_requires_strict_excess() {
        let coins = vec![base_coin(1, 1000)];
        assert!(nearest_greater(&coins, 1000).is_none());
        assert!(nearest_greater(&coins, 999).is_some());
        assert!(nearest_greater(&[], 0).is_none());
    }

    #[test]
    fn accumulate_stops_at_target() {
        let coins = vec![base_coin(1, 400), base_coin(2, 700), base_coin(3, 300)];
        let mut chosen = Vec::new();
        let total = accumulate_value(&coins, 1000, &mut chosen);
        assert_eq!(total, 1100);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn accumulate_is_first_fit_not_optimal() {
        // A value-optimal picker would take just the 1000 coin.
        let coins = vec![base_coin(1, 1), base_coin(2, 1000)];
        let mut chosen = Vec::new();
        let total = accumulate_value(&coins, 1000, &mut chosen);
        assert_eq!(chosen.len(), 2);
        assert_eq!(total, 1001);
    }

    #[test]
    fn accumulate_exhausts_pool_without_error() {
        let coins = vec![base_coin(1, 10), base_coin(2, 20)];
        let mut chosen = Vec::new();
        let total = accumulate_value(&coins, 1000, &mut chosen);
        assert_eq!(total, 30);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn accumulate_quantity_reads_annotation() {
        let coins = vec![token_coin(1, 150), token_coin(2, 100)];
        let mut chosen = Vec::new();
        let total = accumulate_quantity(&coins, 200, &mut chosen);
        assert_eq!(total, 250);
        assert_eq!(chosen.len(), 2);
    }
}
