#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
#![cfg_attr(
    test,
    allow(
        clippy::cast_possible_truncation,
        clippy::default_trait_access,
        clippy::needless_pass_by_value,
        clippy::too_many_lines
    )
)]

pub mod authority;
pub mod balance;
pub mod builder;
pub mod coin;
pub mod context;
pub mod error;
pub mod group_id;
pub mod ops;
pub mod script;
pub mod selection;
pub mod wallet;

#[cfg(test)]
pub(crate) mod test_support;

pub use authority::GroupAuthorityFlags;
pub use balance::{AggregatedBalances, aggregate};
pub use builder::{BuildTotals, FEE_FUDGE, TX_SIG_SCRIPT_LEN, construct_tx, renew_authority};
pub use coin::{Coin, OutPoint, Recipient, Transaction, TxIn, TxOut};
pub use context::{AssetDescription, FeePolicy, FeeTokenPolicy, TokenContext};
pub use error::{Dimension, TokenGroupError};
pub use group_id::{GroupId, GroupKind, GroupTag, derive_group_id};
pub use ops::{
    AuthorityDrop, AuthorityReport, GroupBalanceReport, GroupCreation, GroupWallet,
};
pub use script::{Destination, Script, TaggedOutput, decode_script, script_for_destination};
pub use selection::{accumulate_quantity, accumulate_value, nearest_greater};
pub use wallet::{Ledger, ReservedKey, WalletProvider};
