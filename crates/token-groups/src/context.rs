//! Immutable per-process operation context: fee policy, the optional
//! auxiliary fee-token, and the known asset descriptions.
//!
//! Constructed once at startup and passed into every operation; nothing in
//! here mutates after load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::coin::{GROUPED_SATOSHI_AMT, Recipient};
use crate::error::TokenGroupError;
use crate::group_id::GroupId;
use crate::script::{Destination, OP_RETURN, Script, script_for_destination};

/// Protocol marker prefixed to description commitment payloads.
pub const GROUP_DESCRIPTION_MARKER: u64 = 88_888_888;

/// Creating or minting a non-management group costs this many times the
/// per-operation fee-token fee.
pub const CREATION_FEE_MULTIPLIER: u64 = 5;

/// Descriptive metadata attached to a minted group at creation. Read-only
/// to the engine afterwards; the metadata collaborator owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescription {
    pub ticker: String,
    pub name: String,
    pub decimal_position: u8,
    pub document_url: String,
    pub document_hash: [u8; 32],
    /// Transaction that created the group, once known.
    pub creation_txid: Option<[u8; 32]>,
    pub validation_messages: Vec<String>,
}

impl AssetDescription {
    pub fn new(
        ticker: &str,
        name: &str,
        decimal_position: u8,
        document_url: &str,
        document_hash: [u8; 32],
    ) -> Result<Self, TokenGroupError> {
        if ticker.len() > 8 {
            return Err(TokenGroupError::InvalidParameter(format!(
                "ticker {ticker} has too many characters (8 max)"
            )));
        }
        if decimal_position > 16 {
            return Err(TokenGroupError::InvalidParameter(
                "decimal position must be between 0 and 16".to_string(),
            ));
        }
        if !document_url.is_empty() {
            if !document_url.contains(':') {
                return Err(TokenGroupError::InvalidParameter(format!(
                    "{document_url} is not a URL, missing colon"
                )));
            }
            // A URL without a hash would let the creator swap the document
            // under the holders.
            if document_hash == [0u8; 32] {
                return Err(TokenGroupError::InvalidParameter(
                    "a document URL requires the document hash".to_string(),
                ));
            }
        }
        Ok(Self {
            ticker: ticker.to_string(),
            name: name.to_string(),
            decimal_position,
            document_url: document_url.to_string(),
            document_hash,
            creation_txid: None,
            validation_messages: Vec::new(),
        })
    }

    /// The OP_RETURN commitment the creation transaction carries.
    #[must_use]
    pub fn commitment_script(&self) -> Script {
        let mut script = Script::new();
        script.push_opcode(OP_RETURN);
        script.push_number(GROUP_DESCRIPTION_MARKER);
        script.push_slice(self.ticker.as_bytes());
        script.push_slice(self.name.as_bytes());
        script.push_slice(&[self.decimal_position]);
        script.push_slice(self.document_url.as_bytes());
        if self.document_url.is_empty() {
            script.push_slice(&[]);
        } else {
            script.push_slice(&self.document_hash);
        }
        script
    }
}

/// Base-currency fee schedule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    pub fee_per_kb: u64,
    pub min_fee: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            fee_per_kb: 1000,
            min_fee: 1000,
        }
    }
}

impl FeePolicy {
    /// Fee required for a transaction of the given approximate size.
    #[must_use]
    pub fn required_fee(&self, approx_size: usize) -> u64 {
        let size = approx_size as u64;
        (self.fee_per_kb.saturating_mul(size) / 1000).max(self.min_fee)
    }
}

/// The designated auxiliary fee-token: certain operations pay a fee in
/// this token alongside the base-currency transaction fee.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTokenPolicy {
    pub group: GroupId,
    /// Where fee-token payments go.
    pub fee_destination: Destination,
    /// Fee-token units charged per fee-bearing operation.
    pub fee_per_operation: u64,
}

/// Load-once context threaded through every operation.
#[derive(Clone, Debug, Default)]
pub struct TokenContext {
    fee_policy: FeePolicy,
    fee_token: Option<FeeTokenPolicy>,
    descriptions: BTreeMap<GroupId, AssetDescription>,
}

impl TokenContext {
    #[must_use]
    pub fn new(fee_policy: FeePolicy) -> Self {
        Self {
            fee_policy,
            fee_token: None,
            descriptions: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_fee_token(mut self, fee_token: FeeTokenPolicy) -> Self {
        self.fee_token = Some(fee_token);
        self
    }

    #[must_use]
    pub fn with_descriptions(mut self, descriptions: BTreeMap<GroupId, AssetDescription>) -> Self {
        self.descriptions = descriptions;
        self
    }

    #[must_use]
    pub fn fee_policy(&self) -> &FeePolicy {
        &self.fee_policy
    }

    #[must_use]
    pub fn fee_token(&self) -> Option<&FeeTokenPolicy> {
        self.fee_token.as_ref()
    }

    #[must_use]
    pub fn matches_fee_token(&self, group: &GroupId) -> bool {
        self.fee_token.as_ref().is_some_and(|ft| &ft.group == group)
    }

    #[must_use]
    pub fn description(&self, group: &GroupId) -> Option<&AssetDescription> {
        self.descriptions.get(group)
    }

    /// Fee-token units owed for creating or minting `group`. Management
    /// groups are exempt; so is everything when no fee-token exists yet.
    #[must_use]
    pub fn creation_fee(&self, group: &GroupId) -> u64 {
        if group.is_management() {
            return 0;
        }
        self.fee_token
            .as_ref()
            .map_or(0, |ft| ft.fee_per_operation * CREATION_FEE_MULTIPLIER)
    }

    /// Fee-token units owed for sending any group, the fee-token itself
    /// included (there the payment folds into the send's own dimension).
    #[must_use]
    pub fn send_fee(&self, _group: &GroupId) -> u64 {
        self.fee_token.as_ref().map_or(0, |ft| ft.fee_per_operation)
    }

    /// Append the fee-token payment output when a fee is owed.
    pub fn ensure_fee_token_output(&self, outputs: &mut Vec<Recipient>, needed: u64) {
        if needed == 0 {
            return;
        }
        if let Some(ft) = &self.fee_token {
            outputs.push(Recipient {
                script_pubkey: script_for_destination(&ft.fee_destination, &ft.group, needed),
                value: GROUPED_SATOSHI_AMT,
            });
        }
    }
}
