//! Group identifier derivation and classification.
//!
//! A group identifier is an immutable byte string embedded in spending
//! scripts. Its variant is decided by shape: empty (no group), 20 bytes
//! (address-derived single group), longer than 20 bytes with a known single
//! prefix (subgroup), or a ground 32-byte hash (minted group, type-tagged
//! in its final byte).

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::authority::GroupAuthorityFlags;
use crate::coin::{OutPoint, write_compact_size};
use crate::error::TokenGroupError;
use crate::script::Script;

/// Byte length of an address-derived single group identifier, and of the
/// parent prefix of every subgroup.
pub const PARENT_GROUP_ID_SIZE: usize = 20;

/// Identifier variant, fixed once at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    /// The untagged sentinel: a plain, non-grouped output.
    NoGroup,
    /// 20-byte address-derived identifier.
    Single,
    /// Parent identifier bytes followed by arbitrary postfix data.
    Subgroup,
    /// Ground identifier with the type tag in its final byte.
    Minted,
}

/// Type tag ground into the final byte of a minted identifier.
///
/// The tag is verifiable by anyone holding the identifier alone, with no
/// side channel: the grinding loop simply rejects hashes whose final byte
/// differs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GroupTag {
    Ordinary = 0,
    Management = 1,
}

impl GroupTag {
    #[must_use]
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// A token group identifier. Compared, ordered and hashed by byte content
/// only; the kind discriminant is carried alongside, not re-derived at use
/// sites.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupId {
    bytes: Vec<u8>,
    kind: GroupKind,
}

impl PartialEq for GroupId {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for GroupId {}

impl PartialOrd for GroupId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes.cmp(&other.bytes)
    }
}

impl Hash for GroupId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.bytes))
    }
}

impl GroupId {
    /// The no-group sentinel.
    #[must_use]
    pub fn none() -> Self {
        Self {
            bytes: Vec::new(),
            kind: GroupKind::NoGroup,
        }
    }

    /// A single group identifier derived from a 20-byte destination hash.
    #[must_use]
    pub fn single(hash: [u8; PARENT_GROUP_ID_SIZE]) -> Self {
        Self {
            bytes: hash.to_vec(),
            kind: GroupKind::Single,
        }
    }

    /// Derive a subgroup identifier: `parent bytes ++ postfix`. Pure byte
    /// concatenation, no chain interaction.
    pub fn subgroup(parent: &GroupId, postfix: &[u8]) -> Result<Self, TokenGroupError> {
        if parent.kind != GroupKind::Single {
            return Err(TokenGroupError::InvalidParameter(
                "subgroup parent must be a single group identifier".to_string(),
            ));
        }
        if postfix.is_empty() {
            return Err(TokenGroupError::InvalidParameter(
                "no subgroup postfix provided".to_string(),
            ));
        }
        let mut bytes = parent.bytes.clone();
        bytes.extend_from_slice(postfix);
        Ok(Self {
            bytes,
            kind: GroupKind::Subgroup,
        })
    }

    /// Derive a subgroup from a numeric postfix, serialized as 8
    /// little-endian bytes.
    pub fn subgroup_from_number(parent: &GroupId, postfix: u64) -> Result<Self, TokenGroupError> {
        Self::subgroup(parent, &postfix.to_le_bytes())
    }

    /// Classify raw identifier bytes. Length decides everything except the
    /// subgroup/minted split, which needs the caller's knowledge of which
    /// 20-byte single identifiers exist.
    pub fn classify(bytes: &[u8], is_known_single: impl Fn(&[u8]) -> bool) -> GroupKind {
        match bytes.len() {
            0 => GroupKind::NoGroup,
            PARENT_GROUP_ID_SIZE => GroupKind::Single,
            n if n > PARENT_GROUP_ID_SIZE && is_known_single(&bytes[..PARENT_GROUP_ID_SIZE]) => {
                GroupKind::Subgroup
            }
            _ => GroupKind::Minted,
        }
    }

    /// Construct from raw bytes, classifying once with the given
    /// known-single predicate.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>, is_known_single: impl Fn(&[u8]) -> bool) -> Self {
        let kind = Self::classify(&bytes, is_known_single);
        Self { bytes, kind }
    }

    /// Construct from bytes found in a script. Without a known-single set
    /// every over-long identifier reads as minted; equality and hashing are
    /// structural so this never affects balance bookkeeping.
    #[must_use]
    pub(crate) fn from_script_bytes(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes, |_| false)
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        self.kind == GroupKind::NoGroup
    }

    /// True for any real group: single, subgroup or minted.
    #[must_use]
    pub fn is_user_group(&self) -> bool {
        !self.is_none()
    }

    #[must_use]
    pub fn is_subgroup(&self) -> bool {
        self.kind == GroupKind::Subgroup
    }

    /// The parent identifier of a subgroup: its first 20 bytes.
    pub fn parent(&self) -> Result<GroupId, TokenGroupError> {
        if self.kind != GroupKind::Subgroup {
            return Err(TokenGroupError::InvalidParameter(
                "identifier is not a subgroup".to_string(),
            ));
        }
        let mut hash = [0u8; PARENT_GROUP_ID_SIZE];
        hash.copy_from_slice(&self.bytes[..PARENT_GROUP_ID_SIZE]);
        Ok(GroupId::single(hash))
    }

    /// The postfix data of a subgroup.
    pub fn subgroup_data(&self) -> Result<&[u8], TokenGroupError> {
        if self.kind != GroupKind::Subgroup {
            return Err(TokenGroupError::InvalidParameter(
                "identifier is not a subgroup".to_string(),
            ));
        }
        Ok(&self.bytes[PARENT_GROUP_ID_SIZE..])
    }

    /// Whether a minted identifier's ground tag byte carries the given tag.
    #[must_use]
    pub fn has_tag(&self, tag: GroupTag) -> bool {
        if self.kind != GroupKind::Minted {
            return false;
        }
        match self.bytes.last() {
            Some(&last) if tag == GroupTag::Ordinary => last == GroupTag::Ordinary.byte(),
            Some(&last) => last & tag.byte() == tag.byte(),
            None => false,
        }
    }

    /// Minted identifier tagged as a management (fee-token class) group.
    #[must_use]
    pub fn is_management(&self) -> bool {
        self.has_tag(GroupTag::Management)
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

/// Grind a fresh minted identifier from a spendable output reference.
///
/// Hashes `{unique input, optional description commitment, nonce}` with an
/// incrementing nonce until the hash's final byte equals the requested type
/// tag. The input outpoint can be spent at most once, which makes the
/// result collision-free against every identifier ground from any other
/// outpoint. The nonce is masked so it can never alias an authority flag
/// bit, because the caller embeds it in the genesis capability word.
///
/// Returns the identifier and the nonce that produced it.
#[must_use]
pub fn derive_group_id(
    entropy: &OutPoint,
    description_commitment: Option<&Script>,
    tag: GroupTag,
) -> (GroupId, u64) {
    let mut nonce: u64 = 0;
    loop {
        nonce = nonce.wrapping_add(1) & !GroupAuthorityFlags::ALL_BITS.bits();

        let mut preimage = Vec::with_capacity(44);
        preimage.extend_from_slice(&entropy.txid);
        preimage.extend_from_slice(&entropy.vout.to_le_bytes());
        if let Some(commitment) = description_commitment {
            if !commitment.is_empty() {
                write_compact_size(&mut preimage, commitment.as_bytes().len() as u64);
                preimage.extend_from_slice(commitment.as_bytes());
            }
        }
        preimage.extend_from_slice(&nonce.to_le_bytes());

        let hash: [u8; 32] = Sha256::digest(Sha256::digest(&preimage)).into();
        if hash[31] == tag.byte() {
            return (
                GroupId {
                    bytes: hash.to_vec(),
                    kind: GroupKind::Minted,
                },
                nonce,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outpoint(n: u8) -> OutPoint {
        OutPoint {
            txid: [n; 32],
            vout: u32::from(n),
        }
    }

    #[test]
    fn classification_follows_length() {
        assert_eq!(GroupId::classify(&[], |_| false), GroupKind::NoGroup);
        assert_eq!(GroupId::classify(&[7u8; 20], |_| false), GroupKind::Single);
        assert_eq!(GroupId::classify(&[7u8; 32], |_| true), GroupKind::Subgroup);
        assert_eq!(GroupId::classify(&[7u8; 32], |_| false), GroupKind::Minted);
    }

    #[test]
    fn equality_is_structural() {
        let a = GroupId::from_bytes(vec![9u8; 32], |_| true);
        let b = GroupId::from_bytes(vec![9u8; 32], |_| false);
        assert_ne!(a.kind(), b.kind());
        assert_eq!(a, b);
    }

    #[test]
    fn subgroup_round_trip() {
        let parent = GroupId::single([3u8; 20]);
        let sub = GroupId::subgroup(&parent, b"series-1").expect("valid postfix");
        assert_eq!(sub.kind(), GroupKind::Subgroup);
        assert_eq!(sub.parent().expect("has parent"), parent);
        assert_eq!(sub.subgroup_data().expect("has data"), b"series-1");
    }

    #[test]
    fn subgroup_rejects_bad_inputs() {
        let parent = GroupId::single([3u8; 20]);
        assert!(GroupId::subgroup(&parent, &[]).is_err());

        let minted = GroupId::from_bytes(vec![1u8; 32], |_| false);
        assert!(GroupId::subgroup(&minted, b"x").is_err());
        assert!(GroupId::none().parent().is_err());
    }

    #[test]
    fn numeric_postfix_serializes_little_endian() {
        let parent = GroupId::single([3u8; 20]);
        let sub = GroupId::subgroup_from_number(&parent, 0x0102).expect("valid");
        assert_eq!(
            sub.subgroup_data().expect("has data"),
            &[0x02, 0x01, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn grinding_hits_requested_tag_byte() {
        for tag in [GroupTag::Ordinary, GroupTag::Management] {
            let (id, nonce) = derive_group_id(&outpoint(1), None, tag);
            assert_eq!(id.kind(), GroupKind::Minted);
            assert_eq!(id.bytes().len(), 32);
            assert_eq!(id.bytes()[31], tag.byte());
            assert_eq!(nonce & GroupAuthorityFlags::ALL_BITS.bits(), 0);
        }
    }

    #[test]
    fn grinding_is_deterministic_per_input() {
        let (a, _) = derive_group_id(&outpoint(1), None, GroupTag::Ordinary);
        let (b, _) = derive_group_id(&outpoint(1), None, GroupTag::Ordinary);
        let (c, _) = derive_group_id(&outpoint(2), None, GroupTag::Ordinary);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn description_commitment_changes_identifier() {
        let script = Script::from_bytes(vec![0x6a, 0x01, 0x42]);
        let (bare, _) = derive_group_id(&outpoint(1), None, GroupTag::Ordinary);
        let (committed, _) = derive_group_id(&outpoint(1), Some(&script), GroupTag::Ordinary);
        assert_ne!(bare, committed);
    }

    #[test]
    fn management_tag_is_visible_on_identifier() {
        let (id, _) = derive_group_id(&outpoint(4), None, GroupTag::Management);
        assert!(id.is_management());
        let (id, _) = derive_group_id(&outpoint(4), None, GroupTag::Ordinary);
        assert!(!id.is_management());
    }
}
