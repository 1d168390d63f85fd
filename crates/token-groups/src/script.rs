//! Grouped output script encoding and decoding.
//!
//! Grouped outputs prefix a standard spend template with the group
//! annotation:
//!
//! ```text
//! GP2PKH: push(group) push(amount) OP_GROUP OP_DROP OP_DROP
//!         OP_DUP OP_HASH160 push(pubkeyhash) OP_EQUALVERIFY OP_CHECKSIG
//! GP2SH:  push(group) push(amount) OP_GROUP OP_DROP OP_DROP
//!         OP_HASH160 push(scripthash) OP_EQUAL
//! ```
//!
//! Untagged outputs omit the prefix entirely. The amount field holds either
//! a token quantity or an authority capability word; the two share one wire
//! format and are told apart by the CTRL bit, not by the script grammar.

use serde::{Deserialize, Serialize};

use crate::authority::GroupAuthorityFlags;
use crate::group_id::GroupId;

pub const OP_DUP: u8 = 0x76;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_DROP: u8 = 0x75;
pub const OP_RETURN: u8 = 0x6a;
/// Group annotation opcode consumed by the ledger's group rules.
pub const OP_GROUP: u8 = 0xee;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;

/// Raw script bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script(Vec<u8>);

impl Script {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push_opcode(&mut self, opcode: u8) {
        self.0.push(opcode);
    }

    /// Minimal data push. Scripts here never carry payloads past the
    /// PUSHDATA2 range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push_slice(&mut self, data: &[u8]) {
        let len = data.len();
        if len < usize::from(OP_PUSHDATA1) {
            self.0.push(len as u8);
        } else if len <= usize::from(u8::MAX) {
            self.0.push(OP_PUSHDATA1);
            self.0.push(len as u8);
        } else {
            self.0.push(OP_PUSHDATA2);
            self.0.extend_from_slice(&(len as u16).to_le_bytes());
        }
        self.0.extend_from_slice(data);
    }

    /// Push an unsigned integer as a minimal little-endian script number.
    #[allow(clippy::cast_possible_truncation)]
    pub fn push_number(&mut self, mut value: u64) {
        if value == 0 {
            self.0.push(0x00); // OP_0
            return;
        }
        let mut bytes = Vec::new();
        while value > 0 {
            bytes.push((value & 0xff) as u8);
            value >>= 8;
        }
        // A set top bit would read as a negative script number.
        if bytes.last().is_some_and(|b| b & 0x80 != 0) {
            bytes.push(0);
        }
        self.push_slice(&bytes);
    }
}

/// Destination kinds the codec can pay to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    KeyHash([u8; 20]),
    ScriptHash([u8; 20]),
}

/// An output's group annotation, decoded from its script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedOutput {
    pub group: GroupId,
    /// Token quantity, or a capability word when the CTRL bit is set.
    pub quantity_or_flags: u64,
    pub destination: Option<Destination>,
}

impl TaggedOutput {
    #[must_use]
    pub fn untagged(destination: Option<Destination>) -> Self {
        Self {
            group: GroupId::none(),
            quantity_or_flags: 0,
            destination,
        }
    }

    #[must_use]
    pub fn is_authority(&self) -> bool {
        self.group.is_user_group()
            && GroupAuthorityFlags::from_amount_field(self.quantity_or_flags).is_authority()
    }

    /// The capability word. NONE for non-authority outputs.
    #[must_use]
    pub fn authority_flags(&self) -> GroupAuthorityFlags {
        if self.is_authority() {
            GroupAuthorityFlags::from_amount_field(self.quantity_or_flags)
        } else {
            GroupAuthorityFlags::NONE
        }
    }

    /// Spendable token quantity. Zero for authority outputs: a capability
    /// word is never a balance.
    #[must_use]
    pub fn quantity(&self) -> u64 {
        if self.is_authority() {
            0
        } else {
            self.quantity_or_flags
        }
    }
}

/// Serialize a quantity-or-flags word: 2, 4 or 8 little-endian bytes,
/// width chosen by magnitude. Capability words always have the top bit set
/// and therefore always take the 8-byte form.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn serialize_amount(value: u64) -> Vec<u8> {
    if value < 0x1_0000 {
        (value as u16).to_le_bytes().to_vec()
    } else if value < 0x1_0000_0000 {
        (value as u32).to_le_bytes().to_vec()
    } else {
        value.to_le_bytes().to_vec()
    }
}

#[must_use]
pub fn deserialize_amount(bytes: &[u8]) -> Option<u64> {
    match bytes.len() {
        2 => Some(u64::from(u16::from_le_bytes(bytes.try_into().ok()?))),
        4 => Some(u64::from(u32::from_le_bytes(bytes.try_into().ok()?))),
        8 => Some(u64::from_le_bytes(bytes.try_into().ok()?)),
        _ => None,
    }
}

fn push_template(script: &mut Script, destination: &Destination) {
    match destination {
        Destination::KeyHash(hash) => {
            script.push_opcode(OP_DUP);
            script.push_opcode(OP_HASH160);
            script.push_slice(hash);
            script.push_opcode(OP_EQUALVERIFY);
            script.push_opcode(OP_CHECKSIG);
        }
        Destination::ScriptHash(hash) => {
            script.push_opcode(OP_HASH160);
            script.push_slice(hash);
            script.push_opcode(OP_EQUAL);
        }
    }
}

/// Encode a spending script for `destination`, annotated with `group` and
/// the serialized `quantity_or_flags` word. The no-group sentinel yields
/// the plain untagged template.
#[must_use]
pub fn script_for_destination(
    destination: &Destination,
    group: &GroupId,
    quantity_or_flags: u64,
) -> Script {
    let mut script = Script::new();
    if group.is_user_group() {
        script.push_slice(group.bytes());
        script.push_slice(&serialize_amount(quantity_or_flags));
        script.push_opcode(OP_GROUP);
        script.push_opcode(OP_DROP);
        script.push_opcode(OP_DROP);
    }
    push_template(&mut script, destination);
    script
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    /// Read one data push, any encoding.
    fn push(&mut self) -> Option<&'a [u8]> {
        let opcode = self.byte()?;
        let len = match opcode {
            1..=0x4b => usize::from(opcode),
            OP_PUSHDATA1 => usize::from(self.byte()?),
            OP_PUSHDATA2 => {
                let bytes = self.take(2)?;
                usize::from(u16::from_le_bytes([bytes[0], bytes[1]]))
            }
            _ => return None,
        };
        self.take(len)
    }

    fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos.min(self.bytes.len())..]
    }
}

/// Match the remainder of a script against the two spend templates.
#[must_use]
pub fn extract_destination(bytes: &[u8]) -> Option<Destination> {
    match bytes {
        [OP_DUP, OP_HASH160, 20, hash @ .., OP_EQUALVERIFY, OP_CHECKSIG] if hash.len() == 20 => {
            Some(Destination::KeyHash(hash.try_into().ok()?))
        }
        [OP_HASH160, 20, hash @ .., OP_EQUAL] if hash.len() == 20 => {
            Some(Destination::ScriptHash(hash.try_into().ok()?))
        }
        _ => None,
    }
}

/// Decode a script's group annotation.
///
/// A script without a well-formed annotation prefix decodes as untagged;
/// the grammar scan never fails.
#[must_use]
pub fn decode_script(script: &Script) -> TaggedOutput {
    let bytes = script.as_bytes();
    let mut reader = Reader::new(bytes);

    let Some(group_bytes) = reader.push() else {
        return TaggedOutput::untagged(extract_destination(bytes));
    };
    let Some(amount) = reader.push().and_then(deserialize_amount) else {
        return TaggedOutput::untagged(extract_destination(bytes));
    };
    if reader.byte() != Some(OP_GROUP)
        || reader.byte() != Some(OP_DROP)
        || reader.byte() != Some(OP_DROP)
    {
        return TaggedOutput::untagged(extract_destination(bytes));
    }

    TaggedOutput {
        group: GroupId::from_script_bytes(group_bytes.to_vec()),
        quantity_or_flags: amount,
        destination: extract_destination(reader.rest()),
    }
}
