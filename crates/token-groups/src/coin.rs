//! Ledger-facing transaction primitives and the wallet coin view.
//!
//! These are the narrow shapes exchanged with the ledger and key-management
//! collaborators; the engine never maintains a UTXO set of its own.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::script::{Script, TaggedOutput, decode_script};

/// Base-currency value carried by every grouped output. Token semantics
/// live in the annotation, so the output itself stays at the minimum.
pub const GROUPED_SATOSHI_AMT: u64 = 1;

/// Reference to a ledger output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: [u8; 32],
    pub vout: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    #[must_use]
    pub fn new(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Script::new(),
            sequence: u32::MAX,
        }
    }

    pub(crate) fn serialized_size(&self) -> usize {
        36 + compact_size_len(self.script_sig.len() as u64) + self.script_sig.len() + 4
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Script,
}

impl TxOut {
    pub(crate) fn serialized_size(&self) -> usize {
        8 + compact_size_len(self.script_pubkey.len() as u64) + self.script_pubkey.len()
    }
}

/// A requested output, prior to transaction assembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub script_pubkey: Script,
    pub value: u64,
}

/// An assembled transaction, ready for the signing and submission
/// collaborators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub locktime: u32,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: 1,
            inputs: Vec::new(),
            outputs: Vec::new(),
            locktime: 0,
        }
    }

    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        write_compact_size(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.prevout.txid);
            out.extend_from_slice(&input.prevout.vout.to_le_bytes());
            write_compact_size(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_compact_size(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(output.script_pubkey.as_bytes());
        }
        out.extend_from_slice(&self.locktime.to_le_bytes());
        out
    }

    /// Double SHA-256 of the serialized transaction.
    #[must_use]
    pub fn txid(&self) -> [u8; 32] {
        Sha256::digest(Sha256::digest(self.serialize())).into()
    }
}

/// A spendable wallet coin: the ledger output reference plus its decoded
/// group annotation. Held transiently while one operation runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script_pubkey: Script,
    pub spendable: bool,
    tagged: TaggedOutput,
}

impl Coin {
    /// Decodes the annotation once, at construction.
    #[must_use]
    pub fn new(outpoint: OutPoint, value: u64, script_pubkey: Script, spendable: bool) -> Self {
        let tagged = decode_script(&script_pubkey);
        Self {
            outpoint,
            value,
            script_pubkey,
            spendable,
            tagged,
        }
    }

    #[must_use]
    pub fn tagged(&self) -> &TaggedOutput {
        &self.tagged
    }
}

pub(crate) fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn write_compact_size(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}
