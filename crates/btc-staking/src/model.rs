//! Data-model types shared across components (spec §3).

use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Address, Network, PublicKey, Transaction, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("address does not belong to staker key {xonly} on network {network:?}")]
    AddressKeyMismatch {
        xonly: String,
        network: Network,
    },
}

/// The staker's Bitcoin identity (spec §3 `StakerInfo`).
///
/// Invariant enforced at construction: `address` must be derivable from
/// `xonly_key` on `network` — either as the key-path P2TR of the x-only key,
/// or (when a 33-byte variant is supplied) as its P2WPKH.
#[derive(Debug, Clone)]
pub struct StakerInfo {
    pub address: Address,
    pub xonly_key: XOnlyPublicKey,
    pub network: Network,
}

impl StakerInfo {
    /// Validate and construct from a P2TR address derived from `xonly_key`,
    /// or a P2WPKH address derived from `full_key` when supplied.
    pub fn new(
        address: Address,
        xonly_key: XOnlyPublicKey,
        full_key: Option<PublicKey>,
        network: Network,
    ) -> Result<Self, ModelError> {
        Self::new_with_secp(&Secp256k1::verification_only(), address, xonly_key, full_key, network)
    }

    pub fn new_with_secp<C: Verification>(
        secp: &Secp256k1<C>,
        address: Address,
        xonly_key: XOnlyPublicKey,
        full_key: Option<PublicKey>,
        network: Network,
    ) -> Result<Self, ModelError> {
        let p2tr = Address::p2tr(secp, xonly_key, None, network);
        if address == p2tr {
            return Ok(Self { address, xonly_key, network });
        }
        if let Some(fk) = full_key {
            if fk.inner.x_only_public_key().0 == xonly_key {
                if let Ok(p2wpkh) = Address::p2wpkh(&fk, network) {
                    if address == p2wpkh {
                        return Ok(Self { address, xonly_key, network });
                    }
                }
            }
        }
        Err(ModelError::AddressKeyMismatch {
            xonly: hex::encode(xonly_key.serialize()),
            network,
        })
    }
}

/// The staker's intent for one delegation (spec §3 `StakingInput`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakingInput {
    #[serde(with = "crate::params::xonly_hex")]
    pub finality_provider_key: XOnlyPublicKey,
    pub amount_sat: u64,
    pub timelock_blocks: u32,
}

/// An active or historical delegation (spec §3 `Delegation`).
#[derive(Debug, Clone)]
pub struct Delegation {
    pub staking_tx: Transaction,
    pub staking_output_index: u32,
    pub staker_key: XOnlyPublicKey,
    pub finality_provider_key: XOnlyPublicKey,
    pub timelock_blocks: u32,
    /// Bitcoin height at which this delegation is considered started; always
    /// `>= activation_btc_height` of the parameter version that produced it.
    pub start_height: u32,
    /// The parameter version chosen at intent time, preserved for every
    /// subsequent operation on this delegation (spec §9).
    pub params_version: u32,
}

/// A Merkle inclusion proof for an already-broadcast staking transaction
/// (spec §4.H "post-registration", §6).
#[derive(Debug, Clone)]
pub struct InclusionProof {
    pub index: u32,
    /// Big-endian display-form block hash, byte-reversed by [`InclusionProof::block_hash_reversed`].
    pub block_hash: bitcoin::BlockHash,
    /// Sibling hashes, shallowest first; serialized deepest-first by
    /// [`InclusionProof::merkle_path_bytes`] per spec §4.H.
    pub merkle_path: Vec<bitcoin::hashes::sha256d::Hash>,
}

impl InclusionProof {
    /// Block hash bytes, reversed from display (RPC) form to internal form.
    ///
    /// [`bitcoin::BlockHash`]'s `Display` impl reverses the stored bytes to
    /// print the familiar big-endian-looking hex; `to_byte_array` already
    /// hands back the internal/consensus order that form is reversed from,
    /// so no further reversal happens here.
    pub fn block_hash_reversed(&self) -> [u8; 32] {
        bitcoin::hashes::Hash::to_byte_array(self.block_hash)
    }

    /// `concat(reverse_bytes(sibling_i))` with the deepest sibling first
    /// (spec §4.H).
    pub fn merkle_path_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.merkle_path.len() * 32);
        for sibling in self.merkle_path.iter().rev() {
            let mut bytes = bitcoin::hashes::Hash::to_byte_array(*sibling);
            bytes.reverse();
            out.extend_from_slice(&bytes);
        }
        out
    }
}
