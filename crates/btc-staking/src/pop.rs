//! Proof-of-Possession Builder (spec §4.G).
//!
//! Builds the message a staker signs with their Bitcoin key to bind it to a
//! control-chain address. Two wire formats exist, selected by a height gate
//! so that old delegations (signed before an upgrade) keep validating under
//! the format they were actually signed with.

use sha2::{Digest, Sha256};

/// The signer-side tag the resulting signature carries (spec §4.G): the
/// staker's Bitcoin key signs using the BIP-322-style ECDSA message form.
pub const SIGNATURE_TAG: &str = "ecdsa";

/// Height at which the control chain began requiring the domain-separated
/// (contextual) message form, plus the protocol version to embed in it.
#[derive(Debug, Clone, Copy)]
pub struct UpgradeGate {
    pub upgrade_height: u32,
    pub version: u32,
}

/// Which wire format a [`ProofOfPossession`] was built in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopFormat {
    /// The message is the raw bytes of the bech32 control-chain address.
    Legacy,
    /// The message is `hex(sha256(domain_string)) || bech32_address`, where
    /// `domain_string = "btcstaking/{version}/staker_pop/{chain_id}/{module_address}"`.
    Contextual,
}

/// The message bytes a staker must sign to prove ownership of a Bitcoin key.
#[derive(Debug, Clone)]
pub struct ProofOfPossession {
    pub message: Vec<u8>,
    pub format: PopFormat,
}

/// Build the proof-of-possession message (spec §4.G).
///
/// Selection rule: the contextual form is used iff `current_height >=
/// upgrade.upgrade_height`; with no upgrade configured, the legacy form is
/// always used.
pub fn build(
    bech32_address: &str,
    current_height: u32,
    upgrade: Option<UpgradeGate>,
    chain_id: &str,
    module_address: &str,
) -> ProofOfPossession {
    match upgrade {
        Some(gate) if current_height >= gate.upgrade_height => {
            let domain = format!(
                "btcstaking/{}/staker_pop/{}/{}",
                gate.version, chain_id, module_address
            );
            let digest = Sha256::digest(domain.as_bytes());
            let mut message = hex::encode(digest).into_bytes();
            message.extend_from_slice(bech32_address.as_bytes());
            ProofOfPossession {
                message,
                format: PopFormat::Contextual,
            }
        }
        _ => ProofOfPossession {
            message: bech32_address.as_bytes().to_vec(),
            format: PopFormat::Legacy,
        },
    }
}
