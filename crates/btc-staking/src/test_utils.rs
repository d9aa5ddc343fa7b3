//! Shared fixtures for unit tests. Not part of the public API.
#![cfg(test)]

use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::XOnlyPublicKey;

use crate::params::Params;

/// A deterministic x-only public key derived from a small seed byte, for
/// tests that only need "some distinct valid key", not a specific one.
pub fn test_xonly_key(seed: u8) -> XOnlyPublicKey {
    let secp = Secp256k1::new();
    let mut bytes = [0u8; 32];
    bytes[31] = seed;
    bytes[0] = 0x01; // avoid the all-zero scalar
    let sk = SecretKey::from_slice(&bytes).expect("non-zero seed is a valid scalar");
    sk.x_only_public_key(&secp).0
}

/// The parameter set used throughout spec §8's "Happy-path EOI" scenario.
pub fn sample_params() -> Params {
    Params {
        version: 0,
        activation_btc_height: 100,
        covenant_keys: vec![
            test_xonly_key(101),
            test_xonly_key(102),
            test_xonly_key(103),
            test_xonly_key(104),
        ],
        covenant_quorum: 2,
        min_staking_amount_sat: 50_000,
        max_staking_amount_sat: 500_000,
        min_staking_time_blocks: 100,
        max_staking_time_blocks: 10_000,
        unbonding_time_blocks: 100,
        unbonding_fee_sat: 2_000,
        slashing_rate: 0.1,
        slashing_pk_script: vec![0x6a, 0x00],
        min_slashing_tx_fee_sat: 500,
        tag: None,
    }
}
