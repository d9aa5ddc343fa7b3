//! Withdrawal Address Guard (spec §4.E).
//!
//! Derives the set of scriptPubKeys a staker is allowed to receive a
//! withdrawal at, and rejects any PSBT output that pays somewhere else.

use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Network, PublicKey, ScriptBuf, XOnlyPublicKey};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("unauthorized withdrawal address(es): {0:?}")]
    Unauthorized(Vec<String>),
}

/// The set of scriptPubKeys a given staker key/network pair is allowed to
/// receive funds at (spec §4.E): always the key-path P2TR of the x-only key,
/// plus P2WPKH when a 33-byte (parity-tagged) variant is supplied.
#[derive(Debug, Clone)]
pub struct WithdrawalGuard {
    allowed_scripts: Vec<ScriptBuf>,
    network: Network,
}

impl WithdrawalGuard {
    /// Build the guard from the staker's x-only key alone (P2TR only).
    pub fn from_xonly(staker_key: XOnlyPublicKey, network: Network) -> Self {
        Self::from_xonly_with_secp(&Secp256k1::verification_only(), staker_key, network)
    }

    pub fn from_xonly_with_secp<C: Verification>(
        secp: &Secp256k1<C>,
        staker_key: XOnlyPublicKey,
        network: Network,
    ) -> Self {
        let p2tr = bitcoin::Address::p2tr(secp, staker_key, None, network).script_pubkey();
        Self {
            allowed_scripts: vec![p2tr],
            network,
        }
    }

    /// Build the guard from the full 33-byte key, which additionally allows
    /// a P2WPKH withdrawal address (spec §4.E).
    pub fn from_full_key(staker_key: PublicKey, network: Network) -> Self {
        Self::from_full_key_with_secp(&Secp256k1::verification_only(), staker_key, network)
    }

    pub fn from_full_key_with_secp<C: Verification>(
        secp: &Secp256k1<C>,
        staker_key: PublicKey,
        network: Network,
    ) -> Self {
        let xonly = staker_key.inner.x_only_public_key().0;
        let p2tr = bitcoin::Address::p2tr(secp, xonly, None, network).script_pubkey();
        let p2wpkh = bitcoin::Address::p2wpkh(&staker_key, network)
            .expect("compressed key always derives a P2WPKH address")
            .script_pubkey();
        Self {
            allowed_scripts: vec![p2tr, p2wpkh],
            network,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn allowed_scripts(&self) -> &[ScriptBuf] {
        &self.allowed_scripts
    }

    fn is_allowed(&self, script: &ScriptBuf) -> bool {
        self.allowed_scripts.iter().any(|s| s == script)
    }

    /// Validate a single candidate output script; `OP_RETURN` and other
    /// non-address scripts are ignored (they cannot receive funds, so they
    /// cannot steal them either).
    pub fn check_script(&self, script: &ScriptBuf) -> Result<(), GuardError> {
        if script.is_op_return() {
            return Ok(());
        }
        if bitcoin::Address::from_script(script, self.network).is_err() {
            return Ok(());
        }
        if self.is_allowed(script) {
            Ok(())
        } else {
            Err(GuardError::Unauthorized(vec![script.to_asm_string()]))
        }
    }

    /// Validate every output in a set, collecting all violations before
    /// failing (spec §4.E: "the set of invalid addresses").
    pub fn check_outputs(&self, scripts: &[ScriptBuf]) -> Result<(), GuardError> {
        let invalid: Vec<String> = scripts
            .iter()
            .filter(|s| !s.is_op_return())
            .filter(|s| bitcoin::Address::from_script(s, self.network).is_ok())
            .filter(|s| !self.is_allowed(s))
            .map(|s| {
                bitcoin::Address::from_script(s, self.network)
                    .map(|a| a.to_string())
                    .unwrap_or_else(|_| s.to_asm_string())
            })
            .collect();
        if invalid.is_empty() {
            Ok(())
        } else {
            Err(GuardError::Unauthorized(invalid))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_xonly_key;
    use bitcoin::secp256k1::Secp256k1;

    #[test]
    fn own_p2tr_is_allowed() {
        let secp = Secp256k1::new();
        let key = test_xonly_key(1);
        let guard = WithdrawalGuard::from_xonly_with_secp(&secp, key, Network::Testnet);
        let own = bitcoin::Address::p2tr(&secp, key, None, Network::Testnet).script_pubkey();
        assert!(guard.check_script(&own).is_ok());
    }

    #[test]
    fn foreign_p2tr_is_rejected() {
        let secp = Secp256k1::new();
        let guard =
            WithdrawalGuard::from_xonly_with_secp(&secp, test_xonly_key(1), Network::Testnet);
        let other =
            bitcoin::Address::p2tr(&secp, test_xonly_key(2), None, Network::Testnet)
                .script_pubkey();
        assert!(matches!(
            guard.check_script(&other),
            Err(GuardError::Unauthorized(_))
        ));
    }

    #[test]
    fn op_return_always_passes() {
        let secp = Secp256k1::new();
        let guard =
            WithdrawalGuard::from_xonly_with_secp(&secp, test_xonly_key(1), Network::Testnet);
        let script = bitcoin::script::Builder::new()
            .push_opcode(bitcoin::opcodes::all::OP_RETURN)
            .into_script();
        assert!(guard.check_script(&script).is_ok());
    }

    #[test]
    fn empty_output_set_passes() {
        let secp = Secp256k1::new();
        let guard =
            WithdrawalGuard::from_xonly_with_secp(&secp, test_xonly_key(1), Network::Testnet);
        assert!(guard.check_outputs(&[]).is_ok());
    }
}
