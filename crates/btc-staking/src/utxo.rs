//! UTXO selection and virtual-size-based fee estimation (spec §4.B).

use bitcoin::{Amount, OutPoint, ScriptBuf};
use thiserror::Error;

use crate::constants::{
    DUST_THRESHOLD_LEGACY, DUST_THRESHOLD_SEGWIT, VBYTES_INPUT_P2TR_KEYPATH, VBYTES_INPUT_P2WPKH,
    VBYTES_OUTPUT_P2TR, VBYTES_OUTPUT_P2WPKH, VBYTES_TX_OVERHEAD,
};

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("insufficient funds: need at least {needed} sat, candidates sum to {available} sat")]
    InsufficientFunds { needed: u64, available: u64 },
}

/// A spendable input candidate (spec §4.B).
#[derive(Debug, Clone)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    /// Present when the UTXO's scriptPubKey is a Taproot output being spent
    /// key-path (used only for vsize estimation; script-path spends are
    /// estimated by the transaction builder, which knows the leaf depth).
    pub tap_internal_key: Option<bitcoin::XOnlyPublicKey>,
}

/// Per-input virtual size used by the fee estimator.
fn input_vbytes(utxo: &Utxo) -> f64 {
    if utxo.script_pubkey.is_p2tr() {
        VBYTES_INPUT_P2TR_KEYPATH
    } else {
        VBYTES_INPUT_P2WPKH
    }
}

/// Dust threshold for a given output script, per BIP-style relay policy
/// (segwit v0/v1 outputs are cheaper to spend than legacy ones).
pub fn dust_threshold(script: &ScriptBuf) -> u64 {
    if script.is_witness_program() {
        DUST_THRESHOLD_SEGWIT
    } else {
        DUST_THRESHOLD_LEGACY
    }
}

/// Estimate the virtual size, in vbytes, of a transaction with `inputs` and
/// `change_script` (`None` if no change output is produced).
pub fn estimate_vsize(inputs: &[Utxo], num_plain_outputs: usize, change_script: Option<&ScriptBuf>) -> f64 {
    let input_total: f64 = inputs.iter().map(input_vbytes).sum();
    let mut output_total = num_plain_outputs as f64 * VBYTES_OUTPUT_P2TR;
    if let Some(script) = change_script {
        output_total += if script.is_p2wpkh() {
            VBYTES_OUTPUT_P2WPKH
        } else {
            VBYTES_OUTPUT_P2TR
        };
    }
    VBYTES_TX_OVERHEAD + input_total + output_total
}

/// Fee for a transaction of the given estimated vsize at `fee_rate` sat/vbyte.
pub fn estimate_fee(vsize: f64, fee_rate: f64) -> u64 {
    (vsize * fee_rate).ceil() as u64
}

/// Result of [`select_utxos`]: the chosen inputs, the fee charged, and the
/// change amount (zero when there is no change output).
#[derive(Debug, Clone)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub fee_sat: u64,
    pub change_sat: u64,
}

/// Select inputs covering `target + fee (+ change if above dust)`, per spec
/// §4.B: prefer the smallest input count, and among ties the larger average
/// value. Candidates are sorted largest-first so the first `k` inputs that
/// cover the target for a given `k` are automatically the highest-average-
/// value combination of that size — a single greedy pass finds the optimal
/// answer under this tie-break rule without combinatorial search.
pub fn select_utxos(
    mut candidates: Vec<Utxo>,
    target_sat: u64,
    change_script: &ScriptBuf,
    fee_rate_sat_per_vbyte: f64,
    num_plain_outputs: usize,
) -> Result<Selection, SelectionError> {
    candidates.sort_by(|a, b| b.value.cmp(&a.value));

    let mut accumulated = Vec::new();
    let mut accumulated_value: u64 = 0;

    for utxo in candidates.into_iter() {
        accumulated_value += utxo.value.to_sat();
        accumulated.push(utxo);

        // First pass: estimate assuming a change output exists.
        let vsize_with_change = estimate_vsize(&accumulated, num_plain_outputs, Some(change_script));
        let fee_with_change = estimate_fee(vsize_with_change, fee_rate_sat_per_vbyte);

        if let Some(remainder) = accumulated_value.checked_sub(target_sat + fee_with_change) {
            let threshold = dust_threshold(change_script);
            if remainder == 0 || remainder >= threshold {
                return Ok(Selection {
                    inputs: accumulated,
                    fee_sat: fee_with_change,
                    change_sat: remainder,
                });
            }
            // Change would be dust: absorb it into the fee instead, as if
            // there were no change output at all, and re-check the no-change
            // fee equation.
            let vsize_no_change = estimate_vsize(&accumulated, num_plain_outputs, None);
            let fee_no_change = estimate_fee(vsize_no_change, fee_rate_sat_per_vbyte);
            if accumulated_value >= target_sat + fee_no_change {
                return Ok(Selection {
                    inputs: accumulated,
                    fee_sat: accumulated_value - target_sat,
                    change_sat: 0,
                });
            }
        }
    }

    Err(SelectionError::InsufficientFunds {
        needed: target_sat,
        available: accumulated_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash as _;
    use bitcoin::{Network, Txid};

    fn p2wpkh_script() -> ScriptBuf {
        use bitcoin::secp256k1::Secp256k1;
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
        let pk = bitcoin::PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk));
        bitcoin::Address::p2wpkh(&pk, Network::Testnet)
            .unwrap()
            .script_pubkey()
    }

    fn utxo(value_sat: u64, vout: u32) -> Utxo {
        Utxo {
            outpoint: OutPoint {
                txid: Txid::from_byte_array([vout as u8; 32]),
                vout,
            },
            value: Amount::from_sat(value_sat),
            script_pubkey: p2wpkh_script(),
            tap_internal_key: None,
        }
    }

    #[test]
    fn selects_single_utxo_when_sufficient() {
        let candidates = vec![utxo(150_000, 0), utxo(10_000, 1)];
        let sel = select_utxos(candidates, 100_000, &p2wpkh_script(), 1.0, 1).unwrap();
        assert_eq!(sel.inputs.len(), 1);
        assert_eq!(sel.inputs[0].value.to_sat(), 150_000);
        assert_eq!(
            sel.inputs[0].value.to_sat() - 100_000 - sel.fee_sat,
            sel.change_sat
        );
    }

    #[test]
    fn fails_when_funds_insufficient() {
        let candidates = vec![utxo(1_000, 0)];
        let err = select_utxos(candidates, 100_000, &p2wpkh_script(), 1.0, 1).unwrap_err();
        assert!(matches!(err, SelectionError::InsufficientFunds { .. }));
    }

    #[test]
    fn combines_inputs_when_one_is_not_enough() {
        let candidates = vec![utxo(60_000, 0), utxo(60_000, 1)];
        let sel = select_utxos(candidates, 100_000, &p2wpkh_script(), 1.0, 1).unwrap();
        assert_eq!(sel.inputs.len(), 2);
    }

    #[test]
    fn fee_equation_holds() {
        let candidates = vec![utxo(150_000, 0)];
        let sel = select_utxos(candidates.clone(), 100_000, &p2wpkh_script(), 2.0, 1).unwrap();
        let total_in: u64 = sel.inputs.iter().map(|u| u.value.to_sat()).sum();
        assert_eq!(total_in, 100_000 + sel.fee_sat + sel.change_sat);
    }
}
