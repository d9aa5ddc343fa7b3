//! PSBT Integrity Validator (spec §4.D).
//!
//! Confirms a signed PSBT differs from its unsigned template only in
//! witness/partial-signature fields, defending against a signer that
//! rewrites inputs or outputs between hand-off and return.

use bitcoin::psbt::Psbt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("integrity mismatch in {field} at index {index}: expected {expected}, got {got}")]
    Mismatch {
        field: &'static str,
        index: usize,
        expected: String,
        got: String,
    },
}

/// Compare `unsigned` against `signed`, field by field, per spec §4.D.
pub fn validate(unsigned: &Psbt, signed: &Psbt) -> Result<(), IntegrityError> {
    let result = validate_inner(unsigned, signed);
    if let Err(ref e) = result {
        log::warn!("rejecting signer round-trip: {}", e);
    }
    result
}

fn validate_inner(unsigned: &Psbt, signed: &Psbt) -> Result<(), IntegrityError> {
    let u = &unsigned.unsigned_tx;
    let s = &signed.unsigned_tx;

    if u.version != s.version {
        return Err(IntegrityError::Mismatch {
            field: "version",
            index: 0,
            expected: format!("{:?}", u.version),
            got: format!("{:?}", s.version),
        });
    }
    if u.lock_time != s.lock_time {
        return Err(IntegrityError::Mismatch {
            field: "locktime",
            index: 0,
            expected: u.lock_time.to_string(),
            got: s.lock_time.to_string(),
        });
    }
    if u.input.len() != s.input.len() {
        return Err(IntegrityError::Mismatch {
            field: "input_count",
            index: 0,
            expected: u.input.len().to_string(),
            got: s.input.len().to_string(),
        });
    }
    if u.output.len() != s.output.len() {
        return Err(IntegrityError::Mismatch {
            field: "output_count",
            index: 0,
            expected: u.output.len().to_string(),
            got: s.output.len().to_string(),
        });
    }

    for (i, (ui, si)) in u.input.iter().zip(s.input.iter()).enumerate() {
        if ui.previous_output != si.previous_output {
            return Err(IntegrityError::Mismatch {
                field: "prevout",
                index: i,
                expected: ui.previous_output.to_string(),
                got: si.previous_output.to_string(),
            });
        }
        if ui.sequence != si.sequence {
            return Err(IntegrityError::Mismatch {
                field: "sequence",
                index: i,
                expected: format!("{:?}", ui.sequence),
                got: format!("{:?}", si.sequence),
            });
        }
    }

    for (i, (uo, so)) in u.output.iter().zip(s.output.iter()).enumerate() {
        if uo.script_pubkey != so.script_pubkey {
            return Err(IntegrityError::Mismatch {
                field: "output_script",
                index: i,
                expected: uo.script_pubkey.to_asm_string(),
                got: so.script_pubkey.to_asm_string(),
            });
        }
        if uo.value != so.value {
            return Err(IntegrityError::Mismatch {
                field: "output_value",
                index: i,
                expected: uo.value.to_string(),
                got: so.value.to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};

    fn base_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(1000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn identical_psbts_pass() {
        let tx = base_tx();
        let unsigned = Psbt::from_unsigned_tx(tx.clone()).unwrap();
        let mut signed = unsigned.clone();
        signed.unsigned_tx.input[0].witness.push(vec![1u8; 64]);
        assert!(validate(&unsigned, &signed).is_ok());
    }

    #[test]
    fn mutated_output_value_is_rejected() {
        let tx = base_tx();
        let unsigned = Psbt::from_unsigned_tx(tx.clone()).unwrap();
        let mut mutated = tx;
        mutated.output[0].value = Amount::from_sat(999);
        let signed = Psbt::from_unsigned_tx(mutated).unwrap();

        let err = validate(&unsigned, &signed).unwrap_err();
        match err {
            IntegrityError::Mismatch {
                field,
                index,
                expected,
                got,
            } => {
                assert_eq!(field, "output_value");
                assert_eq!(index, 0);
                assert_eq!(expected, "0.00001000 BTC");
                assert_eq!(got, "0.00000999 BTC");
            }
        }
    }

    #[test]
    fn mutated_output_script_is_rejected() {
        let tx = base_tx();
        let unsigned = Psbt::from_unsigned_tx(tx.clone()).unwrap();
        let mut mutated = tx;
        mutated.output[0].script_pubkey = ScriptBuf::from_bytes(vec![0x6a]);
        let signed = Psbt::from_unsigned_tx(mutated).unwrap();

        assert!(matches!(
            validate(&unsigned, &signed),
            Err(IntegrityError::Mismatch {
                field: "output_script",
                index: 0,
                ..
            })
        ));
    }

    #[test]
    fn mutated_prevout_is_rejected() {
        let tx = base_tx();
        let unsigned = Psbt::from_unsigned_tx(tx.clone()).unwrap();
        let mut mutated = tx;
        mutated.input[0].previous_output.vout = 1;
        let signed = Psbt::from_unsigned_tx(mutated).unwrap();

        assert!(matches!(
            validate(&unsigned, &signed),
            Err(IntegrityError::Mismatch {
                field: "prevout",
                index: 0,
                ..
            })
        ));
    }
}
