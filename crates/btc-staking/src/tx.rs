//! Transaction Builder (spec §4.C).
//!
//! Assembles the five (seven, counting both slashing variants) unsigned
//! PSBTs that make up one delegation's transaction family. Every constructor
//! returns an unsigned [`Psbt`] plus the fee it charges, ready to be handed
//! to an external signer and then checked with [`crate::psbt_integrity`].

use bitcoin::absolute::LockTime;
use bitcoin::psbt::Psbt;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use thiserror::Error;

use crate::script::{self, Leaf, Scripts};
use crate::utxo::{SelectionError, Utxo};
use crate::withdrawal_guard::{GuardError, WithdrawalGuard};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("utxo selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("script build failed: {0}")]
    Script(#[from] script::ScriptError),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("psbt construction failed: {0}")]
    Psbt(String),

    #[error("slashing transaction fee {got} sat is below min_slashing_tx_fee_sat ({min} sat)")]
    SlashingFeeTooLow { min: u64, got: u64 },

    #[error("withdrawal output unauthorized: {0}")]
    UnauthorizedWithdrawal(#[from] GuardError),
}

/// An unsigned PSBT plus the fee it was built to charge.
#[derive(Debug, Clone)]
pub struct BuiltPsbt {
    pub psbt: Psbt,
    pub fee_sat: u64,
}

/// Whether the staking transaction carries the observable data-embed leaf
/// and its height-gated locktime (spec §9: a build-time flag, not a
/// separate class hierarchy). Only [`staking`] consumes this; the other
/// constructors spend an already-existing output and are observable-agnostic.
#[derive(Debug, Clone)]
pub enum ObservableFlag {
    Standard,
    Observable { activation_btc_height: u32 },
}

fn plain_input(outpoint: OutPoint, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output: outpoint,
        script_sig: ScriptBuf::new(),
        sequence,
        witness: Witness::new(),
    }
}

fn checked_relative_sequence(blocks: u32) -> Result<Sequence, BuildError> {
    let blocks = u16::try_from(blocks)
        .map_err(|_| BuildError::InvalidOutput(format!("timelock {blocks} exceeds u16 range")))?;
    Ok(Sequence::from_height(blocks))
}

/// Populate a PSBT input's `witness_utxo` so signers can verify the spent
/// amount (mirrors the teacher's `build_heir_claim_psbt`/`build_psbt` input
/// population — BIP-174 §input.witness_utxo).
fn set_witness_utxo(psbt: &mut Psbt, index: usize, value: Amount, script_pubkey: ScriptBuf) {
    psbt.inputs[index].witness_utxo = Some(TxOut {
        value,
        script_pubkey,
    });
}

/// Populate a PSBT input's taproot script-path fields for `leaf` of `scripts`
/// (mirrors the teacher's `taproot.rs::build_heir_claim_psbt`).
fn set_tap_script_path(
    psbt: &mut Psbt,
    index: usize,
    scripts: &Scripts,
    leaf: Leaf,
) -> Result<(), BuildError> {
    let (control_block, leaf_script, leaf_version) = scripts.control_block_struct(leaf)?;
    psbt.inputs[index]
        .tap_scripts
        .insert(control_block, (leaf_script, leaf_version));
    psbt.inputs[index].tap_internal_key = Some(script::unspendable_internal_key());
    psbt.inputs[index].tap_merkle_root = scripts.spend_info.merkle_root();
    Ok(())
}

/// `staking` (spec §4.C): spends the selected UTXOs into the staking
/// Taproot output, an optional data-embed `OP_RETURN`, and optional change.
pub fn staking(
    inputs: &[Utxo],
    scripts: &Scripts,
    amount_sat: u64,
    change_script: Option<&ScriptBuf>,
    change_sat: u64,
    fee_sat: u64,
    observable: ObservableFlag,
) -> Result<BuiltPsbt, BuildError> {
    let lock_time = match observable {
        ObservableFlag::Observable {
            activation_btc_height,
        } => LockTime::from_consensus(activation_btc_height.saturating_sub(1)),
        ObservableFlag::Standard => LockTime::ZERO,
    };

    let tx_inputs: Vec<TxIn> = inputs
        .iter()
        .map(|u| plain_input(u.outpoint, Sequence::ENABLE_RBF_NO_LOCKTIME))
        .collect();

    let mut outputs = vec![TxOut {
        value: Amount::from_sat(amount_sat),
        script_pubkey: scripts.staking_output_script(),
    }];
    if let Some(data_embed) = &scripts.data_embed_script {
        outputs.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: data_embed.clone(),
        });
    }
    if let Some(change_script) = change_script {
        if change_sat > 0 {
            outputs.push(TxOut {
                value: Amount::from_sat(change_sat),
                script_pubkey: change_script.clone(),
            });
        }
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time,
        input: tx_inputs,
        output: outputs,
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| BuildError::Psbt(e.to_string()))?;
    for (i, u) in inputs.iter().enumerate() {
        set_witness_utxo(&mut psbt, i, u.value, u.script_pubkey.clone());
    }

    Ok(BuiltPsbt { psbt, fee_sat })
}

/// `unbonding` (spec §4.C): spends the staking output's unbonding leaf into
/// a fresh Taproot output over `{slashing-leaf, timelock(unbonding_time)}`.
pub fn unbonding(
    staking_outpoint: OutPoint,
    staking_output_value: Amount,
    staking_scripts: &Scripts,
    unbonding_output_scripts: &Scripts,
    unbonding_fee_sat: u64,
) -> Result<BuiltPsbt, BuildError> {
    let value = staking_output_value
        .to_sat()
        .checked_sub(unbonding_fee_sat)
        .ok_or_else(|| {
            BuildError::InvalidOutput("unbonding_fee_sat exceeds the staked amount".into())
        })?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![plain_input(staking_outpoint, Sequence::ENABLE_RBF_NO_LOCKTIME)],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: unbonding_output_scripts.staking_output_script(),
        }],
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| BuildError::Psbt(e.to_string()))?;
    set_witness_utxo(
        &mut psbt,
        0,
        staking_output_value,
        staking_scripts.staking_output_script(),
    );
    set_tap_script_path(&mut psbt, 0, staking_scripts, Leaf::Unbonding)?;

    Ok(BuiltPsbt {
        psbt,
        fee_sat: unbonding_fee_sat,
    })
}

/// Shared shape for the three `withdraw_*` constructors (spec §4.C): spend a
/// single script-path input into a single guard-checked destination output.
fn withdraw(
    outpoint: OutPoint,
    input_value: Amount,
    source_scripts: &Scripts,
    leaf: Leaf,
    relative_timelock_blocks: u32,
    destination_script: ScriptBuf,
    guard: &WithdrawalGuard,
    fee_sat: u64,
) -> Result<BuiltPsbt, BuildError> {
    guard.check_script(&destination_script)?;

    let value = input_value.to_sat().checked_sub(fee_sat).ok_or_else(|| {
        BuildError::InvalidOutput("fee exceeds the spent output's value".into())
    })?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![plain_input(
            outpoint,
            checked_relative_sequence(relative_timelock_blocks)?,
        )],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey: destination_script,
        }],
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| BuildError::Psbt(e.to_string()))?;
    set_witness_utxo(
        &mut psbt,
        0,
        input_value,
        source_scripts.staking_output_script(),
    );
    set_tap_script_path(&mut psbt, 0, source_scripts, leaf)?;

    Ok(BuiltPsbt { psbt, fee_sat })
}

/// `withdraw_timelock_expired` (spec §4.C): spends the staking output's
/// timelock leaf, `nSequence = timelock_blocks`.
#[allow(clippy::too_many_arguments)]
pub fn withdraw_timelock_expired(
    staking_outpoint: OutPoint,
    staking_output_value: Amount,
    staking_scripts: &Scripts,
    timelock_blocks: u32,
    destination_script: ScriptBuf,
    guard: &WithdrawalGuard,
    fee_sat: u64,
) -> Result<BuiltPsbt, BuildError> {
    withdraw(
        staking_outpoint,
        staking_output_value,
        staking_scripts,
        Leaf::Timelock,
        timelock_blocks,
        destination_script,
        guard,
        fee_sat,
    )
}

/// `withdraw_early_unbonded` (spec §4.C): spends the unbonding output's
/// timelock leaf, `nSequence = unbonding_time_blocks`.
#[allow(clippy::too_many_arguments)]
pub fn withdraw_early_unbonded(
    unbonding_outpoint: OutPoint,
    unbonding_output_value: Amount,
    unbonding_output_scripts: &Scripts,
    unbonding_time_blocks: u32,
    destination_script: ScriptBuf,
    guard: &WithdrawalGuard,
    fee_sat: u64,
) -> Result<BuiltPsbt, BuildError> {
    withdraw(
        unbonding_outpoint,
        unbonding_output_value,
        unbonding_output_scripts,
        Leaf::Timelock,
        unbonding_time_blocks,
        destination_script,
        guard,
        fee_sat,
    )
}

/// `withdraw_slashed` (spec §4.C): spends a slashing transaction's
/// staker-timelock change output, `nSequence = unbonding_time_blocks`.
#[allow(clippy::too_many_arguments)]
pub fn withdraw_slashed(
    slashing_change_outpoint: OutPoint,
    slashing_change_value: Amount,
    post_slashing_scripts: &Scripts,
    unbonding_time_blocks: u32,
    destination_script: ScriptBuf,
    guard: &WithdrawalGuard,
    fee_sat: u64,
) -> Result<BuiltPsbt, BuildError> {
    withdraw(
        slashing_change_outpoint,
        slashing_change_value,
        post_slashing_scripts,
        Leaf::Timelock,
        unbonding_time_blocks,
        destination_script,
        guard,
        fee_sat,
    )
}

/// Shared shape for the two `slashing` constructors (spec §4.C): spend a
/// slashing-leaf input into `slashing_pk_script` plus a staker-timelock
/// change output.
fn slashing(
    outpoint: OutPoint,
    input_value: Amount,
    source_scripts: &Scripts,
    post_slashing_scripts: &Scripts,
    slashing_rate: f64,
    slashing_pk_script: ScriptBuf,
    min_slashing_tx_fee_sat: u64,
    fee_sat: u64,
) -> Result<BuiltPsbt, BuildError> {
    if fee_sat < min_slashing_tx_fee_sat {
        return Err(BuildError::SlashingFeeTooLow {
            min: min_slashing_tx_fee_sat,
            got: fee_sat,
        });
    }

    let input_sat = input_value.to_sat();
    let slashed_sat = (input_sat as f64 * slashing_rate).floor() as u64;
    let change_sat = input_sat
        .checked_sub(slashed_sat)
        .and_then(|v| v.checked_sub(fee_sat))
        .ok_or_else(|| {
            BuildError::InvalidOutput("slashed amount plus fee exceeds input value".into())
        })?;

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![plain_input(outpoint, Sequence::ENABLE_RBF_NO_LOCKTIME)],
        output: vec![
            TxOut {
                value: Amount::from_sat(slashed_sat),
                script_pubkey: slashing_pk_script,
            },
            TxOut {
                value: Amount::from_sat(change_sat),
                script_pubkey: post_slashing_scripts.staking_output_script(),
            },
        ],
    };
    let mut psbt = Psbt::from_unsigned_tx(tx).map_err(|e| BuildError::Psbt(e.to_string()))?;
    set_witness_utxo(
        &mut psbt,
        0,
        input_value,
        source_scripts.staking_output_script(),
    );
    set_tap_script_path(&mut psbt, 0, source_scripts, Leaf::Slashing)?;

    Ok(BuiltPsbt { psbt, fee_sat })
}

/// `slashing` from the staking output (spec §4.C table, row "slashing (staking)").
#[allow(clippy::too_many_arguments)]
pub fn slashing_from_staking(
    staking_outpoint: OutPoint,
    staking_output_value: Amount,
    staking_scripts: &Scripts,
    post_slashing_scripts: &Scripts,
    slashing_rate: f64,
    slashing_pk_script: ScriptBuf,
    min_slashing_tx_fee_sat: u64,
    fee_sat: u64,
) -> Result<BuiltPsbt, BuildError> {
    slashing(
        staking_outpoint,
        staking_output_value,
        staking_scripts,
        post_slashing_scripts,
        slashing_rate,
        slashing_pk_script,
        min_slashing_tx_fee_sat,
        fee_sat,
    )
}

/// `slashing` from the unbonding output (spec §4.C table, row "slashing (unbonding)").
#[allow(clippy::too_many_arguments)]
pub fn slashing_from_unbonding(
    unbonding_outpoint: OutPoint,
    unbonding_output_value: Amount,
    unbonding_output_scripts: &Scripts,
    post_slashing_scripts: &Scripts,
    slashing_rate: f64,
    slashing_pk_script: ScriptBuf,
    min_slashing_tx_fee_sat: u64,
    fee_sat: u64,
) -> Result<BuiltPsbt, BuildError> {
    slashing(
        unbonding_outpoint,
        unbonding_output_value,
        unbonding_output_scripts,
        post_slashing_scripts,
        slashing_rate,
        slashing_pk_script,
        min_slashing_tx_fee_sat,
        fee_sat,
    )
}
