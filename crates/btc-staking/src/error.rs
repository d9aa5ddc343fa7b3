//! Crate-wide error type.
//!
//! Each component keeps its own error enum; they compose into [`StakingError`]
//! via `#[from]` so callers can match on a single type while still getting the
//! precise per-component variant through `source()`.

use thiserror::Error;

use crate::manager::ManagerError;
use crate::params::ParamsError;
use crate::psbt_integrity::IntegrityError;
use crate::script::ScriptError;
use crate::tx::BuildError;
use crate::utxo::SelectionError;
use crate::withdrawal_guard::GuardError;

/// Top-level error for every fallible operation this crate exposes.
#[derive(Error, Debug)]
pub enum StakingError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid output: {0}")]
    InvalidOutput(String),

    #[error("script build failure: {0}")]
    ScriptBuildFailure(#[from] ScriptError),

    #[error("transaction build failure: {0}")]
    BuildTransactionFailure(#[from] BuildError),

    #[error(
        "PSBT integrity violation in {field} at index {index}: expected {expected}, got {got}"
    )]
    PsbtIntegrityViolation {
        field: &'static str,
        index: usize,
        expected: String,
        got: String,
    },

    #[error("malformed signature: expected a 64-byte Schnorr signature at the signing slot")]
    MalformedSignature,

    #[error("no applicable parameter version for Bitcoin height {0}")]
    NoApplicableParams(u32),

    #[error("unknown parameter version {0}")]
    UnknownVersion(u32),

    #[error("external call failed ({kind}): {cause}")]
    External { kind: &'static str, cause: String },
}

impl From<ParamsError> for StakingError {
    fn from(e: ParamsError) -> Self {
        match e {
            ParamsError::NoApplicableParams(h) => StakingError::NoApplicableParams(h),
            ParamsError::UnknownVersion(v) => StakingError::UnknownVersion(v),
            other => StakingError::InvalidParams(other.to_string()),
        }
    }
}

impl From<SelectionError> for StakingError {
    fn from(e: SelectionError) -> Self {
        StakingError::BuildTransactionFailure(BuildError::Selection(e))
    }
}

impl From<GuardError> for StakingError {
    fn from(e: GuardError) -> Self {
        match e {
            GuardError::Unauthorized(list) => StakingError::InvalidOutput(format!(
                "unauthorized withdrawal address(es): {}",
                list.join(", ")
            )),
        }
    }
}

impl From<IntegrityError> for StakingError {
    fn from(e: IntegrityError) -> Self {
        match e {
            IntegrityError::Mismatch {
                field,
                index,
                expected,
                got,
            } => StakingError::PsbtIntegrityViolation {
                field,
                index,
                expected,
                got,
            },
        }
    }
}

impl From<ManagerError> for StakingError {
    fn from(e: ManagerError) -> Self {
        match e {
            ManagerError::Params(e) => e.into(),
            ManagerError::Script(e) => StakingError::ScriptBuildFailure(e),
            ManagerError::Build(e) => StakingError::BuildTransactionFailure(e),
            ManagerError::Integrity(e) => e.into(),
            ManagerError::Guard(e) => e.into(),
            ManagerError::MalformedSignature => StakingError::MalformedSignature,
            ManagerError::InvalidInput(s) => StakingError::InvalidInput(s),
            ManagerError::External { kind, cause } => StakingError::External { kind, cause },
        }
    }
}
