//! Bitcoin two-chain staking protocol client library
//!
//! Builds, inspects, and signs the Bitcoin transaction family (staking,
//! unbonding, slashing, withdrawal) behind a BTC-backed delegation to a
//! sovereign control chain, over a Taproot script-path-only output whose
//! internal key is provably unspendable.
//!
//! # Layout
//!
//! - [`script`] — Taproot leaf assembly (timelock, unbonding, slashing, and
//!   the optional observable data-embed leaf).
//! - [`utxo`] — UTXO selection and fee estimation.
//! - [`tx`] — the Transaction Builder: unsigned PSBTs for every spend path.
//! - [`psbt_integrity`] — defends a hand-off/return signer round-trip.
//! - [`withdrawal_guard`] — restricts withdrawal destinations to the
//!   staker's own addresses.
//! - [`params`] — the versioned parameter registry.
//! - [`pop`] — proof-of-possession message construction.
//! - [`manager`] — orchestrates the full protocol over host-provided
//!   signer/control-chain traits.
//! - [`model`] — shared data types ([`model::StakerInfo`],
//!   [`model::StakingInput`], [`model::Delegation`]).

pub mod constants;
pub mod error;
pub mod manager;
pub mod model;
pub mod params;
pub mod pop;
pub mod psbt_integrity;
pub mod script;
pub mod tx;
pub mod utxo;
pub mod withdrawal_guard;

mod test_utils;

pub use error::StakingError;
pub use manager::{
    BtcSigner, ControlChainClient, CovenantSignature, DelegationManager, Intent,
    RegistrationMessage, SigningPhase,
};
pub use model::{Delegation, InclusionProof, StakerInfo, StakingInput};
pub use params::{Params, ParamsRegistry};
pub use pop::{ProofOfPossession, UpgradeGate};
pub use script::{Leaf, Scripts};
pub use tx::{BuiltPsbt, ObservableFlag};
pub use utxo::{Selection, Utxo};
pub use withdrawal_guard::WithdrawalGuard;

/// Convenience alias for this crate's top-level error.
pub type Result<T> = std::result::Result<T, StakingError>;
