//! Delegation Manager (spec §4.H): orchestrates the pre- and
//! post-registration protocol flow over two host-provided traits.

use std::collections::BTreeMap;

use bitcoin::secp256k1::schnorr::Signature as SchnorrSignature;
use bitcoin::{Address, Network, OutPoint, ScriptBuf, Transaction, XOnlyPublicKey};
use thiserror::Error;

use crate::model::{Delegation, InclusionProof, StakerInfo, StakingInput};
use crate::params::{ParamsError, ParamsRegistry};
use crate::psbt_integrity::{self, IntegrityError};
use crate::pop::{self, PopFormat, ProofOfPossession, UpgradeGate};
use crate::script::{self, Leaf, ScriptError, ScriptParams, Scripts};
use crate::tx::{self, BuildError, BuiltPsbt};
use crate::utxo::{self, SelectionError, Utxo};
use crate::withdrawal_guard::{GuardError, WithdrawalGuard};

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error(transparent)]
    Params(#[from] ParamsError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("malformed signature: expected a 64-byte Schnorr signature at the signing slot")]
    MalformedSignature,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("external call failed ({kind}): {cause}")]
    External { kind: &'static str, cause: String },
}

impl From<SelectionError> for ManagerError {
    fn from(e: SelectionError) -> Self {
        ManagerError::Build(BuildError::Selection(e))
    }
}

/// A UTXO as reported by the host's [`BtcSigner`], before it is converted
/// into the library's internal [`Utxo`] representation.
#[derive(Debug, Clone)]
pub struct RawUtxo {
    pub txid: bitcoin::Txid,
    pub vout: u32,
    pub value_sat: u64,
    pub script_hex: String,
}

/// Host-provided Bitcoin signer (spec §6 `BtcSigner`).
///
/// Methods are plain `async fn`, not `dyn`-compatible by design (spec's
/// "generic over two host-provided traits" note in §4.H): this keeps the
/// manager free of dynamic dispatch for callers who supply a concrete type,
/// while [`DynBtcSigner`] (behind the `dynamic` feature) covers callers who
/// need a trait object.
pub trait BtcSigner {
    /// Returns a PSBT differing from `psbt` only in witness/partial-signature
    /// fields.
    async fn sign_psbt(&self, psbt: &bitcoin::psbt::Psbt) -> Result<bitcoin::psbt::Psbt, String>;

    /// Signs an arbitrary message with the staker key; `tag` is always
    /// [`crate::pop::SIGNATURE_TAG`] for proof-of-possession calls.
    async fn sign_message(&self, message: &[u8], tag: &str) -> Result<Vec<u8>, String>;

    async fn get_staker_info(&self) -> Result<StakerInfo, String>;

    async fn get_utxos(&self) -> Result<Vec<RawUtxo>, String>;
}

/// Host-provided control-chain client (spec §6 `ControlChainClient`).
pub trait ControlChainClient {
    /// The chain's view of the Bitcoin tip; may lag the real tip.
    async fn get_btc_tip_height(&self) -> Result<u32, String>;

    async fn get_address(&self) -> Result<String, String>;

    async fn get_chain_id(&self) -> Result<String, String>;

    /// Signs and submits `message`, returning a ready-to-broadcast control
    /// chain transaction.
    async fn sign_message(&self, message: &RegistrationMessage) -> Result<Vec<u8>, String>;
}

/// One `(covenant_btc_pk, signature)` pair supplied out-of-band after
/// covenants have signed an unbonding spend (spec §4.H "covenant witness
/// assembly").
#[derive(Debug, Clone)]
pub struct CovenantSignature {
    pub covenant_key: XOnlyPublicKey,
    pub signature: [u8; 64],
}

/// Transitions reported to an optional observer (spec §5): synchronous,
/// non-suspending, emitted on the caller's thread before the corresponding
/// external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningPhase {
    StakingSlashing,
    UnbondingSlashing,
    ProofOfPossession,
    ControlChainMessage,
}

/// Every artifact produced by [`DelegationManager::build_intent`] (spec
/// §4.H step 1-7), ready for a host to inspect or serialize before calling
/// [`DelegationManager::sign_and_register`].
#[derive(Debug, Clone)]
pub struct Intent {
    pub params_version: u32,
    pub staker_info: StakerInfo,
    pub staking_input: StakingInput,
    pub staking_scripts: Scripts,
    pub unbonding_scripts: Scripts,
    pub staking_psbt: BuiltPsbt,
    pub unbonding_psbt: BuiltPsbt,
    pub slashing_from_staking_psbt: BuiltPsbt,
    pub slashing_from_unbonding_psbt: BuiltPsbt,
    pub post_slashing_scripts: Scripts,
}

/// The protobuf-shaped registration record (spec §6 "Registration message
/// wire form"). Transaction bytes are canonical Bitcoin serialization with
/// `scriptSig` zeroed and witnesses stripped; signatures travel out-of-band.
#[derive(Debug, Clone)]
pub struct RegistrationMessage {
    pub staker_address: Address,
    pub staker_key: XOnlyPublicKey,
    pub finality_provider_key: XOnlyPublicKey,
    pub timelock_blocks: u32,
    pub staking_value_sat: u64,
    pub unbonding_tx_bytes: Vec<u8>,
    pub unbonding_value_sat: u64,
    pub slashing_tx_bytes: Vec<u8>,
    pub delegator_slashing_signatures: Vec<[u8; 64]>,
    pub proof_of_possession: ProofOfPossession,
    pub pop_signature: Vec<u8>,
    pub unbonding_time_blocks: u32,
    pub inclusion_proof: Option<InclusionProof>,
}

/// Orchestrates the full protocol over a read-only [`ParamsRegistry`] and
/// borrowed host implementations (spec §5 "Shared-resource policy").
pub struct DelegationManager<'a, S, C> {
    registry: &'a ParamsRegistry,
    signer: &'a S,
    client: &'a C,
    network: Network,
    upgrade: Option<UpgradeGate>,
    observer: Option<&'a dyn Fn(SigningPhase)>,
}

impl<'a, S, C> DelegationManager<'a, S, C>
where
    S: BtcSigner,
    C: ControlChainClient,
{
    pub fn new(registry: &'a ParamsRegistry, signer: &'a S, client: &'a C, network: Network) -> Self {
        Self {
            registry,
            signer,
            client,
            network,
            upgrade: None,
            observer: None,
        }
    }

    /// Configure the proof-of-possession height gate (spec §4.G).
    pub fn with_pop_upgrade(mut self, upgrade: UpgradeGate) -> Self {
        self.upgrade = Some(upgrade);
        self
    }

    /// Configure the observer callback (spec §5).
    pub fn with_observer(mut self, observer: &'a dyn Fn(SigningPhase)) -> Self {
        self.observer = Some(observer);
        self
    }

    fn emit(&self, phase: SigningPhase) {
        if let Some(observer) = self.observer {
            observer(phase);
        }
    }

    /// Build every unsigned artifact for one delegation (spec §4.H steps 1-7).
    pub async fn build_intent(
        &self,
        staking_input: StakingInput,
        fee_rate_sat_per_vbyte: f64,
    ) -> Result<Intent, ManagerError> {
        let tip_height = self
            .client
            .get_btc_tip_height()
            .await
            .map_err(|cause| ManagerError::External {
                kind: "control_chain_tip_height",
                cause,
            })?;

        let params = self.registry.by_btc_height(tip_height)?;

        let staker_info = self
            .signer
            .get_staker_info()
            .await
            .map_err(|cause| ManagerError::External {
                kind: "btc_signer_staker_info",
                cause,
            })?;

        let raw_utxos = self
            .signer
            .get_utxos()
            .await
            .map_err(|cause| ManagerError::External {
                kind: "btc_signer_utxos",
                cause,
            })?;
        if raw_utxos.is_empty() {
            return Err(ManagerError::InvalidInput("no UTXOs available".into()));
        }

        if staking_input.amount_sat < params.min_staking_amount_sat
            || staking_input.amount_sat > params.max_staking_amount_sat
        {
            return Err(ManagerError::InvalidInput(format!(
                "amount {} sat out of range [{}, {}]",
                staking_input.amount_sat,
                params.min_staking_amount_sat,
                params.max_staking_amount_sat
            )));
        }
        if staking_input.timelock_blocks < params.min_staking_time_blocks
            || staking_input.timelock_blocks > params.max_staking_time_blocks
        {
            return Err(ManagerError::InvalidInput(
                "timelock out of range".to_string(),
            ));
        }

        let utxos = raw_utxos
            .into_iter()
            .map(|u| {
                let bytes = hex::decode(&u.script_hex)
                    .map_err(|e| ManagerError::InvalidInput(format!("invalid UTXO script hex: {e}")))?;
                Ok(Utxo {
                    outpoint: OutPoint {
                        txid: u.txid,
                        vout: u.vout,
                    },
                    value: bitcoin::Amount::from_sat(u.value_sat),
                    script_pubkey: ScriptBuf::from_bytes(bytes),
                    tap_internal_key: None,
                })
            })
            .collect::<Result<Vec<_>, ManagerError>>()?;

        let change_script = staker_info.address.script_pubkey();
        let selection = utxo::select_utxos(
            utxos,
            staking_input.amount_sat,
            &change_script,
            fee_rate_sat_per_vbyte,
            1,
        )?;

        let staking_scripts = script::build_scripts(&ScriptParams {
            staker_key: staker_info.xonly_key,
            finality_provider_key: staking_input.finality_provider_key,
            timelock_blocks: staking_input.timelock_blocks,
            params,
            network: self.network,
            observable: None,
        })?;

        let staking_psbt = tx::staking(
            &selection.inputs,
            &staking_scripts,
            staking_input.amount_sat,
            Some(&change_script),
            selection.change_sat,
            selection.fee_sat,
            tx::ObservableFlag::Standard,
        )?;

        let staking_outpoint = OutPoint {
            txid: staking_psbt.psbt.unsigned_tx.txid(),
            vout: 0,
        };
        let staking_output_value = staking_psbt.psbt.unsigned_tx.output[0].value;

        let unbonding_scripts = script::build_unbonding_output_scripts(
            &staker_info.xonly_key,
            &staking_input.finality_provider_key,
            params,
            self.network,
        )?;

        let unbonding_psbt = tx::unbonding(
            staking_outpoint,
            staking_output_value,
            &staking_scripts,
            &unbonding_scripts,
            params.unbonding_fee_sat,
        )?;

        let post_slashing_scripts = script::build_post_slashing_change_scripts(
            &staker_info.xonly_key,
            params.unbonding_time_blocks,
            self.network,
        )?;

        let slashing_from_staking_psbt = tx::slashing_from_staking(
            staking_outpoint,
            staking_output_value,
            &staking_scripts,
            &post_slashing_scripts,
            params.slashing_rate,
            ScriptBuf::from_bytes(params.slashing_pk_script.clone()),
            params.min_slashing_tx_fee_sat,
            params.min_slashing_tx_fee_sat,
        )?;

        let unbonding_outpoint = OutPoint {
            txid: unbonding_psbt.psbt.unsigned_tx.txid(),
            vout: 0,
        };
        let unbonding_output_value = unbonding_psbt.psbt.unsigned_tx.output[0].value;

        let slashing_from_unbonding_psbt = tx::slashing_from_unbonding(
            unbonding_outpoint,
            unbonding_output_value,
            &unbonding_scripts,
            &post_slashing_scripts,
            params.slashing_rate,
            ScriptBuf::from_bytes(params.slashing_pk_script.clone()),
            params.min_slashing_tx_fee_sat,
            params.min_slashing_tx_fee_sat,
        )?;

        Ok(Intent {
            params_version: params.version,
            staker_info,
            staking_input,
            staking_scripts,
            unbonding_scripts,
            staking_psbt,
            unbonding_psbt,
            slashing_from_staking_psbt,
            slashing_from_unbonding_psbt,
            post_slashing_scripts,
        })
    }

    /// Have the signer sign `built.psbt`, validate it against the unsigned
    /// template (§4.D), and extract the 64-byte Schnorr signature from the
    /// first input's witness (spec §4.H step 1).
    async fn sign_and_extract(
        &self,
        built: &BuiltPsbt,
        external_kind: &'static str,
    ) -> Result<[u8; 64], ManagerError> {
        let signed = self
            .signer
            .sign_psbt(&built.psbt)
            .await
            .map_err(|cause| ManagerError::External {
                kind: external_kind,
                cause,
            })?;
        psbt_integrity::validate(&built.psbt, &signed)?;
        log::debug!("signer round-trip for {} passed integrity validation", external_kind);

        let witness = &signed.unsigned_tx.input[0].witness;
        let element = witness
            .iter()
            .next()
            .ok_or(ManagerError::MalformedSignature)?;
        let sig: [u8; 64] = element
            .try_into()
            .map_err(|_| ManagerError::MalformedSignature)?;
        Ok(sig)
    }

    /// Sign and register a delegation built by [`build_intent`] (spec §4.H
    /// "Sign-and-register step"), with no inclusion proof (pre-broadcast
    /// "expression of intent" path).
    pub async fn sign_and_register(&self, intent: &Intent) -> Result<Vec<u8>, ManagerError> {
        self.sign_and_register_inner(intent, None).await
    }

    /// As [`sign_and_register`], but for a staking transaction already
    /// on-chain (spec §4.H "Post-registration"): the message additionally
    /// carries `proof`.
    pub async fn sign_and_register_with_inclusion_proof(
        &self,
        intent: &Intent,
        proof: InclusionProof,
    ) -> Result<Vec<u8>, ManagerError> {
        self.sign_and_register_inner(intent, Some(proof)).await
    }

    async fn sign_and_register_inner(
        &self,
        intent: &Intent,
        inclusion_proof: Option<InclusionProof>,
    ) -> Result<Vec<u8>, ManagerError> {
        self.emit(SigningPhase::StakingSlashing);
        let staking_slashing_sig = self
            .sign_and_extract(&intent.slashing_from_staking_psbt, "btc_signer_slashing_staking")
            .await?;

        self.emit(SigningPhase::UnbondingSlashing);
        let unbonding_slashing_sig = self
            .sign_and_extract(
                &intent.slashing_from_unbonding_psbt,
                "btc_signer_slashing_unbonding",
            )
            .await?;

        let chain_id = self
            .client
            .get_chain_id()
            .await
            .map_err(|cause| ManagerError::External {
                kind: "control_chain_id",
                cause,
            })?;
        let module_address = self
            .client
            .get_address()
            .await
            .map_err(|cause| ManagerError::External {
                kind: "control_chain_address",
                cause,
            })?;
        let tip_height = self
            .client
            .get_btc_tip_height()
            .await
            .map_err(|cause| ManagerError::External {
                kind: "control_chain_tip_height",
                cause,
            })?;

        self.emit(SigningPhase::ProofOfPossession);
        let pop = pop::build(&module_address, tip_height, self.upgrade, &chain_id, &module_address);
        let pop_signature = self
            .signer
            .sign_message(&pop.message, pop::SIGNATURE_TAG)
            .await
            .map_err(|cause| ManagerError::External {
                kind: "btc_signer_proof_of_possession",
                cause,
            })?;

        let message = RegistrationMessage {
            staker_address: intent.staker_info.address.clone(),
            staker_key: intent.staker_info.xonly_key,
            finality_provider_key: intent.staking_input.finality_provider_key,
            timelock_blocks: intent.staking_input.timelock_blocks,
            staking_value_sat: intent.staking_psbt.psbt.unsigned_tx.output[0].value.to_sat(),
            unbonding_tx_bytes: stripped_tx_bytes(&intent.unbonding_psbt.psbt.unsigned_tx),
            unbonding_value_sat: intent.unbonding_psbt.psbt.unsigned_tx.output[0].value.to_sat(),
            slashing_tx_bytes: stripped_tx_bytes(&intent.slashing_from_staking_psbt.psbt.unsigned_tx),
            delegator_slashing_signatures: vec![staking_slashing_sig, unbonding_slashing_sig],
            proof_of_possession: pop,
            pop_signature,
            unbonding_time_blocks: tip_height, // placeholder replaced below
            inclusion_proof,
        };
        // `unbonding_time_blocks` is a delegation-family constant, not derived
        // from `tip_height`; fix it up from the params used to build the intent.
        let message = RegistrationMessage {
            unbonding_time_blocks: self
                .registry
                .by_version(intent.params_version)?
                .unbonding_time_blocks,
            ..message
        };

        self.emit(SigningPhase::ControlChainMessage);
        self.client
            .sign_message(&message)
            .await
            .map_err(|cause| ManagerError::External {
                kind: "control_chain_sign_message",
                cause,
            })
    }

    /// Assemble the unbonding-leaf spend witness after covenants have signed
    /// out-of-band (spec §4.H "Covenant witness assembly", §9 "Covenant
    /// witness stack"): `[staker_sig, cov_sig_N or empty, …, cov_sig_1 or
    /// empty, leaf_script, control_block]`.
    pub fn assemble_covenant_witness(
        &self,
        scripts: &Scripts,
        staker_signature: [u8; 64],
        covenant_signatures: &[CovenantSignature],
        covenant_keys_sorted: &[XOnlyPublicKey],
    ) -> Result<bitcoin::Witness, ManagerError> {
        let by_key: BTreeMap<[u8; 32], [u8; 64]> = covenant_signatures
            .iter()
            .map(|c| (c.covenant_key.serialize(), c.signature))
            .collect();

        let mut witness = bitcoin::Witness::new();
        witness.push(staker_signature);
        for key in covenant_keys_sorted.iter().rev() {
            match by_key.get(&key.serialize()) {
                Some(sig) => witness.push(sig),
                None => witness.push(&[] as &[u8]),
            }
        }

        let (control_block, leaf_script, _leaf_version) = scripts.control_block_struct(Leaf::Unbonding)?;
        witness.push(leaf_script.as_bytes());
        witness.push(control_block.serialize());

        Ok(witness)
    }

    pub fn registry(&self) -> &ParamsRegistry {
        self.registry
    }
}

/// Build a [`WithdrawalGuard`] for a post-registration withdrawal, covering
/// the same staker key used throughout a [`Delegation`] (spec §4.E reuse
/// note).
pub fn withdrawal_guard_for(delegation: &Delegation, network: Network) -> WithdrawalGuard {
    WithdrawalGuard::from_xonly(delegation.staker_key, network)
}

/// Canonical Bitcoin serialization with `scriptSig` zeroed and witnesses
/// emptied (spec §6 "Registration message wire form").
fn stripped_tx_bytes(tx: &Transaction) -> Vec<u8> {
    use bitcoin::consensus::Encodable;

    let mut stripped = tx.clone();
    for input in &mut stripped.input {
        input.script_sig = ScriptBuf::new();
        input.witness = bitcoin::Witness::new();
    }
    let mut bytes = Vec::new();
    stripped
        .consensus_encode(&mut bytes)
        .expect("Vec<u8> writer is infallible");
    bytes
}

/// Convert a verified 64-byte Schnorr signature extracted from a witness
/// into its typed form (used by hosts that want to inspect/log it).
pub fn schnorr_signature(bytes: [u8; 64]) -> Result<SchnorrSignature, ManagerError> {
    SchnorrSignature::from_slice(&bytes).map_err(|_| ManagerError::MalformedSignature)
}

#[cfg(feature = "dynamic")]
pub mod dynamic {
    //! Object-safe wrappers over [`BtcSigner`]/[`ControlChainClient`] for
    //! hosts that need trait objects (e.g. a plugin architecture), grounded
    //! in the pack's own `async_trait`-based host-client traits.

    use async_trait::async_trait;

    use super::{BtcSigner, ControlChainClient, RawUtxo, RegistrationMessage};
    use crate::model::StakerInfo;

    #[async_trait]
    pub trait DynBtcSigner: Send + Sync {
        async fn sign_psbt(&self, psbt: &bitcoin::psbt::Psbt) -> Result<bitcoin::psbt::Psbt, String>;
        async fn sign_message(&self, message: &[u8], tag: &str) -> Result<Vec<u8>, String>;
        async fn get_staker_info(&self) -> Result<StakerInfo, String>;
        async fn get_utxos(&self) -> Result<Vec<RawUtxo>, String>;
    }

    #[async_trait]
    impl<T> DynBtcSigner for T
    where
        T: BtcSigner + Send + Sync,
    {
        async fn sign_psbt(&self, psbt: &bitcoin::psbt::Psbt) -> Result<bitcoin::psbt::Psbt, String> {
            BtcSigner::sign_psbt(self, psbt).await
        }
        async fn sign_message(&self, message: &[u8], tag: &str) -> Result<Vec<u8>, String> {
            BtcSigner::sign_message(self, message, tag).await
        }
        async fn get_staker_info(&self) -> Result<StakerInfo, String> {
            BtcSigner::get_staker_info(self).await
        }
        async fn get_utxos(&self) -> Result<Vec<RawUtxo>, String> {
            BtcSigner::get_utxos(self).await
        }
    }

    #[async_trait]
    pub trait DynControlChainClient: Send + Sync {
        async fn get_btc_tip_height(&self) -> Result<u32, String>;
        async fn get_address(&self) -> Result<String, String>;
        async fn get_chain_id(&self) -> Result<String, String>;
        async fn sign_message(&self, message: &RegistrationMessage) -> Result<Vec<u8>, String>;
    }

    #[async_trait]
    impl<T> DynControlChainClient for T
    where
        T: ControlChainClient + Send + Sync,
    {
        async fn get_btc_tip_height(&self) -> Result<u32, String> {
            ControlChainClient::get_btc_tip_height(self).await
        }
        async fn get_address(&self) -> Result<String, String> {
            ControlChainClient::get_address(self).await
        }
        async fn get_chain_id(&self) -> Result<String, String> {
            ControlChainClient::get_chain_id(self).await
        }
        async fn sign_message(&self, message: &RegistrationMessage) -> Result<Vec<u8>, String> {
            ControlChainClient::sign_message(self, message).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_params, test_xonly_key};
    use bitcoin::hashes::Hash as _;
    use bitcoin::secp256k1::Secp256k1;
    use std::sync::Mutex;

    struct FakeSigner {
        staker_info: StakerInfo,
        utxos: Vec<RawUtxo>,
        sign_psbt_mutator: fn(bitcoin::psbt::Psbt) -> bitcoin::psbt::Psbt,
    }

    impl BtcSigner for FakeSigner {
        async fn sign_psbt(&self, psbt: &bitcoin::psbt::Psbt) -> Result<bitcoin::psbt::Psbt, String> {
            let mut signed = psbt.clone();
            signed.unsigned_tx.input[0].witness.push(vec![7u8; 64]);
            signed = (self.sign_psbt_mutator)(signed);
            Ok(signed)
        }
        async fn sign_message(&self, _message: &[u8], _tag: &str) -> Result<Vec<u8>, String> {
            Ok(vec![9u8; 64])
        }
        async fn get_staker_info(&self) -> Result<StakerInfo, String> {
            Ok(self.staker_info.clone())
        }
        async fn get_utxos(&self) -> Result<Vec<RawUtxo>, String> {
            Ok(self.utxos.clone())
        }
    }

    struct FakeClient {
        tip_height: u32,
        sent: Mutex<Option<RegistrationMessage>>,
    }

    impl ControlChainClient for FakeClient {
        async fn get_btc_tip_height(&self) -> Result<u32, String> {
            Ok(self.tip_height)
        }
        async fn get_address(&self) -> Result<String, String> {
            Ok("bbn1module".to_string())
        }
        async fn get_chain_id(&self) -> Result<String, String> {
            Ok("bbn-test-1".to_string())
        }
        async fn sign_message(&self, message: &RegistrationMessage) -> Result<Vec<u8>, String> {
            *self.sent.lock().unwrap() = Some(message.clone());
            Ok(vec![1, 2, 3])
        }
    }

    fn fake_utxo(vout: u32, value: u64) -> RawUtxo {
        RawUtxo {
            txid: bitcoin::Txid::from_byte_array([vout as u8 + 1; 32]),
            vout,
            value_sat: value,
            script_hex: hex::encode(p2wpkh_script().as_bytes()),
        }
    }

    fn p2wpkh_script() -> ScriptBuf {
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[9u8; 32]).unwrap();
        let pk = bitcoin::PublicKey::new(bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk));
        bitcoin::Address::p2wpkh(&pk, Network::Testnet)
            .unwrap()
            .script_pubkey()
    }

    fn fake_staker_info() -> StakerInfo {
        let secp = Secp256k1::new();
        let key = test_xonly_key(1);
        let address = Address::p2tr(&secp, key, None, Network::Testnet);
        StakerInfo {
            address,
            xonly_key: key,
            network: Network::Testnet,
        }
    }

    #[tokio::test]
    async fn happy_path_build_intent_matches_scenario_1() {
        let params = sample_params();
        let registry = ParamsRegistry::load(vec![params]).unwrap();
        let signer = FakeSigner {
            staker_info: fake_staker_info(),
            utxos: vec![fake_utxo(0, 150_000)],
            sign_psbt_mutator: |p| p,
        };
        let client = FakeClient {
            tip_height: 100,
            sent: Mutex::new(None),
        };
        let manager = DelegationManager::new(&registry, &signer, &client, Network::Testnet);

        let intent = manager
            .build_intent(
                StakingInput {
                    finality_provider_key: test_xonly_key(2),
                    amount_sat: 100_000,
                    timelock_blocks: 150,
                },
                1.0,
            )
            .await
            .unwrap();

        assert_eq!(
            intent.staking_psbt.psbt.unsigned_tx.output[0].value.to_sat(),
            100_000
        );
        assert_eq!(
            intent.unbonding_psbt.psbt.unsigned_tx.output[0].value.to_sat(),
            98_000,
            "scenario 1: unbonding_value = 98000"
        );
        assert_eq!(
            intent
                .slashing_from_staking_psbt
                .psbt
                .unsigned_tx
                .output[0]
                .value
                .to_sat(),
            10_000,
            "scenario 1: slashing_output_value = 10000"
        );
    }

    #[tokio::test]
    async fn timelock_out_of_range_is_rejected_scenario_4() {
        let params = sample_params();
        let registry = ParamsRegistry::load(vec![params.clone()]).unwrap();
        let signer = FakeSigner {
            staker_info: fake_staker_info(),
            utxos: vec![fake_utxo(0, 150_000)],
            sign_psbt_mutator: |p| p,
        };
        let client = FakeClient {
            tip_height: 100,
            sent: Mutex::new(None),
        };
        let manager = DelegationManager::new(&registry, &signer, &client, Network::Testnet);

        let err = manager
            .build_intent(
                StakingInput {
                    finality_provider_key: test_xonly_key(2),
                    amount_sat: 100_000,
                    timelock_blocks: params.max_staking_time_blocks + 1,
                },
                1.0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn insufficient_funds_is_rejected_scenario_5() {
        let params = sample_params();
        let registry = ParamsRegistry::load(vec![params]).unwrap();
        let signer = FakeSigner {
            staker_info: fake_staker_info(),
            utxos: vec![fake_utxo(0, 1_000)],
            sign_psbt_mutator: |p| p,
        };
        let client = FakeClient {
            tip_height: 100,
            sent: Mutex::new(None),
        };
        let manager = DelegationManager::new(&registry, &signer, &client, Network::Testnet);

        let err = manager
            .build_intent(
                StakingInput {
                    finality_provider_key: test_xonly_key(2),
                    amount_sat: 100_000,
                    timelock_blocks: 150,
                },
                1.0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Build(BuildError::Selection(_))));
    }

    #[tokio::test]
    async fn tampered_unbonding_psbt_is_rejected_scenario_3() {
        let params = sample_params();
        let registry = ParamsRegistry::load(vec![params]).unwrap();
        let signer = FakeSigner {
            staker_info: fake_staker_info(),
            utxos: vec![fake_utxo(0, 150_000)],
            sign_psbt_mutator: |mut p| {
                let v = p.unsigned_tx.output[0].value.to_sat();
                p.unsigned_tx.output[0].value = bitcoin::Amount::from_sat(v - 1);
                p
            },
        };
        let client = FakeClient {
            tip_height: 100,
            sent: Mutex::new(None),
        };
        let manager = DelegationManager::new(&registry, &signer, &client, Network::Testnet);

        let intent = manager
            .build_intent(
                StakingInput {
                    finality_provider_key: test_xonly_key(2),
                    amount_sat: 100_000,
                    timelock_blocks: 150,
                },
                1.0,
            )
            .await
            .unwrap();

        let err = manager
            .sign_and_extract(&intent.unbonding_psbt, "test")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Integrity(IntegrityError::Mismatch {
                field: "output_value",
                index: 0,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn sign_and_register_assembles_message() {
        let params = sample_params();
        let registry = ParamsRegistry::load(vec![params]).unwrap();
        let signer = FakeSigner {
            staker_info: fake_staker_info(),
            utxos: vec![fake_utxo(0, 150_000)],
            sign_psbt_mutator: |p| p,
        };
        let client = FakeClient {
            tip_height: 100,
            sent: Mutex::new(None),
        };
        let manager = DelegationManager::new(&registry, &signer, &client, Network::Testnet);

        let intent = manager
            .build_intent(
                StakingInput {
                    finality_provider_key: test_xonly_key(2),
                    amount_sat: 100_000,
                    timelock_blocks: 150,
                },
                1.0,
            )
            .await
            .unwrap();

        let result = manager.sign_and_register(&intent).await.unwrap();
        assert_eq!(result, vec![1, 2, 3]);

        let sent = client.sent.lock().unwrap().clone().unwrap();
        assert_eq!(sent.unbonding_value_sat, 98_000);
        assert_eq!(sent.delegator_slashing_signatures.len(), 2);
        assert_eq!(sent.proof_of_possession.format, PopFormat::Legacy);
        assert!(sent.inclusion_proof.is_none());
    }
}
