//! Taproot leaf script assembly (spec §4.A).
//!
//! Byte layout here is consensus-relevant to the control chain: every
//! ordering rule (sorted covenant keys, canonical leaf depths) must be
//! followed exactly, or a staker's delegation will not match what the
//! control chain independently reconstructs from the same parameters.

use bitcoin::key::TapTweak;
use bitcoin::opcodes::all::{
    OP_CHECKSEQUENCEVERIFY, OP_CHECKSIG, OP_CHECKSIGADD, OP_CHECKSIGVERIFY, OP_NUMEQUAL,
    OP_RETURN,
};
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::taproot::{LeafVersion, TaprootBuilder, TaprootSpendInfo};
use bitcoin::{Address, Network, ScriptBuf, Sequence, XOnlyPublicKey};
use thiserror::Error;

use crate::constants::DATA_EMBED_PAYLOAD_LEN;
use crate::params::Params;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("timelock {0} does not fit in a 16-bit unsigned integer")]
    TimelockOutOfRange(u32),

    #[error("covenant_quorum ({quorum}) exceeds covenant key count ({count})")]
    QuorumExceedsKeys { quorum: u32, count: usize },

    #[error("covenant_quorum must be at least 1")]
    ZeroQuorum,

    #[error("taproot tree assembly failed: {0}")]
    TaprootBuild(String),

    #[error("tag must be exactly 4 bytes for the observable data-embed leaf, got {0}")]
    InvalidTagLength(usize),

    #[error("control block unavailable for the requested leaf")]
    MissingControlBlock,
}

/// The NUMS ("nothing up my sleeve") point used as the Taproot internal key
/// for every staking output. Its discrete log relative to the secp256k1
/// generator is unknown, so the Taproot key-path is provably unspendable and
/// every spend must go through one of the script-path leaves (spec §9).
///
/// This is the standard "H" point documented in BIP-341's reference test
/// vectors and reused by several deployed Taproot-script-only applications.
pub const UNSPENDABLE_INTERNAL_KEY_X: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a, 0x5e,
    0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80, 0x3a, 0xc0,
];

/// The provably-unspendable internal key shared by every staking output.
pub fn unspendable_internal_key() -> XOnlyPublicKey {
    XOnlyPublicKey::from_slice(&UNSPENDABLE_INTERNAL_KEY_X)
        .expect("constant NUMS point is a valid x-only key")
}

/// Which leaf of the [`Scripts`] bundle a control block is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf {
    Timelock,
    Unbonding,
    Slashing,
    DataEmbed,
}

/// The four Taproot leaf scripts making up one delegation (spec §3).
#[derive(Debug, Clone)]
pub struct Scripts {
    pub timelock_script: ScriptBuf,
    pub unbonding_script: ScriptBuf,
    pub slashing_script: ScriptBuf,
    /// Present only for the observable variant.
    pub data_embed_script: Option<ScriptBuf>,
    pub spend_info: TaprootSpendInfo,
    pub network: Network,
}

impl Scripts {
    /// The staking output's address.
    pub fn staking_address(&self) -> Address {
        Address::p2tr_tweaked(self.spend_info.output_key(), self.network)
    }

    /// The staking output's scriptPubKey.
    pub fn staking_output_script(&self) -> ScriptBuf {
        self.staking_address().script_pubkey()
    }

    /// The script for the given leaf.
    fn leaf_script(&self, leaf: Leaf) -> Result<&ScriptBuf, ScriptError> {
        Ok(match leaf {
            Leaf::Timelock => &self.timelock_script,
            Leaf::Unbonding => &self.unbonding_script,
            Leaf::Slashing => &self.slashing_script,
            Leaf::DataEmbed => {
                self.data_embed_script
                    .as_ref()
                    .ok_or(ScriptError::MissingControlBlock)?
            }
        })
    }

    /// Control block + leaf script + leaf version for the requested leaf, as
    /// serialized bytes ready to be pushed onto a witness stack.
    pub fn control_block(
        &self,
        leaf: Leaf,
    ) -> Result<(Vec<u8>, ScriptBuf, LeafVersion), ScriptError> {
        let script = self.leaf_script(leaf)?;
        let cb = self
            .spend_info
            .control_block(&(script.clone(), LeafVersion::TapScript))
            .ok_or(ScriptError::MissingControlBlock)?;
        Ok((cb.serialize(), script.clone(), LeafVersion::TapScript))
    }

    /// Control block + leaf script + leaf version for the requested leaf, as
    /// the structured [`bitcoin::taproot::ControlBlock`] needed to populate a
    /// PSBT input's `tap_scripts` map.
    pub fn control_block_struct(
        &self,
        leaf: Leaf,
    ) -> Result<(bitcoin::taproot::ControlBlock, ScriptBuf, LeafVersion), ScriptError> {
        let script = self.leaf_script(leaf)?;
        let cb = self
            .spend_info
            .control_block(&(script.clone(), LeafVersion::TapScript))
            .ok_or(ScriptError::MissingControlBlock)?;
        Ok((cb, script.clone(), LeafVersion::TapScript))
    }
}

/// Build the M-of-N covenant aggregate script: sorted keys, `OP_CHECKSIG`
/// on the first, `OP_CHECKSIGADD` on the rest, `<quorum> OP_NUMEQUAL` at the
/// end. The sort is consensus-relevant (spec §4.A) — callers MUST NOT pass
/// keys in any other order; [`covenant_aggregate`] re-sorts internally so it
/// is always safe regardless of input order.
pub fn covenant_aggregate(
    covenant_keys: &[XOnlyPublicKey],
    quorum: u32,
) -> Result<ScriptBuf, ScriptError> {
    if quorum == 0 {
        return Err(ScriptError::ZeroQuorum);
    }
    if covenant_keys.len() < quorum as usize {
        return Err(ScriptError::QuorumExceedsKeys {
            quorum,
            count: covenant_keys.len(),
        });
    }

    let mut sorted = covenant_keys.to_vec();
    sorted.sort_by(|a, b| a.serialize().cmp(&b.serialize()));

    let mut builder = bitcoin::script::Builder::new();
    for (i, key) in sorted.iter().enumerate() {
        builder = builder.push_x_only_key(key);
        builder = if i == 0 {
            builder.push_opcode(OP_CHECKSIG)
        } else {
            builder.push_opcode(OP_CHECKSIGADD)
        };
    }
    builder = builder.push_int(quorum as i64).push_opcode(OP_NUMEQUAL);
    Ok(builder.into_script())
}

fn checked_timelock(timelock_blocks: u32) -> Result<u16, ScriptError> {
    u16::try_from(timelock_blocks).map_err(|_| ScriptError::TimelockOutOfRange(timelock_blocks))
}

/// `<staker_key> OP_CHECKSIGVERIFY <timelock> OP_CHECKSEQUENCEVERIFY` (spec §3).
pub fn build_timelock_script(
    staker_key: &XOnlyPublicKey,
    timelock_blocks: u32,
) -> Result<ScriptBuf, ScriptError> {
    let timelock = checked_timelock(timelock_blocks)?;
    Ok(bitcoin::script::Builder::new()
        .push_x_only_key(staker_key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(timelock as i64)
        .push_opcode(OP_CHECKSEQUENCEVERIFY)
        .into_script())
}

/// `<staker_key> OP_CHECKSIGVERIFY <M-of-N covenant aggregate>` (spec §3).
pub fn build_unbonding_script(
    staker_key: &XOnlyPublicKey,
    covenant_keys: &[XOnlyPublicKey],
    covenant_quorum: u32,
) -> Result<ScriptBuf, ScriptError> {
    let aggregate = covenant_aggregate(covenant_keys, covenant_quorum)?;
    let mut bytes = bitcoin::script::Builder::new()
        .push_x_only_key(staker_key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .into_script()
        .to_bytes();
    bytes.extend_from_slice(aggregate.as_bytes());
    Ok(ScriptBuf::from_bytes(bytes))
}

/// `<staker_key> OP_CHECKSIGVERIFY <finality_provider_key> OP_CHECKSIGVERIFY
/// <M-of-N covenant aggregate>` (spec §3).
///
/// The aggregate's bytecode is spliced in directly (not wrapped as a push)
/// since script concatenation, not a nested push, is what spec §3 describes.
pub fn build_slashing_script(
    staker_key: &XOnlyPublicKey,
    finality_provider_key: &XOnlyPublicKey,
    covenant_keys: &[XOnlyPublicKey],
    covenant_quorum: u32,
) -> Result<ScriptBuf, ScriptError> {
    let aggregate = covenant_aggregate(covenant_keys, covenant_quorum)?;
    let mut bytes = bitcoin::script::Builder::new()
        .push_x_only_key(staker_key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_x_only_key(finality_provider_key)
        .push_opcode(OP_CHECKSIGVERIFY)
        .into_script()
        .to_bytes();
    bytes.extend_from_slice(aggregate.as_bytes());
    Ok(ScriptBuf::from_bytes(bytes))
}

/// `OP_RETURN <tag || version || staker_key || finality_provider_key || timelock_be>`
/// (spec §3, §6). `tag` MUST be 4 bytes; `version` is a configured input per
/// the open question in spec §9, not a hard-coded constant.
pub fn build_data_embed_script(
    tag: &[u8],
    version: u8,
    staker_key: &XOnlyPublicKey,
    finality_provider_key: &XOnlyPublicKey,
    timelock_blocks: u32,
) -> Result<ScriptBuf, ScriptError> {
    if tag.len() != 4 {
        return Err(ScriptError::InvalidTagLength(tag.len()));
    }
    let timelock = checked_timelock(timelock_blocks)?;

    let mut payload = Vec::with_capacity(DATA_EMBED_PAYLOAD_LEN);
    payload.extend_from_slice(tag);
    payload.push(version);
    payload.extend_from_slice(&staker_key.serialize());
    payload.extend_from_slice(&finality_provider_key.serialize());
    payload.extend_from_slice(&timelock.to_be_bytes());
    debug_assert_eq!(payload.len(), DATA_EMBED_PAYLOAD_LEN);

    let push_bytes = bitcoin::script::PushBytesBuf::try_from(payload)
        .expect("payload is well under the push-bytes limit");
    Ok(bitcoin::script::Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(push_bytes)
        .into_script())
}

/// Inputs needed to assemble a full [`Scripts`] bundle.
#[derive(Debug, Clone)]
pub struct ScriptParams<'a> {
    pub staker_key: XOnlyPublicKey,
    pub finality_provider_key: XOnlyPublicKey,
    pub timelock_blocks: u32,
    pub params: &'a Params,
    pub network: Network,
    /// `Some((tag, version))` builds the observable data-embed leaf too.
    pub observable: Option<(&'a [u8], u8)>,
}

/// Assemble the Scripts bundle and its Taproot output (spec §4.A).
///
/// Validates: key sizes (guaranteed by the `XOnlyPublicKey` type itself),
/// timelock fits `u16`, and `covenant_keys.len() >= covenant_quorum >= 1`
/// (delegated to [`covenant_aggregate`]).
pub fn build_scripts(input: &ScriptParams<'_>) -> Result<Scripts, ScriptError> {
    build_scripts_with_secp(&Secp256k1::verification_only(), input)
}

/// As [`build_scripts`], but with an explicit verification-capable secp
/// context (useful for callers that already hold one, to avoid recomputing).
pub fn build_scripts_with_secp<C: Verification>(
    secp: &Secp256k1<C>,
    input: &ScriptParams<'_>,
) -> Result<Scripts, ScriptError> {
    let timelock_script = build_timelock_script(&input.staker_key, input.timelock_blocks)?;
    let unbonding_script = build_unbonding_script(
        &input.staker_key,
        &input.params.covenant_keys,
        input.params.covenant_quorum,
    )?;
    let slashing_script = build_slashing_script(
        &input.staker_key,
        &input.finality_provider_key,
        &input.params.covenant_keys,
        input.params.covenant_quorum,
    )?;
    let data_embed_script = match input.observable {
        Some((tag, version)) => Some(build_data_embed_script(
            tag,
            version,
            &input.staker_key,
            &input.finality_provider_key,
            input.timelock_blocks,
        )?),
        None => None,
    };

    let internal_key = unspendable_internal_key();
    let mut builder = TaprootBuilder::new();
    builder = builder
        .add_leaf(1, timelock_script.clone())
        .map_err(|e| ScriptError::TaprootBuild(e.to_string()))?;
    builder = builder
        .add_leaf(2, unbonding_script.clone())
        .map_err(|e| ScriptError::TaprootBuild(e.to_string()))?;
    builder = builder
        .add_leaf(2, slashing_script.clone())
        .map_err(|e| ScriptError::TaprootBuild(e.to_string()))?;

    let spend_info = builder
        .finalize(secp, internal_key)
        .map_err(|_| ScriptError::TaprootBuild("finalize failed".into()))?;

    // Sanity: the resulting output key must differ from the internal key,
    // i.e. the merkle-root tweak was actually applied (spec §9).
    debug_assert_ne!(
        spend_info.output_key().to_x_only_public_key(),
        internal_key.tap_tweak(secp, None).0.to_x_only_public_key()
    );

    Ok(Scripts {
        timelock_script,
        unbonding_script,
        slashing_script,
        data_embed_script,
        spend_info,
        network: input.network,
    })
}

/// The unbonding output's own Taproot tree: `{slashing-leaf, timelock(`unbonding_time`)-leaf}`
/// over the same unspendable internal key (spec §4.C `unbonding`).
pub fn build_unbonding_output_scripts(
    staker_key: &XOnlyPublicKey,
    finality_provider_key: &XOnlyPublicKey,
    params: &Params,
    network: Network,
) -> Result<Scripts, ScriptError> {
    build_unbonding_output_scripts_with_secp(&Secp256k1::verification_only(), staker_key, finality_provider_key, params, network)
}

/// As [`build_unbonding_output_scripts`], with an explicit secp context.
pub fn build_unbonding_output_scripts_with_secp<C: Verification>(
    secp: &Secp256k1<C>,
    staker_key: &XOnlyPublicKey,
    finality_provider_key: &XOnlyPublicKey,
    params: &Params,
    network: Network,
) -> Result<Scripts, ScriptError> {
    let slashing_script = build_slashing_script(
        staker_key,
        finality_provider_key,
        &params.covenant_keys,
        params.covenant_quorum,
    )?;
    let timelock_script = build_timelock_script(staker_key, params.unbonding_time_blocks)?;

    let internal_key = unspendable_internal_key();
    let spend_info = TaprootBuilder::new()
        .add_leaf(1, slashing_script.clone())
        .map_err(|e| ScriptError::TaprootBuild(e.to_string()))?
        .add_leaf(1, timelock_script.clone())
        .map_err(|e| ScriptError::TaprootBuild(e.to_string()))?
        .finalize(secp, internal_key)
        .map_err(|_| ScriptError::TaprootBuild("finalize failed".into()))?;

    Ok(Scripts {
        timelock_script,
        unbonding_script: ScriptBuf::new(),
        slashing_script,
        data_embed_script: None,
        spend_info,
        network,
    })
}

/// The "staker-timelock" change output produced by a slashing transaction
/// (spec §4.C `slashing`): a single-leaf Taproot tree over the same
/// unspendable internal key, holding only `timelock(unbonding_time)`. The
/// staker can spend it once `unbonding_time_blocks` has elapsed (spec §4.C
/// `withdraw_slashed`).
pub fn build_post_slashing_change_scripts(
    staker_key: &XOnlyPublicKey,
    unbonding_time_blocks: u32,
    network: Network,
) -> Result<Scripts, ScriptError> {
    build_post_slashing_change_scripts_with_secp(
        &Secp256k1::verification_only(),
        staker_key,
        unbonding_time_blocks,
        network,
    )
}

/// As [`build_post_slashing_change_scripts`], with an explicit secp context.
pub fn build_post_slashing_change_scripts_with_secp<C: Verification>(
    secp: &Secp256k1<C>,
    staker_key: &XOnlyPublicKey,
    unbonding_time_blocks: u32,
    network: Network,
) -> Result<Scripts, ScriptError> {
    let timelock_script = build_timelock_script(staker_key, unbonding_time_blocks)?;

    let internal_key = unspendable_internal_key();
    let spend_info = TaprootBuilder::new()
        .add_leaf(0, timelock_script.clone())
        .map_err(|e| ScriptError::TaprootBuild(e.to_string()))?
        .finalize(secp, internal_key)
        .map_err(|_| ScriptError::TaprootBuild("finalize failed".into()))?;

    Ok(Scripts {
        timelock_script,
        unbonding_script: ScriptBuf::new(),
        slashing_script: ScriptBuf::new(),
        data_embed_script: None,
        spend_info,
        network,
    })
}

/// Sequence value encoding a relative timelock of `blocks` for a `TxIn`.
pub fn relative_timelock_sequence(blocks: u16) -> Sequence {
    Sequence::from_height(blocks)
}
