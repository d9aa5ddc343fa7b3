//! Protocol constants (spec §6).

/// Minimum value a freshly created unbonding output may carry.
pub const MIN_UNBONDING_OUTPUT_VALUE: u64 = 1_000;

/// Length in bytes of a BIP-340 Schnorr signature.
pub const SCHNORR_SIGNATURE_LEN: usize = 64;

/// Length in bytes of an x-only public key.
pub const XONLY_PUBKEY_LEN: usize = 32;

/// Length in bytes of the observable data-embed `OP_RETURN` payload:
/// `tag[4] || version[1] || staker_key[32] || finality_provider_key[32] || timelock_be[2]`.
pub const DATA_EMBED_PAYLOAD_LEN: usize = 4 + 1 + 32 + 32 + 2;

/// Standard dust threshold (sat) for a P2WPKH/P2TR change output at the
/// reference 3 sat/vbyte relay policy, matching Bitcoin Core's `GetDustThreshold`
/// for segwit v0/v1 outputs (43 vbytes input cost assumed for the spend that
/// would reclaim it).
pub const DUST_THRESHOLD_SEGWIT: u64 = 330;

/// Dust threshold (sat) for legacy (non-segwit) output scripts.
pub const DUST_THRESHOLD_LEGACY: u64 = 546;

/// Estimated virtual size, in vbytes, of a P2WPKH input (spec §4.B).
pub const VBYTES_INPUT_P2WPKH: f64 = 68.0;

/// Estimated virtual size, in vbytes, of a Taproot key-path input (spec §4.B).
pub const VBYTES_INPUT_P2TR_KEYPATH: f64 = 57.5;

/// Estimated virtual size, in vbytes, of a Taproot script-path input carrying
/// one leaf script plus a depth-`d` control block. `d` is added by the caller.
pub const VBYTES_INPUT_P2TR_SCRIPTPATH_BASE: f64 = 66.0;

/// Estimated virtual size, in vbytes, of a P2WPKH output.
pub const VBYTES_OUTPUT_P2WPKH: f64 = 31.0;

/// Estimated virtual size, in vbytes, of a P2TR output.
pub const VBYTES_OUTPUT_P2TR: f64 = 43.0;

/// Fixed overhead (version, locktime, in/out counts, segwit marker/flag) in vbytes.
pub const VBYTES_TX_OVERHEAD: f64 = 10.5;
