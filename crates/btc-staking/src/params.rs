//! Versioned parameter registry (spec §3, §4.F).

use bitcoin::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::MIN_UNBONDING_OUTPUT_VALUE;

#[derive(Error, Debug)]
pub enum ParamsError {
    #[error("no applicable parameter version for Bitcoin height {0}")]
    NoApplicableParams(u32),

    #[error("unknown parameter version {0}")]
    UnknownVersion(u32),

    #[error("duplicate parameter version {0}")]
    DuplicateVersion(u32),

    #[error("versions are not monotonic with activation heights: version {0} at height {1} follows a later version at an earlier or equal height")]
    NonMonotonic(u32, u32),

    #[error("covenant_keys must have at least covenant_quorum ({quorum}) entries, got {got}")]
    InsufficientCovenantKeys { quorum: u32, got: usize },

    #[error("covenant_quorum must be positive")]
    ZeroQuorum,

    #[error("duplicate covenant key in parameter set")]
    DuplicateCovenantKey,

    #[error("min_staking_amount_sat ({min}) must exceed max_staking_amount_sat ({max})")]
    AmountRangeInverted { min: u64, max: u64 },

    #[error("min_staking_time_blocks ({min}) must not exceed max_staking_time_blocks ({max})")]
    TimeRangeInverted { min: u32, max: u32 },

    #[error("unbonding_time_blocks must be positive")]
    ZeroUnbondingTime,

    #[error("unbonding_fee_sat must be positive")]
    ZeroUnbondingFee,

    #[error("min_slashing_tx_fee_sat must be positive")]
    ZeroSlashingFee,

    #[error("slashing_rate must lie in (0, 1], got {0}")]
    InvalidSlashingRate(f64),

    #[error("slashing_pk_script must not be empty")]
    EmptySlashingScript,

    #[error("min_staking_amount_sat ({min_amount}) must be at least unbonding_fee_sat ({unbonding_fee}) + {MIN_UNBONDING_OUTPUT_VALUE}")]
    MinAmountTooLow {
        min_amount: u64,
        unbonding_fee: u64,
    },
}

/// One versioned parameter record (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub version: u32,
    pub activation_btc_height: u32,
    #[serde(with = "xonly_vec_serde")]
    pub covenant_keys: Vec<XOnlyPublicKey>,
    pub covenant_quorum: u32,
    pub min_staking_amount_sat: u64,
    pub max_staking_amount_sat: u64,
    pub min_staking_time_blocks: u32,
    pub max_staking_time_blocks: u32,
    pub unbonding_time_blocks: u32,
    pub unbonding_fee_sat: u64,
    pub slashing_rate: f64,
    #[serde(with = "hex_bytes_serde")]
    pub slashing_pk_script: Vec<u8>,
    pub min_slashing_tx_fee_sat: u64,
    /// Only consumed by the observable variant's data-embed leaf (spec §3).
    #[serde(default, with = "opt_hex_bytes_serde")]
    pub tag: Option<Vec<u8>>,
}

impl Params {
    /// Validate every invariant listed in spec §3 for a single record.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.covenant_quorum == 0 {
            return Err(ParamsError::ZeroQuorum);
        }
        if self.covenant_keys.len() < self.covenant_quorum as usize {
            return Err(ParamsError::InsufficientCovenantKeys {
                quorum: self.covenant_quorum,
                got: self.covenant_keys.len(),
            });
        }
        let mut sorted = self.covenant_keys.clone();
        sorted.sort_by(|a, b| a.serialize().cmp(&b.serialize()));
        sorted.dedup();
        if sorted.len() != self.covenant_keys.len() {
            return Err(ParamsError::DuplicateCovenantKey);
        }
        if self.min_staking_amount_sat > self.max_staking_amount_sat {
            return Err(ParamsError::AmountRangeInverted {
                min: self.min_staking_amount_sat,
                max: self.max_staking_amount_sat,
            });
        }
        if self.min_staking_time_blocks > self.max_staking_time_blocks
            || self.min_staking_time_blocks == 0
        {
            return Err(ParamsError::TimeRangeInverted {
                min: self.min_staking_time_blocks,
                max: self.max_staking_time_blocks,
            });
        }
        if self.unbonding_time_blocks == 0 {
            return Err(ParamsError::ZeroUnbondingTime);
        }
        if self.unbonding_fee_sat == 0 {
            return Err(ParamsError::ZeroUnbondingFee);
        }
        if self.min_slashing_tx_fee_sat == 0 {
            return Err(ParamsError::ZeroSlashingFee);
        }
        if !(self.slashing_rate > 0.0 && self.slashing_rate <= 1.0) {
            return Err(ParamsError::InvalidSlashingRate(self.slashing_rate));
        }
        if self.slashing_pk_script.is_empty() {
            return Err(ParamsError::EmptySlashingScript);
        }
        let min_required = self
            .unbonding_fee_sat
            .saturating_add(MIN_UNBONDING_OUTPUT_VALUE);
        if self.min_staking_amount_sat < min_required {
            return Err(ParamsError::MinAmountTooLow {
                min_amount: self.min_staking_amount_sat,
                unbonding_fee: self.unbonding_fee_sat,
            });
        }
        Ok(())
    }

    /// Covenant keys in canonical (lexicographically sorted) order, as
    /// required by spec §3's "M-of-N covenant aggregate" wording and relied
    /// on throughout [`crate::script`].
    pub fn sorted_covenant_keys(&self) -> Vec<XOnlyPublicKey> {
        let mut keys = self.covenant_keys.clone();
        keys.sort_by(|a, b| a.serialize().cmp(&b.serialize()));
        keys
    }
}

/// An ordered, validated set of parameter versions (spec §4.F).
#[derive(Debug, Clone)]
pub struct ParamsRegistry {
    /// Sorted ascending by `activation_btc_height`.
    records: Vec<Params>,
}

impl ParamsRegistry {
    /// Validate and sort a set of parameter records, enforcing §4.F's load-time
    /// invariants: per-record validity, unique versions, and monotonicity of
    /// versions alongside activation heights.
    pub fn load(mut records: Vec<Params>) -> Result<Self, ParamsError> {
        for r in &records {
            r.validate()?;
        }

        let mut seen_versions = std::collections::HashSet::new();
        for r in &records {
            if !seen_versions.insert(r.version) {
                return Err(ParamsError::DuplicateVersion(r.version));
            }
        }

        records.sort_by_key(|r| r.activation_btc_height);

        for window in records.windows(2) {
            let (prev, next) = (&window[0], &window[1]);
            if next.activation_btc_height == prev.activation_btc_height {
                return Err(ParamsError::NonMonotonic(
                    next.version,
                    next.activation_btc_height,
                ));
            }
            // Ascending activation height must imply ascending version, so
            // that "version chosen at intent time" (spec §9) is unambiguous.
            if next.version < prev.version {
                return Err(ParamsError::NonMonotonic(
                    next.version,
                    next.activation_btc_height,
                ));
            }
        }

        Ok(Self { records })
    }

    /// Newest version whose `activation_btc_height <= height`.
    pub fn by_btc_height(&self, height: u32) -> Result<&Params, ParamsError> {
        let found = self
            .records
            .iter()
            .rev()
            .find(|r| r.activation_btc_height <= height);
        match found {
            Some(params) => {
                log::debug!(
                    "btc height {height} resolved to params version {}",
                    params.version
                );
                Ok(params)
            }
            None => {
                log::warn!("no applicable params for btc height {height}");
                Err(ParamsError::NoApplicableParams(height))
            }
        }
    }

    /// The record whose version equals `version`.
    pub fn by_version(&self, version: u32) -> Result<&Params, ParamsError> {
        self.records
            .iter()
            .find(|r| r.version == version)
            .ok_or_else(|| {
                log::warn!("unknown params version {version} requested");
                ParamsError::UnknownVersion(version)
            })
    }

    /// All loaded records, sorted ascending by activation height.
    pub fn all(&self) -> &[Params] {
        &self.records
    }
}

/// Serde helper for a single `XOnlyPublicKey` as hex, reused by
/// [`crate::model::StakingInput`] and other single-key fields.
pub mod xonly_hex {
    use bitcoin::XOnlyPublicKey;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &XOnlyPublicKey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key.serialize()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<XOnlyPublicKey, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        XOnlyPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

mod xonly_vec_serde {
    use bitcoin::XOnlyPublicKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        keys: &[XOnlyPublicKey],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let hexed: Vec<String> = keys.iter().map(|k| hex::encode(k.serialize())).collect();
        hexed.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<XOnlyPublicKey>, D::Error> {
        let hexed: Vec<String> = Vec::deserialize(deserializer)?;
        hexed
            .into_iter()
            .map(|s| {
                let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
                XOnlyPublicKey::from_slice(&bytes).map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

mod hex_bytes_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

mod opt_hex_bytes_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| hex::decode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_xonly_key;

    fn sample_params(version: u32, activation: u32) -> Params {
        Params {
            version,
            activation_btc_height: activation,
            covenant_keys: vec![
                test_xonly_key(1),
                test_xonly_key(2),
                test_xonly_key(3),
                test_xonly_key(4),
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

    #[test]
    fn load_sorts_by_activation_height() {
        let registry =
            ParamsRegistry::load(vec![sample_params(1, 500), sample_params(0, 100)]).unwrap();
        assert_eq!(registry.all()[0].version, 0);
        assert_eq!(registry.all()[1].version, 1);
    }

    #[test]
    fn by_btc_height_picks_newest_activation_le_height() {
        let registry =
            ParamsRegistry::load(vec![sample_params(0, 100), sample_params(1, 500)]).unwrap();
        assert!(matches!(
            registry.by_btc_height(99),
            Err(ParamsError::NoApplicableParams(99))
        ));
        assert_eq!(registry.by_btc_height(100).unwrap().version, 0);
        assert_eq!(registry.by_btc_height(499).unwrap().version, 0);
        assert_eq!(registry.by_btc_height(500).unwrap().version, 1);
        assert_eq!(registry.by_btc_height(u32::MAX).unwrap().version, 1);
    }

    #[test]
    fn by_version_unknown_is_rejected() {
        let registry = ParamsRegistry::load(vec![sample_params(0, 100)]).unwrap();
        assert!(matches!(
            registry.by_version(7),
            Err(ParamsError::UnknownVersion(7))
        ));
    }

    #[test]
    fn duplicate_versions_are_rejected() {
        let err =
            ParamsRegistry::load(vec![sample_params(0, 100), sample_params(0, 500)]).unwrap_err();
        assert!(matches!(err, ParamsError::DuplicateVersion(0)));
    }

    #[test]
    fn equal_activation_with_different_versions_is_rejected() {
        let err =
            ParamsRegistry::load(vec![sample_params(0, 100), sample_params(1, 100)]).unwrap_err();
        assert!(matches!(err, ParamsError::NonMonotonic(1, 100)));
    }

    #[test]
    fn version_must_increase_with_activation_height() {
        let err =
            ParamsRegistry::load(vec![sample_params(1, 100), sample_params(0, 500)]).unwrap_err();
        assert!(matches!(err, ParamsError::NonMonotonic(0, 500)));
    }

    #[test]
    fn min_amount_below_unbonding_floor_is_rejected() {
        let mut p = sample_params(0, 100);
        p.min_staking_amount_sat = 1_000;
        assert!(matches!(
            p.validate(),
            Err(ParamsError::MinAmountTooLow { .. })
        ));
    }

    #[test]
    fn quorum_above_key_count_is_rejected() {
        let mut p = sample_params(0, 100);
        p.covenant_quorum = 10;
        assert!(matches!(
            p.validate(),
            Err(ParamsError::InsufficientCovenantKeys { .. })
        ));
    }

    #[test]
    fn duplicate_covenant_keys_are_rejected() {
        let mut p = sample_params(0, 100);
        p.covenant_keys[1] = p.covenant_keys[0];
        assert!(matches!(p.validate(), Err(ParamsError::DuplicateCovenantKey)));
    }

    #[test]
    fn sorted_covenant_keys_are_canonical() {
        let p = sample_params(0, 100);
        let sorted = p.sorted_covenant_keys();
        for w in sorted.windows(2) {
            assert!(w[0].serialize() < w[1].serialize());
        }
    }
}
