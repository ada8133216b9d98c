// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shard manifest: canonical JSON with sorted keys and compact separators.
//! The exact serialized bytes are the signing input, so serialization must
//! be reproducible down to the byte.

use crate::error::{FlashFreezeError, FlashFreezeResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SPEC_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    pub pubkey: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub spec: String,
    pub created: String,
    pub capsule_hash: String,
    pub merkle_root: String,
    pub publisher: Publisher,
}

impl Manifest {
    pub fn new(
        created: String,
        capsule_hash: String,
        merkle_root: String,
        pubkey_hex: String,
    ) -> Self {
        Self {
            spec: SPEC_VERSION.to_string(),
            created,
            capsule_hash,
            merkle_root,
            publisher: Publisher { pubkey: pubkey_hex },
        }
    }

    /// UTF-8 bytes with lexicographically sorted keys and no whitespace.
    pub fn to_canonical_bytes(&self) -> FlashFreezeResult<Vec<u8>> {
        canonical_json(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> FlashFreezeResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| FlashFreezeError::ManifestInvalid {
            reason: e.to_string(),
        })
    }
}

pub fn canonical_json(v: &impl Serialize) -> FlashFreezeResult<Vec<u8>> {
    let value = serde_json::to_value(v).map_err(|e| FlashFreezeError::ManifestInvalid {
        reason: e.to_string(),
    })?;
    let sorted = sort_json(value);
    serde_json::to_vec(&sorted).map_err(|e| FlashFreezeError::ManifestInvalid {
        reason: e.to_string(),
    })
}

fn sort_json(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, val) in entries {
                sorted.insert(k, sort_json(val));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Manifest {
        Manifest::new(
            "2026-01-01T00:00:00Z".into(),
            "aa".repeat(32),
            "bb".repeat(32),
            "cc".repeat(32),
        )
    }

    #[test]
    fn canonical_bytes_have_sorted_keys_and_no_whitespace() {
        let bytes = sample().to_canonical_bytes().unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(!text.contains(' '));
        assert!(!text.contains('\n'));
        let capsule = text.find("\"capsule_hash\"").unwrap();
        let created = text.find("\"created\"").unwrap();
        let merkle = text.find("\"merkle_root\"").unwrap();
        let publisher = text.find("\"publisher\"").unwrap();
        let spec = text.find("\"spec\"").unwrap();
        assert!(capsule < created && created < merkle && merkle < publisher && publisher < spec);
    }

    #[test]
    fn serialization_is_byte_stable() {
        assert_eq!(
            sample().to_canonical_bytes().unwrap(),
            sample().to_canonical_bytes().unwrap()
        );
    }

    #[test]
    fn round_trips_through_bytes() {
        let manifest = sample();
        let bytes = manifest.to_canonical_bytes().unwrap();
        assert_eq!(Manifest::from_bytes(&bytes).unwrap(), manifest);
    }

    #[test]
    fn malformed_manifest_is_rejected() {
        let err = Manifest::from_bytes(b"{\"spec\":\"1.0\"}").unwrap_err();
        assert_eq!(err.code(), "E_MANIFEST_INVALID");
    }
}
