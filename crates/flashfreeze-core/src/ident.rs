// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic canonicalization and identity minting.
//!
//! IDs are `<prefix>_<BASE32(SHA-256(payload)[..15])>` over fixed,
//! `|`-separated canonical payloads. The 15-byte truncation encodes to
//! exactly 24 Crockford BASE32 characters, so no padding is ever emitted.

use crate::error::{FlashFreezeError, FlashFreezeResult};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

const BASE32_CROCKFORD: data_encoding::Encoding = data_encoding_macro::new_encoding! {
    symbols: "0123456789ABCDEFGHJKMNPQRSTVWXYZ",
};

const ID_HASH_PREFIX_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPrefix {
    Entity,
    Claim,
    Span,
    Provenance,
}

impl IdPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            IdPrefix::Entity => "e",
            IdPrefix::Claim => "c",
            IdPrefix::Span => "s",
            IdPrefix::Provenance => "p",
        }
    }
}

/// Typed object of a claim row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Entity,
    LiteralString,
    LiteralInteger,
    LiteralDecimal,
    LiteralBoolean,
}

impl ObjectType {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectType::Entity => "entity",
            ObjectType::LiteralString => "literal:string",
            ObjectType::LiteralInteger => "literal:integer",
            ObjectType::LiteralDecimal => "literal:decimal",
            ObjectType::LiteralBoolean => "literal:boolean",
        }
    }
}

/// Canonicalize text: NFKC, full case fold, whitespace-run collapse with
/// end trimming, then strip of remaining C0/C1 controls. The step order is
/// fixed and observable.
pub fn canonicalize(text: &str) -> String {
    let normalized: String = text.nfkc().collect();
    let folded = caseless::default_case_fold_str(&normalized);
    let collapsed: String = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().filter(|c| !is_stripped_control(*c)).collect()
}

/// UTF-8 front end for byte inputs.
pub fn canonicalize_bytes(bytes: &[u8]) -> FlashFreezeResult<String> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| FlashFreezeError::invalid(format!("not valid UTF-8: {e}")))?;
    Ok(canonicalize(text))
}

fn is_stripped_control(c: char) -> bool {
    let cp = c as u32;
    cp < 0x20 || cp == 0x7F || (0x80..=0x9F).contains(&cp)
}

/// Mint a prefixed deterministic ID from an already-canonical payload.
pub fn mint(prefix: IdPrefix, payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    let encoded = BASE32_CROCKFORD.encode(&digest[..ID_HASH_PREFIX_LEN]);
    format!("{}_{}", prefix.as_str(), encoded)
}

pub fn entity_id(namespace: &str, label: &str) -> String {
    let payload = format!("{}|{}", canonicalize(namespace), canonicalize(label));
    mint(IdPrefix::Entity, payload.as_bytes())
}

pub fn claim_id(subject: &str, predicate: &str, object: &str, object_type: ObjectType) -> String {
    let object = match object_type {
        ObjectType::Entity => object.to_string(),
        _ => canonicalize(object),
    };
    let payload = format!(
        "{}|{}|{}|{}",
        subject,
        canonicalize(predicate),
        object_type.as_str(),
        object
    );
    mint(IdPrefix::Claim, payload.as_bytes())
}

pub fn span_id(source_hash: &str, byte_start: u64, byte_end: u64) -> String {
    let payload = format!("{source_hash}|{byte_start}|{byte_end}");
    mint(IdPrefix::Span, payload.as_bytes())
}

pub fn provenance_id(claim_id: &str, span_id: &str) -> String {
    let payload = format!("{claim_id}|{span_id}");
    mint(IdPrefix::Provenance, payload.as_bytes())
}
