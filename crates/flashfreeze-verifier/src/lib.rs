// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! flashfreeze-verifier
//!
//! The inverse pass over a sealed shard: layout, trust, signature, Merkle
//! root, and — when the source capsule is available — a full re-scan of the
//! binary streams, a re-run of every judge invariant, and a byte-exact
//! comparison of each stored span against the capsule. Verification either
//! passes with zero warnings or fails with the first fatal error.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use flashfreeze_core::capsule::Capsule;
use flashfreeze_core::columnar::read_table;
use flashfreeze_core::context::{LocalPolicy, ScanLimits, TrustStore, WindowConfig};
use flashfreeze_core::error::{FlashFreezeError, FlashFreezeResult};
use flashfreeze_core::manifest::Manifest;
use flashfreeze_core::{events, judge, merkle, shard};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    pub limits: ScanLimits,
    pub windows: WindowConfig,
    pub policy: LocalPolicy,
}

/// Outcome of a passing verification. A failing verification never returns
/// a report; the error identifies the offending file and offset.
#[derive(Debug)]
pub struct VerifyReport {
    pub merkle_root: String,
    pub publisher: String,
    pub files_checked: usize,
    pub spans_checked: usize,
    pub stream_rows_checked: usize,
    pub capsule_checked: bool,
}

fn manifest_invalid(reason: impl Into<String>) -> FlashFreezeError {
    FlashFreezeError::ManifestInvalid {
        reason: reason.into(),
    }
}

/// A shard holds exactly the fixed file set; anything extra or absent is a
/// verification failure.
fn check_layout(shard_dir: &Path) -> FlashFreezeResult<usize> {
    let mut found = merkle::list_shard_files(shard_dir)?;
    found.sort_unstable();
    let mut expected: Vec<&str> = shard::SHARD_FILES.to_vec();
    expected.sort_unstable();

    for rel in &found {
        if !expected.contains(&rel.as_str()) {
            return Err(manifest_invalid(format!("unexpected file {rel:?} in shard")));
        }
    }
    for rel in &expected {
        if !found.iter().any(|f| f == rel) {
            return Err(manifest_invalid(format!("shard is missing {rel:?}")));
        }
    }
    Ok(found.len())
}

fn check_signature(
    shard_dir: &Path,
    manifest: &Manifest,
    manifest_bytes: &[u8],
    trust: &TrustStore,
) -> FlashFreezeResult<String> {
    let pub_path = shard_dir.join(shard::PUBLISHER_KEY_FILE);
    let pub_bytes = fs::read(&pub_path).map_err(|e| FlashFreezeError::io(&pub_path, e))?;
    let pub_arr: [u8; 32] = pub_bytes
        .as_slice()
        .try_into()
        .map_err(|_| manifest_invalid("publisher.pub must hold 32 raw bytes"))?;
    let pubkey_hex = hex::encode(pub_arr);

    if !manifest.publisher.pubkey.eq_ignore_ascii_case(&pubkey_hex) {
        return Err(manifest_invalid(
            "manifest publisher key does not match sig/publisher.pub",
        ));
    }
    if !trust.allows(&pubkey_hex) {
        return Err(FlashFreezeError::UntrustedPublisher { pubkey: pubkey_hex });
    }

    let key = VerifyingKey::from_bytes(&pub_arr)
        .map_err(|_| manifest_invalid("publisher.pub is not a valid Ed25519 key"))?;
    let sig_path = shard_dir.join(shard::SIGNATURE_FILE);
    let sig_bytes = fs::read(&sig_path).map_err(|e| FlashFreezeError::io(&sig_path, e))?;
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| FlashFreezeError::SignatureInvalid)?;
    key.verify(manifest_bytes, &signature)
        .map_err(|_| FlashFreezeError::SignatureInvalid)?;
    Ok(pubkey_hex)
}

struct CapsuleCheck {
    spans_checked: usize,
    stream_rows_checked: usize,
}

/// Re-derive everything the shard asserts about the capsule from the disk
/// bytes themselves: stream rows from a fresh scan, span text from the raw
/// event log.
fn check_against_capsule(
    shard_dir: &Path,
    manifest: &Manifest,
    capsule_dir: &Path,
    opts: &VerifyOptions,
) -> FlashFreezeResult<CapsuleCheck> {
    let capsule = Capsule::open(capsule_dir)?;
    if capsule.source_hash() != manifest.capsule_hash {
        return Err(manifest_invalid(format!(
            "capsule hash mismatch: manifest {}, capsule {}",
            manifest.capsule_hash,
            capsule.source_hash()
        )));
    }

    let events = events::scan_events(capsule.events_bytes())?;
    let windows = capsule.windows(opts.windows);
    let judged = judge::judge(&capsule, &events, &opts.limits, windows, &opts.policy)?;

    let stored_streams =
        shard::streams_from_table(&read_table(&shard_dir.join(shard::STREAMS_TABLE))?)?;
    if stored_streams != judged.rows {
        return Err(manifest_invalid(
            "streams table does not match a fresh scan of the capsule",
        ));
    }

    let spans = shard::spans_from_table(&read_table(&shard_dir.join(shard::SPANS_TABLE))?)?;
    let event_bytes = capsule.events_bytes();
    for span in &spans {
        if span.source_hash != manifest.capsule_hash {
            return Err(manifest_invalid(format!(
                "span {} names a foreign source hash",
                span.span_id
            )));
        }
        let slice = event_bytes
            .get(span.byte_start as usize..span.byte_end as usize)
            .ok_or_else(|| {
                manifest_invalid(format!(
                    "span {} range [{}, {}) exceeds the event log",
                    span.span_id, span.byte_start, span.byte_end
                ))
            })?;
        if slice != span.text.as_bytes() {
            return Err(manifest_invalid(format!(
                "span {} text diverges from events.jsonl[{}..{}]",
                span.span_id, span.byte_start, span.byte_end
            )));
        }
    }

    Ok(CapsuleCheck {
        spans_checked: spans.len(),
        stream_rows_checked: stored_streams.len(),
    })
}

pub fn verify_shard(
    shard_dir: &Path,
    trust: &TrustStore,
    capsule_dir: Option<&Path>,
    opts: &VerifyOptions,
) -> FlashFreezeResult<VerifyReport> {
    let files_checked = check_layout(shard_dir)?;

    let manifest_path = shard_dir.join(merkle::MANIFEST_FILE);
    let manifest_bytes =
        fs::read(&manifest_path).map_err(|e| FlashFreezeError::io(&manifest_path, e))?;
    let manifest = Manifest::from_bytes(&manifest_bytes)?;

    let publisher = check_signature(shard_dir, &manifest, &manifest_bytes, trust)?;

    let computed = hex::encode(merkle::compute_shard_root(shard_dir)?);
    if !manifest.merkle_root.eq_ignore_ascii_case(&computed) {
        return Err(FlashFreezeError::MerkleMismatch {
            expected: manifest.merkle_root.clone(),
            computed,
        });
    }

    let capsule_check = match capsule_dir {
        Some(dir) => Some(check_against_capsule(shard_dir, &manifest, dir, opts)?),
        None => None,
    };

    tracing::info!(
        shard = %shard_dir.display(),
        publisher = %publisher,
        capsule_checked = capsule_check.is_some(),
        "shard verified"
    );
    Ok(VerifyReport {
        merkle_root: computed,
        publisher,
        files_checked,
        spans_checked: capsule_check.as_ref().map_or(0, |c| c.spans_checked),
        stream_rows_checked: capsule_check
            .as_ref()
            .map_or(0, |c| c.stream_rows_checked),
        capsule_checked: capsule_check.is_some(),
    })
}
