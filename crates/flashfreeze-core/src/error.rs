// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

pub type FlashFreezeResult<T> = Result<T, FlashFreezeError>;

/// Fatal failure kinds surfaced by compilation and verification.
///
/// Every variant aborts the run in progress; resynchronization is a row
/// status, never an error. Variants carry the offending file and byte
/// offset where one exists.
#[derive(Debug, Error)]
pub enum FlashFreezeError {
    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("capsule {capsule} has no meta.json")]
    MissingMeta { capsule: PathBuf },

    #[error("capsule {capsule} has no events.jsonl")]
    MissingEvents { capsule: PathBuf },

    #[error("unsupported event log encoding/newline: {detail}")]
    UnsupportedEncoding { detail: String },

    #[error("{file}: truncated record at offset {offset}")]
    Truncated { file: String, offset: u64 },

    #[error("{file}: bad record magic at offset {offset}")]
    BadMagic { file: String, offset: u64 },

    #[error("{file}: payload crc mismatch at offset {offset} (frame {frame_id})")]
    CrcMismatch {
        file: String,
        offset: u64,
        frame_id: u64,
    },

    #[error("{file}: frame {found} at offset {offset} violates ordering (expected {expected})")]
    OutOfOrder {
        file: String,
        offset: u64,
        expected: u64,
        found: u64,
    },

    #[error("{file}: declared payload length {length} outside configured bound {bound} at offset {offset}")]
    OversizeRecord {
        file: String,
        offset: u64,
        length: u64,
        bound: u64,
    },

    #[error("{file}: resync window exhausted after {scanned} bytes from offset {offset}")]
    ResyncLimit {
        file: String,
        offset: u64,
        scanned: u64,
    },

    #[error("no usable latent record for observation frame {frame_id}")]
    LatentMissing { frame_id: u64 },

    #[error("unexpected residual evidence: {reason}")]
    UnexpectedResidual { reason: String },

    #[error("manifest invalid: {reason}")]
    ManifestInvalid { reason: String },

    #[error("manifest signature invalid")]
    SignatureInvalid,

    #[error("merkle root mismatch: manifest {expected}, recomputed {computed}")]
    MerkleMismatch { expected: String, computed: String },

    #[error("publisher key {pubkey} is not in the trust store")]
    UntrustedPublisher { pubkey: String },

    #[error("signing failed: {reason}")]
    SigningError { reason: String },

    #[error("{file}: {source}")]
    Io {
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FlashFreezeError {
    /// Stable machine-readable code, one per kind.
    pub fn code(&self) -> &'static str {
        match self {
            FlashFreezeError::InvalidInput { .. } => "E_INVALID_INPUT",
            FlashFreezeError::MissingMeta { .. } => "E_MISSING_META",
            FlashFreezeError::MissingEvents { .. } => "E_MISSING_EVENTS",
            FlashFreezeError::UnsupportedEncoding { .. } => "E_UNSUPPORTED_ENCODING",
            FlashFreezeError::Truncated { .. } => "E_TRUNCATED",
            FlashFreezeError::BadMagic { .. } => "E_BAD_MAGIC",
            FlashFreezeError::CrcMismatch { .. } => "E_CRC_MISMATCH",
            FlashFreezeError::OutOfOrder { .. } => "E_OUT_OF_ORDER",
            FlashFreezeError::OversizeRecord { .. } => "E_OVERSIZE_RECORD",
            FlashFreezeError::ResyncLimit { .. } => "E_RESYNC_LIMIT",
            FlashFreezeError::LatentMissing { .. } => "E_LATENT_MISSING",
            FlashFreezeError::UnexpectedResidual { .. } => "E_UNEXPECTED_RESIDUAL",
            FlashFreezeError::ManifestInvalid { .. } => "E_MANIFEST_INVALID",
            FlashFreezeError::SignatureInvalid => "E_SIGNATURE_INVALID",
            FlashFreezeError::MerkleMismatch { .. } => "E_MERKLE_MISMATCH",
            FlashFreezeError::UntrustedPublisher { .. } => "E_UNTRUSTED_PUBLISHER",
            FlashFreezeError::SigningError { .. } => "E_SIGNING",
            FlashFreezeError::Io { .. } => "E_IO",
        }
    }

    /// Stable process exit code, one per kind. Zero is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self {
            FlashFreezeError::InvalidInput { .. } => 2,
            FlashFreezeError::MissingMeta { .. } => 3,
            FlashFreezeError::MissingEvents { .. } => 4,
            FlashFreezeError::UnsupportedEncoding { .. } => 5,
            FlashFreezeError::Truncated { .. } => 6,
            FlashFreezeError::BadMagic { .. } => 7,
            FlashFreezeError::CrcMismatch { .. } => 8,
            FlashFreezeError::OutOfOrder { .. } => 9,
            FlashFreezeError::OversizeRecord { .. } => 10,
            FlashFreezeError::ResyncLimit { .. } => 11,
            FlashFreezeError::LatentMissing { .. } => 12,
            FlashFreezeError::UnexpectedResidual { .. } => 13,
            FlashFreezeError::ManifestInvalid { .. } => 14,
            FlashFreezeError::SignatureInvalid => 15,
            FlashFreezeError::MerkleMismatch { .. } => 16,
            FlashFreezeError::UntrustedPublisher { .. } => 17,
            FlashFreezeError::SigningError { .. } => 18,
            FlashFreezeError::Io { .. } => 19,
        }
    }

    pub fn io(file: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FlashFreezeError::Io {
            file: file.into(),
            source,
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        FlashFreezeError::InvalidInput {
            reason: reason.into(),
        }
    }
}
