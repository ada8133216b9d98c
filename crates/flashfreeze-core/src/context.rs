// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Explicit build context: scan limits, window configuration, local policy,
//! trust store, clock, and publisher key. Every pipeline stage receives the
//! context it needs as an argument; there are no hidden singletons.

use crate::error::{FlashFreezeError, FlashFreezeResult};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Hard bounds for the framed binary scans.
#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    /// Fixed latent payload width in bytes.
    pub latent_payload_len: u32,
    /// Cap on a single residual payload; larger declared lengths signal
    /// corruption.
    pub residual_max_len: u32,
    /// Max bytes a resync may skip while chasing the next magic.
    pub resync_window: u64,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            latent_payload_len: 256,
            residual_max_len: 16 * 1024 * 1024,
            resync_window: 64 * 1024 * 1024,
        }
    }
}

/// Residual pre/post windows around a safety trigger, in frames.
/// Deployment defaults; `meta.json` may override per capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub pre_frames: u64,
    pub post_frames: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            pre_frames: 20,
            post_frames: 20,
        }
    }
}

/// Site policy knobs consumed by the scanner and the judge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocalPolicy {
    /// Fail fast on any latent-stream corruption instead of resyncing.
    #[serde(default = "default_true")]
    pub strict_latents: bool,
    /// Elevate missing frames inside a residual window to a fatal error.
    #[serde(default)]
    pub require_full_residual_windows: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LocalPolicy {
    fn default() -> Self {
        Self {
            strict_latents: true,
            require_full_residual_windows: false,
        }
    }
}

impl LocalPolicy {
    pub fn load(path: &Path) -> FlashFreezeResult<Self> {
        let payload = fs::read(path).map_err(|e| FlashFreezeError::io(path, e))?;
        serde_json::from_slice(&payload)
            .map_err(|e| FlashFreezeError::invalid(format!("local policy: {e}")))
    }
}

/// Publisher keys the verifier accepts, lowercase hex.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustStore {
    pub allowed_keys: Vec<String>,
}

impl TrustStore {
    pub fn load(path: &Path) -> FlashFreezeResult<Self> {
        let payload = fs::read(path).map_err(|e| FlashFreezeError::io(path, e))?;
        serde_json::from_slice(&payload)
            .map_err(|e| FlashFreezeError::invalid(format!("trust store: {e}")))
    }

    pub fn single(pubkey_hex: &str) -> Self {
        Self {
            allowed_keys: vec![pubkey_hex.to_ascii_lowercase()],
        }
    }

    pub fn allows(&self, pubkey_hex: &str) -> bool {
        let needle = pubkey_hex.to_ascii_lowercase();
        self.allowed_keys
            .iter()
            .any(|k| k.to_ascii_lowercase() == needle)
    }
}

/// Injectable source of the manifest `created` timestamp. Replayed builds
/// install a fixed clock so identical inputs produce identical manifests.
pub trait BuildClock {
    fn created(&self) -> String;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl BuildClock for SystemClock {
    fn created(&self) -> String {
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock {
    pub created: String,
}

impl FixedClock {
    pub fn new(created: impl Into<String>) -> Self {
        Self {
            created: created.into(),
        }
    }
}

impl BuildClock for FixedClock {
    fn created(&self) -> String {
        self.created.clone()
    }
}

/// Everything a compilation needs, passed explicitly.
pub struct BuildContext {
    pub limits: ScanLimits,
    pub windows: WindowConfig,
    pub policy: LocalPolicy,
    pub trust: TrustStore,
    pub clock: Box<dyn BuildClock>,
    pub signing_key: SigningKey,
}

impl BuildContext {
    /// Context with deployment defaults; the trust store admits the
    /// publisher's own key so freshly compiled shards verify out of the box.
    pub fn new(signing_key: SigningKey) -> Self {
        let trust = TrustStore::single(&hex::encode(signing_key.verifying_key().to_bytes()));
        Self {
            limits: ScanLimits::default(),
            windows: WindowConfig::default(),
            policy: LocalPolicy::default(),
            trust,
            clock: Box::new(SystemClock),
            signing_key,
        }
    }

    pub fn with_clock(mut self, clock: impl BuildClock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }
}

/// Load a 32-byte Ed25519 seed from a hex file, the way operator tooling
/// stores publisher keys.
pub fn load_signing_key(path: &Path) -> FlashFreezeResult<SigningKey> {
    let text = fs::read_to_string(path).map_err(|e| FlashFreezeError::io(path, e))?;
    let bytes = hex::decode(text.trim())
        .map_err(|_| FlashFreezeError::invalid("signing key must be valid hex"))?;
    let seed: [u8; 32] = bytes
        .try_into()
        .map_err(|_| FlashFreezeError::invalid("signing key must decode to 32 bytes"))?;
    Ok(SigningKey::from_bytes(&seed))
}
