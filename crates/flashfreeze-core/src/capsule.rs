// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Capsule loading. A capsule is read-only after session end; all offsets
//! the pipeline reports are measured on the raw byte stream as stored.

use crate::context::WindowConfig;
use crate::error::{FlashFreezeError, FlashFreezeResult};
use crate::records::{LATENTS_FILE, RESIDUALS_FILE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

pub const META_FILE: &str = "meta.json";
pub const EVENTS_FILE: &str = "events.jsonl";

#[derive(Debug, Clone, Deserialize)]
pub struct CapsuleMeta {
    pub robot_id: String,
    pub session_id: String,
    pub started_at: String,
    pub ended_at: String,
    pub event_log_encoding: String,
    pub event_log_newline: String,
    #[serde(default)]
    pub residual_pre_frames: Option<u64>,
    #[serde(default)]
    pub residual_post_frames: Option<u64>,
}

/// An opened capsule: parsed metadata, the raw event-log bytes, and the
/// stable source hash. Binary streams are located lazily by path.
#[derive(Debug)]
pub struct Capsule {
    root: PathBuf,
    pub meta: CapsuleMeta,
    events: Vec<u8>,
    source_hash: String,
}

impl Capsule {
    pub fn open(root: impl AsRef<Path>) -> FlashFreezeResult<Self> {
        let root = root.as_ref().to_path_buf();

        let meta_path = root.join(META_FILE);
        if !meta_path.is_file() {
            return Err(FlashFreezeError::MissingMeta { capsule: root });
        }
        let meta_bytes = fs::read(&meta_path).map_err(|e| FlashFreezeError::io(&meta_path, e))?;
        let meta: CapsuleMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| FlashFreezeError::invalid(format!("meta.json: {e}")))?;

        if !meta.event_log_encoding.eq_ignore_ascii_case("utf-8") {
            return Err(FlashFreezeError::UnsupportedEncoding {
                detail: format!("event_log_encoding {:?}", meta.event_log_encoding),
            });
        }
        if meta.event_log_newline != "\n" {
            return Err(FlashFreezeError::UnsupportedEncoding {
                detail: format!("event_log_newline {:?}", meta.event_log_newline),
            });
        }

        let events_path = root.join(EVENTS_FILE);
        if !events_path.is_file() {
            return Err(FlashFreezeError::MissingEvents { capsule: root });
        }
        let events = fs::read(&events_path).map_err(|e| FlashFreezeError::io(&events_path, e))?;
        let source_hash = hex::encode(Sha256::digest(&events));

        Ok(Self {
            root,
            meta,
            events,
            source_hash,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Raw `events.jsonl` bytes, exactly as stored.
    pub fn events_bytes(&self) -> &[u8] {
        &self.events
    }

    /// Lowercase hex SHA-256 of the raw event-log bytes.
    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    pub fn latents_path(&self) -> PathBuf {
        self.root.join(LATENTS_FILE)
    }

    pub fn residuals_path(&self) -> PathBuf {
        self.root.join(RESIDUALS_FILE)
    }

    /// Size of the residual stream if the file exists.
    pub fn residuals_size(&self) -> FlashFreezeResult<Option<u64>> {
        let path = self.residuals_path();
        match fs::metadata(&path) {
            Ok(md) => Ok(Some(md.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FlashFreezeError::io(&path, e)),
        }
    }

    /// Residual window for this capsule: per-capsule metadata overrides the
    /// deployment defaults.
    pub fn windows(&self, defaults: WindowConfig) -> WindowConfig {
        WindowConfig {
            pre_frames: self.meta.residual_pre_frames.unwrap_or(defaults.pre_frames),
            post_frames: self
                .meta
                .residual_post_frames
                .unwrap_or(defaults.post_frames),
        }
    }
}
