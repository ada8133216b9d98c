// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! BLAKE3 file-tree Merkle root over a shard directory.
//!
//! Leaves are `BLAKE3(rel_path || 0x00 || file_bytes)` for every file under
//! the root except `manifest.json` and anything under `sig/`, sorted by
//! path in lexicographic byte order. Levels fold pairwise with
//! `BLAKE3(left || right)`; an odd trailing node is duplicated at its level.

use crate::error::{FlashFreezeError, FlashFreezeResult};
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub type Hash32 = [u8; 32];

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIG_DIR: &str = "sig";

const HASH_CHUNK: usize = 64 * 1024;

pub fn node_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

pub fn leaf_hash_file(root: &Path, rel_path: &str) -> FlashFreezeResult<Hash32> {
    let path = root.join(rel_path);
    let mut hasher = blake3::Hasher::new();
    hasher.update(rel_path.as_bytes());
    hasher.update(&[0u8]);

    let mut file = File::open(&path).map_err(|e| FlashFreezeError::io(&path, e))?;
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| FlashFreezeError::io(&path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(*hasher.finalize().as_bytes())
}

/// Fold leaves into a root. A single node per level is the root of that
/// level; an odd trailing node pairs with itself.
pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return *blake3::hash(&[]).as_bytes();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { pair[0] };
            next.push(node_hash(&left, &right));
        }
        level = next;
    }
    level[0]
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> FlashFreezeResult<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| FlashFreezeError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| FlashFreezeError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| FlashFreezeError::io(&path, e))?;
        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            let rel = path
                .strip_prefix(root)
                .map_err(|_| FlashFreezeError::invalid("file escapes the shard root"))?;
            let rel = rel
                .to_str()
                .ok_or_else(|| FlashFreezeError::invalid("non-UTF-8 path in shard"))?
                .replace(std::path::MAIN_SEPARATOR, "/");
            out.push(rel);
        }
    }
    Ok(())
}

/// Every file under the shard root in lexicographic byte order, including
/// the manifest and signature material.
pub fn list_shard_files(root: &Path) -> FlashFreezeResult<Vec<String>> {
    let mut files = Vec::new();
    collect_files(root, root, &mut files)?;
    files.sort_unstable();
    Ok(files)
}

fn is_merkle_excluded(rel_path: &str) -> bool {
    rel_path == MANIFEST_FILE || rel_path.starts_with("sig/")
}

/// Recompute the shard Merkle root from disk bytes.
pub fn compute_shard_root(root: &Path) -> FlashFreezeResult<Hash32> {
    let mut leaves = Vec::new();
    for rel in list_shard_files(root)? {
        if is_merkle_excluded(&rel) {
            continue;
        }
        leaves.push(leaf_hash_file(root, &rel)?);
    }
    Ok(merkle_root(&leaves))
}
