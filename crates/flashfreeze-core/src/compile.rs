// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! The compilation pipeline: a deterministic fold from capsule to sealed
//! shard. Stages run single-threaded in a fixed order so identical inputs
//! produce bit-identical output.

use crate::capsule::Capsule;
use crate::context::BuildContext;
use crate::error::FlashFreezeResult;
use crate::{events, graph, judge, shard};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct CompileReport {
    pub shard_root: PathBuf,
    pub merkle_root: String,
    pub created: String,
    pub entities: usize,
    pub claims: usize,
    pub spans: usize,
    pub stream_rows: usize,
    pub resyncs: u64,
    pub skipped_bytes: u64,
}

pub fn compile_capsule(
    ctx: &BuildContext,
    capsule_dir: &Path,
    out_dir: &Path,
) -> FlashFreezeResult<CompileReport> {
    tracing::info!(capsule = %capsule_dir.display(), "compiling capsule");

    let capsule = Capsule::open(capsule_dir)?;
    let events = events::scan_events(capsule.events_bytes())?;
    tracing::debug!(events = events.len(), "event log scanned");

    let windows = capsule.windows(ctx.windows);
    let judged = judge::judge(&capsule, &events, &ctx.limits, windows, &ctx.policy)?;
    tracing::debug!(
        latent_rows = judged.latent_rows,
        residual_rows = judged.residual_rows,
        resyncs = judged.resyncs,
        "streams judged"
    );

    let graph = graph::build_graph(&events, capsule.events_bytes(), capsule.source_hash())?;
    let receipt = shard::write_shard(
        ctx,
        out_dir,
        capsule.source_hash(),
        &graph,
        &judged.rows,
    )?;

    Ok(CompileReport {
        shard_root: out_dir.to_path_buf(),
        merkle_root: receipt.merkle_root,
        created: receipt.manifest.created,
        entities: graph.entities.len(),
        claims: graph.claims.len(),
        spans: graph.spans.len(),
        stream_rows: judged.rows.len(),
        resyncs: judged.resyncs,
        skipped_bytes: judged.skipped_bytes,
    })
}
