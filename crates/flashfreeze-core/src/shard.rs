// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shard emission. The tree is laid out in a fixed order, every table is
//! written by the deterministic columnar encoder, and `sig/manifest.sig`
//! is written last as the commit point: its absence marks an incomplete
//! shard. On any failure the output directory is discarded.

use crate::columnar::{ColumnData, Table, write_table};
use crate::context::BuildContext;
use crate::error::{FlashFreezeError, FlashFreezeResult};
use crate::graph::{ClaimRow, EntityRow, GraphRows, ProvenanceRow, SpanRow};
use crate::judge::StreamRow;
use crate::manifest::{Manifest, canonical_json};
use crate::merkle;
use crate::records::{RecordStatus, StreamKind};
use ed25519_dalek::Signer;
use std::fs;
use std::path::Path;

pub const SHARD_DIRS: [&str; 5] = ["content", "evidence", "governance", "graph", "sig"];

pub const ENTITIES_TABLE: &str = "graph/entities.parquet";
pub const CLAIMS_TABLE: &str = "graph/claims.parquet";
pub const PROVENANCE_TABLE: &str = "graph/provenance.parquet";
pub const SPANS_TABLE: &str = "evidence/spans.parquet";
pub const STREAMS_TABLE: &str = "evidence/streams.parquet";
pub const TRUST_STORE_FILE: &str = "governance/trust_store.json";
pub const LOCAL_POLICY_FILE: &str = "governance/local_policy.json";
pub const PUBLISHER_KEY_FILE: &str = "sig/publisher.pub";
pub const SIGNATURE_FILE: &str = "sig/manifest.sig";

/// Every file a finished shard contains, shard-relative.
pub const SHARD_FILES: [&str; 10] = [
    SPANS_TABLE,
    STREAMS_TABLE,
    LOCAL_POLICY_FILE,
    TRUST_STORE_FILE,
    CLAIMS_TABLE,
    ENTITIES_TABLE,
    PROVENANCE_TABLE,
    merkle::MANIFEST_FILE,
    SIGNATURE_FILE,
    PUBLISHER_KEY_FILE,
];

#[derive(Debug)]
pub struct ShardReceipt {
    pub manifest: Manifest,
    pub merkle_root: String,
}

pub fn entities_table(rows: &[EntityRow]) -> FlashFreezeResult<Table> {
    Table::new(vec![
        (
            "entity_id".into(),
            ColumnData::Str(rows.iter().map(|r| r.entity_id.clone()).collect()),
        ),
        (
            "namespace".into(),
            ColumnData::Str(rows.iter().map(|r| r.namespace.clone()).collect()),
        ),
        (
            "label".into(),
            ColumnData::Str(rows.iter().map(|r| r.label.clone()).collect()),
        ),
        (
            "type".into(),
            ColumnData::Str(rows.iter().map(|r| r.entity_type.clone()).collect()),
        ),
    ])
}

pub fn claims_table(rows: &[ClaimRow]) -> FlashFreezeResult<Table> {
    Table::new(vec![
        (
            "claim_id".into(),
            ColumnData::Str(rows.iter().map(|r| r.claim_id.clone()).collect()),
        ),
        (
            "subject".into(),
            ColumnData::Str(rows.iter().map(|r| r.subject.clone()).collect()),
        ),
        (
            "predicate".into(),
            ColumnData::Str(rows.iter().map(|r| r.predicate.clone()).collect()),
        ),
        (
            "object".into(),
            ColumnData::Str(rows.iter().map(|r| r.object.clone()).collect()),
        ),
        (
            "object_type".into(),
            ColumnData::Str(rows.iter().map(|r| r.object_type.clone()).collect()),
        ),
        (
            "tier".into(),
            ColumnData::U64(rows.iter().map(|r| u64::from(r.tier)).collect()),
        ),
    ])
}

pub fn provenance_table(rows: &[ProvenanceRow]) -> FlashFreezeResult<Table> {
    Table::new(vec![
        (
            "provenance_id".into(),
            ColumnData::Str(rows.iter().map(|r| r.provenance_id.clone()).collect()),
        ),
        (
            "claim_id".into(),
            ColumnData::Str(rows.iter().map(|r| r.claim_id.clone()).collect()),
        ),
        (
            "span_id".into(),
            ColumnData::Str(rows.iter().map(|r| r.span_id.clone()).collect()),
        ),
        (
            "source_hash".into(),
            ColumnData::Str(rows.iter().map(|r| r.source_hash.clone()).collect()),
        ),
        (
            "byte_start".into(),
            ColumnData::U64(rows.iter().map(|r| r.byte_start).collect()),
        ),
        (
            "byte_end".into(),
            ColumnData::U64(rows.iter().map(|r| r.byte_end).collect()),
        ),
    ])
}

pub fn spans_table(rows: &[SpanRow]) -> FlashFreezeResult<Table> {
    Table::new(vec![
        (
            "span_id".into(),
            ColumnData::Str(rows.iter().map(|r| r.span_id.clone()).collect()),
        ),
        (
            "source_hash".into(),
            ColumnData::Str(rows.iter().map(|r| r.source_hash.clone()).collect()),
        ),
        (
            "byte_start".into(),
            ColumnData::U64(rows.iter().map(|r| r.byte_start).collect()),
        ),
        (
            "byte_end".into(),
            ColumnData::U64(rows.iter().map(|r| r.byte_end).collect()),
        ),
        (
            "text".into(),
            ColumnData::Str(rows.iter().map(|r| r.text.clone()).collect()),
        ),
    ])
}

pub fn streams_table(rows: &[StreamRow]) -> FlashFreezeResult<Table> {
    Table::new(vec![
        (
            "frame_id".into(),
            ColumnData::U64(rows.iter().map(|r| r.frame_id).collect()),
        ),
        (
            "stream".into(),
            ColumnData::Str(rows.iter().map(|r| r.stream.as_str().to_string()).collect()),
        ),
        (
            "file".into(),
            ColumnData::Str(rows.iter().map(|r| r.file.to_string()).collect()),
        ),
        (
            "offset".into(),
            ColumnData::U64(rows.iter().map(|r| r.offset).collect()),
        ),
        (
            "length".into(),
            ColumnData::U64(rows.iter().map(|r| r.length).collect()),
        ),
        (
            "status".into(),
            ColumnData::Str(rows.iter().map(|r| r.status.as_str().to_string()).collect()),
        ),
        (
            "content_hash".into(),
            ColumnData::Str(rows.iter().map(|r| r.content_hash.clone()).collect()),
        ),
    ])
}

fn table_column<'a>(
    table: &'a Table,
    name: &str,
    kind: &str,
) -> FlashFreezeResult<&'a [String]> {
    table
        .str_column(name)
        .ok_or_else(|| FlashFreezeError::invalid(format!("{kind} table is missing column {name:?}")))
}

fn table_u64_column<'a>(
    table: &'a Table,
    name: &str,
    kind: &str,
) -> FlashFreezeResult<&'a [u64]> {
    table
        .u64_column(name)
        .ok_or_else(|| FlashFreezeError::invalid(format!("{kind} table is missing column {name:?}")))
}

pub fn spans_from_table(table: &Table) -> FlashFreezeResult<Vec<SpanRow>> {
    let span_id = table_column(table, "span_id", "spans")?;
    let source_hash = table_column(table, "source_hash", "spans")?;
    let byte_start = table_u64_column(table, "byte_start", "spans")?;
    let byte_end = table_u64_column(table, "byte_end", "spans")?;
    let text = table_column(table, "text", "spans")?;

    Ok((0..table.row_count() as usize)
        .map(|i| SpanRow {
            span_id: span_id[i].clone(),
            source_hash: source_hash[i].clone(),
            byte_start: byte_start[i],
            byte_end: byte_end[i],
            text: text[i].clone(),
        })
        .collect())
}

pub fn streams_from_table(table: &Table) -> FlashFreezeResult<Vec<StreamRow>> {
    let frame_id = table_u64_column(table, "frame_id", "streams")?;
    let stream = table_column(table, "stream", "streams")?;
    let file = table_column(table, "file", "streams")?;
    let offset = table_u64_column(table, "offset", "streams")?;
    let length = table_u64_column(table, "length", "streams")?;
    let status = table_column(table, "status", "streams")?;
    let content_hash = table_column(table, "content_hash", "streams")?;

    let mut rows = Vec::with_capacity(table.row_count() as usize);
    for i in 0..table.row_count() as usize {
        let kind = match stream[i].as_str() {
            "latents" => StreamKind::Latents,
            "residuals" => StreamKind::Residuals,
            other => {
                return Err(FlashFreezeError::invalid(format!(
                    "streams table has unknown stream {other:?}"
                )));
            }
        };
        if file[i] != kind.file_name() {
            return Err(FlashFreezeError::invalid(format!(
                "streams table row {i} names file {:?} for stream {}",
                file[i],
                kind.as_str()
            )));
        }
        let status = RecordStatus::from_str(&status[i]).ok_or_else(|| {
            FlashFreezeError::invalid(format!(
                "streams table has unknown status {:?}",
                status[i]
            ))
        })?;
        rows.push(StreamRow {
            frame_id: frame_id[i],
            stream: kind,
            file: kind.file_name(),
            offset: offset[i],
            length: length[i],
            status,
            content_hash: content_hash[i].clone(),
        });
    }
    Ok(rows)
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> FlashFreezeResult<()> {
    let bytes = canonical_json(value)?;
    fs::write(path, bytes).map_err(|e| FlashFreezeError::io(path, e))
}

fn write_shard_inner(
    ctx: &BuildContext,
    out: &Path,
    capsule_hash: &str,
    graph: &GraphRows,
    streams: &[StreamRow],
) -> FlashFreezeResult<ShardReceipt> {
    for dir in SHARD_DIRS {
        fs::create_dir_all(out.join(dir)).map_err(|e| FlashFreezeError::io(out.join(dir), e))?;
    }

    write_table(&out.join(ENTITIES_TABLE), &entities_table(&graph.entities)?)?;
    write_table(&out.join(CLAIMS_TABLE), &claims_table(&graph.claims)?)?;
    write_table(
        &out.join(PROVENANCE_TABLE),
        &provenance_table(&graph.provenance)?,
    )?;
    write_table(&out.join(SPANS_TABLE), &spans_table(&graph.spans)?)?;
    write_table(&out.join(STREAMS_TABLE), &streams_table(streams)?)?;
    write_json(&out.join(TRUST_STORE_FILE), &ctx.trust)?;
    write_json(&out.join(LOCAL_POLICY_FILE), &ctx.policy)?;

    let merkle_root = hex::encode(merkle::compute_shard_root(out)?);
    let pubkey_hex = hex::encode(ctx.signing_key.verifying_key().to_bytes());
    let manifest = Manifest::new(
        ctx.clock.created(),
        capsule_hash.to_string(),
        merkle_root.clone(),
        pubkey_hex,
    );
    let manifest_bytes = manifest.to_canonical_bytes()?;
    let manifest_path = out.join(merkle::MANIFEST_FILE);
    fs::write(&manifest_path, &manifest_bytes)
        .map_err(|e| FlashFreezeError::io(&manifest_path, e))?;

    let pub_path = out.join(PUBLISHER_KEY_FILE);
    fs::write(&pub_path, ctx.signing_key.verifying_key().to_bytes())
        .map_err(|e| FlashFreezeError::io(&pub_path, e))?;

    let signature = ctx
        .signing_key
        .try_sign(&manifest_bytes)
        .map_err(|e| FlashFreezeError::SigningError {
            reason: e.to_string(),
        })?;
    let sig_path = out.join(SIGNATURE_FILE);
    fs::write(&sig_path, signature.to_bytes()).map_err(|e| FlashFreezeError::io(&sig_path, e))?;

    tracing::info!(
        shard = %out.display(),
        merkle_root = %merkle_root,
        "shard sealed"
    );
    Ok(ShardReceipt {
        manifest,
        merkle_root,
    })
}

/// Write a complete shard. The writer owns `out` exclusively until the
/// signature closes it; a failed emission removes the directory.
pub fn write_shard(
    ctx: &BuildContext,
    out: &Path,
    capsule_hash: &str,
    graph: &GraphRows,
    streams: &[StreamRow],
) -> FlashFreezeResult<ShardReceipt> {
    match write_shard_inner(ctx, out, capsule_hash, graph, streams) {
        Ok(receipt) => Ok(receipt),
        Err(err) => {
            let _ = fs::remove_dir_all(out);
            Err(err)
        }
    }
}
