// Copyright (c) 2026 Joseph Verdicchio and FlashFreeze Contributors
// SPDX-License-Identifier: Apache-2.0

//! Row-set emission: entities, claims, spans, and provenance derived from
//! the validated event stream. Span text is always the verbatim byte slice
//! of the originating `events.jsonl` line, never reserialized.

use crate::error::{FlashFreezeError, FlashFreezeResult};
use crate::events::{Event, EventKind};
use crate::ident::{self, ObjectType};
use std::collections::BTreeMap;

pub const TIER_SAFETY: u8 = 1;
pub const TIER_OBSERVED: u8 = 2;

const FRAME_NAMESPACE: &str = "frame";
const OBSERVATION_NAMESPACE: &str = "observation";
const HAZARD_NAMESPACE: &str = "hazard";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub entity_id: String,
    pub namespace: String,
    pub label: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRow {
    pub claim_id: String,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub object_type: String,
    pub tier: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanRow {
    pub span_id: String,
    pub source_hash: String,
    pub byte_start: u64,
    pub byte_end: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRow {
    pub provenance_id: String,
    pub claim_id: String,
    pub span_id: String,
    pub source_hash: String,
    pub byte_start: u64,
    pub byte_end: u64,
}

/// All four graph tables, deduplicated and sorted by primary ID.
#[derive(Debug, Default)]
pub struct GraphRows {
    pub entities: Vec<EntityRow>,
    pub claims: Vec<ClaimRow>,
    pub spans: Vec<SpanRow>,
    pub provenance: Vec<ProvenanceRow>,
}

struct GraphBuilder<'a> {
    source_hash: &'a str,
    event_bytes: &'a [u8],
    entities: BTreeMap<String, EntityRow>,
    claims: BTreeMap<String, ClaimRow>,
    spans: BTreeMap<String, SpanRow>,
    provenance: BTreeMap<String, ProvenanceRow>,
}

impl<'a> GraphBuilder<'a> {
    fn new(source_hash: &'a str, event_bytes: &'a [u8]) -> Self {
        Self {
            source_hash,
            event_bytes,
            entities: BTreeMap::new(),
            claims: BTreeMap::new(),
            spans: BTreeMap::new(),
            provenance: BTreeMap::new(),
        }
    }

    fn add_entity(&mut self, namespace: &str, label: &str, entity_type: &str) -> String {
        let entity_id = ident::entity_id(namespace, label);
        self.entities
            .entry(entity_id.clone())
            .or_insert_with(|| EntityRow {
                entity_id: entity_id.clone(),
                namespace: namespace.to_string(),
                label: label.to_string(),
                entity_type: entity_type.to_string(),
            });
        entity_id
    }

    fn add_span(&mut self, event: &Event) -> FlashFreezeResult<String> {
        let start = event.byte_start as usize;
        let end = event.byte_end as usize;
        let slice = self
            .event_bytes
            .get(start..end)
            .ok_or_else(|| FlashFreezeError::invalid("event span outside the source bytes"))?;
        let text = std::str::from_utf8(slice)
            .map_err(|e| FlashFreezeError::invalid(format!("event span not UTF-8: {e}")))?;
        let span_id = ident::span_id(self.source_hash, event.byte_start, event.byte_end);
        self.spans.entry(span_id.clone()).or_insert_with(|| SpanRow {
            span_id: span_id.clone(),
            source_hash: self.source_hash.to_string(),
            byte_start: event.byte_start,
            byte_end: event.byte_end,
            text: text.to_string(),
        });
        Ok(span_id)
    }

    fn add_claim(
        &mut self,
        subject: &str,
        predicate: &str,
        object: &str,
        object_type: ObjectType,
        tier: u8,
        event: &Event,
    ) -> FlashFreezeResult<()> {
        let claim_id = ident::claim_id(subject, predicate, object, object_type);
        let span_id = self.add_span(event)?;
        let provenance_id = ident::provenance_id(&claim_id, &span_id);

        self.claims.entry(claim_id.clone()).or_insert_with(|| ClaimRow {
            claim_id: claim_id.clone(),
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            object_type: object_type.as_str().to_string(),
            tier,
        });
        self.provenance
            .entry(provenance_id.clone())
            .or_insert_with(|| ProvenanceRow {
                provenance_id: provenance_id.clone(),
                claim_id,
                span_id,
                source_hash: self.source_hash.to_string(),
                byte_start: event.byte_start,
                byte_end: event.byte_end,
            });
        Ok(())
    }

    fn ingest(&mut self, event: &Event) -> FlashFreezeResult<()> {
        let frame_label = event.frame_id.to_string();
        let frame_id = self.add_entity(FRAME_NAMESPACE, &frame_label, "frame");

        match event.kind {
            EventKind::Observation => {
                let label = event.label.as_deref().unwrap_or("observation");
                let object = self.add_entity(OBSERVATION_NAMESPACE, label, "observation");
                self.add_claim(
                    &frame_id,
                    "observed",
                    &object,
                    ObjectType::Entity,
                    TIER_OBSERVED,
                    event,
                )?;
            }
            EventKind::SafetyTrigger => {
                let label = event.label.as_deref().unwrap_or("safety_trigger");
                let object = self.add_entity(HAZARD_NAMESPACE, label, "hazard");
                self.add_claim(
                    &frame_id,
                    "triggered",
                    &object,
                    ObjectType::Entity,
                    TIER_SAFETY,
                    event,
                )?;
            }
            EventKind::Other => {}
        }
        Ok(())
    }

    fn finish(self) -> GraphRows {
        GraphRows {
            entities: self.entities.into_values().collect(),
            claims: self.claims.into_values().collect(),
            spans: self.spans.into_values().collect(),
            provenance: self.provenance.into_values().collect(),
        }
    }
}

/// Build the graph tables from validated events. Row order within each
/// table is lexicographic by primary ID, so output is reproducible for
/// identical input.
pub fn build_graph(
    events: &[Event],
    event_bytes: &[u8],
    source_hash: &str,
) -> FlashFreezeResult<GraphRows> {
    let mut builder = GraphBuilder::new(source_hash, event_bytes);
    for event in events {
        builder.ingest(event)?;
    }
    Ok(builder.finish())
}
